//! Crate-level error type.
//!
//! Each subsystem has its own error enum; this one exists so hooks and
//! orchestrators can mix them behind a single `?`.

use thiserror::Error;

use crate::balancer::BalancerError;
use crate::config::ConfigError;
use crate::discovery::DiscoveryError;
use crate::reload::WatchError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Balancer(#[from] BalancerError),

    #[error(transparent)]
    Watch(#[from] WatchError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
