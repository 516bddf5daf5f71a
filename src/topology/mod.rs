//! Cluster topology: nodes, peers, clusters and local services.
//!
//! # Ownership
//! ```text
//! Cluster.nodes   written by the membership watcher (wholesale swap)
//!                 read by balancer sync (snapshot)
//! Service state   owned by the service's check loop
//! ```

pub mod cluster;
pub mod node;
pub mod peer;
pub mod service;

pub use cluster::Cluster;
pub use node::Node;
pub use peer::Peer;
pub use service::{PortStatus, Service};

use thiserror::Error;

/// A membership record that could not be decoded.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record is not a JSON object")]
    NotAMap,

    #[error("record has no '{0}'")]
    Missing(&'static str),

    #[error("record has an invalid '{0}'")]
    Invalid(&'static str),
}
