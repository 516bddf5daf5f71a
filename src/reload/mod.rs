//! Hot reload subsystem.
//!
//! # Data Flow
//! ```text
//! <config_dir>/<kind>/ (config::watcher)
//!     → engine.rs: created/modified → load, validate → update (add if unknown)
//!                  removed → remove
//!     → registry.rs: name → live item
//!     → hooks.rs: on_add / on_update / on_remove, run on pool.rs
//! ```
//!
//! # Design Decisions
//! - One engine and one registry per item kind, owned by the orchestrator
//! - `apply_config` runs inline; hooks run on the bounded worker pool
//! - Hook failures are logged, never propagated to the watcher
//! - A removal only leaves the registry once its hook succeeded

pub mod engine;
pub mod hooks;
pub mod pool;
pub mod registry;
pub mod tasks;

use std::path::PathBuf;

use thiserror::Error;

pub use engine::ReloadEngine;
pub use hooks::{Hooks, NoHooks};
pub use pool::WorkerPool;
pub use registry::Registry;
pub use tasks::TaskTable;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("filesystem watch error: {0}")]
    Notify(#[from] notify::Error),

    #[error("cannot read config directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
