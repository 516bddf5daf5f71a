//! Process roles.
//!
//! # Roles
//! ```text
//! Writer:   balancers/ + discovery/ + clusters/
//!     cluster membership change → reconcile loop → Balancer::sync(all clusters)
//!
//! Reporter: discovery/ + services/
//!     check loop per service → port came up / went down → report_up / report_down
//! ```
//!
//! # Shutdown Order
//! 1. Trigger the shared shutdown signal
//! 2. Join the config directory watches
//! 3. Stop every discovery method
//! 4. Join named tasks (watches, check loops, reconcile loop)
//! 5. Drain the worker pool

pub mod reporter;
pub mod writer;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::discovery::DiscoveryMethod;
use crate::lifecycle::Shutdown;
use crate::plugins::Plugins;
use crate::reload::{Registry, TaskTable, WorkerPool};

pub use reporter::Reporter;
pub use writer::Writer;

/// Resources shared by everything one role runs.
#[derive(Clone)]
pub struct Context {
    pub config_dir: PathBuf,
    pub plugins: Arc<Plugins>,
    pub shutdown: Shutdown,
    pub pool: WorkerPool,
    pub tasks: Arc<TaskTable>,
}

impl Context {
    pub fn new(config_dir: &Path, plugins: Arc<Plugins>, shutdown: Shutdown) -> Self {
        Self {
            config_dir: config_dir.to_path_buf(),
            plugins,
            shutdown,
            pool: WorkerPool::default(),
            tasks: Arc::new(TaskTable::new()),
        }
    }

    /// Steps 2 to 5 of the shutdown order; the signal must already be set.
    async fn wind_down(&self, watches: &Mutex<Vec<JoinHandle<()>>>, discovery: &Registry<DiscoveryMethod>) {
        for handle in watches.lock().await.drain(..) {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Config watch ended abnormally");
            }
        }
        for method in discovery.values() {
            method.discovery().stop().await;
        }
        self.tasks.join_all().await;
        self.pool.drain().await;
    }
}
