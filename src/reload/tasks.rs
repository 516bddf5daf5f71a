//! Named long-running tasks (cluster watches, check loops).

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Entry {
    handle: JoinHandle<()>,
    stop: CancellationToken,
}

/// Task name → handle, so one task can be cancelled and joined on its own.
#[derive(Default)]
pub struct TaskTable {
    tasks: Mutex<HashMap<String, Entry>>,
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `task` under `name`, replacing (and cancelling) any previous one.
    ///
    /// The task receives a token cancelled by `stop(name)` or by `parent`.
    pub fn spawn<F, Fut>(&self, name: impl Into<String>, parent: &CancellationToken, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let stop = parent.child_token();
        let handle = tokio::spawn(task(stop.clone()));

        let previous = self.lock().insert(name.clone(), Entry { handle, stop });
        if let Some(previous) = previous {
            tracing::debug!(task = %name, "Replacing running task");
            previous.stop.cancel();
        }
        tracing::debug!(task = %name, "Task started");
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The table without tasks that already ended on their own.
    fn live(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        let mut tasks = self.lock();
        tasks.retain(|name, entry| {
            let finished = entry.handle.is_finished();
            if finished {
                tracing::debug!(task = %name, "Task exited on its own");
            }
            !finished
        });
        tasks
    }

    pub fn contains(&self, name: &str) -> bool {
        self.live().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.live().keys().cloned().collect();
        names.sort();
        names
    }

    /// Cancel one task and wait for it. Unknown names are ignored.
    pub async fn stop(&self, name: &str) {
        let entry = self.lock().remove(name);
        let Some(entry) = entry else {
            return;
        };
        entry.stop.cancel();
        if let Err(e) = entry.handle.await {
            tracing::error!(task = %name, error = %e, "Task ended abnormally");
        }
        tracing::debug!(task = %name, "Task stopped");
    }

    /// Cancel and join every task.
    pub async fn join_all(&self) {
        let entries: Vec<(String, Entry)> = self.lock().drain().collect();
        for (_, entry) in &entries {
            entry.stop.cancel();
        }
        for (name, entry) in entries {
            if let Err(e) = entry.handle.await {
                tracing::error!(task = %name, error = %e, "Task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_stop_cancels_one_task() {
        let table = TaskTable::new();
        let root = CancellationToken::new();
        let stopped = Arc::new(AtomicUsize::new(0));

        for name in ["watch:a", "watch:b"] {
            let stopped = stopped.clone();
            table.spawn(name, &root, move |stop| async move {
                stop.cancelled().await;
                stopped.fetch_add(1, Ordering::SeqCst);
            });
        }

        table.stop("watch:a").await;
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
        assert_eq!(table.names(), vec!["watch:b"]);

        root.cancel();
        table.join_all().await;
        assert_eq!(stopped.load(Ordering::SeqCst), 2);
        assert!(table.names().is_empty());
    }

    #[tokio::test]
    async fn test_spawn_replaces_previous() {
        let table = TaskTable::new();
        let root = CancellationToken::new();
        let first_stopped = Arc::new(AtomicUsize::new(0));

        let flag = first_stopped.clone();
        table.spawn("check:web", &root, move |stop| async move {
            stop.cancelled().await;
            flag.fetch_add(1, Ordering::SeqCst);
        });
        table.spawn("check:web", &root, |stop| async move { stop.cancelled().await });

        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while first_stopped.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(table.contains("check:web"));
        table.join_all().await;
    }

    #[tokio::test]
    async fn test_task_that_exits_is_no_longer_listed() {
        let table = TaskTable::new();
        let root = CancellationToken::new();

        table.spawn("watch:gone", &root, |_stop| async {});
        table.spawn("watch:live", &root, |stop| async move { stop.cancelled().await });

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        while table.contains("watch:gone") && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(!table.contains("watch:gone"));
        assert!(table.contains("watch:live"));
        assert_eq!(table.names(), vec!["watch:live"]);

        table.join_all().await;
    }
}
