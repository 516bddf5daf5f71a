//! Add/update/remove dispatch for one item kind.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::loader::{item_name, load_raw};
use crate::config::watcher::{ConfigEvent, ConfigWatcher};
use crate::config::{Configurable, RawConfig};
use crate::plugins::Plugins;
use crate::reload::{Hooks, Registry, WatchError, WorkerPool};

/// Keeps the registry of one item kind in sync with its config directory.
pub struct ReloadEngine<T: Configurable> {
    dir: PathBuf,
    registry: Arc<Registry<T>>,
    hooks: Arc<dyn Hooks<T>>,
    plugins: Arc<Plugins>,
    pool: WorkerPool,
}

impl<T: Configurable> ReloadEngine<T> {
    /// Engine for `<config_dir>/<T::SUBDIRECTORY>`.
    pub fn new(
        config_dir: &Path,
        registry: Arc<Registry<T>>,
        hooks: Arc<dyn Hooks<T>>,
        plugins: Arc<Plugins>,
        pool: WorkerPool,
    ) -> Self {
        Self {
            dir: config_dir.join(T::SUBDIRECTORY),
            registry,
            hooks,
            plugins,
            pool,
        }
    }

    pub fn registry(&self) -> &Arc<Registry<T>> {
        &self.registry
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn dispatch<F>(&self, action: &'static str, name: &str, hook: F)
    where
        F: Future<Output = crate::Result<()>> + Send + 'static,
    {
        let name = name.to_string();
        self.pool.spawn(async move {
            if let Err(e) = hook.await {
                tracing::error!(kind = T::KIND, name = %name, hook = action, error = %e, "Hook failed");
            }
        });
    }

    /// Register a new item. A known name is treated as an update with the
    /// item's config.
    pub fn add(&self, name: &str, item: Arc<T>) {
        if self.registry.contains(name) {
            tracing::debug!(kind = T::KIND, name = %name, "Already present, updating instead");
            self.update(name, item.config());
            return;
        }

        tracing::info!(kind = T::KIND, name = %name, "Adding");
        self.registry.insert(name, item.clone());
        let hooks = self.hooks.clone();
        self.dispatch("on_add", name, async move { hooks.on_add(item).await });
    }

    /// Apply new config to an item, creating it if unknown.
    ///
    /// Invalid config is logged and leaves the current item untouched.
    pub fn update(&self, name: &str, raw: RawConfig) {
        if let Err(e) = T::validate_config(name, &raw, &self.plugins) {
            tracing::error!(kind = T::KIND, name = %name, error = %e, "Invalid config, keeping previous state");
            return;
        }

        let Some(item) = self.registry.get(name) else {
            match T::from_config(name, &raw, &self.plugins) {
                Ok(item) => self.add(name, Arc::new(item)),
                Err(e) => tracing::error!(kind = T::KIND, name = %name, error = %e, "Could not create"),
            }
            return;
        };

        if let Err(e) = item.apply_config(&raw) {
            tracing::error!(kind = T::KIND, name = %name, error = %e, "Could not apply config");
            return;
        }

        tracing::info!(kind = T::KIND, name = %name, "Updated");
        let hooks = self.hooks.clone();
        self.dispatch("on_update", name, async move { hooks.on_update(item, raw).await });
    }

    /// Remove an item once its `on_remove` hook succeeds. Unknown names are
    /// ignored.
    pub fn remove(&self, name: &str) {
        let Some(item) = self.registry.get(name) else {
            tracing::debug!(kind = T::KIND, name = %name, "Unknown item, nothing to remove");
            return;
        };

        tracing::info!(kind = T::KIND, name = %name, "Removing");
        let hooks = self.hooks.clone();
        let registry = self.registry.clone();
        let owned = name.to_string();
        self.dispatch("on_remove", name, async move {
            hooks.on_remove(item.clone()).await?;
            if registry.remove_exact(&owned, &item) {
                hooks.removed(&owned);
            }
            Ok(())
        });
    }

    /// Load one file and apply it.
    pub fn load_file(&self, path: &Path) {
        let Some(name) = item_name(path) else {
            return;
        };
        match load_raw(path) {
            Ok(raw) => self.update(&name, raw),
            Err(e) => tracing::error!(kind = T::KIND, path = ?path, error = %e, "Could not load config file"),
        }
    }

    pub fn handle_event(&self, event: ConfigEvent) {
        match event {
            ConfigEvent::Created(path) | ConfigEvent::Modified(path) => self.load_file(&path),
            ConfigEvent::Removed(path) => {
                if let Some(name) = item_name(&path) {
                    self.remove(&name);
                }
            }
        }
    }

    /// Load every file already present, in name order.
    pub fn load_existing(&self) -> Result<(), WatchError> {
        let (watcher, _events) = ConfigWatcher::new(&self.dir);
        let files = watcher.existing_files().map_err(|source| WatchError::Io {
            path: self.dir.clone(),
            source,
        })?;
        for file in files {
            self.load_file(&file);
        }
        Ok(())
    }

    /// Load the directory, then follow changes until `shutdown`.
    ///
    /// The directory is created if missing.
    pub fn watch(self: &Arc<Self>, shutdown: CancellationToken) -> Result<JoinHandle<()>, WatchError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| WatchError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let (watcher, mut events) = ConfigWatcher::new(&self.dir);
        let notifier = watcher.run()?;
        self.load_existing()?;

        let engine = self.clone();
        Ok(tokio::spawn(async move {
            // Dropping the notifier ends event delivery.
            let _notifier = notifier;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => engine.handle_event(event),
                        None => break,
                    },
                }
            }
            tracing::info!(kind = T::KIND, path = ?engine.dir, "Stopped watching config directory");
        }))
    }
}
