//! Config directory watcher for hot reload.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::is_config_file;

/// A change to one config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEvent {
    Created(PathBuf),
    Modified(PathBuf),
    Removed(PathBuf),
}

/// A watcher that monitors one item-kind directory for changes.
pub struct ConfigWatcher {
    dir: PathBuf,
    event_tx: mpsc::UnboundedSender<ConfigEvent>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher.
    ///
    /// Returns the watcher and a receiver for file events.
    pub fn new(dir: &Path) -> (Self, mpsc::UnboundedReceiver<ConfigEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                dir: dir.to_path_buf(),
                event_tx,
            },
            event_rx,
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Config files already present, in name order.
    pub fn existing_files(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file() && is_config_file(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Start watching the directory in a background thread.
    ///
    /// Dropping the returned watcher stops event delivery.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.event_tx.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for change in translate(event) {
                        let _ = tx.send(change);
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.dir, "Config watcher started");
        Ok(watcher)
    }
}

/// Map a raw filesystem event onto config file changes.
///
/// A rename is a removal of the old name followed by a creation of the new one.
pub fn translate(event: Event) -> Vec<ConfigEvent> {
    let mut changes = Vec::new();
    let paths = event.paths;

    match event.kind {
        EventKind::Create(_) => {
            changes.extend(paths.into_iter().map(ConfigEvent::Created));
        }
        EventKind::Remove(_) => {
            changes.extend(paths.into_iter().map(ConfigEvent::Removed));
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            changes.extend(paths.into_iter().map(ConfigEvent::Removed));
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            changes.extend(paths.into_iter().map(ConfigEvent::Created));
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = paths.into_iter();
            if let Some(from) = paths.next() {
                changes.push(ConfigEvent::Removed(from));
            }
            if let Some(to) = paths.next() {
                changes.push(ConfigEvent::Created(to));
            }
        }
        EventKind::Modify(ModifyKind::Metadata(_)) => {}
        EventKind::Modify(_) => {
            changes.extend(paths.into_iter().map(ConfigEvent::Modified));
        }
        _ => {}
    }

    changes.retain(|change| {
        let path = match change {
            ConfigEvent::Created(p) | ConfigEvent::Modified(p) | ConfigEvent::Removed(p) => p,
        };
        is_config_file(path)
    });
    changes
}
