//! Per-kind reactions to registry changes.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::RawConfig;

/// Hooks run on the worker pool after the registry changed.
///
/// Errors are logged by the engine. A failing `on_remove` keeps the item
/// registered.
#[async_trait]
pub trait Hooks<T>: Send + Sync + 'static
where
    T: Send + Sync + 'static,
{
    async fn on_add(&self, _item: Arc<T>) -> crate::Result<()> {
        Ok(())
    }

    async fn on_update(&self, _item: Arc<T>, _raw: RawConfig) -> crate::Result<()> {
        Ok(())
    }

    async fn on_remove(&self, _item: Arc<T>) -> crate::Result<()> {
        Ok(())
    }

    /// The item has left the registry.
    fn removed(&self, _name: &str) {}
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl<T> Hooks<T> for NoHooks where T: Send + Sync + 'static {}
