//! Typed name → item map for one item kind.

use std::sync::Arc;

use dashmap::DashMap;

pub struct Registry<T> {
    items: DashMap<String, Arc<T>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self { items: DashMap::new() }
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<T>> {
        self.items.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.contains_key(name)
    }

    pub(crate) fn insert(&self, name: &str, item: Arc<T>) {
        self.items.insert(name.to_string(), item);
    }

    /// Remove `name` only if it still maps to `item`.
    pub(crate) fn remove_exact(&self, name: &str, item: &Arc<T>) -> bool {
        self.items.remove_if(name, |_, current| Arc::ptr_eq(current, item)).is_some()
    }

    /// Snapshot of all items, ordered by name.
    pub fn values(&self) -> Vec<Arc<T>> {
        let mut entries: Vec<(String, Arc<T>)> = self
            .items
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|(_, item)| item).collect()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.items.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
