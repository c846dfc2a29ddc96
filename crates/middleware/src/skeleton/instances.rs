use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

/// Storage for instances of an identified service, keyed by the id handed
/// out to callers.
pub struct InstanceRegistry<S> {
    next_id: AtomicI32,
    instances: DashMap<i32, Arc<S>>,
}

impl<S> InstanceRegistry<S> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicI32::new(1),
            instances: DashMap::new(),
        }
    }

    /// Store an instance and return its id.
    pub fn insert(&self, instance: S) -> i32 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.instances.insert(id, Arc::new(instance));
        id
    }

    /// Instance with this id.
    #[must_use]
    pub fn get(&self, id: i32) -> Option<Arc<S>> {
        self.instances.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Drop the instance with this id.
    pub fn remove(&self, id: i32) -> Option<Arc<S>> {
        self.instances.remove(&id).map(|(_, instance)| instance)
    }

    /// Number of live instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether no instance is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

impl<S> Default for InstanceRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for InstanceRegistry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("live", &self.instances.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_removable() {
        let registry = InstanceRegistry::new();
        let a = registry.insert("first");
        let b = registry.insert("second");

        assert_ne!(a, b);
        assert_eq!(registry.get(a).as_deref(), Some(&"first"));
        assert_eq!(registry.len(), 2);

        assert!(registry.remove(a).is_some());
        assert!(registry.get(a).is_none());
        assert!(registry.remove(a).is_none());
        assert!(!registry.is_empty());
    }
}
