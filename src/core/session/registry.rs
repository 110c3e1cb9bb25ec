// src/core/session/registry.rs

//! The set of closeable resources a session has created and not yet released.

use super::Closeable;
use crate::core::connector::ResourceId;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// A thread-safe, creation-ordered map of a session's open resources.
///
/// The lock is held only while the map itself changes. Callers that need to act
/// on every resource take a [`snapshot`](Self::snapshot) first, because a
/// resource's `close` re-enters the registry to remove itself.
#[derive(Default)]
pub struct ResourceRegistry {
    resources: Mutex<IndexMap<ResourceId, Arc<dyn Closeable>>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add(&self, resource: Arc<dyn Closeable>) {
        let id = resource.resource_id();
        self.resources.lock().insert(id, resource);
    }

    /// Removes a resource. Returns false if it was not registered.
    pub fn remove(&self, id: &ResourceId) -> bool {
        self.resources.lock().shift_remove(id).is_some()
    }

    /// A point-in-time copy of the registered resources, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<dyn Closeable>> {
        self.resources.lock().values().cloned().collect()
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.resources.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.resources.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.lock().is_empty()
    }
}
