use crate::crd::CsiNodeTopology;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Last seen topology record of every node, keyed by node name, regardless of its status.
#[derive(Debug, Default)]
pub struct NodeRecordCache {
    inner: RwLock<HashMap<String, CsiNodeTopology>>,
}

impl NodeRecordCache {
    /// Return a new empty `Self`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record of the node.
    pub fn insert(&self, name: &str, record: CsiNodeTopology) {
        self.inner.write().insert(name.to_string(), record);
    }

    /// Remove the record of the node.
    pub fn remove(&self, name: &str) -> Option<CsiNodeTopology> {
        self.inner.write().remove(name)
    }

    /// Get a copy of the record of the node.
    pub fn get(&self, name: &str) -> Option<CsiNodeTopology> {
        self.inner.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
