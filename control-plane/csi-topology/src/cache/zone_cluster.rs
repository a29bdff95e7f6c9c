use parking_lot::RwLock;
use std::collections::HashMap;

/// Index from availability zone name to the storage cluster serving it.
/// A zone maps to exactly one cluster, the last write wins.
#[derive(Debug, Default)]
pub struct ZoneClusterCache {
    inner: RwLock<HashMap<String, String>>,
}

impl ZoneClusterCache {
    /// Return a new empty `Self`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map the zone to the cluster, returning the previously mapped cluster.
    pub fn set(&self, zone: &str, cluster: &str) -> Option<String> {
        self.inner
            .write()
            .insert(zone.to_string(), cluster.to_string())
    }

    /// Forget the zone, returning the cluster it was mapped to.
    pub fn delete(&self, zone: &str) -> Option<String> {
        self.inner.write().remove(zone)
    }

    /// Get the cluster serving the zone.
    pub fn get(&self, zone: &str) -> Option<String> {
        self.inner.read().get(zone).cloned()
    }

    /// The known zones, sorted.
    pub fn zones(&self) -> Vec<String> {
        let mut zones = self.inner.read().keys().cloned().collect::<Vec<_>>();
        zones.sort();
        zones
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
