use crate::types::TopologyLabels;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Index from topology label *value* to the names of the nodes carrying that value.
/// Example: {us-east: {n1, n2}, zone-a: {n1}, zone-b: {n2}}
///
/// The index is keyed by value alone, which requires label values not to be repeated
/// across label categories, ie using `us-east` both as a region and as a zone is not
/// allowed. Such collisions are reported but not rejected.
#[derive(Debug, Default)]
pub struct DomainNodeCache {
    inner: RwLock<DomainNodes>,
}

#[derive(Debug, Default)]
struct DomainNodes {
    nodes: HashMap<String, HashSet<String>>,
    /// The label key each value was first seen with.
    categories: HashMap<String, String>,
}

impl DomainNodes {
    fn add(&mut self, value: &str, node: &str) {
        self.nodes
            .entry(value.to_string())
            .or_default()
            .insert(node.to_string());
    }
    /// Empty sets are kept around rather than removing the value, but a value left
    /// without nodes no longer holds on to its label key.
    fn remove(&mut self, value: &str, node: &str) {
        if let Some(nodes) = self.nodes.get_mut(value) {
            nodes.remove(node);
            if nodes.is_empty() {
                self.categories.remove(value);
            }
        }
    }
    fn track_category(&mut self, key: &str, value: &str, node: &str) {
        match self.categories.get(value) {
            Some(known) if known != key => {
                warn!(
                    node.name = node,
                    label.value = value,
                    label.key = key,
                    label.known_key = known.as_str(),
                    "Topology label value is repeated across label categories"
                );
            }
            Some(_) => {}
            None => {
                self.categories.insert(value.to_string(), key.to_string());
            }
        }
    }
    fn add_node(&mut self, node: &str, labels: &TopologyLabels) {
        for (key, value) in labels {
            self.track_category(key, value, node);
            self.add(value, node);
        }
    }
    fn remove_node(&mut self, node: &str, labels: &TopologyLabels) {
        for value in labels.values() {
            self.remove(value, node);
        }
    }
}

impl DomainNodeCache {
    /// Return a new empty `Self`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the node to the set of the given label value.
    pub fn add(&self, value: &str, node: &str) {
        self.inner.write().add(value, node);
    }

    /// Remove the node from the set of the given label value.
    pub fn remove(&self, value: &str, node: &str) {
        self.inner.write().remove(value, node);
    }

    /// Add the node under each of its label values.
    pub fn add_node(&self, node: &str, labels: &TopologyLabels) {
        self.inner.write().add_node(node, labels);
    }

    /// Remove the node from each of its label values.
    pub fn remove_node(&self, node: &str, labels: &TopologyLabels) {
        self.inner.write().remove_node(node, labels);
    }

    /// Remove the node from its previous label values and add it under the new ones, if
    /// any, as a single exclusive operation. Readers never observe the intermediate state.
    pub fn replace_node(&self, node: &str, old: &TopologyLabels, new: Option<&TopologyLabels>) {
        let mut inner = self.inner.write();
        inner.remove_node(node, old);
        if let Some(new) = new {
            inner.add_node(node, new);
        }
    }

    /// Names of the nodes which carry every one of the given label values.
    /// An empty input, or any value without nodes, yields an empty set.
    pub fn nodes_matching_all<S: AsRef<str>>(&self, values: &[S]) -> HashSet<String> {
        let inner = self.inner.read();
        let mut values = values.iter();
        let Some(first) = values.next() else {
            return HashSet::new();
        };
        let Some(first) = inner.nodes.get(first.as_ref()) else {
            return HashSet::new();
        };
        let mut matching = first.clone();
        for value in values {
            match inner.nodes.get(value.as_ref()) {
                Some(nodes) => matching.retain(|node| nodes.contains(node)),
                None => return HashSet::new(),
            }
            if matching.is_empty() {
                break;
            }
        }
        matching
    }

    /// Names of the nodes carrying the given label value.
    pub fn nodes(&self, value: &str) -> HashSet<String> {
        self.inner
            .read()
            .nodes
            .get(value)
            .cloned()
            .unwrap_or_default()
    }

    /// The label key the value is currently tracked under.
    pub fn category(&self, value: &str) -> Option<String> {
        self.inner.read().categories.get(value).cloned()
    }

    /// Number of label values known to the cache, including those left without nodes.
    pub fn len(&self) -> usize {
        self.inner.read().nodes.len()
    }

    /// Check if the cache has never seen any label value.
    pub fn is_empty(&self) -> bool {
        self.inner.read().nodes.is_empty()
    }

    /// A point in time copy of the whole index.
    pub fn snapshot(&self) -> HashMap<String, HashSet<String>> {
        self.inner.read().nodes.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
    use std::collections::BTreeSet;

    fn set(nodes: &[&str]) -> HashSet<String> {
        nodes.iter().map(|n| n.to_string()).collect()
    }
    fn labels(pairs: &[(&str, &str)]) -> TopologyLabels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn intersection() {
        let cache = DomainNodeCache::new();
        cache.add("us-east", "n1");
        cache.add("us-east", "n2");
        cache.add("zone-a", "n1");
        cache.add("zone-b", "n2");

        assert_eq!(cache.nodes_matching_all(&["us-east", "zone-a"]), set(&["n1"]));
        assert_eq!(cache.nodes_matching_all(&["us-east"]), set(&["n1", "n2"]));
        assert!(cache.nodes_matching_all(&["zone-a", "zone-b"]).is_empty());
        assert!(cache.nodes_matching_all(&["us-east", "zone-c"]).is_empty());
        assert!(cache.nodes_matching_all::<&str>(&[]).is_empty());
    }

    #[test]
    fn idempotent_mutations() {
        let cache = DomainNodeCache::new();
        cache.add("zone-a", "n1");
        cache.add("zone-a", "n1");
        assert_eq!(cache.nodes("zone-a").len(), 1);

        cache.remove("zone-a", "n2");
        cache.remove("zone-b", "n1");
        assert_eq!(cache.nodes("zone-a"), set(&["n1"]));

        cache.remove("zone-a", "n1");
        cache.remove("zone-a", "n1");
        assert!(cache.nodes("zone-a").is_empty());
        // the emptied value is kept as a key
        assert_eq!(cache.len(), 1);
        assert!(cache.nodes_matching_all(&["zone-a"]).is_empty());
    }

    #[test]
    fn replace_node_labels() {
        let cache = DomainNodeCache::new();
        let old = labels(&[("region", "us-east"), ("zone", "zone-a")]);
        let new = labels(&[("region", "us-east"), ("zone", "zone-b")]);
        cache.add_node("n1", &old);
        cache.add_node("n2", &old);

        cache.replace_node("n1", &old, Some(&new));
        assert_eq!(cache.nodes("zone-a"), set(&["n2"]));
        assert_eq!(cache.nodes("zone-b"), set(&["n1"]));
        assert_eq!(cache.nodes("us-east"), set(&["n1", "n2"]));

        cache.replace_node("n2", &old, None);
        assert!(cache.nodes("zone-a").is_empty());
        assert_eq!(cache.nodes("us-east"), set(&["n1"]));
    }

    #[test]
    fn released_value_category() {
        let cache = DomainNodeCache::new();
        cache.add_node("n1", &labels(&[("zone", "east")]));
        cache.add_node("n2", &labels(&[("zone", "east")]));
        assert_eq!(cache.category("east").as_deref(), Some("zone"));

        cache.remove_node("n1", &labels(&[("zone", "east")]));
        assert_eq!(cache.category("east").as_deref(), Some("zone"));

        // once no node carries the value it can be reused under another key
        cache.remove_node("n2", &labels(&[("zone", "east")]));
        assert_eq!(cache.category("east"), None);
        assert_eq!(cache.len(), 1);

        cache.add_node("n3", &labels(&[("region", "east")]));
        assert_eq!(cache.category("east").as_deref(), Some("region"));
        assert_eq!(cache.nodes("east"), set(&["n3"]));
    }

    /// Replays random add/remove sequences and checks every query against a reference
    /// model of node -> label values.
    #[test]
    fn model_check() {
        let values = ["us-east", "us-west", "zone-a", "zone-b", "zone-c", "rack-1"];
        let nodes = ["n1", "n2", "n3", "n4", "n5"];
        let mut rng = StdRng::seed_from_u64(0x70b0);

        for _ in 0 .. 20 {
            let cache = DomainNodeCache::new();
            let mut model: HashMap<&str, BTreeSet<&str>> = HashMap::new();

            for _ in 0 .. 200 {
                let value = *values.choose(&mut rng).unwrap();
                let node = *nodes.choose(&mut rng).unwrap();
                if rng.gen_bool(0.6) {
                    cache.add(value, node);
                    model.entry(node).or_default().insert(value);
                } else {
                    cache.remove(value, node);
                    model.entry(node).or_default().remove(value);
                }

                let query_len = rng.gen_range(1 ..= 3);
                let query = values
                    .choose_multiple(&mut rng, query_len)
                    .copied()
                    .collect::<Vec<_>>();
                let expected = model
                    .iter()
                    .filter(|(_, labels)| query.iter().all(|v| labels.contains(v)))
                    .map(|(node, _)| node.to_string())
                    .collect::<HashSet<_>>();
                assert_eq!(cache.nodes_matching_all(&query), expected, "query {query:?}");
            }
        }
    }

    #[test]
    fn concurrent_readers_and_writers() {
        let cache = std::sync::Arc::new(DomainNodeCache::new());
        let old = labels(&[("region", "us-east"), ("zone", "zone-a")]);
        let new = labels(&[("region", "us-east"), ("zone", "zone-b")]);
        cache.add_node("n1", &old);

        let writer = {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for i in 0 .. 1000 {
                    if i % 2 == 0 {
                        cache.replace_node("n1", &old, Some(&new));
                    } else {
                        cache.replace_node("n1", &new, Some(&old));
                    }
                }
            })
        };
        for _ in 0 .. 1000 {
            // n1 is always under exactly one of the zones
            let snapshot = cache.snapshot();
            let in_zone = |zone: &str| snapshot.get(zone).map_or(false, |n| n.contains("n1"));
            assert!(in_zone("zone-a") ^ in_zone("zone-b"));
            assert_eq!(cache.nodes("us-east"), set(&["n1"]));
        }
        writer.join().unwrap();
    }
}
