use crate::error::Error;
use std::{
    collections::{BTreeMap, HashSet},
    fmt,
};
use strum_macros::{AsRefStr, Display, EnumString};

/// Resolved topology labels of a node, ordered by label key.
pub type TopologyLabels = BTreeMap<String, String>;

/// A conjunctive set of label key/value pairs describing one locality constraint.
/// Segments compare structurally, which is what the deduplication relies on.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopologySegment(BTreeMap<String, String>);

impl TopologySegment {
    /// Return a new `Self` from the given label pairs.
    pub fn new<K: Into<String>, V: Into<String>>(labels: impl IntoIterator<Item = (K, V)>) -> Self {
        Self(
            labels
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
    /// The label values of the segment, ordered by label key.
    pub fn values(&self) -> Vec<&str> {
        self.0.values().map(String::as_str).collect()
    }
    /// Iterate over the (key, value) label pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
    /// Check whether the segment constrains the given label key.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    /// Get the inner label map.
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.0
    }
    /// Consume self and return the inner label map.
    pub fn into_labels(self) -> BTreeMap<String, String> {
        self.0
    }
}

impl From<TopologyLabels> for TopologySegment {
    fn from(labels: TopologyLabels) -> Self {
        Self(labels)
    }
}

impl From<std::collections::HashMap<String, String>> for TopologySegment {
    fn from(labels: std::collections::HashMap<String, String>) -> Self {
        Self(labels.into_iter().collect())
    }
}

impl fmt::Display for TopologySegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs = self
            .0
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>();
        write!(f, "{{{}}}", pairs.join(","))
    }
}

/// Where the topology keys of a requirement point the provisioning to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequirementScope {
    /// Only zone labels are present.
    Zonal,
    /// Only hostname labels are present.
    Hostname,
    /// Neither zone nor hostname labels are present.
    Unconstrained,
}

/// The accessibility requirement of a volume: an ordered preferred list and a fallback
/// requisite list of segments.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TopologyRequirement {
    preferred: Vec<TopologySegment>,
    requisite: Vec<TopologySegment>,
}

impl TopologyRequirement {
    /// Return a new `Self`.
    pub fn new(preferred: Vec<TopologySegment>, requisite: Vec<TopologySegment>) -> Self {
        Self {
            preferred,
            requisite,
        }
    }
    /// Get the preferred segments.
    pub fn preferred(&self) -> &[TopologySegment] {
        &self.preferred
    }
    /// Get the requisite segments.
    pub fn requisite(&self) -> &[TopologySegment] {
        &self.requisite
    }
    fn segments(&self) -> impl Iterator<Item = &TopologySegment> {
        self.preferred.iter().chain(self.requisite.iter())
    }
    /// Identify which of the well-known topology keys the requirement carries.
    /// Zone and hostname keys together are not supported.
    pub fn scope(&self) -> Result<RequirementScope, Error> {
        let zone = self
            .segments()
            .any(|s| s.contains_key(utils::ZONE_TOPOLOGY_KEY));
        let hostname = self
            .segments()
            .any(|s| s.contains_key(utils::HOSTNAME_TOPOLOGY_KEY));
        match (zone, hostname) {
            (true, true) => Err(Error::MixedTopologyKeys {}),
            (true, false) => Ok(RequirementScope::Zonal),
            (false, true) => Ok(RequirementScope::Hostname),
            (false, false) => Ok(RequirementScope::Unconstrained),
        }
    }
}

/// An addressable storage backend unit which can host a volume.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageLocation {
    /// Unique identifier (url) of the location.
    pub id: String,
    /// Human readable name.
    pub name: String,
}

impl StorageLocation {
    /// Return a new `Self`.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Union of storage locations, deduplicated by id while preserving first-seen order.
#[derive(Debug, Default)]
pub(crate) struct LocationSet {
    seen: HashSet<String>,
    locations: Vec<StorageLocation>,
}

impl LocationSet {
    pub(crate) fn extend(&mut self, locations: impl IntoIterator<Item = StorageLocation>) {
        for location in locations {
            if self.seen.insert(location.id.clone()) {
                self.locations.push(location);
            }
        }
    }
    pub(crate) fn into_vec(self) -> Vec<StorageLocation> {
        self.locations
    }
}

/// Identity of the node on which the node plugin runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// The kubernetes node name.
    pub name: String,
    /// The node instance identifier.
    pub uuid: Option<String>,
}

impl NodeInfo {
    /// Return a new `Self`.
    pub fn new(name: impl Into<String>, uuid: Option<String>) -> Self {
        Self {
            name: name.into(),
            uuid,
        }
    }
}

/// Opaque handle to a node as known by the node registry, usable by the storage
/// location collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    /// The kubernetes node name.
    pub name: String,
    /// The backend reference of the node.
    pub reference: String,
}

impl NodeHandle {
    /// Return a new `Self`.
    pub fn new(name: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reference: reference.into(),
        }
    }
}

/// How a volume placed by the zone/cluster variant is spread across zones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum PlacementMode {
    /// Constrained to exactly one zone.
    #[strum(serialize = "zonal")]
    Zonal,
    /// Spanning multiple zones.
    #[strum(serialize = "crossZonal")]
    CrossZonal,
}

impl PlacementMode {
    /// Parse the storage class topology type.
    pub fn parse(mode: &str) -> Result<Self, Error> {
        mode.parse().map_err(|_| Error::UnknownPlacementMode {
            mode: mode.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(pairs: &[(&str, &str)]) -> TopologySegment {
        TopologySegment::new(pairs.iter().copied())
    }

    #[test]
    fn segment_equality_ignores_insertion_order() {
        let a = segment(&[("region", "us-east"), ("zone", "zone-a")]);
        let b = segment(&[("zone", "zone-a"), ("region", "us-east")]);
        assert_eq!(a, b);
        assert_eq!(a.values(), vec!["us-east", "zone-a"]);
        assert_eq!(a.to_string(), "{region=us-east,zone=zone-a}");
    }

    #[test]
    fn requirement_scope() {
        let zonal = TopologyRequirement::new(
            vec![segment(&[(utils::ZONE_TOPOLOGY_KEY, "zone-a")])],
            vec![],
        );
        assert_eq!(zonal.scope().unwrap(), RequirementScope::Zonal);

        let host = TopologyRequirement::new(
            vec![],
            vec![segment(&[(utils::HOSTNAME_TOPOLOGY_KEY, "n1")])],
        );
        assert_eq!(host.scope().unwrap(), RequirementScope::Hostname);

        let mixed = TopologyRequirement::new(
            vec![segment(&[(utils::ZONE_TOPOLOGY_KEY, "zone-a")])],
            vec![segment(&[(utils::HOSTNAME_TOPOLOGY_KEY, "n1")])],
        );
        assert!(matches!(mixed.scope(), Err(Error::MixedTopologyKeys {})));

        let none = TopologyRequirement::new(vec![segment(&[("rack", "r1")])], vec![]);
        assert_eq!(none.scope().unwrap(), RequirementScope::Unconstrained);
    }

    #[test]
    fn placement_mode() {
        assert_eq!(PlacementMode::parse("zonal").unwrap(), PlacementMode::Zonal);
        assert_eq!(PlacementMode::parse("Zonal").unwrap(), PlacementMode::Zonal);
        assert_eq!(
            PlacementMode::parse("crossZonal").unwrap(),
            PlacementMode::CrossZonal
        );
        assert_eq!(
            PlacementMode::parse("crosszonal").unwrap(),
            PlacementMode::CrossZonal
        );
        assert!(matches!(
            PlacementMode::parse("regional"),
            Err(Error::UnknownPlacementMode { mode }) if mode == "regional"
        ));
        assert!(PlacementMode::parse("").is_err());
    }

    #[test]
    fn location_union_keeps_first_seen_order() {
        let mut set = LocationSet::default();
        set.extend(vec![
            StorageLocation::new("ds:///a", "a"),
            StorageLocation::new("ds:///b", "b"),
        ]);
        set.extend(vec![
            StorageLocation::new("ds:///b", "b"),
            StorageLocation::new("ds:///c", "c"),
        ]);
        let ids = set
            .into_vec()
            .into_iter()
            .map(|l| l.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["ds:///a", "ds:///b", "ds:///c"]);
    }
}
