//! Various common constants used by the csi topology components.

/// Domain name for the product.
pub const PRODUCT_DOMAIN_NAME: &str = "openebs.io";
/// The api group of the per-node topology records.
/// Note, the CRDs are defined inline and use literal strings so these must
/// be changed as well.
pub const NODE_TOPOLOGY_API_GROUP: &str = PRODUCT_DOMAIN_NAME;
/// The api group of the availability zone resources.
pub const AVAILABILITY_ZONE_API_GROUP: &str = "topology.openebs.io";

/// Well-known kubernetes label for the zone a node is placed in.
pub const ZONE_TOPOLOGY_KEY: &str = "topology.kubernetes.io/zone";
/// Well-known kubernetes label for the region a node is placed in.
pub const REGION_TOPOLOGY_KEY: &str = "topology.kubernetes.io/region";
/// Well-known kubernetes label for the node hostname.
pub const HOSTNAME_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";

/// Environment variable which bounds how long the node plugin waits for its topology record.
pub const NODE_TOPOLOGY_WATCH_TIMEOUT_ENV: &str = "NODEGETINFO_WATCH_TIMEOUT_MINUTES";
/// Minimum wait, in minutes, for the topology record to reach a terminal state.
pub const MIN_NODE_TOPOLOGY_WATCH_TIMEOUT_MIN: u64 = 1;
/// Default wait, in minutes, for the topology record to reach a terminal state.
pub const DEFAULT_NODE_TOPOLOGY_WATCH_TIMEOUT_MIN: u64 = 1;
/// Maximum wait, in minutes, for the topology record to reach a terminal state.
pub const MAX_NODE_TOPOLOGY_WATCH_TIMEOUT_MIN: u64 = 2;

/// The default flavor of the cluster the plugin is deployed in.
pub const DEFAULT_CLUSTER_FLAVOR: &str = "vanilla";

/// Initial backoff of a failing topology watch.
pub const WATCH_BACKOFF_MIN: &str = "1s";
/// Maximum backoff of a failing topology watch.
pub const WATCH_BACKOFF_MAX: &str = "30s";
