//! Concurrency-safe in-memory indexes of the watched topology resources.
//! The caches are a best-effort materialized view of the resource store: they are only
//! ever mutated by the watch handlers and only ever read by the resolvers.

mod domain_node;
mod records;
mod zone_cluster;

pub use domain_node::DomainNodeCache;
pub use records::NodeRecordCache;
pub use zone_cluster::ZoneClusterCache;
