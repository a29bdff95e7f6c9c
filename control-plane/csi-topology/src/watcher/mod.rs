//! Watches the topology custom resources and feeds their add/update/delete events into
//! the caches.
//!
//! The kube watcher only reports applied and deleted objects (and full relists on
//! restart), so the dispatcher keeps the last seen object of every resource, the same
//! way an informer store does, to tell additions from updates and to hand the previous
//! object to the update callback.
//!
//! Objects are watched untyped and decoded into the typed resource one by one, so that a
//! single malformed object only drops its own event instead of failing the whole watch.

pub(crate) mod handlers;

pub use handlers::{AvailabilityZoneHandler, NodeTopologyHandler};

use futures::{Stream, StreamExt};
use kube::{
    api::{Api, DynamicObject},
    runtime::watcher,
    ResourceExt,
};
use serde::de::DeserializeOwned;
use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};
use tracing::{error, info, warn};

/// Callbacks invoked for the changes of a watched resource kind.
/// Implementations must be fast and must not block: they run on the watch task.
pub trait ResourceEventHandler<K>: Send + Sync + 'static {
    /// A resource was seen for the first time.
    fn added(&self, name: &str, object: &K);
    /// A known resource has changed.
    fn updated(&self, name: &str, old: &K, new: &K);
    /// A known resource was deleted.
    fn deleted(&self, name: &str, object: &K);
}

/// Translates watcher events into add/update/delete callbacks.
pub struct EventDispatcher<K, H> {
    kind: &'static str,
    seen: HashMap<String, K>,
    handler: H,
}

impl<K, H> EventDispatcher<K, H>
where
    K: DeserializeOwned + Clone,
    H: ResourceEventHandler<K>,
{
    /// Return a new `Self` for the given resource kind.
    pub fn new(kind: &'static str, handler: H) -> Self {
        Self {
            kind,
            seen: HashMap::new(),
            handler,
        }
    }

    /// Get a reference to the handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Process a single watcher event.
    pub fn dispatch(&mut self, event: watcher::Event<DynamicObject>) {
        match event {
            watcher::Event::Applied(object) => self.applied(object),
            watcher::Event::Deleted(object) => self.deleted(object),
            watcher::Event::Restarted(objects) => self.restarted(objects),
        }
    }

    fn decode(&self, object: DynamicObject) -> Result<K, serde_json::Error> {
        serde_json::to_value(object).and_then(serde_json::from_value::<K>)
    }

    fn applied(&mut self, object: DynamicObject) {
        let name = object.name_any();
        let new = match self.decode(object) {
            Ok(new) => new,
            Err(error) => {
                error!(kind = self.kind, name, %error, "Failed to decode watched object, dropping the event");
                return;
            }
        };
        match self.seen.insert(name.clone(), new.clone()) {
            Some(old) => self.handler.updated(&name, &old, &new),
            None => self.handler.added(&name, &new),
        }
    }

    fn deleted(&mut self, object: DynamicObject) {
        let name = object.name_any();
        let last_seen = self.seen.remove(&name);
        let object = match self.decode(object) {
            Ok(object) => Some(object),
            Err(error) => {
                warn!(kind = self.kind, name, %error, "Failed to decode deleted object, using the last seen object");
                last_seen
            }
        };
        match object {
            Some(object) => self.handler.deleted(&name, &object),
            None => error!(kind = self.kind, name, "Unknown object deleted, dropping the event"),
        }
    }

    fn restarted(&mut self, objects: Vec<DynamicObject>) {
        let mut listed = HashSet::with_capacity(objects.len());
        let mut current = Vec::with_capacity(objects.len());
        for object in objects {
            let name = object.name_any();
            listed.insert(name.clone());
            match self.decode(object) {
                Ok(object) => current.push((name, object)),
                Err(error) => {
                    error!(kind = self.kind, name, %error, "Failed to decode listed object, dropping it");
                }
            }
        }

        let stale = self
            .seen
            .keys()
            .filter(|name| !listed.contains(*name))
            .cloned()
            .collect::<Vec<_>>();
        for name in stale {
            if let Some(old) = self.seen.remove(&name) {
                self.handler.deleted(&name, &old);
            }
        }

        for (name, new) in current {
            match self.seen.insert(name.clone(), new.clone()) {
                Some(old) => self.handler.updated(&name, &old, &new),
                None => self.handler.added(&name, &new),
            }
        }
        info!(kind = self.kind, count = self.seen.len(), "Watch (re)listed");
    }
}

/// Handle of a detached watch task, the task is aborted when the handle is dropped.
#[derive(Debug)]
pub struct WatcherHandle {
    kind: &'static str,
    task: tokio::task::JoinHandle<()>,
}

impl WatcherHandle {
    /// The resource kind being watched.
    pub fn kind(&self) -> &'static str {
        self.kind
    }
    /// Check if the watch task is no longer running.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn a supervised watch over the given api, feeding the dispatcher.
pub fn spawn<K, H>(api: Api<DynamicObject>, dispatcher: EventDispatcher<K, H>) -> WatcherHandle
where
    K: DeserializeOwned + Clone + Send + 'static,
    H: ResourceEventHandler<K>,
{
    let kind = dispatcher.kind;
    WatcherHandle {
        kind,
        task: tokio::spawn(run(api, dispatcher)),
    }
}

fn backoff_period(value: &str, fallback: Duration) -> Duration {
    value
        .parse::<humantime::Duration>()
        .map(Into::into)
        .unwrap_or(fallback)
}

/// Bounded exponential backoff between failed watch attempts.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
            current: min,
        }
    }
    fn from_settings() -> Self {
        Self::new(
            backoff_period(utils::WATCH_BACKOFF_MIN, Duration::from_secs(1)),
            backoff_period(utils::WATCH_BACKOFF_MAX, Duration::from_secs(30)),
        )
    }
    /// The next wait.
    pub(crate) fn current(&self) -> Duration {
        self.current
    }
    pub(crate) fn reset(&mut self) {
        self.current = self.min;
    }
    /// Sleep for the current period and double it, up to the maximum.
    pub(crate) async fn wait(&mut self) {
        tokio::time::sleep(self.current).await;
        self.current = (self.current * 2).min(self.max);
    }
}

async fn run<K, H>(api: Api<DynamicObject>, dispatcher: EventDispatcher<K, H>)
where
    K: DeserializeOwned + Clone + Send + 'static,
    H: ResourceEventHandler<K>,
{
    let kind = dispatcher.kind;
    let connect = move || {
        info!(kind, "Informer to watch on CR starting..");
        watcher(api.clone(), watcher::Config::default())
    };
    supervise(connect, dispatcher, Backoff::from_settings()).await
}

/// Run the watch forever: errors are retried with a bounded exponential backoff and a
/// terminated stream is reconnected, so the caches never silently freeze.
pub(crate) async fn supervise<K, H, S, F>(
    mut connect: F,
    mut dispatcher: EventDispatcher<K, H>,
    mut backoff: Backoff,
) where
    K: DeserializeOwned + Clone,
    H: ResourceEventHandler<K>,
    F: FnMut() -> S,
    S: Stream<Item = Result<watcher::Event<DynamicObject>, watcher::Error>>,
{
    let kind = dispatcher.kind;
    loop {
        let mut stream = Box::pin(connect());
        while let Some(result) = stream.next().await {
            match result {
                Ok(event) => {
                    backoff.reset();
                    dispatcher.dispatch(event);
                }
                Err(error) => {
                    warn!(kind, %error, retry_in = ?backoff.current(), "Watch failed");
                    backoff.wait().await;
                }
            }
        }
        warn!(kind, retry_in = ?backoff.current(), "Watch stream terminated, restarting");
        backoff.wait().await;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        cache::{DomainNodeCache, NodeRecordCache, ZoneClusterCache},
        crd::{AvailabilityZone, CsiNodeTopology},
    };
    use serde_json::json;
    use std::{
        collections::HashSet,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    /// A CsiNodeTopology watch payload.
    pub(crate) fn record(name: &str, status: &str, labels: &[(&str, &str)]) -> DynamicObject {
        let labels = labels
            .iter()
            .map(|(key, value)| json!({ "key": key, "value": value }))
            .collect::<Vec<_>>();
        serde_json::from_value(json!({
            "apiVersion": "openebs.io/v1alpha1",
            "kind": "CsiNodeTopology",
            "metadata": { "name": name },
            "spec": { "nodeID": name },
            "status": { "status": status, "topologyLabels": labels }
        }))
        .unwrap()
    }

    /// An AvailabilityZone watch payload.
    pub(crate) fn zone(name: &str, cluster: &str) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "topology.openebs.io/v1alpha1",
            "kind": "AvailabilityZone",
            "metadata": { "name": name },
            "spec": { "clusterId": cluster }
        }))
        .unwrap()
    }

    fn nodes(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn node_dispatcher() -> (
        EventDispatcher<CsiNodeTopology, NodeTopologyHandler>,
        Arc<DomainNodeCache>,
        Arc<NodeRecordCache>,
    ) {
        let domains = Arc::new(DomainNodeCache::new());
        let records = Arc::new(NodeRecordCache::new());
        let handler = NodeTopologyHandler::new(domains.clone(), records.clone());
        (
            EventDispatcher::new("CsiNodeTopology", handler),
            domains,
            records,
        )
    }

    const EAST_A: &[(&str, &str)] = &[
        ("topology.kubernetes.io/region", "us-east"),
        ("topology.kubernetes.io/zone", "zone-a"),
    ];
    const EAST_B: &[(&str, &str)] = &[
        ("topology.kubernetes.io/region", "us-east"),
        ("topology.kubernetes.io/zone", "zone-b"),
    ];

    #[test]
    fn pending_then_success() {
        let (mut dispatcher, domains, records) = node_dispatcher();

        dispatcher.dispatch(watcher::Event::Applied(record("n1", "", &[])));
        assert!(domains.is_empty());
        assert_eq!(records.len(), 1);

        dispatcher.dispatch(watcher::Event::Applied(record("n1", "Success", EAST_A)));
        assert_eq!(domains.nodes_matching_all(&["us-east", "zone-a"]), nodes(&["n1"]));
        assert!(records.get("n1").unwrap().is_success());
    }

    #[test]
    fn success_with_unchanged_labels_is_added() {
        let (mut dispatcher, domains, _) = node_dispatcher();
        dispatcher.dispatch(watcher::Event::Applied(record("n1", "", EAST_A)));
        assert!(domains.nodes("zone-a").is_empty());
        dispatcher.dispatch(watcher::Event::Applied(record("n1", "Success", EAST_A)));
        assert_eq!(domains.nodes("zone-a"), nodes(&["n1"]));
        // a duplicate event is a no-op
        dispatcher.dispatch(watcher::Event::Applied(record("n1", "Success", EAST_A)));
        assert_eq!(domains.nodes("zone-a"), nodes(&["n1"]));
    }

    #[test]
    fn relabel_after_success() {
        let (mut dispatcher, domains, _) = node_dispatcher();
        dispatcher.dispatch(watcher::Event::Applied(record("n1", "Success", EAST_A)));
        dispatcher.dispatch(watcher::Event::Applied(record("n2", "Success", EAST_A)));
        dispatcher.dispatch(watcher::Event::Applied(record("n1", "Success", EAST_B)));

        assert_eq!(domains.nodes("zone-a"), nodes(&["n2"]));
        assert_eq!(domains.nodes("zone-b"), nodes(&["n1"]));
        assert_eq!(domains.nodes("us-east"), nodes(&["n1", "n2"]));

        dispatcher.dispatch(watcher::Event::Applied(record("n2", "Error", EAST_A)));
        assert!(domains.nodes("zone-a").is_empty());
        assert_eq!(domains.nodes("us-east"), nodes(&["n1"]));
    }

    #[test]
    fn delete() {
        let (mut dispatcher, domains, records) = node_dispatcher();
        dispatcher.dispatch(watcher::Event::Applied(record("n1", "Success", EAST_A)));
        dispatcher.dispatch(watcher::Event::Applied(record("n2", "", &[])));

        dispatcher.dispatch(watcher::Event::Deleted(record("n1", "Success", EAST_A)));
        dispatcher.dispatch(watcher::Event::Deleted(record("n2", "", &[])));
        assert!(domains.nodes("us-east").is_empty());
        assert!(records.is_empty());
    }

    #[test]
    fn malformed_events_are_dropped() {
        let (mut dispatcher, domains, records) = node_dispatcher();
        dispatcher.dispatch(watcher::Event::Applied(record("n1", "Success", EAST_A)));

        // unknown status values fail the typed decode
        dispatcher.dispatch(watcher::Event::Applied(record("n1", "Bogus", EAST_B)));
        dispatcher.dispatch(watcher::Event::Applied(record("n2", "Bogus", EAST_B)));
        assert_eq!(domains.nodes("zone-a"), nodes(&["n1"]));
        assert!(domains.nodes("zone-b").is_empty());
        assert_eq!(records.len(), 1);

        // an undecodable delete falls back to the last seen object
        dispatcher.dispatch(watcher::Event::Deleted(record("n1", "Bogus", &[])));
        assert!(domains.nodes("zone-a").is_empty());
        assert!(records.is_empty());

        // and the dispatcher keeps working
        dispatcher.dispatch(watcher::Event::Applied(record("n3", "Success", EAST_B)));
        assert_eq!(domains.nodes("zone-b"), nodes(&["n3"]));
    }

    #[test]
    fn relist_diffs_against_seen_objects() {
        let (mut dispatcher, domains, records) = node_dispatcher();
        dispatcher.dispatch(watcher::Event::Applied(record("n1", "Success", EAST_A)));
        dispatcher.dispatch(watcher::Event::Applied(record("n2", "Success", EAST_A)));
        dispatcher.dispatch(watcher::Event::Applied(record("n4", "Success", EAST_A)));

        // n1 was deleted while disconnected, n2 was relabeled, n3 is new and
        // n4 is listed with a payload we cannot decode
        dispatcher.dispatch(watcher::Event::Restarted(vec![
            record("n2", "Success", EAST_B),
            record("n3", "Success", EAST_A),
            record("n4", "Bogus", &[]),
        ]));
        assert_eq!(domains.nodes("zone-a"), nodes(&["n3", "n4"]));
        assert_eq!(domains.nodes("zone-b"), nodes(&["n2"]));
        assert!(records.get("n1").is_none());
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn availability_zones() {
        let zones = Arc::new(ZoneClusterCache::new());
        let mut dispatcher = EventDispatcher::<AvailabilityZone, _>::new(
            "AvailabilityZone",
            AvailabilityZoneHandler::new(zones.clone()),
        );

        dispatcher.dispatch(watcher::Event::Restarted(vec![
            zone("zone-a", "domain-c1"),
            zone("zone-b", "domain-c2"),
        ]));
        assert_eq!(zones.get("zone-a").as_deref(), Some("domain-c1"));
        assert_eq!(zones.get("zone-b").as_deref(), Some("domain-c2"));

        dispatcher.dispatch(watcher::Event::Applied(zone("zone-a", "domain-c3")));
        assert_eq!(zones.get("zone-a").as_deref(), Some("domain-c3"));

        // a zone without a cluster never makes it into the cache
        dispatcher.dispatch(watcher::Event::Applied(zone("zone-c", "")));
        assert_eq!(zones.get("zone-c"), None);

        dispatcher.dispatch(watcher::Event::Deleted(zone("zone-b", "domain-c2")));
        assert_eq!(zones.zones(), vec!["zone-a"]);

        // losing the cluster on update drops the stale mapping
        dispatcher.dispatch(watcher::Event::Applied(zone("zone-a", "")));
        assert_eq!(zones.get("zone-a"), None);
        assert!(zones.is_empty());
        dispatcher.dispatch(watcher::Event::Applied(zone("zone-a", "domain-c1")));
        assert_eq!(zones.get("zone-a").as_deref(), Some("domain-c1"));
    }

    fn watch_failure() -> watcher::Error {
        watcher::Error::WatchFailed(kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "too old resource version".to_string(),
            reason: "Expired".to_string(),
            code: 410,
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_progression() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(4));
        let start = tokio::time::Instant::now();
        let mut waits = vec![];
        for _ in 0 .. 5 {
            waits.push(backoff.current().as_secs());
            backoff.wait().await;
        }
        assert_eq!(waits, vec![1, 2, 4, 4, 4]);
        assert_eq!(start.elapsed(), Duration::from_secs(15));
        backoff.reset();
        assert_eq!(backoff.current(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn supervised_watch_reconnects() {
        let (dispatcher, domains, _) = node_dispatcher();
        let attempts = Arc::new(AtomicUsize::new(0));
        let connect = {
            let attempts = attempts.clone();
            move || {
                let items = match attempts.fetch_add(1, Ordering::SeqCst) {
                    0 => vec![
                        Err(watch_failure()),
                        Err(watch_failure()),
                        Ok(watcher::Event::Applied(record("n1", "Success", EAST_A))),
                    ],
                    1 => vec![Ok(watcher::Event::Restarted(vec![
                        record("n1", "Success", EAST_A),
                        record("n2", "Success", EAST_B),
                    ]))],
                    _ => vec![],
                };
                futures::stream::iter(items)
            }
        };
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(4));
        let task = tokio::spawn(supervise(connect, dispatcher, backoff));

        // 1s and 2s after the two failures, 1s after the stream ends
        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(domains.nodes("zone-a"), nodes(&["n1"]));
        assert_eq!(domains.nodes("zone-b"), nodes(&["n2"]));

        // empty streams reconnect after 1s, 2s, 4s and then the 4s maximum
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 6);
        assert!(!task.is_finished());
        task.abort();
    }

    #[test]
    fn backoff_parsing() {
        assert_eq!(
            backoff_period("2s", Duration::from_secs(1)),
            Duration::from_secs(2)
        );
        assert_eq!(
            backoff_period("two", Duration::from_secs(1)),
            Duration::from_secs(1)
        );
    }
}
