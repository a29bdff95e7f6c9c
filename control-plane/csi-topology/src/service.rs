//! Lazily started topology services, one per component, selected by the cluster flavor.
//! Each service is started at most once, concurrent first callers wait on the same start.

use crate::{
    cache::{DomainNodeCache, NodeRecordCache, ZoneClusterCache},
    collaborators::{NodeRegistry, StorageLocator},
    config::{ClusterFlavor, TopologyConfig},
    controller::{ControllerTopology, NodeLabelTopology, ZoneTopology},
    crd::{AvailabilityZone, CsiNodeTopology},
    error::{Error, NotInitialized, UnsupportedFlavor},
    node::{KubeTopologyStore, NodeTopologyResolver},
    types::{NodeInfo, TopologyLabels},
    watcher::{self, AvailabilityZoneHandler, EventDispatcher, NodeTopologyHandler, WatcherHandle},
};
use kube::{
    api::{Api, ApiResource, DynamicObject, ListParams},
    Client,
};
use snafu::OptionExt;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

/// The running controller topology service along with the watches feeding its caches.
/// The watches are stopped when the service is dropped.
#[derive(Debug)]
pub struct ControllerTopologyService {
    topology: ControllerTopology,
    watchers: Vec<WatcherHandle>,
}

impl ControllerTopologyService {
    /// Get the controller topology.
    pub fn topology(&self) -> &ControllerTopology {
        &self.topology
    }
    /// Get the watches feeding the caches.
    pub fn watchers(&self) -> &[WatcherHandle] {
        &self.watchers
    }
}

fn dynamic_api<K>(client: Client) -> Api<DynamicObject>
where
    K: kube::Resource<DynamicType = ()>,
{
    Api::all_with(client, &ApiResource::erase::<K>(&()))
}

/// Whether a listing of the AvailabilityZone resources shows that their CRD is registered.
fn zones_registered<T>(listed: Result<T, kube::Error>) -> Result<bool, Error> {
    match listed {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(response)) if response.code == 404 => Ok(false),
        Err(source) => Err(Error::Kube {
            operation: "list".to_string(),
            name: "availabilityzones".to_string(),
            source,
        }),
    }
}

/// Starts the controller topology service on first use.
pub struct ControllerTopologyProvider {
    client: Client,
    config: TopologyConfig,
    registry: Arc<dyn NodeRegistry>,
    locator: Arc<dyn StorageLocator>,
    service: OnceCell<Option<ControllerTopologyService>>,
}

impl ControllerTopologyProvider {
    /// Return a new `Self`, nothing is started until the service is first requested.
    pub fn new(
        client: Client,
        config: TopologyConfig,
        registry: Arc<dyn NodeRegistry>,
        locator: Arc<dyn StorageLocator>,
    ) -> Self {
        Self {
            client,
            config,
            registry,
            locator,
            service: OnceCell::new(),
        }
    }

    /// Get the controller topology service, starting it if needed.
    /// Fails with `NotInitialized` when the cluster does not provide the topology resources.
    pub async fn service(&self) -> Result<&ControllerTopologyService, Error> {
        self.service
            .get_or_try_init(|| self.start())
            .await?
            .as_ref()
            .context(NotInitialized)
    }

    /// Get the controller topology, starting the service if needed.
    pub async fn topology(&self) -> Result<&ControllerTopology, Error> {
        Ok(self.service().await?.topology())
    }

    async fn start(&self) -> Result<Option<ControllerTopologyService>, Error> {
        let service = match self.config.flavor() {
            ClusterFlavor::Vanilla => self.start_node_labels(),
            ClusterFlavor::Workload => match self.start_zones().await? {
                Some(service) => service,
                None => return Ok(None),
            },
            flavor @ ClusterFlavor::Guest => {
                return UnsupportedFlavor {
                    flavor: flavor.to_string(),
                }
                .fail()
            }
        };
        info!(flavor = %self.config.flavor(), "Topology service initiated successfully");
        Ok(Some(service))
    }

    fn start_node_labels(&self) -> ControllerTopologyService {
        let domains = Arc::new(DomainNodeCache::new());
        let records = Arc::new(NodeRecordCache::new());
        let watcher = watcher::spawn(
            dynamic_api::<CsiNodeTopology>(self.client.clone()),
            EventDispatcher::<CsiNodeTopology, _>::new(
                "CsiNodeTopology",
                NodeTopologyHandler::new(domains.clone(), records.clone()),
            ),
        );
        let topology = NodeLabelTopology::new(
            domains,
            records,
            self.registry.clone(),
            self.locator.clone(),
            self.config.identity_mode(),
        );
        ControllerTopologyService {
            topology: topology.into(),
            watchers: vec![watcher],
        }
    }

    async fn start_zones(&self) -> Result<Option<ControllerTopologyService>, Error> {
        let zones_api = Api::<AvailabilityZone>::all(self.client.clone());
        if !zones_registered(zones_api.list(&ListParams::default().limit(1)).await)? {
            info!("AvailabilityZone CRD is not registered, not starting the topology service");
            return Ok(None);
        }

        let zones = Arc::new(ZoneClusterCache::new());
        let watcher = watcher::spawn(
            dynamic_api::<AvailabilityZone>(self.client.clone()),
            EventDispatcher::<AvailabilityZone, _>::new(
                "AvailabilityZone",
                AvailabilityZoneHandler::new(zones.clone()),
            ),
        );
        Ok(Some(ControllerTopologyService {
            topology: ZoneTopology::new(zones, self.locator.clone()).into(),
            watchers: vec![watcher],
        }))
    }
}

/// Builds the node topology resolver on first use.
pub struct NodeTopologyProvider {
    client: Client,
    config: TopologyConfig,
    resolver: OnceCell<NodeTopologyResolver>,
}

impl NodeTopologyProvider {
    /// Return a new `Self`.
    pub fn new(client: Client, config: TopologyConfig) -> Self {
        Self {
            client,
            config,
            resolver: OnceCell::new(),
        }
    }

    /// Get the node topology resolver, only vanilla clusters resolve their node topology.
    pub async fn resolver(&self) -> Result<&NodeTopologyResolver, Error> {
        self.resolver
            .get_or_try_init(|| async {
                match self.config.flavor() {
                    ClusterFlavor::Vanilla => Ok(NodeTopologyResolver::new(
                        Arc::new(KubeTopologyStore::new(self.client.clone())),
                        self.config.identity_mode(),
                        self.config.watch_timeout(),
                    )),
                    flavor => UnsupportedFlavor {
                        flavor: flavor.to_string(),
                    }
                    .fail(),
                }
            })
            .await
    }

    /// Get the topology labels of the node.
    pub async fn resolve(&self, node: &NodeInfo) -> Result<TopologyLabels, Error> {
        self.resolver().await?.resolve(node).await
    }
}
