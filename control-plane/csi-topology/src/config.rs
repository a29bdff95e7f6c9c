use crate::error::Error;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::time::Duration;
use strum_macros::{AsRefStr, Display, EnumString};
use tracing::warn;

/// How the kubernetes cluster is federated with the storage backend.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ClusterFlavor {
    /// Every node reports its own topology labels.
    #[default]
    Vanilla,
    /// Availability zones served by storage clusters.
    Workload,
    /// Nested cluster, topology is handled by the parent cluster.
    Guest,
}

/// Topology configuration of the csi components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyConfig {
    flavor: ClusterFlavor,
    use_csi_node_id: bool,
    watch_timeout: Duration,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            flavor: ClusterFlavor::default(),
            use_csi_node_id: false,
            watch_timeout: watch_timeout(None),
        }
    }
}

impl TopologyConfig {
    /// Return a new `Self`.
    pub fn new(flavor: ClusterFlavor, use_csi_node_id: bool, watch_timeout: Duration) -> Self {
        Self {
            flavor,
            use_csi_node_id,
            watch_timeout,
        }
    }

    /// Add the topology arguments to the command.
    pub fn args(command: Command) -> Command {
        command
            .arg(
                Arg::new("cluster-flavor")
                    .long("cluster-flavor")
                    .env("CLUSTER_FLAVOR")
                    .default_value(utils::DEFAULT_CLUSTER_FLAVOR)
                    .help("the flavor of the cluster: vanilla, workload or guest"),
            )
            .arg(
                Arg::new("use-csi-node-id")
                    .long("use-csi-node-id")
                    .env("USE_CSI_NODE_ID")
                    .action(ArgAction::SetTrue)
                    .help("match the topology records by node uuid as well as by node name"),
            )
            .arg(
                Arg::new("node-topology-watch-timeout")
                    .long("node-topology-watch-timeout")
                    .env(utils::NODE_TOPOLOGY_WATCH_TIMEOUT_ENV)
                    .help("minutes to wait for the node topology labels, between 1 and 2"),
            )
    }

    /// Get the configuration from the parsed arguments.
    pub fn from_matches(matches: &ArgMatches) -> Result<Self, Error> {
        let flavor = matches
            .get_one::<String>("cluster-flavor")
            .map(String::as_str)
            .unwrap_or(utils::DEFAULT_CLUSTER_FLAVOR);
        let flavor = flavor
            .parse::<ClusterFlavor>()
            .map_err(|_| Error::UnsupportedFlavor {
                flavor: flavor.to_string(),
            })?;
        Ok(Self {
            flavor,
            use_csi_node_id: matches.get_flag("use-csi-node-id"),
            watch_timeout: watch_timeout(
                matches
                    .get_one::<String>("node-topology-watch-timeout")
                    .map(String::as_str),
            ),
        })
    }

    /// The flavor of the cluster.
    pub fn flavor(&self) -> ClusterFlavor {
        self.flavor
    }

    /// Topology records are matched by node uuid, only supported for vanilla clusters.
    pub fn identity_mode(&self) -> bool {
        self.use_csi_node_id && self.flavor == ClusterFlavor::Vanilla
    }

    /// Bound on the wait for the node topology labels.
    pub fn watch_timeout(&self) -> Duration {
        self.watch_timeout
    }
}

/// The wait for the node topology labels, from its setting in minutes.
/// Missing, invalid or out of range values fall back to the default.
pub fn watch_timeout(minutes: Option<&str>) -> Duration {
    let default = Duration::from_secs(utils::DEFAULT_NODE_TOPOLOGY_WATCH_TIMEOUT_MIN * 60);
    let Some(value) = minutes.filter(|value| !value.is_empty()) else {
        return default;
    };
    let range =
        utils::MIN_NODE_TOPOLOGY_WATCH_TIMEOUT_MIN ..= utils::MAX_NODE_TOPOLOGY_WATCH_TIMEOUT_MIN;
    match value.parse::<u64>() {
        Ok(minutes) if range.contains(&minutes) => Duration::from_secs(minutes * 60),
        Ok(minutes) => {
            warn!(
                minutes,
                min = range.start(),
                max = range.end(),
                "{} is out of range, using the default of {} minute",
                utils::NODE_TOPOLOGY_WATCH_TIMEOUT_ENV,
                utils::DEFAULT_NODE_TOPOLOGY_WATCH_TIMEOUT_MIN
            );
            default
        }
        Err(error) => {
            warn!(
                value,
                %error,
                "{} is not a number of minutes, using the default of {} minute",
                utils::NODE_TOPOLOGY_WATCH_TIMEOUT_ENV,
                utils::DEFAULT_NODE_TOPOLOGY_WATCH_TIMEOUT_MIN
            );
            default
        }
    }
}
