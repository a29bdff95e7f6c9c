use snafu::Snafu;
use std::time::Duration;

/// Error type returned by the storage backend collaborators.
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Topology resolution errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum Error {
    #[snafu(display("Failed to find a CSINodeTopology instance with name: '{node}'"))]
    RecordNotFound { node: String },
    #[snafu(display("CSINodeTopology instance '{node}' with status '{status}' is not ready yet"))]
    RecordNotReady { node: String, status: String },
    #[snafu(display("Could not find the cluster for zone '{zone}' in AvailabilityZone resources"))]
    ZoneNotFound { zone: String },
    #[snafu(display(
        "Could not find the topology of the volume provisioned on storage location '{storage_location}'"
    ))]
    LocationUntraceable { storage_location: String },
    #[snafu(display("Invalid topology requirement: {reason}"))]
    InvalidRequirement { reason: String },
    #[snafu(display(
        "Topology requirement with both zone and hostname labels is not yet supported"
    ))]
    MixedTopologyKeys {},
    #[snafu(display("Unrecognised storage topology type found: '{mode}'"))]
    UnknownPlacementMode { mode: String },
    #[snafu(display("Node affinity for crossZonal storage topology type is not implemented"))]
    CrossZonalUnsupported {},
    #[snafu(display("Topology service is not implemented for cluster flavor '{flavor}'"))]
    UnsupportedFlavor { flavor: String },
    #[snafu(display("Topology service is not initialized"))]
    NotInitialized {},
    #[snafu(display("Failed to retrieve topology information for node '{node}': {message}"))]
    ResolutionFailed { node: String, message: String },
    #[snafu(display(
        "Timed out after {} while waiting for topology labels to be updated in '{node}' CSINodeTopology instance",
        humantime::format_duration(*timeout)
    ))]
    WatchTimeout { node: String, timeout: Duration },
    #[snafu(display("Kubernetes client error on {operation} of '{name}': {source}"))]
    Kube {
        operation: String,
        name: String,
        source: kube::Error,
    },
    #[snafu(display("Storage backend request for '{resource}' failed: {source}"))]
    Backend {
        resource: String,
        source: BackendError,
    },
}

/// Broad classification of the errors, used by callers to decide on fallbacks and
/// by the gRPC boundary to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No matching record, zone or cluster.
    NotFound,
    /// Malformed requirement, unsupported combination or mode.
    InvalidInput,
    /// Bounded wait exceeded without a terminal status.
    Timeout,
    /// The resource store or the storage backend failed, or has not converged.
    Upstream,
}

impl Error {
    /// Get the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::RecordNotFound { .. }
            | Error::ZoneNotFound { .. }
            | Error::LocationUntraceable { .. } => ErrorKind::NotFound,
            Error::InvalidRequirement { .. }
            | Error::MixedTopologyKeys {}
            | Error::UnknownPlacementMode { .. }
            | Error::CrossZonalUnsupported {}
            | Error::UnsupportedFlavor { .. } => ErrorKind::InvalidInput,
            Error::WatchTimeout { .. } => ErrorKind::Timeout,
            Error::RecordNotReady { .. }
            | Error::NotInitialized {}
            | Error::ResolutionFailed { .. }
            | Error::Kube { .. }
            | Error::Backend { .. } => ErrorKind::Upstream,
        }
    }
}

impl From<Error> for tonic::Status {
    fn from(error: Error) -> Self {
        match error {
            Error::MixedTopologyKeys {}
            | Error::CrossZonalUnsupported {}
            | Error::UnsupportedFlavor { .. } => tonic::Status::unimplemented(error.to_string()),
            Error::RecordNotReady { .. } => tonic::Status::unavailable(error.to_string()),
            error => match error.kind() {
                ErrorKind::NotFound => tonic::Status::not_found(error.to_string()),
                ErrorKind::InvalidInput => tonic::Status::invalid_argument(error.to_string()),
                ErrorKind::Timeout => tonic::Status::deadline_exceeded(error.to_string()),
                ErrorKind::Upstream => tonic::Status::internal(error.to_string()),
            },
        }
    }
}
