//! Reconciles one LXC container on a Proxmox VE cluster toward a declared
//! desired state.
//!
//! The remote cluster is reached through the [`ClusterApi`] trait; the
//! production binding is [`pve::PveCluster`].

pub mod config;
pub mod lifecycle;
pub mod locator;
pub mod pve;
pub mod template;
pub mod topology;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use async_trait::async_trait;

pub use config::{ContainerParams, CreateSpec};
pub use lifecycle::{PollBudget, PollPolicy, ReconcileError, Reconciler};
pub use pve::{ConnectionParams, PveCluster};
pub use types::{
    ContainerConfig, ContainerHandle, ContainerSnapshot, ContainerStatus, DesiredState, NodeHandle,
    ReconcileOutcome, StorageEntry, TaskId, TaskState,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("connection failed: {0}")]
    ConnectionFailure(String),

    #[error("no cluster nodes available")]
    NoNodesAvailable,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("container {vmid} does not exist")]
    ContainerAbsent { vmid: u32 },

    #[error("invalid container config: {0}")]
    InvalidConfig(String),

    #[error("{operation} on {target} failed: {reason}")]
    RemoteOperation {
        operation: &'static str,
        target: String,
        reason: String,
    },

    #[error("gave up waiting for {what} after {attempts} polls")]
    PollTimeout { what: String, attempts: u32 },

    #[error("unknown desired state: {0}")]
    UnknownState(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Operations consumed from the cluster-management API.
///
/// Implementations report a missing node, container or storage as
/// [`Error::NotFound`] and every other rejection as
/// [`Error::RemoteOperation`], so callers can fall back on misses.
#[async_trait]
pub trait ClusterApi: Send + Sync + 'static {
    /// Cluster members in listing order.
    async fn list_nodes(&self) -> Result<Vec<NodeHandle>>;

    /// Storage backend identifiers on a node.
    async fn list_storage(&self, node: &NodeHandle) -> Result<Vec<String>>;

    async fn list_storage_content(
        &self,
        node: &NodeHandle,
        storage: &str,
    ) -> Result<Vec<StorageEntry>>;

    async fn get_container_config(&self, node: &NodeHandle, vmid: u32) -> Result<ContainerConfig>;

    async fn get_container_status(&self, node: &NodeHandle, vmid: u32) -> Result<ContainerStatus>;

    /// Submit a create request; completion is tracked through the returned task.
    async fn create_container(&self, node: &NodeHandle, spec: &CreateSpec) -> Result<TaskId>;

    async fn start_container(&self, node: &NodeHandle, vmid: u32) -> Result<()>;

    async fn stop_container(&self, node: &NodeHandle, vmid: u32) -> Result<()>;

    async fn unmount_container(&self, node: &NodeHandle, vmid: u32) -> Result<()>;

    async fn delete_container(&self, node: &NodeHandle, vmid: u32) -> Result<()>;

    async fn get_task_status(&self, node: &NodeHandle, task: &TaskId) -> Result<TaskState>;
}

/// Connect to the cluster and drive one container to `desired`.
///
/// A connection failure is reported with `changed = false`; later failures
/// carry whatever was already changed on the remote side.
pub async fn reconcile(
    desired: DesiredState,
    connection: &ConnectionParams,
    params: &ContainerParams,
) -> std::result::Result<ReconcileOutcome, ReconcileError> {
    let cluster = PveCluster::connect(connection)
        .await
        .map_err(ReconcileError::unchanged)?;

    Reconciler::new(Arc::new(cluster))
        .with_preferred_node(connection.node.clone())
        .run(desired, params)
        .await
}
