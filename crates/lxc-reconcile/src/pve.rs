use async_trait::async_trait;
use pve_api::{ConnectOptions, CreateLxcRequest, PveClient};
use tracing::info;

pub use pve_api::{Credentials, Scheme};

use crate::config::CreateSpec;
use crate::types::{ContainerConfig, ContainerStatus, NodeHandle, StorageEntry, TaskId, TaskState};
use crate::{ClusterApi, Error, Result};

/// Everything needed to open a session against the cluster API.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    pub host: String,
    pub port: Option<u16>,
    pub scheme: Scheme,
    pub credentials: Credentials,
    pub verify_tls: bool,
    /// Node to create on when the cluster has more than one member.
    pub node: Option<String>,
}

/// Proxmox VE binding of [`ClusterApi`].
///
/// Delegates to `pve_api::PveClient` for all HTTP calls.
pub struct PveCluster {
    client: PveClient,
}

impl PveCluster {
    pub async fn connect(params: &ConnectionParams) -> Result<Self> {
        let client = PveClient::connect(&ConnectOptions {
            host: params.host.clone(),
            port: params.port,
            scheme: params.scheme,
            credentials: params.credentials.clone(),
            verify_tls: params.verify_tls,
        })
        .await
        .map_err(|e| Error::ConnectionFailure(format!("{}: {e}", params.host)))?;

        info!(host = %params.host, "pve: connected");
        Ok(Self { client })
    }

    /// Map a client error, keeping misses distinguishable from rejections.
    fn remote(operation: &'static str, target: String, err: pve_api::Error) -> Error {
        if err.is_not_found() {
            Error::NotFound(target)
        } else {
            Error::RemoteOperation {
                operation,
                target,
                reason: err.to_string(),
            }
        }
    }

    fn target(node: &NodeHandle, vmid: u32) -> String {
        format!("container {vmid} on node {node}")
    }

    fn parse_status(status: &pve_api::LxcStatus) -> Option<ContainerStatus> {
        if status.lock.as_deref() == Some("mounted") {
            return Some(ContainerStatus::Mounted);
        }
        match status.status.as_str() {
            "running" => Some(ContainerStatus::Running),
            "stopped" => Some(ContainerStatus::Stopped),
            "mounted" => Some(ContainerStatus::Mounted),
            _ => None,
        }
    }

    fn create_request(spec: &CreateSpec) -> CreateLxcRequest {
        CreateLxcRequest {
            vmid: spec.vmid,
            ostemplate: spec.ostemplate.clone(),
            storage: spec.storage.clone(),
            rootfs: format!("{}:{}", spec.storage, spec.disk),
            memory: spec.memory,
            swap: spec.swap,
            cores: spec.cpus,
            password: spec.password.clone(),
            hostname: spec.hostname.clone(),
            onboot: spec.onboot,
            net0: spec.net.clone(),
            extra: spec.extra.clone(),
        }
    }
}

#[async_trait]
impl ClusterApi for PveCluster {
    async fn list_nodes(&self) -> Result<Vec<NodeHandle>> {
        let nodes = self
            .client
            .list_nodes()
            .await
            .map_err(|e| Self::remote("list nodes", "cluster".into(), e))?;
        Ok(nodes.into_iter().map(|n| NodeHandle::new(n.node)).collect())
    }

    async fn list_storage(&self, node: &NodeHandle) -> Result<Vec<String>> {
        let storage = self
            .client
            .list_storage(&node.name)
            .await
            .map_err(|e| Self::remote("list storage", format!("node {node}"), e))?;
        Ok(storage.into_iter().map(|s| s.storage).collect())
    }

    async fn list_storage_content(
        &self,
        node: &NodeHandle,
        storage: &str,
    ) -> Result<Vec<StorageEntry>> {
        let content = self
            .client
            .list_storage_content(&node.name, storage)
            .await
            .map_err(|e| {
                Self::remote(
                    "list storage content",
                    format!("storage {storage} on node {node}"),
                    e,
                )
            })?;
        Ok(content
            .into_iter()
            .map(|c| StorageEntry {
                volid: c.volid,
                content: c.content,
            })
            .collect())
    }

    async fn get_container_config(&self, node: &NodeHandle, vmid: u32) -> Result<ContainerConfig> {
        self.client
            .get_lxc_config(&node.name, vmid)
            .await
            .map_err(|e| Self::remote("get container config", Self::target(node, vmid), e))
    }

    async fn get_container_status(&self, node: &NodeHandle, vmid: u32) -> Result<ContainerStatus> {
        let status = self
            .client
            .get_lxc_status(&node.name, vmid)
            .await
            .map_err(|e| Self::remote("get container status", Self::target(node, vmid), e))?;

        Self::parse_status(&status).ok_or_else(|| Error::RemoteOperation {
            operation: "get container status",
            target: Self::target(node, vmid),
            reason: format!("unexpected status {:?}", status.status),
        })
    }

    async fn create_container(&self, node: &NodeHandle, spec: &CreateSpec) -> Result<TaskId> {
        let upid = self
            .client
            .create_lxc(&node.name, &Self::create_request(spec))
            .await
            .map_err(|e| Self::remote("create container", Self::target(node, spec.vmid), e))?;
        Ok(TaskId(upid))
    }

    async fn start_container(&self, node: &NodeHandle, vmid: u32) -> Result<()> {
        self.client
            .start_lxc(&node.name, vmid)
            .await
            .map_err(|e| Self::remote("start container", Self::target(node, vmid), e))?;
        Ok(())
    }

    async fn stop_container(&self, node: &NodeHandle, vmid: u32) -> Result<()> {
        self.client
            .stop_lxc(&node.name, vmid)
            .await
            .map_err(|e| Self::remote("stop container", Self::target(node, vmid), e))?;
        Ok(())
    }

    async fn unmount_container(&self, node: &NodeHandle, vmid: u32) -> Result<()> {
        self.client
            .unmount_lxc(&node.name, vmid)
            .await
            .map_err(|e| Self::remote("unmount container", Self::target(node, vmid), e))?;
        Ok(())
    }

    async fn delete_container(&self, node: &NodeHandle, vmid: u32) -> Result<()> {
        self.client
            .delete_lxc(&node.name, vmid)
            .await
            .map_err(|e| Self::remote("delete container", Self::target(node, vmid), e))?;
        Ok(())
    }

    async fn get_task_status(&self, node: &NodeHandle, task: &TaskId) -> Result<TaskState> {
        let status = self
            .client
            .get_task_status(&node.name, &task.0)
            .await
            .map_err(|e| {
                Self::remote("get task status", format!("task {task} on node {node}"), e)
            })?;

        Ok(if status.is_running() {
            TaskState::Running
        } else if status.succeeded() {
            TaskState::Stopped
        } else {
            TaskState::Failed(status.exitstatus.unwrap_or_else(|| status.status.clone()))
        })
    }
}
