//! In-memory cluster used by the unit tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use crate::config::CreateSpec;
use crate::types::{ContainerConfig, ContainerStatus, NodeHandle, StorageEntry, TaskId, TaskState};
use crate::{ClusterApi, Error, Result};

/// Number of remote calls issued, per operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Calls {
    pub list_nodes: u32,
    pub list_storage: u32,
    pub config_probes: u32,
    pub status_reads: u32,
    pub create: u32,
    pub start: u32,
    pub stop: u32,
    pub unmount: u32,
    pub delete: u32,
    pub task_polls: u32,
}

struct FakeContainer {
    node: String,
    status: ContainerStatus,
    hostname: String,
}

#[derive(Default)]
struct Inner {
    nodes: Vec<String>,
    containers: BTreeMap<u32, FakeContainer>,
    /// Per node, storage name and its content; `None` answers "not found".
    storage: BTreeMap<String, Vec<(String, Option<Vec<StorageEntry>>)>>,
    task_script: VecDeque<TaskState>,
    created: Vec<CreateSpec>,
    calls: Calls,
    ignore_start: bool,
    stop_leaves_mounted: bool,
    sticky_mount: bool,
    reject_delete: bool,
    vanish_on_command: bool,
}

#[derive(Default)]
pub(crate) struct FakeCluster {
    inner: Mutex<Inner>,
}

impl FakeCluster {
    pub fn new(nodes: &[&str]) -> Self {
        let fake = Self::default();
        fake.lock().nodes = nodes.iter().map(|n| n.to_string()).collect();
        fake
    }

    pub fn with_container(self, vmid: u32, node: &str, status: ContainerStatus) -> Self {
        self.lock().containers.insert(
            vmid,
            FakeContainer {
                node: node.into(),
                status,
                hostname: format!("ct{vmid}"),
            },
        );
        self
    }

    pub fn with_storage(self, node: &str, storage: &str, entries: &[(&str, &str)]) -> Self {
        let entries = entries
            .iter()
            .map(|(volid, content)| StorageEntry {
                volid: volid.to_string(),
                content: content.to_string(),
            })
            .collect();
        self.lock()
            .storage
            .entry(node.into())
            .or_default()
            .push((storage.into(), Some(entries)));
        self
    }

    /// Storage that is listed on `node` but whose content lookup is a miss.
    pub fn with_missing_storage(self, node: &str, storage: &str) -> Self {
        self.lock()
            .storage
            .entry(node.into())
            .or_default()
            .push((storage.into(), None));
        self
    }

    /// Task states returned by successive polls; `Stopped` once exhausted.
    pub fn with_task_script(self, states: impl IntoIterator<Item = TaskState>) -> Self {
        self.lock().task_script.extend(states);
        self
    }

    /// Start commands are accepted but the container never comes up.
    pub fn ignoring_start(self) -> Self {
        self.lock().ignore_start = true;
        self
    }

    /// Stop leaves the container mounted instead of stopped.
    pub fn stop_leaves_mounted(self) -> Self {
        self.lock().stop_leaves_mounted = true;
        self
    }

    /// Unmount commands are accepted but the container stays mounted.
    pub fn sticky_mount(self) -> Self {
        self.lock().sticky_mount = true;
        self
    }

    pub fn rejecting_delete(self) -> Self {
        self.lock().reject_delete = true;
        self
    }

    /// The container disappears as soon as a start, stop, unmount or delete
    /// reaches it, and the command answers "not found".
    pub fn vanishing_on_command(self) -> Self {
        self.lock().vanish_on_command = true;
        self
    }

    pub fn calls(&self) -> Calls {
        self.lock().calls.clone()
    }

    pub fn created(&self) -> Vec<CreateSpec> {
        self.lock().created.clone()
    }

    pub fn status_of(&self, vmid: u32) -> ContainerStatus {
        self.lock()
            .containers
            .get(&vmid)
            .map_or(ContainerStatus::Absent, |c| c.status)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }
}

impl Inner {
    /// Look up the container for a mutating command.
    fn commanded(&mut self, node: &NodeHandle, vmid: u32) -> Result<&mut FakeContainer> {
        if self.vanish_on_command {
            self.containers.remove(&vmid);
        }
        self.hosted(node, vmid)
    }

    fn hosted(&mut self, node: &NodeHandle, vmid: u32) -> Result<&mut FakeContainer> {
        match self.containers.get_mut(&vmid) {
            Some(c) if c.node == node.name => Ok(c),
            _ => Err(Error::NotFound(format!("container {vmid} on node {node}"))),
        }
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn list_nodes(&self) -> Result<Vec<NodeHandle>> {
        let mut inner = self.lock();
        inner.calls.list_nodes += 1;
        Ok(inner.nodes.iter().map(NodeHandle::new).collect())
    }

    async fn list_storage(&self, node: &NodeHandle) -> Result<Vec<String>> {
        let mut inner = self.lock();
        inner.calls.list_storage += 1;
        Ok(inner
            .storage
            .get(&node.name)
            .map(|s| s.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default())
    }

    async fn list_storage_content(
        &self,
        node: &NodeHandle,
        storage: &str,
    ) -> Result<Vec<StorageEntry>> {
        self.lock()
            .storage
            .get(&node.name)
            .and_then(|s| s.iter().find(|(name, _)| name == storage))
            .and_then(|(_, entries)| entries.clone())
            .ok_or_else(|| Error::NotFound(format!("storage {storage} on node {node}")))
    }

    async fn get_container_config(&self, node: &NodeHandle, vmid: u32) -> Result<ContainerConfig> {
        let mut inner = self.lock();
        inner.calls.config_probes += 1;
        let container = inner.hosted(node, vmid)?;
        let mut config = ContainerConfig::new();
        config.insert("hostname".into(), json!(container.hostname));
        Ok(config)
    }

    async fn get_container_status(&self, node: &NodeHandle, vmid: u32) -> Result<ContainerStatus> {
        let mut inner = self.lock();
        inner.calls.status_reads += 1;
        Ok(inner.hosted(node, vmid)?.status)
    }

    async fn create_container(&self, node: &NodeHandle, spec: &CreateSpec) -> Result<TaskId> {
        let mut inner = self.lock();
        inner.calls.create += 1;
        inner.created.push(spec.clone());
        inner.containers.insert(
            spec.vmid,
            FakeContainer {
                node: node.name.clone(),
                status: ContainerStatus::Stopped,
                hostname: spec.hostname.clone(),
            },
        );
        Ok(TaskId(format!(
            "UPID:{node}:00001234:00005678:5F000000:vzcreate:{}:root@pam:",
            spec.vmid
        )))
    }

    async fn start_container(&self, node: &NodeHandle, vmid: u32) -> Result<()> {
        let mut inner = self.lock();
        inner.calls.start += 1;
        let ignore = inner.ignore_start;
        let container = inner.commanded(node, vmid)?;
        if !ignore {
            container.status = ContainerStatus::Running;
        }
        Ok(())
    }

    async fn stop_container(&self, node: &NodeHandle, vmid: u32) -> Result<()> {
        let mut inner = self.lock();
        inner.calls.stop += 1;
        let mounted = inner.stop_leaves_mounted;
        inner.commanded(node, vmid)?.status = if mounted {
            ContainerStatus::Mounted
        } else {
            ContainerStatus::Stopped
        };
        Ok(())
    }

    async fn unmount_container(&self, node: &NodeHandle, vmid: u32) -> Result<()> {
        let mut inner = self.lock();
        inner.calls.unmount += 1;
        let sticky = inner.sticky_mount;
        let container = inner.commanded(node, vmid)?;
        if !sticky {
            container.status = ContainerStatus::Stopped;
        }
        Ok(())
    }

    async fn delete_container(&self, node: &NodeHandle, vmid: u32) -> Result<()> {
        let mut inner = self.lock();
        inner.calls.delete += 1;
        if inner.reject_delete {
            return Err(Error::RemoteOperation {
                operation: "delete container",
                target: format!("container {vmid} on node {node}"),
                reason: "permission denied".into(),
            });
        }
        inner.commanded(node, vmid)?;
        inner.containers.remove(&vmid);
        Ok(())
    }

    async fn get_task_status(&self, _node: &NodeHandle, _task: &TaskId) -> Result<TaskState> {
        let mut inner = self.lock();
        inner.calls.task_polls += 1;
        Ok(inner.task_script.pop_front().unwrap_or(TaskState::Stopped))
    }
}
