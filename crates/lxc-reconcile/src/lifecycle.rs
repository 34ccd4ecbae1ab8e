//! Drives a container through create/start/stop/restart/delete.
//!
//! Every remote command is followed by a bounded poll: a fixed number of
//! reads with a fixed delay in between. Entry points read the current status
//! first and skip the command when the container is already where it should
//! be, so re-running a reconciliation is harmless.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::{self, ContainerParams};
use crate::locator::ContainerLocator;
use crate::template;
use crate::topology::ClusterTopology;
use crate::types::{
    ContainerHandle, ContainerSnapshot, ContainerStatus, DesiredState, NodeHandle,
    ReconcileOutcome, TaskId, TaskState,
};
use crate::{ClusterApi, Error, Result};

/// How many times to poll and how long to wait between polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub attempts: u32,
    pub interval: Duration,
}

impl PollBudget {
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    async fn pause(&self, attempt: u32) {
        if attempt < self.attempts {
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Waiting for the create task to finish.
    pub create: PollBudget,
    /// Waiting for a started container to report `running`.
    pub start: PollBudget,
    /// Waiting for a stopped container to report `stopped`.
    pub stop: PollBudget,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            create: PollBudget::new(60, Duration::from_secs(1)),
            start: PollBudget::new(20, Duration::from_secs(1)),
            stop: PollBudget::new(20, Duration::from_secs(2)),
        }
    }
}

/// A failed run, with whether anything was changed before the failure.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct ReconcileError {
    pub source: Error,
    pub changed: bool,
}

impl ReconcileError {
    pub fn unchanged(source: Error) -> Self {
        Self {
            source,
            changed: false,
        }
    }
}

/// One reconciliation run against a cluster.
pub struct Reconciler {
    api: Arc<dyn ClusterApi>,
    topology: ClusterTopology,
    locator: ContainerLocator,
    policy: PollPolicy,
    preferred_node: Option<String>,
    changed: bool,
    task_id: Option<TaskId>,
}

impl Reconciler {
    pub fn new(api: Arc<dyn ClusterApi>) -> Self {
        Self {
            topology: ClusterTopology::new(api.clone()),
            locator: ContainerLocator::new(api.clone()),
            api,
            policy: PollPolicy::default(),
            preferred_node: None,
            changed: false,
            task_id: None,
        }
    }

    pub fn with_preferred_node(mut self, node: Option<String>) -> Self {
        self.preferred_node = node;
        self
    }

    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Converge the container described by `params` to `desired`.
    pub async fn run(
        mut self,
        desired: DesiredState,
        params: &ContainerParams,
    ) -> std::result::Result<ReconcileOutcome, ReconcileError> {
        let vmid = params.require_vmid().map_err(ReconcileError::unchanged)?;
        info!(vmid, desired = %desired, "reconciling container");

        match self.apply(desired, vmid, params).await {
            Ok(outcome) => {
                info!(vmid, changed = outcome.changed, status = %outcome.status, "reconciled");
                Ok(outcome)
            }
            Err(source) => {
                error!(
                    vmid,
                    desired = %desired,
                    changed = self.changed,
                    error = %source,
                    "reconcile failed"
                );
                Err(ReconcileError {
                    source,
                    changed: self.changed,
                })
            }
        }
    }

    async fn apply(
        &mut self,
        desired: DesiredState,
        vmid: u32,
        params: &ContainerParams,
    ) -> Result<ReconcileOutcome> {
        match desired {
            DesiredState::Present => {
                self.ensure_present(vmid, params).await?;
            }
            DesiredState::Started => {
                self.ensure_started(vmid).await?;
            }
            DesiredState::Active => {
                self.ensure_present(vmid, params).await?;
                self.ensure_started(vmid).await?;
            }
            DesiredState::Stopped => {
                if self.ensure_stopped(vmid).await?.is_none() {
                    return Ok(self.outcome(vmid, None, ContainerStatus::Absent, None));
                }
            }
            DesiredState::Restarted => {
                if self.ensure_stopped(vmid).await?.is_none() {
                    return Err(Error::ContainerAbsent { vmid });
                }
                self.ensure_started(vmid).await?;
            }
            DesiredState::Absent | DesiredState::Deleted => {
                let node = match self.ensure_stopped(vmid).await? {
                    Some(handle) => {
                        self.delete(&handle).await?;
                        Some(handle.node.name)
                    }
                    None => None,
                };
                return Ok(self.outcome(vmid, node, ContainerStatus::Absent, None));
            }
        }

        Ok(match self.snapshot(vmid).await? {
            Some(snapshot) => {
                let hostname = snapshot.hostname().map(str::to_owned);
                self.outcome(vmid, Some(snapshot.handle.node.name), snapshot.status, hostname)
            }
            None => self.outcome(vmid, None, ContainerStatus::Absent, None),
        })
    }

    fn outcome(
        &self,
        vmid: u32,
        node: Option<String>,
        status: ContainerStatus,
        hostname: Option<String>,
    ) -> ReconcileOutcome {
        ReconcileOutcome {
            changed: self.changed,
            vmid,
            node,
            status,
            hostname,
            task_id: self.task_id.clone(),
        }
    }

    /// Fresh config and status read. `None` when the container does not exist.
    async fn snapshot(&mut self, vmid: u32) -> Result<Option<ContainerSnapshot>> {
        let Some(handle) = self.locator.locate(vmid).await? else {
            return Ok(None);
        };

        let config = match self.api.get_container_config(&handle.node, vmid).await {
            Ok(config) => config,
            Err(Error::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let status = self.status_of(&handle).await?;
        if status == ContainerStatus::Absent {
            return Ok(None);
        }

        Ok(Some(ContainerSnapshot {
            handle,
            status,
            config,
        }))
    }

    async fn status_of(&self, handle: &ContainerHandle) -> Result<ContainerStatus> {
        match self.api.get_container_status(&handle.node, handle.vmid).await {
            Ok(status) => Ok(status),
            Err(Error::NotFound(_)) => Ok(ContainerStatus::Absent),
            Err(e) => Err(e),
        }
    }

    // ── Transitions ──────────────────────────────────────────────────

    async fn ensure_present(
        &mut self,
        vmid: u32,
        params: &ContainerParams,
    ) -> Result<ContainerHandle> {
        if let Some(handle) = self.locator.locate(vmid).await? {
            debug!(vmid, node = %handle.node, "container already exists");
            return Ok(handle);
        }

        let node = self
            .topology
            .resolve_operating_node(self.preferred_node.as_deref())
            .await?;

        let templates = template::list_available_templates(&*self.api, &node).await?;
        let hint = params.template.as_deref().unwrap_or_default();
        let ostemplate = template::resolve(hint, &templates).map(str::to_owned);
        debug!(vmid, hint, ostemplate = ?ostemplate, "template resolved");

        let spec = config::normalize(params, &node, ostemplate)?;

        info!(vmid, node = %node, ostemplate = %spec.ostemplate, "creating container");
        let task = self.api.create_container(&node, &spec).await?;
        self.changed = true;
        self.task_id = Some(task.clone());

        self.wait_for_task(&node, &task, vmid).await?;
        info!(vmid, node = %node, upid = %task, "container created");

        Ok(self.locator.remember(ContainerHandle { vmid, node }))
    }

    async fn ensure_started(&mut self, vmid: u32) -> Result<ContainerHandle> {
        let handle = self
            .locator
            .locate(vmid)
            .await?
            .ok_or(Error::ContainerAbsent { vmid })?;

        match self.status_of(&handle).await? {
            ContainerStatus::Running => {
                debug!(vmid, node = %handle.node, "container already running");
                return Ok(handle);
            }
            ContainerStatus::Absent => return Err(Error::ContainerAbsent { vmid }),
            ContainerStatus::Stopped | ContainerStatus::Mounted => {}
        }

        info!(vmid, node = %handle.node, "starting container");
        match self.api.start_container(&handle.node, vmid).await {
            Ok(()) => self.changed = true,
            Err(Error::NotFound(_)) => return Err(Error::ContainerAbsent { vmid }),
            Err(e) => return Err(e),
        }

        self.wait_until_running(&handle).await?;
        info!(vmid, node = %handle.node, "container started");
        Ok(handle)
    }

    /// Returns the handle of the stopped container, or `None` if it does not exist.
    async fn ensure_stopped(&mut self, vmid: u32) -> Result<Option<ContainerHandle>> {
        let Some(handle) = self.locator.locate(vmid).await? else {
            debug!(vmid, "container absent, nothing to stop");
            return Ok(None);
        };

        match self.status_of(&handle).await? {
            ContainerStatus::Stopped => {
                debug!(vmid, node = %handle.node, "container already stopped");
                return Ok(Some(handle));
            }
            ContainerStatus::Absent => return Ok(None),
            ContainerStatus::Running => {
                info!(vmid, node = %handle.node, "stopping container");
                match self.api.stop_container(&handle.node, vmid).await {
                    Ok(()) => self.changed = true,
                    Err(Error::NotFound(_)) => {
                        warn!(vmid, node = %handle.node, "container vanished before stop");
                        return Ok(None);
                    }
                    Err(e) => return Err(e),
                }
            }
            // Unmounted by the wait loop below.
            ContainerStatus::Mounted => {}
        }

        if !self.wait_until_stopped(&handle).await? {
            return Ok(None);
        }
        info!(vmid, node = %handle.node, "container stopped");
        Ok(Some(handle))
    }

    async fn delete(&mut self, handle: &ContainerHandle) -> Result<()> {
        match self.api.delete_container(&handle.node, handle.vmid).await {
            Ok(()) => {
                self.changed = true;
                info!(vmid = handle.vmid, node = %handle.node, "container deleted");
                Ok(())
            }
            Err(Error::NotFound(_)) => {
                warn!(vmid = handle.vmid, node = %handle.node, "container already deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    // ── Polling ──────────────────────────────────────────────────────

    async fn wait_for_task(&self, node: &NodeHandle, task: &TaskId, vmid: u32) -> Result<()> {
        let budget = self.policy.create;
        for attempt in 1..=budget.attempts {
            match self.api.get_task_status(node, task).await? {
                TaskState::Stopped => return Ok(()),
                TaskState::Failed(reason) => {
                    return Err(Error::RemoteOperation {
                        operation: "create container",
                        target: format!("container {vmid} on node {node}"),
                        reason,
                    });
                }
                TaskState::Running => {
                    debug!(upid = %task, attempt, "task still running");
                }
            }
            budget.pause(attempt).await;
        }

        Err(Error::PollTimeout {
            what: format!("task {task} on node {node}"),
            attempts: budget.attempts,
        })
    }

    async fn wait_until_running(&self, handle: &ContainerHandle) -> Result<()> {
        let budget = self.policy.start;
        for attempt in 1..=budget.attempts {
            match self.status_of(handle).await? {
                ContainerStatus::Running => return Ok(()),
                ContainerStatus::Absent => return Err(Error::ContainerAbsent { vmid: handle.vmid }),
                status => debug!(vmid = handle.vmid, %status, attempt, "waiting for running"),
            }
            budget.pause(attempt).await;
        }

        Err(Error::PollTimeout {
            what: format!("container {} on node {} to run", handle.vmid, handle.node),
            attempts: budget.attempts,
        })
    }

    /// Each observation of `mounted` is answered with one unmount.
    ///
    /// Returns `false` when the container disappeared while waiting.
    async fn wait_until_stopped(&mut self, handle: &ContainerHandle) -> Result<bool> {
        let budget = self.policy.stop;
        for attempt in 1..=budget.attempts {
            match self.status_of(handle).await? {
                ContainerStatus::Stopped => return Ok(true),
                ContainerStatus::Absent => return Ok(false),
                ContainerStatus::Mounted => {
                    info!(vmid = handle.vmid, node = %handle.node, "unmounting container");
                    match self.api.unmount_container(&handle.node, handle.vmid).await {
                        Ok(()) => self.changed = true,
                        Err(Error::NotFound(_)) => {
                            warn!(
                                vmid = handle.vmid,
                                node = %handle.node,
                                "container vanished before unmount"
                            );
                            return Ok(false);
                        }
                        Err(e) => return Err(e),
                    }
                }
                ContainerStatus::Running => {
                    debug!(vmid = handle.vmid, attempt, "waiting for stop");
                }
            }
            budget.pause(attempt).await;
        }

        Err(Error::PollTimeout {
            what: format!("container {} on node {} to stop", handle.vmid, handle.node),
            attempts: budget.attempts,
        })
    }
}
