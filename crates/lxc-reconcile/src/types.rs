use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// One cluster member, identified by its node name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeHandle {
    pub name: String,
}

impl NodeHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A container ID together with the node currently hosting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub vmid: u32,
    pub node: NodeHandle,
}

/// Observed run state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Running,
    Stopped,
    Mounted,
    Absent,
}

impl ContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Mounted => "mounted",
            Self::Absent => "absent",
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw container configuration keys as reported by the hosting node.
pub type ContainerConfig = BTreeMap<String, serde_json::Value>;

/// Point-in-time read of a container. Never cached.
#[derive(Debug, Clone)]
pub struct ContainerSnapshot {
    pub handle: ContainerHandle,
    pub status: ContainerStatus,
    pub config: ContainerConfig,
}

impl ContainerSnapshot {
    pub fn hostname(&self) -> Option<&str> {
        self.config.get("hostname").and_then(|v| v.as_str())
    }
}

/// One entry of a storage backend's content listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEntry {
    pub volid: String,
    pub content: String,
}

/// Identifier of a remote long-running operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remote task state. `Stopped` means the job finished successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Stopped,
    Failed(String),
}

/// Caller-declared target state of the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
    Active,
    Present,
    Started,
    Stopped,
    Restarted,
    Absent,
    Deleted,
}

impl DesiredState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Present => "present",
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Restarted => "restarted",
            Self::Absent => "absent",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DesiredState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "present" => Ok(Self::Present),
            "started" => Ok(Self::Started),
            "stopped" => Ok(Self::Stopped),
            "restarted" => Ok(Self::Restarted),
            "absent" => Ok(Self::Absent),
            "deleted" => Ok(Self::Deleted),
            other => Err(Error::UnknownState(other.to_string())),
        }
    }
}

/// Result of one reconciliation run.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    pub changed: bool,
    pub vmid: u32,
    pub node: Option<String>,
    pub status: ContainerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desired_state_round_trips_through_str() {
        for state in [
            DesiredState::Active,
            DesiredState::Present,
            DesiredState::Started,
            DesiredState::Stopped,
            DesiredState::Restarted,
            DesiredState::Absent,
            DesiredState::Deleted,
        ] {
            assert_eq!(state.as_str().parse::<DesiredState>().unwrap(), state);
        }
        assert!(matches!(
            "paused".parse::<DesiredState>(),
            Err(Error::UnknownState(s)) if s == "paused"
        ));
    }

    #[test]
    fn outcome_serializes_status_lowercase() {
        let outcome = ReconcileOutcome {
            changed: true,
            vmid: 42,
            node: Some("pve1".into()),
            status: ContainerStatus::Running,
            hostname: None,
            task_id: None,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "running");
        assert!(json.get("task_id").is_none());
    }
}
