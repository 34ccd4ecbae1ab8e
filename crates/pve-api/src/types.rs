use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Every `/api2/json` response wraps its payload in `{"data": ...}`.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub data: T,
}

// ── Access ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub(crate) struct TicketRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Ticket {
    pub ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    pub csrf_token: String,
}

// ── Nodes ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Node {
    pub node: String,
    #[serde(default)]
    pub status: Option<String>,
}

// ── Storage ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Storage {
    pub storage: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageContent {
    #[serde(default)]
    pub volid: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

// ── Containers ───────────────────────────────────────────────────────

/// Container configuration as stored on the hosting node.
///
/// The key set depends on the container, so it is kept as a raw map.
pub type LxcConfig = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Deserialize)]
pub struct LxcStatus {
    pub status: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub lock: Option<String>,
    #[serde(default)]
    pub uptime: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateLxcRequest {
    pub vmid: u32,
    pub ostemplate: String,
    pub storage: String,
    pub rootfs: String,
    pub memory: u64,
    pub swap: u64,
    pub cores: u32,
    pub password: String,
    pub hostname: String,
    pub onboot: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net0: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

// ── Tasks ────────────────────────────────────────────────────────────

/// Unique process identifier of a node task, e.g.
/// `UPID:pve1:0000A1B2:0012C3D4:5F000000:vzcreate:100:root@pam:`.
pub type Upid = String;

#[derive(Debug, Clone, Deserialize)]
pub struct TaskStatus {
    pub status: String,
    #[serde(default)]
    pub exitstatus: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

impl TaskStatus {
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }

    /// A finished task succeeded only when its exit status is `OK`.
    pub fn succeeded(&self) -> bool {
        self.status == "stopped" && self.exitstatus.as_deref() == Some("OK")
    }
}
