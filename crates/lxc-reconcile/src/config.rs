//! Turns sparse caller parameters into the complete create payload.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::types::NodeHandle;
use crate::{Error, Result};

/// Keys carrying container settings are namespaced with this prefix.
pub const NAMESPACE: &str = "lxc_";

const DEFAULT_STORAGE: &str = "local";
const DEFAULT_MEMORY_MB: u64 = 1024;
const DEFAULT_CPUS: u32 = 1;
const DEFAULT_DISK_GB: u64 = 40;
const DEFAULT_PASSWORD: &str = "changeme";

/// Container parameters as declared by the caller.
///
/// ```json
/// { "vmid": 42, "template": "ubuntu 16.04", "lxc_memory": 2048, "lxc_onboot": true }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerParams {
    #[serde(default)]
    pub vmid: Option<u32>,
    /// Free-text template hint, e.g. `"ubuntu 14.04"`.
    #[serde(default)]
    pub template: Option<String>,
    #[serde(flatten)]
    pub settings: serde_json::Map<String, Value>,
}

impl ContainerParams {
    pub fn require_vmid(&self) -> Result<u32> {
        self.vmid
            .ok_or_else(|| Error::InvalidConfig("vmid is required".into()))
    }
}

/// Normalized create request for one container.
#[derive(Clone, PartialEq, Eq)]
pub struct CreateSpec {
    pub vmid: u32,
    pub node: NodeHandle,
    pub ostemplate: String,
    pub storage: String,
    /// Root disk size in GiB.
    pub disk: u64,
    /// Memory in MiB.
    pub memory: u64,
    /// Swap in MiB.
    pub swap: u64,
    pub cpus: u32,
    pub password: String,
    pub hostname: String,
    /// Boot-on-host-start flag, 0 or 1.
    pub onboot: u8,
    pub net: Option<String>,
    /// Namespaced keys without a dedicated field, prefix stripped.
    pub extra: BTreeMap<String, String>,
}

impl fmt::Debug for CreateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateSpec")
            .field("vmid", &self.vmid)
            .field("node", &self.node.name)
            .field("ostemplate", &self.ostemplate)
            .field("storage", &self.storage)
            .field("disk", &self.disk)
            .field("memory", &self.memory)
            .field("swap", &self.swap)
            .field("cpus", &self.cpus)
            .field("hostname", &self.hostname)
            .field("onboot", &self.onboot)
            .field("net", &self.net)
            .field("extra", &self.extra)
            .finish_non_exhaustive()
    }
}

/// Build the create payload for `params` on `node`.
///
/// Fails before anything touches the cluster when the container ID is
/// missing, no template was resolved, or a namespaced value has the wrong
/// shape.
pub fn normalize(
    params: &ContainerParams,
    node: &NodeHandle,
    ostemplate: Option<String>,
) -> Result<CreateSpec> {
    let vmid = params.require_vmid()?;

    let ostemplate = ostemplate.filter(|t| !t.is_empty()).ok_or_else(|| {
        Error::InvalidConfig(format!(
            "no template matches {:?} on node {node}",
            params.template.as_deref().unwrap_or_default()
        ))
    })?;

    let mut storage = DEFAULT_STORAGE.to_string();
    let mut disk = DEFAULT_DISK_GB;
    let mut memory = DEFAULT_MEMORY_MB;
    let mut swap: Option<i64> = None;
    let mut cpus = DEFAULT_CPUS;
    let mut password = DEFAULT_PASSWORD.to_string();
    let mut hostname = None;
    let mut onboot = false;
    let mut net = None;
    let mut extra = BTreeMap::new();

    for (key, value) in &params.settings {
        let Some(field) = key.strip_prefix(NAMESPACE) else {
            continue;
        };
        if value.is_null() {
            continue;
        }

        match field {
            "storage" => storage = string_value(key, value)?,
            "disk" => disk = positive(key, integer(key, value)?)?,
            "memory" => memory = positive(key, integer(key, value)?)?,
            "swap" => swap = Some(integer(key, value)?),
            "cpus" => {
                cpus = u32::try_from(positive(key, integer(key, value)?)?)
                    .map_err(|_| Error::InvalidConfig(format!("{key} is out of range")))?
            }
            "password" => password = string_value(key, value)?,
            "hostname" => hostname = Some(string_value(key, value)?),
            "onboot" => onboot = boolean(key, value)?,
            "net" => net = Some(string_value(key, value)?),
            _ => {
                extra.insert(field.to_string(), string_value(key, value)?);
            }
        }
    }

    // Swap follows memory unless explicitly sized.
    let swap = match swap {
        Some(s) if s > 0 => s as u64,
        _ => memory,
    };

    Ok(CreateSpec {
        vmid,
        node: node.clone(),
        ostemplate,
        storage,
        disk,
        memory,
        swap,
        cpus,
        password,
        hostname: hostname.unwrap_or_else(|| format!("Container{vmid}")),
        onboot: u8::from(onboot),
        net,
        extra,
    })
}

fn integer(key: &str, value: &Value) -> Result<i64> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| Error::InvalidConfig(format!("{key} must be an integer, got {value}")))
}

fn positive(key: &str, n: i64) -> Result<u64> {
    if n > 0 {
        Ok(n as u64)
    } else {
        Err(Error::InvalidConfig(format!("{key} must be positive, got {n}")))
    }
}

fn boolean(key: &str, value: &Value) -> Result<bool> {
    let parsed = match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "yes" | "true" | "on" | "1" => Some(true),
            "no" | "false" | "off" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    };
    parsed.ok_or_else(|| Error::InvalidConfig(format!("{key} must be a boolean, got {value}")))
}

fn string_value(key: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(u8::from(*b).to_string()),
        _ => Err(Error::InvalidConfig(format!("{key} must be a scalar, got {value}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TEMPLATE: &str = "local:vztmpl/debian-9-standard_9.7-1_amd64.tar.gz";

    fn params(value: serde_json::Value) -> ContainerParams {
        serde_json::from_value(value).unwrap()
    }

    fn spec(value: serde_json::Value) -> Result<CreateSpec> {
        normalize(&params(value), &NodeHandle::new("pve1"), Some(TEMPLATE.into()))
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let spec = spec(json!({ "vmid": 100 })).unwrap();
        assert_eq!(spec.storage, "local");
        assert_eq!(spec.memory, 1024);
        assert_eq!(spec.swap, 1024);
        assert_eq!(spec.cpus, 1);
        assert_eq!(spec.disk, 40);
        assert_eq!(spec.password, "changeme");
        assert_eq!(spec.onboot, 0);
        assert_eq!(spec.node.name, "pve1");
        assert_eq!(spec.ostemplate, TEMPLATE);
        assert!(spec.net.is_none());
    }

    #[test]
    fn swap_follows_memory_when_absent() {
        let spec = spec(json!({ "vmid": 42, "lxc_memory": 2048 })).unwrap();
        assert_eq!(spec.memory, 2048);
        assert_eq!(spec.swap, 2048);
    }

    #[test]
    fn explicit_swap_is_kept() {
        let spec = spec(json!({ "vmid": 42, "lxc_swap": 512, "lxc_memory": 2048 })).unwrap();
        assert_eq!(spec.swap, 512);
    }

    #[test]
    fn non_positive_swap_falls_back_to_memory() {
        let zero = spec(json!({ "vmid": 42, "lxc_swap": 0, "lxc_memory": 768 })).unwrap();
        assert_eq!(zero.swap, 768);
        let negative = spec(json!({ "vmid": 42, "lxc_swap": -1 })).unwrap();
        assert_eq!(negative.swap, 1024);
    }

    #[test]
    fn hostname_synthesized_from_vmid() {
        let synthesized = spec(json!({ "vmid": 42 })).unwrap();
        assert_eq!(synthesized.hostname, "Container42");

        let named = spec(json!({ "vmid": 42, "lxc_hostname": "web01" })).unwrap();
        assert_eq!(named.hostname, "web01");
    }

    #[test]
    fn onboot_maps_to_integer_flag() {
        assert_eq!(spec(json!({ "vmid": 1, "lxc_onboot": true })).unwrap().onboot, 1);
        assert_eq!(spec(json!({ "vmid": 1, "lxc_onboot": "no" })).unwrap().onboot, 0);
        assert!(matches!(
            spec(json!({ "vmid": 1, "lxc_onboot": "maybe" })),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn nulls_and_foreign_keys_are_ignored() {
        let spec = spec(json!({
            "vmid": 7,
            "lxc_memory": null,
            "memory": 4096,
            "api_host": "pve.example.org",
        }))
        .unwrap();
        assert_eq!(spec.memory, 1024);
        assert!(spec.extra.is_empty());
    }

    #[test]
    fn unknown_namespaced_keys_pass_through() {
        let spec = spec(json!({
            "vmid": 7,
            "lxc_nameserver": "1.1.1.1",
            "lxc_unprivileged": true,
            "lxc_net": "name=eth0,bridge=vmbr0,ip=dhcp",
        }))
        .unwrap();
        assert_eq!(spec.extra.get("nameserver").map(String::as_str), Some("1.1.1.1"));
        assert_eq!(spec.extra.get("unprivileged").map(String::as_str), Some("1"));
        assert_eq!(spec.net.as_deref(), Some("name=eth0,bridge=vmbr0,ip=dhcp"));
    }

    #[test]
    fn numeric_strings_are_accepted() {
        let spec = spec(json!({ "vmid": 9, "lxc_memory": "512", "lxc_cpus": "4" })).unwrap();
        assert_eq!(spec.memory, 512);
        assert_eq!(spec.cpus, 4);
    }

    #[test]
    fn missing_identity_is_rejected() {
        assert!(matches!(spec(json!({ "lxc_memory": 512 })), Err(Error::InvalidConfig(_))));

        let unresolved = normalize(
            &params(json!({ "vmid": 9, "template": "centos" })),
            &NodeHandle::new("pve1"),
            None,
        );
        assert!(matches!(unresolved, Err(Error::InvalidConfig(msg)) if msg.contains("centos")));
    }

    #[test]
    fn malformed_sizes_are_rejected() {
        assert!(matches!(
            spec(json!({ "vmid": 9, "lxc_memory": "lots" })),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            spec(json!({ "vmid": 9, "lxc_cpus": 0 })),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn debug_output_omits_password() {
        let spec = spec(json!({ "vmid": 9, "lxc_password": "s3cret" })).unwrap();
        assert_eq!(spec.password, "s3cret");
        assert!(!format!("{spec:?}").contains("s3cret"));
    }
}
