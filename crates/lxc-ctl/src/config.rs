use std::env;

use lxc_reconcile::ConnectionParams;
use lxc_reconcile::pve::{Credentials, Scheme};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing env var: {0}")]
    MissingEnv(&'static str),

    #[error("invalid {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Read connection settings from the environment (after loading `.env`).
///
/// - `PVE_HOST` (required)
/// - `PVE_PORT` (default: 8006)
/// - `PVE_SCHEME` (`https` or `http`, default: `https`)
/// - `PVE_TOKEN_ID` + `PVE_TOKEN_SECRET`, or `PVE_USER` + `PVE_PASSWORD`
/// - `PVE_VERIFY_TLS` (default: `true`)
/// - `PVE_NODE` (preferred node, optional)
pub fn connection_from_env() -> Result<ConnectionParams, ConfigError> {
    dotenvy::dotenv().ok();
    connection_from(|name| env::var(name).ok())
}

fn connection_from(
    var: impl Fn(&'static str) -> Option<String>,
) -> Result<ConnectionParams, ConfigError> {
    let host = var("PVE_HOST").ok_or(ConfigError::MissingEnv("PVE_HOST"))?;

    let port = var("PVE_PORT")
        .map(|raw| {
            raw.parse::<u16>().map_err(|_| ConfigError::Invalid {
                name: "PVE_PORT",
                value: raw,
            })
        })
        .transpose()?;

    let scheme = match var("PVE_SCHEME").as_deref() {
        None | Some("https") => Scheme::Https,
        Some("http") => Scheme::Http,
        Some(other) => {
            return Err(ConfigError::Invalid {
                name: "PVE_SCHEME",
                value: other.to_string(),
            });
        }
    };

    let credentials = match (var("PVE_TOKEN_ID"), var("PVE_TOKEN_SECRET")) {
        (Some(id), Some(secret)) => Credentials::Token { id, secret },
        (Some(_), None) => return Err(ConfigError::MissingEnv("PVE_TOKEN_SECRET")),
        _ => Credentials::Password {
            user: var("PVE_USER").unwrap_or_else(|| "root@pam".into()),
            password: var("PVE_PASSWORD").ok_or(ConfigError::MissingEnv("PVE_PASSWORD"))?,
        },
    };

    let verify_tls = match var("PVE_VERIFY_TLS").as_deref() {
        None | Some("1" | "true" | "yes") => true,
        Some("0" | "false" | "no") => false,
        Some(other) => {
            return Err(ConfigError::Invalid {
                name: "PVE_VERIFY_TLS",
                value: other.to_string(),
            });
        }
    };

    Ok(ConnectionParams {
        host,
        port,
        scheme,
        credentials,
        verify_tls,
        node: var("PVE_NODE").filter(|n| !n.is_empty()),
    })
}
