//! Typed Rust client for the Proxmox VE REST API (`/api2/json`).
//!
//! Covers the subset needed for reconciling LXC containers:
//! nodes, storage content, containers (config, status, create, start,
//! stop, unmount, delete) and node task status.

mod types;

use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;

pub use reqwest::StatusCode;
pub use types::*;

const DEFAULT_PORT: u16 = 8006;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("pve api request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("pve api {endpoint} returned {status}: {body}")]
    Api {
        endpoint: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("pve authentication failed: {0}")]
    Auth(String),
}

impl Error {
    /// Whether the remote reported that the addressed resource does not exist.
    ///
    /// Missing guests are answered with a 500 whose message says the
    /// configuration file "does not exist", so the body is inspected too.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Api { status, body, .. } => {
                status.as_u16() == 404
                    || (status.as_u16() == 500 && body.contains("does not exist"))
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// URL scheme used to reach the API endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Scheme {
    #[default]
    Https,
    Http,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Https => "https",
            Self::Http => "http",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
pub enum Credentials {
    /// `user@realm` and password, exchanged for a ticket at connect time.
    Password { user: String, password: String },
    /// API token id (`user@realm!name`) and its secret.
    Token { id: String, secret: String },
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password { user, .. } => f
                .debug_struct("Password")
                .field("user", user)
                .finish_non_exhaustive(),
            Self::Token { id, .. } => f
                .debug_struct("Token")
                .field("id", id)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: Option<u16>,
    pub scheme: Scheme,
    pub credentials: Credentials,
    pub verify_tls: bool,
}

impl ConnectOptions {
    pub fn base_url(&self) -> String {
        format!(
            "{}://{}:{}/api2/json",
            self.scheme,
            self.host,
            self.port.unwrap_or(DEFAULT_PORT)
        )
    }
}

#[derive(Clone)]
enum Auth {
    Ticket { cookie: String, csrf_token: String },
    Token(String),
}

/// Client for the Proxmox VE REST API.
#[derive(Clone)]
pub struct PveClient {
    base_url: String,
    auth: Auth,
    http: reqwest::Client,
}

impl PveClient {
    /// Establish an authenticated session.
    ///
    /// Certificate verification is relaxed only on this client's connector
    /// when `verify_tls` is false; nothing process-wide is changed.
    pub async fn connect(opts: &ConnectOptions) -> Result<Self> {
        if !opts.verify_tls {
            tracing::warn!(host = %opts.host, "pve: TLS certificate verification disabled");
        }

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!opts.verify_tls)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let base_url = opts.base_url();

        let auth = match &opts.credentials {
            Credentials::Token { id, secret } => Auth::Token(format!("PVEAPIToken={id}={secret}")),
            Credentials::Password { user, password } => {
                let resp = http
                    .post(format!("{base_url}/access/ticket"))
                    .form(&TicketRequest {
                        username: user,
                        password,
                    })
                    .send()
                    .await?;

                let status = resp.status();
                if !status.is_success() {
                    return Err(Error::Auth(format!("login as {user} returned {status}")));
                }
                let ticket: Envelope<Option<Ticket>> = resp.json().await?;
                let ticket = ticket
                    .data
                    .ok_or_else(|| Error::Auth(format!("no ticket issued for {user}")))?;

                Auth::Ticket {
                    cookie: format!("PVEAuthCookie={}", ticket.ticket),
                    csrf_token: ticket.csrf_token,
                }
            }
        };

        tracing::debug!(url = %base_url, "pve: session established");
        Ok(Self {
            base_url,
            auth,
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mutating = method != reqwest::Method::GET;
        let builder = self.http.request(method, self.url(path));
        match &self.auth {
            Auth::Token(header) => builder.header("Authorization", header),
            Auth::Ticket { cookie, csrf_token } => {
                let builder = builder.header("Cookie", cookie);
                if mutating {
                    builder.header("CSRFPreventionToken", csrf_token)
                } else {
                    builder
                }
            }
        }
    }

    async fn check(resp: reqwest::Response, endpoint: &'static str) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                endpoint,
                status,
                body,
            });
        }
        Ok(resp)
    }

    async fn data<T: DeserializeOwned>(
        resp: reqwest::Response,
        endpoint: &'static str,
    ) -> Result<T> {
        let envelope: Envelope<T> = Self::check(resp, endpoint).await?.json().await?;
        Ok(envelope.data)
    }

    // ── Nodes ────────────────────────────────────────────────────────

    pub async fn list_nodes(&self) -> Result<Vec<Node>> {
        let resp = self.request(reqwest::Method::GET, "/nodes").send().await?;
        Self::data(resp, "list nodes").await
    }

    // ── Storage ──────────────────────────────────────────────────────

    pub async fn list_storage(&self, node: &str) -> Result<Vec<Storage>> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/nodes/{node}/storage"))
            .send()
            .await?;
        Self::data(resp, "list storage").await
    }

    pub async fn list_storage_content(
        &self,
        node: &str,
        storage: &str,
    ) -> Result<Vec<StorageContent>> {
        let resp = self
            .request(
                reqwest::Method::GET,
                &format!("/nodes/{node}/storage/{storage}/content"),
            )
            .send()
            .await?;
        Self::data(resp, "list storage content").await
    }

    // ── Containers ───────────────────────────────────────────────────

    pub async fn get_lxc_config(&self, node: &str, vmid: u32) -> Result<LxcConfig> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/nodes/{node}/lxc/{vmid}/config"))
            .send()
            .await?;
        Self::data(resp, "get container config").await
    }

    pub async fn get_lxc_status(&self, node: &str, vmid: u32) -> Result<LxcStatus> {
        let resp = self
            .request(
                reqwest::Method::GET,
                &format!("/nodes/{node}/lxc/{vmid}/status/current"),
            )
            .send()
            .await?;
        Self::data(resp, "get container status").await
    }

    pub async fn create_lxc(&self, node: &str, req: &CreateLxcRequest) -> Result<Upid> {
        let resp = self
            .request(reqwest::Method::POST, &format!("/nodes/{node}/lxc"))
            .json(req)
            .send()
            .await?;
        Self::data(resp, "create container").await
    }

    pub async fn start_lxc(&self, node: &str, vmid: u32) -> Result<Upid> {
        self.lxc_status_command(node, vmid, "start", "start container").await
    }

    pub async fn stop_lxc(&self, node: &str, vmid: u32) -> Result<Upid> {
        self.lxc_status_command(node, vmid, "stop", "stop container").await
    }

    pub async fn unmount_lxc(&self, node: &str, vmid: u32) -> Result<Upid> {
        self.lxc_status_command(node, vmid, "unmount", "unmount container").await
    }

    pub async fn delete_lxc(&self, node: &str, vmid: u32) -> Result<Upid> {
        let resp = self
            .request(reqwest::Method::DELETE, &format!("/nodes/{node}/lxc/{vmid}"))
            .send()
            .await?;
        Self::data(resp, "delete container").await
    }

    async fn lxc_status_command(
        &self,
        node: &str,
        vmid: u32,
        command: &str,
        endpoint: &'static str,
    ) -> Result<Upid> {
        let resp = self
            .request(
                reqwest::Method::POST,
                &format!("/nodes/{node}/lxc/{vmid}/status/{command}"),
            )
            .send()
            .await?;
        Self::data(resp, endpoint).await
    }

    // ── Tasks ────────────────────────────────────────────────────────

    pub async fn get_task_status(&self, node: &str, upid: &str) -> Result<TaskStatus> {
        let resp = self
            .request(reqwest::Method::GET, &format!("/nodes/{node}/tasks/{upid}/status"))
            .send()
            .await?;
        Self::data(resp, "get task status").await
    }
}
