// ── Connected-agents port ──
//
// The core never talks to daemons directly. Every outbound request goes
// through `ConnectedAgents`, which the server wires to `HttpAgents` and
// tests wire to scripted fakes.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::kea::{KeaCommand, KeaResponse, parse_responses};
use crate::transport::TransportConfig;

/// Kind of endpoint an app exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AccessPointKind {
    Control,
    Statistics,
}

/// Network endpoint through which a daemon is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPoint {
    pub kind: AccessPointKind,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub use_tls: bool,
    /// Optional credential name (rndc key for BIND 9 control points).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl AccessPoint {
    pub fn control(address: impl Into<String>, port: u16) -> Self {
        Self {
            kind: AccessPointKind::Control,
            address: address.into(),
            port,
            use_tls: false,
            key: None,
        }
    }

    pub fn statistics(address: impl Into<String>, port: u16) -> Self {
        Self {
            kind: AccessPointKind::Statistics,
            address: address.into(),
            port,
            use_tls: false,
            key: None,
        }
    }

    /// Base URL of the endpoint. IPv6 literals are bracketed.
    pub fn base_url(&self) -> Result<Url, Error> {
        let scheme = if self.use_tls { "https" } else { "http" };
        let host = if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]", self.address)
        } else {
            self.address.clone()
        };
        Ok(Url::parse(&format!("{scheme}://{host}:{}/", self.port))?)
    }
}

impl fmt::Display for AccessPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.address.contains(':') {
            write!(f, "[{}]:{}", self.address, self.port)
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}

/// Outbound RPC port used by every puller and the mutation module.
///
/// Implementations must be safe to call concurrently; each call is
/// independent and carries its own deadline.
#[async_trait]
pub trait ConnectedAgents: Send + Sync {
    /// Forward a command to the Kea daemon(s) behind a control access point.
    async fn forward_to_kea(
        &self,
        access_point: &AccessPoint,
        command: &KeaCommand,
    ) -> Result<Vec<KeaResponse>, Error>;

    /// Fetch the JSON document served by a BIND 9 statistics channel.
    async fn forward_to_named_stats(&self, access_point: &AccessPoint) -> Result<Value, Error>;
}

/// `ConnectedAgents` over plain HTTP(S) JSON.
pub struct HttpAgents {
    http: reqwest::Client,
    config: TransportConfig,
}

impl HttpAgents {
    pub fn new(config: TransportConfig) -> Result<Self, Error> {
        let http = config.build_client()?;
        Ok(Self { http, config })
    }

    fn map_send_error(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                timeout_secs: self.config.timeout.as_secs(),
            }
        } else {
            Error::Transport(err)
        }
    }

    async fn read_body(&self, url: &Url, resp: reqwest::Response) -> Result<String, Error> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Http {
                status: status.as_u16(),
                url: url.to_string(),
                body: body.chars().take(200).collect(),
            });
        }
        resp.text().await.map_err(|e| self.map_send_error(e))
    }
}

#[async_trait]
impl ConnectedAgents for HttpAgents {
    async fn forward_to_kea(
        &self,
        access_point: &AccessPoint,
        command: &KeaCommand,
    ) -> Result<Vec<KeaResponse>, Error> {
        let url = access_point.base_url()?;
        debug!(%url, command = %command.command, "forwarding Kea command");

        let mut req = self.http.post(url.clone()).json(command);
        if let Some(auth) = &self.config.basic_auth {
            use secrecy::ExposeSecret;
            req = req.basic_auth(&auth.username, Some(auth.password.expose_secret()));
        }

        let resp = req.send().await.map_err(|e| self.map_send_error(e))?;
        let body = self.read_body(&url, resp).await?;
        parse_responses(&body)
    }

    async fn forward_to_named_stats(&self, access_point: &AccessPoint) -> Result<Value, Error> {
        let url = access_point.base_url()?.join("json/v1")?;
        debug!(%url, "fetching BIND 9 statistics");

        let resp = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let body = self.read_body(&url, resp).await?;
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: body.chars().take(200).collect(),
        })
    }
}
