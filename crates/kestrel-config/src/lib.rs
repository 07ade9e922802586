//! Server configuration for kestrel.
//!
//! A TOML file layered under `KESTREL_*` environment variables, and its
//! translation to the runtime types of `kestrel_agent` and `kestrel_core`.
//! The file only seeds state: interval settings are written into the
//! inventory at startup when absent and read from there afterwards.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use kestrel_agent::{BasicAuth, TlsMode, TransportConfig};
use kestrel_core::PullerConfig;
use kestrel_core::model::setting::INTERVAL_DEFAULTS;
use kestrel_core::model::{AppType, DaemonName};

/// Prefix of environment overrides; `__` separates nested keys.
pub const ENV_PREFIX: &str = "KESTREL_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config file {} does not exist", path.display())]
    Missing { path: PathBuf },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level server configuration.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub agents: AgentsConfig,

    #[serde(default)]
    pub pullers: PullersConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Static inventory registered at startup.
    #[serde(default)]
    pub apps: Vec<AppSeed>,
}

/// How the server reaches agents.
#[derive(Debug, Deserialize, Serialize)]
pub struct AgentsConfig {
    /// Per-command deadline in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Accept any agent certificate.
    #[serde(default)]
    pub insecure: bool,

    /// Path to a custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Basic-auth user presented to Kea Control Agents.
    pub username: Option<String>,

    /// Basic-auth password (plaintext; prefer `password_env`).
    pub password: Option<String>,

    /// Environment variable holding the basic-auth password.
    pub password_env: Option<String>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            insecure: false,
            ca_cert: None,
            username: None,
            password: None,
            password_env: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PullersConfig {
    /// Daemons processed concurrently within one pass.
    #[serde(default = "default_fan_out")]
    pub fan_out: usize,

    /// `limit` of each `reservation-get-page` request.
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,

    /// Deadline of user-initiated changes in seconds.
    #[serde(default = "default_mutation_timeout")]
    pub mutation_timeout: u64,

    /// Initial interval settings in seconds, keyed by setting name.
    #[serde(default)]
    pub intervals: BTreeMap<String, i64>,
}

impl Default for PullersConfig {
    fn default() -> Self {
        Self {
            fan_out: default_fan_out(),
            page_limit: default_page_limit(),
            mutation_timeout: default_mutation_timeout(),
            intervals: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

/// One app of the seed inventory.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppSeed {
    /// Address of the machine running the agent.
    pub machine: String,

    #[serde(default = "default_agent_port")]
    pub agent_port: u16,

    /// `kea` or `bind9`.
    pub kind: String,

    /// App name; defaults to `<kind>@<machine>`.
    pub name: Option<String>,

    /// Control endpoint: the Kea Control Agent, or rndc for BIND 9.
    #[serde(default = "default_control_address")]
    pub control_address: String,

    pub control_port: Option<u16>,

    /// Daemon names such as `dhcp4`, `dhcp6` or `named`.
    #[serde(default)]
    pub daemons: Vec<String>,

    /// named.conf of a BIND 9 app.
    pub config_path: Option<PathBuf>,

    /// Directory named is chrooted into.
    pub chroot: Option<PathBuf>,
}

fn default_timeout() -> u64 {
    10
}
fn default_fan_out() -> usize {
    8
}
fn default_page_limit() -> u32 {
    100
}
fn default_mutation_timeout() -> u64 {
    30
}
fn default_level() -> String {
    "info".into()
}
fn default_agent_port() -> u16 {
    8080
}
fn default_control_address() -> String {
    "127.0.0.1".into()
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "kestrel", "kestrel").map_or_else(
        || PathBuf::from("/etc/kestrel/server.toml"),
        |dirs| dirs.config_dir().join("server.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(ServerConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load the configuration.
///
/// An explicit path must exist; the default path may be absent, in which
/// case defaults and environment overrides apply.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig, ConfigError> {
    let path = match path {
        Some(explicit) => {
            if !explicit.exists() {
                return Err(ConfigError::Missing {
                    path: explicit.to_path_buf(),
                });
            }
            explicit.to_path_buf()
        }
        None => config_path(),
    };
    let config: ServerConfig = figment(&path).extract()?;
    config.validate()?;
    Ok(config)
}

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &ServerConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agents.timeout == 0 {
            return Err(invalid("agents.timeout", "must be at least one second"));
        }
        if self.pullers.fan_out == 0 {
            return Err(invalid("pullers.fan_out", "must be at least 1"));
        }
        self.interval_seeds()?;
        for (index, app) in self.apps.iter().enumerate() {
            let kind = app.app_type()?;
            app.daemon_names()?;
            if kind == AppType::Bind9 && app.config_path.is_none() && app.control_port.is_none() {
                return Err(invalid(
                    format!("apps[{index}]"),
                    "a bind9 app needs config_path or control_port",
                ));
            }
        }
        Ok(())
    }

    /// Interval settings to seed, in a stable order.
    pub fn interval_seeds(&self) -> Result<Vec<(&'static str, i64)>, ConfigError> {
        self.pullers
            .intervals
            .iter()
            .map(|(name, secs)| {
                let known = INTERVAL_DEFAULTS
                    .iter()
                    .find(|(key, _)| *key == name.as_str())
                    .map(|(key, _)| *key)
                    .ok_or_else(|| invalid(format!("pullers.intervals.{name}"), "unknown setting"))?;
                if *secs < 0 {
                    return Err(invalid(
                        format!("pullers.intervals.{name}"),
                        "must not be negative",
                    ));
                }
                Ok((known, *secs))
            })
            .collect()
    }

    pub fn puller_config(&self) -> PullerConfig {
        PullerConfig {
            command_timeout: Duration::from_secs(self.agents.timeout),
            mutation_timeout: Duration::from_secs(self.pullers.mutation_timeout),
            page_limit: self.pullers.page_limit,
            fan_out: self.pullers.fan_out,
            ..PullerConfig::default()
        }
    }

    pub fn transport_config(&self) -> Result<TransportConfig, ConfigError> {
        let tls = if self.agents.insecure {
            TlsMode::DangerAcceptInvalid
        } else if let Some(ref ca_path) = self.agents.ca_cert {
            TlsMode::CustomCa(ca_path.clone())
        } else {
            TlsMode::System
        };
        let basic_auth = match &self.agents.username {
            Some(username) => Some(BasicAuth {
                username: username.clone(),
                password: self.resolve_password()?,
            }),
            None => None,
        };
        Ok(TransportConfig {
            tls,
            timeout: Duration::from_secs(self.agents.timeout),
            basic_auth,
        })
    }

    /// Basic-auth password: the named environment variable first, then
    /// the plaintext value.
    fn resolve_password(&self) -> Result<SecretString, ConfigError> {
        if let Some(ref env_name) = self.agents.password_env {
            if let Ok(val) = std::env::var(env_name) {
                return Ok(SecretString::from(val));
            }
        }
        if let Some(ref password) = self.agents.password {
            return Ok(SecretString::from(password.clone()));
        }
        Err(invalid("agents.password", "username is set without a password"))
    }
}

impl AppSeed {
    pub fn app_type(&self) -> Result<AppType, ConfigError> {
        self.kind
            .parse()
            .map_err(|_| invalid("apps.kind", format!("expected 'kea' or 'bind9', got '{}'", self.kind)))
    }

    pub fn daemon_names(&self) -> Result<Vec<DaemonName>, ConfigError> {
        self.daemons
            .iter()
            .map(|d| {
                d.parse()
                    .map_err(|_| invalid("apps.daemons", format!("unknown daemon '{d}'")))
            })
            .collect()
    }

    pub fn name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{}@{}", self.kind, self.machine))
    }

    /// Control port, defaulting per app type.
    pub fn control_port(&self) -> Result<u16, ConfigError> {
        Ok(match (self.control_port, self.app_type()?) {
            (Some(port), _) => port,
            (None, AppType::Kea) => 8000,
            (None, AppType::Bind9) => 953,
        })
    }
}
