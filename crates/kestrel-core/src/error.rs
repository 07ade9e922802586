// ── Core error types ──
//
// Errors surfaced by pullers, the configuration model and the mutation
// module. The `From<kestrel_agent::Error>` impl translates transport-layer
// errors into domain variants so callers never match on HTTP details.

use thiserror::Error;

use crate::bind9::Bind9Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Agent errors ─────────────────────────────────────────────────
    #[error("Cannot reach daemon through agent at {target}: {reason}")]
    Transport { target: String, reason: String },

    #[error("Daemon {daemon} rejected {command}: {text}")]
    CommandFailed {
        daemon: String,
        command: String,
        text: String,
    },

    #[error("Command {command} is not supported by daemon {daemon}")]
    UnsupportedCommand { command: String, daemon: String },

    #[error("Malformed response: {message}")]
    MalformedResponse { message: String },

    #[error("Operation timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("Include cycle detected at {path}")]
    IncludeCycle { path: String },

    #[error("Included file {path} could not be read: {reason}")]
    IncludeMissing { path: String, reason: String },

    #[error("Too much recursion while expanding ACL {name}")]
    RecursionLimit { name: String },

    #[error("Zone transfer is disabled for view {view}, zone {zone}")]
    AllowTransferDisabled { view: String, zone: String },

    #[error("allow-transfer port {port} does not match any listen-on setting")]
    ListenerMismatch { port: u16 },

    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Inventory errors ─────────────────────────────────────────────
    #[error("Inventory conflict: {message}")]
    Conflict { message: String },

    #[error("Entity not found: {entity_type} with id {identifier}")]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn not_found(entity_type: &str, identifier: impl ToString) -> Self {
        Self::NotFound {
            entity_type: entity_type.to_owned(),
            identifier: identifier.to_string(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<kestrel_agent::Error> for CoreError {
    fn from(err: kestrel_agent::Error) -> Self {
        match err {
            kestrel_agent::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            kestrel_agent::Error::Deserialization { message, .. } => {
                CoreError::MalformedResponse { message }
            }
            kestrel_agent::Error::Http { status, url, body } => CoreError::Transport {
                target: url,
                reason: format!("HTTP {status}: {body}"),
            },
            kestrel_agent::Error::Transport(e) => CoreError::Transport {
                target: e.url().map(ToString::to_string).unwrap_or_default(),
                reason: e.to_string(),
            },
            kestrel_agent::Error::InvalidUrl(e) => CoreError::Transport {
                target: String::new(),
                reason: e.to_string(),
            },
            kestrel_agent::Error::Tls(reason) => CoreError::Transport {
                target: String::new(),
                reason,
            },
        }
    }
}

impl From<Bind9Error> for CoreError {
    fn from(err: Bind9Error) -> Self {
        match err {
            Bind9Error::Parse { .. } | Bind9Error::LineTooLong { .. } => CoreError::Parse {
                message: err.to_string(),
            },
            Bind9Error::IncludeCycle { path } => CoreError::IncludeCycle {
                path: path.display().to_string(),
            },
            Bind9Error::IncludeMissing { path, reason } => CoreError::IncludeMissing {
                path: path.display().to_string(),
                reason,
            },
            Bind9Error::RecursionLimit { name } => CoreError::RecursionLimit { name },
            Bind9Error::AllowTransferDisabled { view, zone } => {
                CoreError::AllowTransferDisabled { view, zone }
            }
            Bind9Error::ListenerMismatch { port } => CoreError::ListenerMismatch { port },
            Bind9Error::KeyNotFound { name } => CoreError::Config {
                message: format!("key {name} is referenced but not defined"),
            },
            Bind9Error::Io { path, source } => CoreError::IncludeMissing {
                path: path.display().to_string(),
                reason: source.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Parse {
            message: err.to_string(),
        }
    }
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;
