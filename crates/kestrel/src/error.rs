//! CLI error types with miette diagnostics.
//!
//! Maps core, BIND 9 and configuration errors into user-facing errors
//! with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use kestrel_config::ConfigError;
use kestrel_core::{Bind9Error, CoreError};

/// Process exit codes.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const INVALID_INPUT: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach {target}: {reason}")]
    #[diagnostic(
        code(kestrel::connection_failed),
        help("Check that the agent is running and that [agents] in the server config matches it.")
    )]
    ConnectionFailed { target: String, reason: String },

    #[error("Request timed out after {seconds}s")]
    #[diagnostic(
        code(kestrel::timeout),
        help("Increase [agents] timeout or check agent responsiveness.")
    )]
    Timeout { seconds: u64 },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Server configuration is invalid: {message}")]
    #[diagnostic(
        code(kestrel::config),
        help("Expected at: {path}\nEnvironment overrides use KESTREL_<SECTION>__<KEY>.")
    )]
    Config { message: String, path: String },

    // ── BIND 9 ───────────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(code(kestrel::bind9))]
    Bind9(Bind9Error),

    #[error("Zone transfer is disabled for zone {zone} in view {view}")]
    #[diagnostic(
        code(kestrel::axfr_disabled),
        help("Add an allow-transfer clause naming a key or address to the zone, view or options.")
    )]
    TransferDisabled { view: String, zone: String },

    // ── Core ─────────────────────────────────────────────────────────
    #[error("{entity_type} '{identifier}' not found")]
    #[diagnostic(code(kestrel::not_found))]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    #[error("{message}")]
    #[diagnostic(code(kestrel::conflict))]
    Conflict { message: String },

    #[error("Daemon rejected {command}")]
    #[diagnostic(
        code(kestrel::unsupported),
        help("Daemon {daemon} does not load the hook library providing this command.")
    )]
    Unsupported { command: String, daemon: String },

    #[error("{daemon} rejected {command}: {text}")]
    #[diagnostic(code(kestrel::command_failed))]
    CommandFailed {
        daemon: String,
        command: String,
        text: String,
    },

    #[error(transparent)]
    #[diagnostic(code(kestrel::core))]
    Core(CoreError),

    // ── IO ───────────────────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Config { .. } => exit_code::USAGE,
            Self::Bind9(_) | Self::TransferDisabled { .. } => exit_code::INVALID_INPUT,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Conflict { .. } => exit_code::CONFLICT,
            Self::Unsupported { .. }
            | Self::CommandFailed { .. }
            | Self::Core(_)
            | Self::Io(_) => exit_code::GENERAL,
        }
    }

    pub fn config(err: &ConfigError, path: impl Into<String>) -> Self {
        Self::Config {
            message: err.to_string(),
            path: path.into(),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Transport { target, reason } => CliError::ConnectionFailed { target, reason },
            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },
            CoreError::AllowTransferDisabled { view, zone } => {
                CliError::TransferDisabled { view, zone }
            }
            CoreError::NotFound {
                entity_type,
                identifier,
            } => CliError::NotFound {
                entity_type,
                identifier,
            },
            CoreError::Conflict { message } => CliError::Conflict { message },
            CoreError::UnsupportedCommand { command, daemon } => {
                CliError::Unsupported { command, daemon }
            }
            CoreError::CommandFailed {
                daemon,
                command,
                text,
            } => CliError::CommandFailed {
                daemon,
                command,
                text,
            },
            other => CliError::Core(other),
        }
    }
}

impl From<Bind9Error> for CliError {
    fn from(err: Bind9Error) -> Self {
        match err {
            Bind9Error::AllowTransferDisabled { view, zone } => {
                CliError::TransferDisabled { view, zone }
            }
            other => CliError::Bind9(other),
        }
    }
}

impl From<kestrel_agent::Error> for CliError {
    fn from(err: kestrel_agent::Error) -> Self {
        CoreError::from(err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_kind() {
        let err: CliError = CoreError::Timeout { timeout_secs: 10 }.into();
        assert_eq!(err.exit_code(), exit_code::TIMEOUT);

        let err: CliError = CoreError::Transport {
            target: "kea@agent1".into(),
            reason: "connection refused".into(),
        }
        .into();
        assert_eq!(err.exit_code(), exit_code::CONNECTION);

        let err: CliError = CoreError::CommandFailed {
            daemon: "kea@agent1".into(),
            command: "reservation-add".into(),
            text: "host already exists".into(),
        }
        .into();
        assert!(err.to_string().contains("host already exists"));
        assert_eq!(err.exit_code(), exit_code::GENERAL);

        let err: CliError = Bind9Error::KeyNotFound { name: "k".into() }.into();
        assert_eq!(err.exit_code(), exit_code::INVALID_INPUT);

        let err: CliError = CoreError::Cancelled.into();
        assert_eq!(err.exit_code(), exit_code::GENERAL);
        assert_ne!(exit_code::SUCCESS, err.exit_code());
    }
}
