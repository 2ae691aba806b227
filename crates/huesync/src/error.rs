//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use huesync_config::ConfigError;
use huesync_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const REJECTED: i32 = 5;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the bridge: {reason}")]
    #[diagnostic(
        code(huesync::connection_failed),
        help(
            "Check that the bridge is powered and reachable on the network.\n\
             Try: huesync devices --bridge https://<bridge-ip>"
        )
    )]
    ConnectionFailed { reason: String },

    #[error("Synchronization failed: {message}")]
    #[diagnostic(code(huesync::sync_failed))]
    SyncFailed { message: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("The bridge rejected the app key: {message}")]
    #[diagnostic(
        code(huesync::auth_failed),
        help(
            "Pair a new application key with the bridge, then store it with:\n\
             huesync config set-key"
        )
    )]
    AuthFailed { message: String },

    #[error("No app key configured for profile '{profile}'")]
    #[diagnostic(
        code(huesync::no_credentials),
        help(
            "Store one with: huesync config set-key\n\
             Or set the HUESYNC_APP_KEY environment variable."
        )
    )]
    NoCredentials { profile: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(huesync::not_found),
        help("Run: huesync {list_command} to see what the bridge reports")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    // ── Commands ─────────────────────────────────────────────────────
    #[error("Bridge rejected the request: {message}")]
    #[diagnostic(code(huesync::rejected))]
    Rejected { message: String },

    #[error("Rename of {device_id} could not be confirmed")]
    #[diagnostic(
        code(huesync::rename_unconfirmed),
        help("The bridge accepted the rename but kept reporting the old name. Retry in a moment.")
    )]
    RenameUnconfirmed { device_id: String },

    #[error("Operation '{operation}' is not supported")]
    #[diagnostic(code(huesync::unsupported))]
    Unsupported { operation: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(huesync::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(huesync::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: huesync config init --url https://<bridge-ip>"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No bridge configured")]
    #[diagnostic(
        code(huesync::no_config),
        help(
            "Create a profile with: huesync config init --url https://<bridge-ip>\n\
             Or pass --bridge and --app-key.\n\
             Expected config at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(huesync::config))]
    Config { message: String },

    #[error("Keyring error: {message}")]
    #[diagnostic(
        code(huesync::keyring),
        help("Set app_key_env in the profile to read the key from the environment instead.")
    )]
    Keyring { message: String },

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Timed out after {seconds}s")]
    #[diagnostic(
        code(huesync::timeout),
        help("Increase the timeout with --timeout or check bridge responsiveness.")
    )]
    Timeout { seconds: u64 },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not encode output: {0}")]
    #[diagnostic(code(huesync::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::SyncFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } | Self::Keyring { .. } => {
                exit_code::AUTH
            }
            Self::NotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Rejected { .. } | Self::Unsupported { .. } => exit_code::REJECTED,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::NoConfig { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::TransientTransport { reason } => CliError::ConnectionFailed { reason },
            CoreError::Disconnected => CliError::ConnectionFailed {
                reason: "synchronization stopped".into(),
            },
            CoreError::AuthenticationFailed { message } => CliError::AuthFailed { message },

            err @ (CoreError::PartialResourceFailure { .. }
            | CoreError::CoreResourceFailure { .. }
            | CoreError::MetadataUnavailable { .. }
            | CoreError::ProtocolDecode { .. }
            | CoreError::Sink { .. }
            | CoreError::Superseded { .. }) => CliError::SyncFailed {
                message: err.to_string(),
            },

            CoreError::Validation { message } => CliError::Validation {
                field: "value".into(),
                reason: message,
            },
            CoreError::Rejected { message } => CliError::Rejected { message },
            CoreError::RenameUnconfirmed { device_id } => CliError::RenameUnconfirmed { device_id },
            CoreError::Unsupported { operation } => CliError::Unsupported { operation },

            CoreError::DeviceNotFound { identifier } => CliError::NotFound {
                resource_type: "device".into(),
                identifier,
                list_command: "devices".into(),
            },
            CoreError::ChannelNotFound {
                device_id,
                channel_id,
            } => CliError::NotFound {
                resource_type: "channel".into(),
                identifier: format!("{device_id}/{channel_id}"),
                list_command: format!("devices {device_id}"),
            },
            CoreError::SceneNotFound { identifier } => CliError::NotFound {
                resource_type: "scene".into(),
                identifier,
                list_command: "scenes".into(),
            },

            CoreError::Config { message } => CliError::Config { message },
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
            ConfigError::UnknownProfile { name } => CliError::ProfileNotFound {
                name,
                available: "(none)".into(),
            },
            ConfigError::Keyring(e) => CliError::Keyring {
                message: e.to_string(),
            },
            ConfigError::Io(e) => CliError::Io(e),
            other @ (ConfigError::Serialization(_) | ConfigError::Figment(_)) => {
                CliError::Config {
                    message: other.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huesync_core::ResourceType;

    #[test]
    fn bridge_rejection_keeps_its_text() {
        let err = CliError::from(CoreError::Rejected {
            message: "device (light) is \"soft off\"".into(),
        });
        assert_eq!(err.exit_code(), exit_code::REJECTED);
        assert!(err.to_string().contains("soft off"));
    }

    #[test]
    fn lookups_map_to_not_found() {
        let err = CliError::from(CoreError::ChannelNotFound {
            device_id: "d1".into(),
            channel_id: "ct".into(),
        });
        assert_eq!(err.exit_code(), exit_code::NOT_FOUND);
        assert!(err.to_string().contains("d1/ct"));
    }

    #[test]
    fn aborted_sync_is_a_connection_failure() {
        let err = CliError::from(CoreError::CoreResourceFailure {
            resource_type: ResourceType::Device,
            reason: "500".into(),
        });
        assert_eq!(err.exit_code(), exit_code::CONNECTION);
    }

    #[test]
    fn unavailable_metadata_names_the_devices() {
        let err = CliError::from(CoreError::MetadataUnavailable {
            devices: vec!["d7".into(), "d9".into()],
        });
        assert_eq!(err.exit_code(), exit_code::CONNECTION);
        assert!(err.to_string().contains("d7, d9"));
    }

    #[test]
    fn missing_app_key_is_an_auth_failure() {
        let err = CliError::from(ConfigError::NoCredentials {
            profile: "home".into(),
        });
        assert_eq!(err.exit_code(), exit_code::AUTH);
    }
}
