// ── Core error taxonomy ──
//
// Every failure surfaced by the synchronization engine, the command
// translator, and the sink boundary. Transport-level errors from
// `huesync-api` are folded into this taxonomy via `From`.

use thiserror::Error;

use huesync_api::ResourceType;

/// Unified error type for the core crate.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Connectivity ─────────────────────────────────────────────────
    /// The bridge could not be reached or returned a retryable status.
    #[error("Bridge unreachable: {reason}")]
    TransientTransport { reason: String },

    /// The bridge rejected the application key.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// The engine has been stopped; nothing further is accepted.
    #[error("Synchronization engine is not running")]
    Disconnected,

    // ── Snapshot ─────────────────────────────────────────────────────
    /// A secondary resource type stayed unobtainable after its retries.
    #[error("Snapshot of {resource_type} degraded after {attempts} attempts: {reason}")]
    PartialResourceFailure {
        resource_type: ResourceType,
        attempts: u32,
        reason: String,
    },

    /// A core resource type failed; the whole cycle was abandoned.
    #[error("Snapshot aborted: {resource_type} unavailable: {reason}")]
    CoreResourceFailure {
        resource_type: ResourceType,
        reason: String,
    },

    /// Owner metadata for these devices could not be fetched, so the
    /// cycle was not committed.
    #[error("Device metadata unavailable for {}", devices.join(", "))]
    MetadataUnavailable { devices: Vec<String> },

    /// A response or event payload did not have the expected shape.
    #[error("Malformed bridge payload: {message}")]
    ProtocolDecode { message: String },

    // ── Commands ─────────────────────────────────────────────────────
    /// A command carried an argument the bridge would not accept.
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// The bridge refused the write; `message` is the bridge's own text.
    #[error("Bridge rejected the request: {message}")]
    Rejected { message: String },

    /// A rename was accepted but never observed on the device.
    #[error("Rename of {device_id} could not be confirmed")]
    RenameUnconfirmed { device_id: String },

    /// A newer rename for the same device replaced this one.
    #[error("Rename of {device_id} superseded by a newer request")]
    Superseded { device_id: String },

    #[error("Device not found: {identifier}")]
    DeviceNotFound { identifier: String },

    #[error("Channel not found: {channel_id} on device {device_id}")]
    ChannelNotFound {
        device_id: String,
        channel_id: String,
    },

    #[error("Scene not found: {identifier}")]
    SceneNotFound { identifier: String },

    #[error("Operation not supported: {operation}")]
    Unsupported { operation: String },

    // ── Host boundary ────────────────────────────────────────────────
    /// The host-side state sink refused an update.
    #[error("State sink failed: {message}")]
    Sink { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    /// Errors worth retrying without user intervention.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientTransport { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<huesync_api::Error> for CoreError {
    fn from(err: huesync_api::Error) -> Self {
        match err {
            huesync_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            huesync_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::TransientTransport {
                        reason: "request timed out".into(),
                    }
                } else if e.is_connect() {
                    CoreError::TransientTransport {
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::TransientTransport {
                        reason: "Hue request could not be sent".into(),
                    }
                }
            }
            huesync_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid bridge URL: {e}"),
            },
            huesync_api::Error::Tls(message) => CoreError::Config { message },
            huesync_api::Error::RateLimited { retry_after_secs } => CoreError::TransientTransport {
                reason: format!("rate limited -- retry after {retry_after_secs}s"),
            },
            huesync_api::Error::NotFound { path } => CoreError::Rejected {
                message: format!("resource not found: {path}"),
            },
            huesync_api::Error::Bridge { status, message } => {
                if matches!(status, 502..=504) {
                    CoreError::TransientTransport { reason: message }
                } else {
                    CoreError::Rejected { message }
                }
            }
            huesync_api::Error::EventStream(reason) => CoreError::TransientTransport { reason },
            huesync_api::Error::Deserialization { message, body: _ } => {
                CoreError::ProtocolDecode { message }
            }
        }
    }
}
