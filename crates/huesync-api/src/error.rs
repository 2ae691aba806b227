use thiserror::Error;

/// Top-level error type for the `huesync-api` crate.
///
/// Covers every failure mode of the bridge surface: transport, HTTP status,
/// CLIP envelope errors, and the event stream. `huesync-core` maps these
/// into its synchronization error taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The bridge rejected the application key.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The bridge is shedding load.
    #[error("Rate limited -- retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    // ── CLIP API ────────────────────────────────────────────────────
    /// The requested resource does not exist on the bridge.
    #[error("Resource not found: {path}")]
    NotFound { path: String },

    /// Non-success status or a non-empty `errors` array in the CLIP envelope.
    #[error("Bridge error (HTTP {status}): {message}")]
    Bridge { status: u16, message: String },

    // ── Event stream ────────────────────────────────────────────────
    /// The server-sent event stream failed or could not be opened.
    #[error("Event stream failed: {0}")]
    EventStream(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::RateLimited { .. } | Self::EventStream(_) => true,
            Self::Bridge { status, .. } => matches!(status, 502..=504),
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::NotFound { .. } => true,
            Self::Bridge { status: 404, .. } => true,
            _ => false,
        }
    }

    /// The bridge-supplied message, if the failure came from the bridge itself.
    pub fn bridge_message(&self) -> Option<&str> {
        match self {
            Self::Bridge { message, .. } | Self::Authentication { message } => Some(message),
            _ => None,
        }
    }
}
