// ── Runtime bridge configuration ──
//
// These types describe *how* to talk to one Hue bridge and how the
// synchronization engine paces itself. They never touch disk; the
// binary resolves a profile through `huesync-config` and hands a
// `BridgeConfig` in.

use std::collections::HashMap;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification. Bridges ship self-signed certificates.
    #[default]
    DangerAcceptInvalid,
}

/// Configuration for synchronizing a single bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Bridge URL (e.g., `https://192.168.1.20`).
    pub url: Url,
    /// Application key issued by the bridge during pairing.
    pub app_key: SecretString,
    pub tls: TlsVerification,
    /// Per-request timeout for snapshot, lookup, and write requests.
    pub timeout: Duration,
    /// Open the server-sent event stream. When off, only polling keeps
    /// the mirror fresh.
    pub event_stream_enabled: bool,
    /// Delay between slow event-stream reconnect attempts (floor 1 s).
    pub retry_interval: Duration,
    /// Model id → vendor product number, used for icon links.
    pub model_id_to_product_number: HashMap<String, String>,
    pub tuning: SyncTuning,
}

impl BridgeConfig {
    pub fn new(url: Url, app_key: SecretString) -> Self {
        Self {
            url,
            app_key,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(10),
            event_stream_enabled: true,
            retry_interval: Duration::from_secs(10),
            model_id_to_product_number: HashMap::new(),
            tuning: SyncTuning::default(),
        }
    }
}

/// Timing and sizing knobs for the synchronization engine.
///
/// Defaults match the pacing a bridge tolerates in practice; tests
/// shrink them to keep end-to-end runs short.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTuning {
    /// Delay before the first snapshot cycle after start.
    pub initial_sync_delay: Duration,
    /// Spacing between consecutive resource-type requests in a cycle.
    pub snapshot_stagger: Duration,
    /// Extra delay applied to the button request on top of its stagger slot.
    pub button_snapshot_delay: Duration,
    /// Secondary-type retry delay, multiplied by the attempt number.
    pub snapshot_retry_step: Duration,
    pub snapshot_max_retries: u32,
    /// Coalescing window for topology-triggered resyncs.
    pub resync_debounce: Duration,
    pub core_failure_backoff_initial: Duration,
    pub core_failure_backoff_max: Duration,
    pub metadata_concurrency: usize,
    pub metadata_spacing: Duration,
    pub press_window: Duration,
    pub press_reset_gap: Duration,
    pub dial_reset: Duration,
    pub rename_verify_delay: Duration,
    pub rename_verify_attempts: u32,
    pub poll_interval_stream_up: Duration,
    pub poll_interval_stream_down: Duration,
    pub stream_fast_retry_delay: Duration,
    pub stream_fast_retries: u32,
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            initial_sync_delay: Duration::from_millis(300),
            snapshot_stagger: Duration::from_millis(400),
            button_snapshot_delay: Duration::from_millis(1000),
            snapshot_retry_step: Duration::from_millis(1000),
            snapshot_max_retries: 3,
            resync_debounce: Duration::from_secs(1),
            core_failure_backoff_initial: Duration::from_secs(1),
            core_failure_backoff_max: Duration::from_secs(30),
            metadata_concurrency: 4,
            metadata_spacing: Duration::from_millis(20),
            press_window: Duration::from_millis(1200),
            press_reset_gap: Duration::from_millis(500),
            dial_reset: Duration::from_millis(200),
            rename_verify_delay: Duration::from_millis(700),
            rename_verify_attempts: 3,
            poll_interval_stream_up: Duration::from_secs(60),
            poll_interval_stream_down: Duration::from_secs(1),
            stream_fast_retry_delay: Duration::from_secs(2),
            stream_fast_retries: 5,
        }
    }
}
