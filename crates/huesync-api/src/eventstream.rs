//! Server-sent event stream with auto-reconnect.
//!
//! Opens the bridge's `/eventstream/clip/v2` endpoint and streams parsed
//! event frames through a [`tokio::sync::broadcast`] channel. Termination
//! for any reason triggers a bounded run of fast reconnects, then a slow
//! periodic retry until the stream delivers data again.
//!
//! # Example
//!
//! ```rust,ignore
//! use huesync_api::{BridgeClient, EventStreamHandle, ReconnectConfig, StreamEvent};
//! use tokio_util::sync::CancellationToken;
//!
//! let cancel = CancellationToken::new();
//! let handle = EventStreamHandle::spawn(client, ReconnectConfig::default(), cancel.clone());
//! let mut rx = handle.subscribe();
//!
//! while let Ok(event) = rx.recv().await {
//!     if let StreamEvent::Frame(events) = event.as_ref() {
//!         println!("{} events", events.len());
//!     }
//! }
//!
//! handle.shutdown();
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures_util::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::client::BridgeClient;
use crate::error::Error;
use crate::models::{BridgeEvent, parse_event_payload};

// ── Broadcast channel capacity ───────────────────────────────────────

const EVENT_CHANNEL_CAPACITY: usize = 1024;

const MIN_SLOW_RETRY: Duration = Duration::from_secs(1);

/// Upper bound on undelivered event bytes (partial line plus buffered
/// `data:` lines). Exceeding it fails the connection.
const MAX_PENDING_BYTES: usize = 1024 * 1024;

// ── StreamEvent ──────────────────────────────────────────────────────

/// Status changes and decoded frames from the event stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The stream delivered its first bytes after (re)connecting.
    Connected,
    /// One decoded `data:` payload, events in arrival order.
    Frame(Arc<[BridgeEvent]>),
    /// The stream ended or failed; a reconnect is scheduled.
    Disconnected { reason: String },
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Fast-then-slow retry schedule for the event stream.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay between fast reconnect attempts. Default: 2s.
    pub fast_retry_delay: Duration,

    /// Number of fast attempts before falling back. Default: 5.
    pub fast_retries: u32,

    /// Delay between slow attempts. Default: 10s, never below 1s.
    pub slow_retry_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            fast_retry_delay: Duration::from_secs(2),
            fast_retries: 5,
            slow_retry_delay: Duration::from_secs(10),
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnect attempt number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt < self.fast_retries {
            self.fast_retry_delay
        } else {
            self.slow_retry_delay.max(MIN_SLOW_RETRY)
        }
    }
}

// ── EventStreamHandle ────────────────────────────────────────────────

/// Handle to a running event stream task.
pub struct EventStreamHandle {
    event_rx: broadcast::Receiver<Arc<StreamEvent>>,
    cancel: CancellationToken,
}

impl EventStreamHandle {
    /// Spawn the reconnection loop.
    ///
    /// Returns immediately; the first connection attempt happens in the
    /// background. Subscribe before awaiting anything to see `Connected`.
    pub fn spawn(client: BridgeClient, reconnect: ReconnectConfig, cancel: CancellationToken) -> Self {
        let (event_tx, event_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            stream_loop(client, event_tx, reconnect, task_cancel).await;
        });

        Self { event_rx, cancel }
    }

    /// Get a new broadcast receiver for the event stream.
    ///
    /// A consumer that falls behind receives
    /// [`broadcast::error::RecvError::Lagged`] and should resynchronize.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<StreamEvent>> {
        self.event_rx.resubscribe()
    }

    /// Signal the background task to shut down.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → read → on end or error, wait → reconnect.
async fn stream_loop(
    client: BridgeClient,
    event_tx: broadcast::Sender<Arc<StreamEvent>>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        let mut received = false;
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_read(&client, &event_tx, &cancel, &mut received) => result,
        };

        if cancel.is_cancelled() {
            break;
        }

        let reason = match result {
            Ok(()) => {
                tracing::info!("event stream ended");
                "stream ended".to_owned()
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt, "event stream error");
                e.to_string()
            }
        };
        let _ = event_tx.send(Arc::new(StreamEvent::Disconnected { reason }));

        if received {
            attempt = 0;
        }

        let delay = reconnect.delay_for(attempt);
        tracing::info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt,
            "waiting before event stream reconnect"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }

        attempt = attempt.saturating_add(1);
    }

    tracing::debug!("event stream loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Open the stream once and forward frames until it drops.
///
/// Sets `received` as soon as any bytes arrive; that is what marks the
/// stream healthy and resets the caller's retry counter.
async fn connect_and_read(
    client: &BridgeClient,
    event_tx: &broadcast::Sender<Arc<StreamEvent>>,
    cancel: &CancellationToken,
    received: &mut bool,
) -> Result<(), Error> {
    tracing::info!(url = %client.base_url(), "connecting to event stream");

    let resp = client.open_event_stream().await?;
    let payloads = sse_payloads(resp.bytes_stream());
    futures_util::pin_mut!(payloads);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            item = payloads.next() => {
                match item {
                    Some(Ok(SseItem::Activity)) => {
                        if !*received {
                            *received = true;
                            tracing::info!("event stream connected");
                            let _ = event_tx.send(Arc::new(StreamEvent::Connected));
                        }
                    }
                    Some(Ok(SseItem::Payload(payload))) => {
                        parse_and_broadcast(&payload, event_tx);
                    }
                    Some(Err(e)) => return Err(e),
                    None => return Ok(()),
                }
            }
        }
    }
}

// ── SSE framing ──────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
enum SseItem {
    /// Bytes arrived (data or keep-alive comment).
    Activity,
    /// A complete `data:` payload.
    Payload(String),
}

/// Turn a chunked byte stream into SSE payloads.
fn sse_payloads<S, B>(chunks: S) -> impl Stream<Item = Result<SseItem, Error>>
where
    S: Stream<Item = Result<B, reqwest::Error>>,
    B: AsRef<[u8]>,
{
    async_stream::try_stream! {
        let mut decoder = SseDecoder::default();
        futures_util::pin_mut!(chunks);
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| Error::EventStream(e.to_string()))?;
            yield SseItem::Activity;
            for payload in decoder.feed(chunk.as_ref())? {
                yield SseItem::Payload(payload);
            }
        }
        if let Some(payload) = decoder.finish() {
            yield SseItem::Payload(payload);
        }
    }
}

/// Incremental line decoder for `text/event-stream` bodies.
///
/// `data:` lines of one event are joined with `\n` and released at the
/// blank-line terminator. Comments and `id:`/`event:` fields are ignored.
#[derive(Debug)]
struct SseDecoder {
    buf: BytesMut,
    data: Vec<String>,
    data_len: usize,
    max_pending: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_PENDING_BYTES)
    }
}

impl SseDecoder {
    fn with_limit(max_pending: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            data: Vec::new(),
            data_len: 0,
            max_pending,
        }
    }

    fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>, Error> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();

        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line = self.buf.split_to(pos + 1);
            let text = String::from_utf8_lossy(&line);
            let text = text.trim();

            if text.is_empty() {
                if let Some(payload) = self.take() {
                    out.push(payload);
                }
            } else if let Some(rest) = text.strip_prefix("data:") {
                let rest = rest.trim();
                self.data_len += rest.len();
                self.data.push(rest.to_owned());
            }
        }

        let pending = self.buf.len() + self.data_len;
        if pending > self.max_pending {
            self.buf.clear();
            self.data.clear();
            self.data_len = 0;
            return Err(Error::EventStream(format!(
                "event exceeds {} bytes without a terminator",
                self.max_pending
            )));
        }

        Ok(out)
    }

    /// Flush a trailing event whose terminator never arrived.
    fn finish(&mut self) -> Option<String> {
        let tail = String::from_utf8_lossy(&self.buf).trim().to_owned();
        self.buf.clear();
        if let Some(rest) = tail.strip_prefix("data:") {
            self.data.push(rest.trim().to_owned());
        }
        self.take()
    }

    fn take(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let payload = self.data.join("\n");
        self.data.clear();
        self.data_len = 0;
        Some(payload)
    }
}

// ── Frame parsing ────────────────────────────────────────────────────

/// Decode a payload and broadcast it; malformed payloads are dropped.
fn parse_and_broadcast(payload: &str, event_tx: &broadcast::Sender<Arc<StreamEvent>>) {
    match parse_event_payload(payload) {
        Ok(events) if events.is_empty() => {}
        Ok(events) => {
            // Ignore send errors -- just means no active subscribers right now
            let _ = event_tx.send(Arc::new(StreamEvent::Frame(events.into())));
        }
        Err(e) => {
            tracing::debug!(error = %e, "dropping malformed event stream frame");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures_util::stream;

    #[test]
    fn default_reconnect_schedule() {
        let config = ReconnectConfig::default();
        for attempt in 0..5 {
            assert_eq!(config.delay_for(attempt), Duration::from_secs(2));
        }
        assert_eq!(config.delay_for(5), Duration::from_secs(10));
        assert_eq!(config.delay_for(40), Duration::from_secs(10));
    }

    #[test]
    fn slow_retry_has_a_floor() {
        let config = ReconnectConfig {
            slow_retry_delay: Duration::from_millis(50),
            ..ReconnectConfig::default()
        };
        assert_eq!(config.delay_for(9), Duration::from_secs(1));
    }

    #[test]
    fn decoder_handles_split_lines() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.feed(b": hi\n\nid: 1:0\nda").unwrap().is_empty());
        assert!(decoder.feed(b"ta: [{\"type\":\"upd").unwrap().is_empty());
        let out = decoder.feed(b"ate\"}]\r\n\r\n").unwrap();
        assert_eq!(out, vec![r#"[{"type":"update"}]"#.to_owned()]);
    }

    #[test]
    fn decoder_joins_multi_line_data() {
        let mut decoder = SseDecoder::default();
        let out = decoder.feed(b"data: [\ndata: 1]\n\n").unwrap();
        assert_eq!(out, vec!["[\n1]".to_owned()]);
    }

    #[test]
    fn decoder_flushes_unterminated_tail() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.feed(b"data: {\"a\":1}").unwrap().is_empty());
        assert_eq!(decoder.finish().as_deref(), Some("{\"a\":1}"));
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn decoder_rejects_unterminated_flood() {
        let mut decoder = SseDecoder::with_limit(16);
        assert!(decoder.feed(b"data: 0123456789").unwrap().is_empty());
        let err = decoder.feed(b"abcdefgh").unwrap_err();
        assert!(matches!(err, Error::EventStream(ref msg) if msg.contains("16 bytes")));

        // The decoder is usable again after the reset.
        let out = decoder.feed(b"data: ok\n\n").unwrap();
        assert_eq!(out, vec!["ok".to_owned()]);
    }

    #[test]
    fn decoder_limit_counts_buffered_data_lines() {
        let mut decoder = SseDecoder::with_limit(16);
        assert!(decoder.feed(b"data: 12345678\n").unwrap().is_empty());
        assert!(decoder.feed(b"data: 12345678\n").unwrap().is_empty());
        assert!(decoder.feed(b"data: 1\n").is_err());
    }

    #[tokio::test]
    async fn payload_stream_fails_on_oversized_line() {
        let chunk = vec![b'x'; MAX_PENDING_BYTES + 1];
        let chunks = stream::iter(vec![Ok::<_, reqwest::Error>(chunk)]);
        let items: Vec<Result<SseItem, Error>> = sse_payloads(chunks).collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], Ok(SseItem::Activity)));
        assert!(matches!(items[1], Err(Error::EventStream(_))));
    }

    #[tokio::test]
    async fn payload_stream_reports_activity_then_frames() {
        let chunks = stream::iter(vec![
            Ok::<_, reqwest::Error>(b": hi\n\n".to_vec()),
            Ok(b"data: [{\"type\":\"update\",\"data\":[]}]\n\n".to_vec()),
        ]);
        let items: Vec<SseItem> = sse_payloads(chunks)
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(
            items,
            vec![
                SseItem::Activity,
                SseItem::Activity,
                SseItem::Payload(r#"[{"type":"update","data":[]}]"#.to_owned()),
            ]
        );
    }

    #[test]
    fn broadcast_skips_malformed_and_empty_frames() {
        let (tx, mut rx) = broadcast::channel(16);
        parse_and_broadcast("not json at all", &tx);
        parse_and_broadcast("[]", &tx);
        assert!(rx.try_recv().is_err());

        parse_and_broadcast(r#"{"type":"update","data":[{"id":"l1","type":"light"}]}"#, &tx);
        let event = rx.try_recv().unwrap();
        match event.as_ref() {
            StreamEvent::Frame(events) => assert_eq!(events.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
    }
}
