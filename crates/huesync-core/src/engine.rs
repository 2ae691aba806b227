// ── Connection / sync state machine ──
//
// `Engine` is the single owner of all synchronization state. It is a
// plain state machine: the controller feeds it one `Input` at a time
// (timer firings, fetch results, stream frames, commands) and carries
// out the `Effect`s it returns. Every handler runs to completion before
// the next input is taken, so nothing here needs a lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use huesync_api::{BridgeEvent, ResourceType};

use crate::command::translate::{self, WriteRequest};
use crate::command::{Command, CommandEnvelope, CommandResult};
use crate::config::SyncTuning;
use crate::error::CoreError;
use crate::ingest::Ingestor;
use crate::lazy_fetch::{Admission, MetadataFetchQueue};
use crate::model::ChannelKey;
use crate::reconcile::{BuildOutcome, Outbox, ReconcileState};
use crate::scheduler::{Scheduler, TimerCommand, TimerTicket};
use crate::sink::SinkEvent;
use crate::snapshot::{FetchVerdict, SnapshotFetcher};

type Responder = oneshot::Sender<Result<CommandResult, CoreError>>;

/// Every single-flight timer the engine arms.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum TimerToken {
    /// Debounced full resynchronization.
    Resync,
    SnapshotFetch(ResourceType),
    /// Start the next queued lazy metadata fetch.
    MetadataDrain,
    ButtonWindow(ChannelKey),
    DialReset(String),
    RenameVerify(String),
    Poll,
}

impl TimerToken {
    fn concerns_device(&self, device_id: &str) -> bool {
        match self {
            Self::ButtonWindow(key) => key.device_id == device_id,
            Self::DialReset(id) => id == device_id,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FetchPurpose {
    /// Fill in an owner device's metadata.
    Lazy,
    /// Confirm a rename reached the bridge.
    RenameCheck,
}

/// Event stream status as seen by the engine.
#[derive(Debug, Clone)]
pub(crate) enum StreamInput {
    Connected,
    Frame(Arc<[BridgeEvent]>),
    Disconnected { reason: String },
    /// The engine fell behind the stream and missed frames.
    Lagged(u64),
}

pub(crate) enum Input {
    Start,
    Timer(TimerTicket<TimerToken>),
    SnapshotFetched {
        cycle: u64,
        resource_type: ResourceType,
        result: Result<Vec<Value>, CoreError>,
    },
    DeviceFetched {
        device_id: String,
        purpose: FetchPurpose,
        result: Result<Option<Value>, CoreError>,
    },
    Stream(StreamInput),
    Command(CommandEnvelope),
    RenameWritten {
        device_id: String,
        generation: u64,
        result: Result<(), CoreError>,
    },
    /// The host sink refused an update.
    SinkFailed { message: String },
    Stop,
}

/// Work for the driver.
#[derive(Debug)]
pub(crate) enum Effect {
    FetchSnapshot {
        cycle: u64,
        resource_type: ResourceType,
    },
    FetchDevice {
        device_id: String,
        purpose: FetchPurpose,
    },
    Write {
        request: WriteRequest,
        completion: WriteCompletion,
    },
    Timer(TimerCommand<TimerToken>),
}

/// What to do once a write returns.
#[derive(Debug)]
pub(crate) enum WriteCompletion {
    /// Answer the caller directly: `result` on success, the error otherwise.
    Reply {
        responder: Responder,
        result: CommandResult,
    },
    /// Report back as `Input::RenameWritten`.
    Rename { device_id: String, generation: u64 },
}

/// Output of one `handle` call.
#[derive(Debug, Default)]
pub(crate) struct Step {
    /// Sink events, in order.
    pub events: Vec<SinkEvent>,
    pub effects: Vec<Effect>,
    /// A snapshot cycle was aborted by a core failure.
    pub failure: Option<CoreError>,
}

struct PendingRename {
    generation: u64,
    name: String,
    attempts: u32,
    responder: Responder,
}

pub(crate) struct Engine {
    tuning: SyncTuning,
    state: ReconcileState,
    ingestor: Ingestor,
    fetcher: SnapshotFetcher,
    lazy: MetadataFetchQueue,
    scheduler: Scheduler<TimerToken>,
    renames: HashMap<String, PendingRename>,
    rename_generation: u64,
    stream_healthy: bool,
    connected: Option<bool>,
    core_failures: u32,
    rerun_after_cycle: bool,
    stopped: bool,
}

impl Engine {
    pub(crate) fn new(tuning: SyncTuning, product_numbers: HashMap<String, String>) -> Self {
        Self {
            state: ReconcileState::new(product_numbers),
            ingestor: Ingestor::new(&tuning),
            fetcher: SnapshotFetcher::new(&tuning),
            lazy: MetadataFetchQueue::new(tuning.metadata_concurrency),
            scheduler: Scheduler::default(),
            renames: HashMap::new(),
            rename_generation: 0,
            stream_healthy: false,
            connected: None,
            core_failures: 0,
            rerun_after_cycle: false,
            stopped: false,
            tuning,
        }
    }

    /// Process one input to completion.
    pub(crate) fn handle(&mut self, input: Input, now: DateTime<Utc>) -> Step {
        let mut step = Step::default();
        if self.stopped {
            if let Input::Command(envelope) = input {
                let _ = envelope.response_tx.send(Err(CoreError::Disconnected));
            }
            return step;
        }

        match input {
            Input::Start => {
                info!("starting synchronization");
                self.scheduler
                    .schedule(TimerToken::Resync, self.tuning.initial_sync_delay);
                self.scheduler
                    .schedule(TimerToken::Poll, self.poll_interval());
            }
            Input::Timer(ticket) => {
                if self.scheduler.fire(&ticket) {
                    self.on_timer(ticket.token, now, &mut step);
                }
            }
            Input::SnapshotFetched {
                cycle,
                resource_type,
                result,
            } => self.on_snapshot(cycle, resource_type, result, now, &mut step),
            Input::DeviceFetched {
                device_id,
                purpose,
                result,
            } => match purpose {
                FetchPurpose::Lazy => self.on_metadata(&device_id, result, now, &mut step),
                FetchPurpose::RenameCheck => self.on_rename_check(&device_id, result, &mut step),
            },
            Input::Stream(stream) => self.on_stream(stream, now, &mut step),
            Input::Command(envelope) => self.on_command(envelope, &mut step),
            Input::RenameWritten {
                device_id,
                generation,
                result,
            } => self.on_rename_written(&device_id, generation, result),
            Input::SinkFailed { message } => {
                warn!(error = %message, "state sink failed; re-announcing on next cycle");
                self.state.forget_emitted();
                self.request_resync();
            }
            Input::Stop => self.stop(),
        }

        step.effects.extend(
            self.scheduler
                .drain_commands()
                .into_iter()
                .map(Effect::Timer),
        );
        step
    }

    // ── Timers ───────────────────────────────────────────────────────

    fn on_timer(&mut self, token: TimerToken, now: DateTime<Utc>, step: &mut Step) {
        match token {
            TimerToken::Resync => self.begin_cycle(),
            TimerToken::SnapshotFetch(resource_type) => {
                if self.fetcher.is_active() {
                    step.effects.push(Effect::FetchSnapshot {
                        cycle: self.fetcher.cycle(),
                        resource_type,
                    });
                }
            }
            TimerToken::MetadataDrain => {
                if let Some(device_id) = self.lazy.next_ready() {
                    step.effects.push(Effect::FetchDevice {
                        device_id,
                        purpose: FetchPurpose::Lazy,
                    });
                }
                if self.lazy.has_queued() && self.lazy.has_capacity() {
                    self.scheduler
                        .schedule_if_idle(TimerToken::MetadataDrain, self.tuning.metadata_spacing);
                }
            }
            TimerToken::ButtonWindow(key) => {
                let mut out = Outbox::default();
                self.ingestor
                    .on_button_window(&mut self.state, &key, &mut out);
                self.apply_outbox(out, step);
            }
            TimerToken::DialReset(device_id) => {
                let mut out = Outbox::default();
                self.ingestor
                    .on_dial_reset(&mut self.state, &device_id, now, &mut out);
                self.apply_outbox(out, step);
            }
            TimerToken::RenameVerify(device_id) => {
                if self.renames.contains_key(&device_id) {
                    step.effects.push(Effect::FetchDevice {
                        device_id,
                        purpose: FetchPurpose::RenameCheck,
                    });
                }
            }
            TimerToken::Poll => {
                if !self.fetcher.is_active() && !self.scheduler.is_armed(&TimerToken::Resync) {
                    debug!("periodic resync");
                    self.begin_cycle();
                }
                self.scheduler
                    .schedule(TimerToken::Poll, self.poll_interval());
            }
        }
    }

    fn poll_interval(&self) -> Duration {
        if self.stream_healthy {
            self.tuning.poll_interval_stream_up
        } else {
            self.tuning.poll_interval_stream_down
        }
    }

    // ── Snapshot cycle ───────────────────────────────────────────────

    fn begin_cycle(&mut self) {
        if self.fetcher.is_active() {
            self.rerun_after_cycle = true;
            return;
        }
        self.scheduler.cancel(&TimerToken::Resync);
        self.lazy.reset_cycle();
        let (cycle, plan) = self.fetcher.begin();
        debug!(cycle, "starting snapshot cycle");
        for (resource_type, delay) in plan {
            self.scheduler
                .schedule(TimerToken::SnapshotFetch(resource_type), delay);
        }
    }

    fn on_snapshot(
        &mut self,
        cycle: u64,
        resource_type: ResourceType,
        result: Result<Vec<Value>, CoreError>,
        now: DateTime<Utc>,
        step: &mut Step,
    ) {
        let err = match result {
            Ok(resources) => {
                let count = resources.len();
                match self.fetcher.record_success(cycle, resource_type, resources) {
                    FetchVerdict::Stored => {
                        debug!(resource_type = %resource_type, count, "snapshot fetched");
                        self.try_build(now, step);
                    }
                    _ => debug!(resource_type = %resource_type, cycle, "discarding stale snapshot"),
                }
                return;
            }
            Err(err) => err,
        };

        match self.fetcher.record_failure(cycle, resource_type) {
            FetchVerdict::Retry { delay, attempt } => {
                debug!(
                    resource_type = %resource_type,
                    attempt,
                    delay = ?delay,
                    error = %err,
                    "retrying snapshot fetch"
                );
                self.scheduler
                    .schedule(TimerToken::SnapshotFetch(resource_type), delay);
            }
            FetchVerdict::Degraded { attempts } => {
                let failure = CoreError::PartialResourceFailure {
                    resource_type,
                    attempts,
                    reason: err.to_string(),
                };
                warn!(error = %failure, "continuing with degraded snapshot");
                self.try_build(now, step);
            }
            FetchVerdict::Aborted => {
                let failure = CoreError::CoreResourceFailure {
                    resource_type,
                    reason: err.to_string(),
                };
                self.abort_cycle(failure, step);
            }
            FetchVerdict::Stored | FetchVerdict::Stale => {}
        }
    }

    fn abort_cycle(&mut self, failure: CoreError, step: &mut Step) {
        self.scheduler
            .cancel_where(|t| matches!(t, TimerToken::SnapshotFetch(_)));
        self.rerun_after_cycle = false;
        self.set_connectivity(false, step);

        let delay = calculate_backoff(
            self.core_failures,
            self.tuning.core_failure_backoff_initial,
            self.tuning.core_failure_backoff_max,
        );
        self.core_failures = self.core_failures.saturating_add(1);
        warn!(error = %failure, delay = ?delay, "snapshot cycle aborted");
        self.scheduler.schedule(TimerToken::Resync, delay);
        step.failure = Some(failure);
    }

    /// Reconcile once every type has reported and no lazy fetch is
    /// outstanding.
    fn try_build(&mut self, now: DateTime<Utc>, step: &mut Step) {
        if !self.fetcher.is_ready() || !self.lazy.is_idle() {
            return;
        }

        let mut out = Outbox::default();
        let outcome = self
            .state
            .build(self.fetcher.snapshot(), &self.lazy, now, &mut out);
        match outcome {
            BuildOutcome::AwaitingMetadata(devices) => {
                debug!(devices = devices.len(), "waiting for device metadata");
                for device_id in devices {
                    self.request_metadata(&device_id, step);
                }
            }
            BuildOutcome::Blocked(devices) => {
                warn!(devices = ?devices, "device metadata unavailable; cycle not committed");
                self.fetcher.finish();
                step.failure = Some(CoreError::MetadataUnavailable { devices });
                self.after_cycle();
            }
            BuildOutcome::Committed { degraded } => {
                self.fetcher.finish();
                self.core_failures = 0;
                self.set_connectivity(true, step);
                self.apply_outbox(out, step);
                step.events.push(SinkEvent::FullSyncCompleted);
                if degraded.is_empty() {
                    info!(cycle = self.fetcher.cycle(), "snapshot committed");
                } else {
                    warn!(
                        cycle = self.fetcher.cycle(),
                        degraded = ?degraded,
                        "snapshot committed degraded"
                    );
                }
                self.after_cycle();
            }
        }
    }

    fn after_cycle(&mut self) {
        if std::mem::take(&mut self.rerun_after_cycle) {
            self.scheduler
                .schedule_if_idle(TimerToken::Resync, self.tuning.resync_debounce);
        }
    }

    fn request_resync(&mut self) {
        if self.fetcher.is_active() {
            self.rerun_after_cycle = true;
        } else {
            self.scheduler
                .schedule_if_idle(TimerToken::Resync, self.tuning.resync_debounce);
        }
    }

    fn set_connectivity(&mut self, connected: bool, step: &mut Step) {
        if self.connected != Some(connected) {
            self.connected = Some(connected);
            step.events.push(SinkEvent::Connectivity { connected });
        }
    }

    // ── Lazy metadata ────────────────────────────────────────────────

    fn request_metadata(&mut self, device_id: &str, step: &mut Step) {
        match self.lazy.request(device_id) {
            Admission::Start => step.effects.push(Effect::FetchDevice {
                device_id: device_id.to_owned(),
                purpose: FetchPurpose::Lazy,
            }),
            Admission::Queued => debug!(device_id, "metadata fetch queued"),
            Admission::Ignored => {}
        }
    }

    fn on_metadata(
        &mut self,
        device_id: &str,
        result: Result<Option<Value>, CoreError>,
        now: DateTime<Utc>,
        step: &mut Step,
    ) {
        let succeeded = match result {
            Ok(Some(raw)) => self.state.store_device(&raw).is_some(),
            Ok(None) => {
                warn!(device_id, "device metadata not found");
                false
            }
            Err(e) => {
                warn!(device_id, error = %e, "device metadata fetch failed");
                false
            }
        };
        self.lazy.complete(device_id, succeeded);
        if self.lazy.has_queued() {
            self.scheduler
                .schedule_if_idle(TimerToken::MetadataDrain, self.tuning.metadata_spacing);
        }

        if self.fetcher.is_active() {
            self.try_build(now, step);
        } else if succeeded {
            self.request_resync();
        }
    }

    // ── Stream ───────────────────────────────────────────────────────

    fn on_stream(&mut self, stream: StreamInput, now: DateTime<Utc>, step: &mut Step) {
        match stream {
            StreamInput::Connected => {
                info!("event stream connected");
                self.stream_healthy = true;
                self.scheduler
                    .schedule(TimerToken::Poll, self.poll_interval());
                if self.state.is_bootstrapped() {
                    self.request_resync();
                }
            }
            StreamInput::Frame(events) => {
                let mut out = Outbox::default();
                self.ingestor
                    .ingest(&mut self.state, &events, now, &mut out);
                self.apply_outbox(out, step);
            }
            StreamInput::Disconnected { reason } => {
                warn!(reason = %reason, "event stream disconnected");
                self.stream_healthy = false;
                self.set_connectivity(false, step);
                self.scheduler
                    .schedule(TimerToken::Poll, self.poll_interval());
            }
            StreamInput::Lagged(missed) => {
                warn!(missed, "event stream lagged; resynchronizing");
                self.request_resync();
            }
        }
    }

    fn apply_outbox(&mut self, out: Outbox, step: &mut Step) {
        step.events.extend(out.events);
        for (token, delay) in out.timers {
            self.scheduler.schedule(token, delay);
        }
        for device_id in out.removed_devices {
            self.ingestor.forget_device(&device_id);
            self.scheduler
                .cancel_where(|t| t.concerns_device(&device_id));
        }
        for device_id in out.metadata_requests {
            self.request_metadata(&device_id, step);
        }
        if out.resync {
            self.request_resync();
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    fn on_command(&mut self, envelope: CommandEnvelope, step: &mut Step) {
        let CommandEnvelope {
            command,
            response_tx,
        } = envelope;

        let translated = match command {
            Command::ChannelWrite {
                device_id,
                channel_id,
                value,
            } => translate::channel_write(&self.state, &device_id, &channel_id, &value).map(
                |(request, echo)| {
                    (
                        request,
                        CommandResult::Written {
                            value: Some(echo),
                        },
                    )
                },
            ),
            Command::SceneInvoke {
                scene_id,
                group_id,
                action,
            } => translate::scene_invoke(&self.state, &scene_id, group_id.as_deref(), &action)
                .map(|request| (request, CommandResult::Ok)),
            Command::DeviceEffect {
                device_id,
                effect_id,
                duration,
            } => translate::device_effect(&self.state, &device_id, &effect_id, duration)
                .map(|request| (request, CommandResult::Ok)),
            Command::DeviceRename { device_id, name } => {
                self.on_rename(device_id, &name, response_tx, step);
                return;
            }
        };

        match translated {
            Ok((request, result)) => step.effects.push(Effect::Write {
                request,
                completion: WriteCompletion::Reply {
                    responder: response_tx,
                    result,
                },
            }),
            Err(e) => {
                debug!(error = %e, "command rejected before sending");
                let _ = response_tx.send(Err(e));
            }
        }
    }

    fn on_rename(&mut self, device_id: String, name: &str, responder: Responder, step: &mut Step) {
        let (request, name) = match translate::device_rename(&self.state, &device_id, name) {
            Ok(translated) => translated,
            Err(e) => {
                let _ = responder.send(Err(e));
                return;
            }
        };

        if let Some(previous) = self.renames.remove(&device_id) {
            let _ = previous.responder.send(Err(CoreError::Superseded {
                device_id: device_id.clone(),
            }));
            self.scheduler
                .cancel(&TimerToken::RenameVerify(device_id.clone()));
        }
        self.rename_generation += 1;
        let generation = self.rename_generation;
        self.renames.insert(
            device_id.clone(),
            PendingRename {
                generation,
                name,
                attempts: 0,
                responder,
            },
        );
        step.effects.push(Effect::Write {
            request,
            completion: WriteCompletion::Rename {
                device_id,
                generation,
            },
        });
    }

    fn on_rename_written(&mut self, device_id: &str, generation: u64, result: Result<(), CoreError>) {
        if !self
            .renames
            .get(device_id)
            .is_some_and(|p| p.generation == generation)
        {
            return;
        }
        match result {
            Ok(()) => self.scheduler.schedule(
                TimerToken::RenameVerify(device_id.to_owned()),
                self.tuning.rename_verify_delay,
            ),
            Err(e) => {
                if let Some(pending) = self.renames.remove(device_id) {
                    let _ = pending.responder.send(Err(e));
                }
            }
        }
    }

    fn on_rename_check(
        &mut self,
        device_id: &str,
        result: Result<Option<Value>, CoreError>,
        step: &mut Step,
    ) {
        let Some(pending) = self.renames.get_mut(device_id) else {
            return;
        };
        pending.attempts += 1;
        let attempts = pending.attempts;
        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                debug!(device_id, error = %e, "rename verification fetch failed");
                None
            }
        };
        let confirmed = raw
            .as_ref()
            .and_then(|r| r.pointer("/metadata/name"))
            .and_then(Value::as_str)
            .is_some_and(|n| n == pending.name);

        if let Some(raw) = raw {
            let mut out = Outbox::default();
            self.state.store_device(&raw);
            self.state.refresh_announced(device_id, &mut out);
            self.apply_outbox(out, step);
        }

        if confirmed {
            if let Some(pending) = self.renames.remove(device_id) {
                info!(device_id, name = %pending.name, "rename confirmed");
                let _ = pending.responder.send(Ok(CommandResult::Ok));
            }
        } else if attempts >= self.tuning.rename_verify_attempts {
            if let Some(pending) = self.renames.remove(device_id) {
                warn!(device_id, attempts, "rename not confirmed");
                let _ = pending.responder.send(Err(CoreError::RenameUnconfirmed {
                    device_id: device_id.to_owned(),
                }));
            }
        } else {
            self.scheduler.schedule(
                TimerToken::RenameVerify(device_id.to_owned()),
                self.tuning.rename_verify_delay,
            );
        }
    }

    // ── Teardown ─────────────────────────────────────────────────────

    fn stop(&mut self) {
        self.stopped = true;
        self.scheduler.cancel_all();
        self.lazy.clear();
        self.fetcher.abort();
        for (_, pending) in self.renames.drain() {
            let _ = pending.responder.send(Err(CoreError::Disconnected));
        }
        info!("synchronization stopped");
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) + jitter`, jitter within ±25%.
#[allow(
    clippy::cast_possible_wrap,
    clippy::cast_possible_truncation,
    clippy::as_conversions,
    clippy::cast_precision_loss
)]
fn calculate_backoff(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let exponent = attempt.min(16) as i32;
    let base = initial.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(max.as_secs_f64());

    // Deterministic jitter seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    Duration::from_secs_f64((capped * jitter_factor).max(0.0))
}
