// ── Controller abstraction ──
//
// Full lifecycle management for one bridge: builds the HTTP client,
// runs the synchronization engine on a driver task, executes the
// engine's effects, and fans sink events out to the DataStore, host
// sinks, and broadcast subscribers.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use huesync_api::{
    BridgeClient, EventStreamHandle, ReconnectConfig, StreamEvent, TlsMode, TransportConfig,
};

use crate::command::{Command, CommandEnvelope, CommandResult};
use crate::config::{BridgeConfig, TlsVerification};
use crate::engine::{
    Effect, Engine, FetchPurpose, Input, Step, StreamInput, TimerToken, WriteCompletion,
};
use crate::error::CoreError;
use crate::model::{Group, Room, Scene};
use crate::scheduler::{TimerCommand, TimerTicket};
use crate::sink::{SinkEvent, StateSink};
use crate::store::{DataStore, DeviceEntry};
use crate::stream::EntityStream;

const COMMAND_CHANNEL_SIZE: usize = 64;
const EVENT_CHANNEL_SIZE: usize = 256;

// ── ConnectionState ──────────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Started, first snapshot not yet committed.
    Connecting,
    Connected,
    /// The bridge went away after having been reachable.
    Reconnecting { attempt: u32 },
}

// ── Controller ───────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ControllerInner>`. Owns the connection
/// lifecycle, command routing, and reactive entity streaming.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: BridgeConfig,
    store: Arc<DataStore>,
    /// Host sinks notified after the store.
    sinks: Vec<Arc<dyn StateSink>>,
    connection_state: watch::Sender<ConnectionState>,
    /// Last core failure of a snapshot cycle, cleared on commit.
    last_failure: watch::Sender<Option<CoreError>>,
    event_tx: broadcast::Sender<Arc<SinkEvent>>,
    command_tx: Mutex<mpsc::Sender<CommandEnvelope>>,
    command_rx: Mutex<Option<mpsc::Receiver<CommandEnvelope>>>,
    cancel: CancellationToken,
    /// Child token for the current connection. Cancelled on disconnect,
    /// replaced on reconnect.
    cancel_child: Mutex<CancellationToken>,
    stream_handle: Mutex<Option<EventStreamHandle>>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    /// Create a controller. Does NOT connect; call
    /// [`connect()`](Self::connect) to start synchronizing.
    pub fn new(config: BridgeConfig) -> Self {
        Self::with_sinks(config, Vec::new())
    }

    /// Like [`new`](Self::new), additionally delivering every change to
    /// `sinks` in order.
    pub fn with_sinks(config: BridgeConfig, sinks: Vec<Arc<dyn StateSink>>) -> Self {
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let (last_failure, _) = watch::channel(None);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let cancel = CancellationToken::new();
        let cancel_child = cancel.child_token();

        Self {
            inner: Arc::new(ControllerInner {
                config,
                store: Arc::new(DataStore::new()),
                sinks,
                connection_state,
                last_failure,
                event_tx,
                command_tx: Mutex::new(command_tx),
                command_rx: Mutex::new(Some(command_rx)),
                cancel,
                cancel_child: Mutex::new(cancel_child),
                stream_handle: Mutex::new(None),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<DataStore> {
        &self.inner.store
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Start synchronizing.
    ///
    /// Builds the bridge client, spawns the engine driver and, when
    /// enabled, the event stream. Returns once the tasks are running;
    /// use [`wait_for_full_sync`](Self::wait_for_full_sync) to wait for
    /// the first committed snapshot.
    pub async fn connect(&self) -> Result<(), CoreError> {
        let config = &self.inner.config;
        let transport = build_transport(config);
        let client = BridgeClient::new(config.url.clone(), config.app_key.clone(), &transport)?;

        let Some(command_rx) = self.inner.command_rx.lock().await.take() else {
            return Err(CoreError::Config {
                message: "controller is already connected".into(),
            });
        };

        let _ = self
            .inner
            .connection_state
            .send(ConnectionState::Connecting);
        self.inner.last_failure.send_replace(None);

        // Fresh child token for this connection (supports reconnect).
        let child = self.inner.cancel.child_token();
        *self.inner.cancel_child.lock().await = child.clone();

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let mut handles = self.inner.task_handles.lock().await;

        if config.event_stream_enabled {
            let reconnect = ReconnectConfig {
                fast_retry_delay: config.tuning.stream_fast_retry_delay,
                fast_retries: config.tuning.stream_fast_retries,
                slow_retry_delay: config.retry_interval,
            };
            let handle = EventStreamHandle::spawn(client.clone(), reconnect, child.child_token());
            handles.push(tokio::spawn(stream_bridge_task(
                handle.subscribe(),
                input_tx.clone(),
                child.clone(),
            )));
            *self.inner.stream_handle.lock().await = Some(handle);
            debug!("event stream spawned");
        }

        let engine = Engine::new(
            config.tuning.clone(),
            config.model_id_to_product_number.clone(),
        );
        let driver = Driver {
            engine,
            client,
            inner: Arc::clone(&self.inner),
            input_tx: input_tx.clone(),
            cancel: child,
            timers: HashMap::new(),
            failures: 0,
        };
        let _ = input_tx.send(Input::Start);
        handles.push(tokio::spawn(driver.run(input_rx, command_rx)));

        info!(url = %config.url, "synchronization started");
        Ok(())
    }

    /// Stop synchronizing.
    ///
    /// Cancels every request, timer, and stream task, joins the
    /// long-lived tasks, and fails outstanding commands with
    /// [`CoreError::Disconnected`].
    pub async fn disconnect(&self) {
        // Cancel the child token (not the parent, which allows reconnect).
        self.inner.cancel_child.lock().await.cancel();

        if let Some(handle) = self.inner.stream_handle.lock().await.take() {
            handle.shutdown();
        }

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }

        // Recreate the command channel so a reconnect can take a fresh
        // receiver. The previous one was consumed by the driver.
        {
            let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
            *self.inner.command_tx.lock().await = tx;
            *self.inner.command_rx.lock().await = Some(rx);
        }

        let _ = self
            .inner
            .connection_state
            .send(ConnectionState::Disconnected);
        debug!("disconnected");
    }

    /// Wait until a snapshot cycle has been committed.
    ///
    /// Fails with the cycle's error when a core resource type could not
    /// be fetched before any cycle succeeded.
    pub async fn wait_for_full_sync(&self) -> Result<(), CoreError> {
        let mut synced = self.inner.store.subscribe_full_sync();
        let mut failures = self.inner.last_failure.subscribe();
        loop {
            if synced.borrow_and_update().is_some() {
                return Ok(());
            }
            if let Some(err) = failures.borrow_and_update().clone() {
                return Err(err);
            }
            tokio::select! {
                changed = synced.changed() => changed.map_err(|_| CoreError::Disconnected)?,
                changed = failures.changed() => changed.map_err(|_| CoreError::Disconnected)?,
            }
        }
    }

    // ── Command execution ────────────────────────────────────────────

    /// Execute a command against the bridge.
    ///
    /// Sends the command through the internal channel to the engine and
    /// awaits the result.
    pub async fn execute(&self, cmd: Command) -> Result<CommandResult, CoreError> {
        if *self.inner.connection_state.borrow() == ConnectionState::Disconnected {
            return Err(CoreError::Disconnected);
        }

        let (tx, rx) = oneshot::channel();
        let command_tx = self.inner.command_tx.lock().await.clone();

        command_tx
            .send(CommandEnvelope {
                command: cmd,
                response_tx: tx,
            })
            .await
            .map_err(|_| CoreError::Disconnected)?;

        rx.await.map_err(|_| CoreError::Disconnected)?
    }

    // ── One-shot convenience ─────────────────────────────────────────

    /// Connect, wait for the first full sync, run the closure, disconnect.
    ///
    /// The event stream is disabled; a single invocation only needs
    /// one consistent snapshot.
    pub async fn oneshot<F, Fut, T>(config: BridgeConfig, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(Controller) -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let mut cfg = config;
        cfg.event_stream_enabled = false;

        let controller = Controller::new(cfg);
        controller.connect().await?;
        let result = match controller.wait_for_full_sync().await {
            Ok(()) => f(controller.clone()).await,
            Err(e) => Err(e),
        };
        controller.disconnect().await;
        result
    }

    // ── State observation ────────────────────────────────────────────

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    /// Subscribe to every sink event, in delivery order.
    pub fn events(&self) -> broadcast::Receiver<Arc<SinkEvent>> {
        self.inner.event_tx.subscribe()
    }

    // ── Snapshot accessors (delegate to DataStore) ───────────────────

    pub fn devices_snapshot(&self) -> Arc<Vec<Arc<DeviceEntry>>> {
        self.inner.store.devices_snapshot()
    }

    pub fn rooms_snapshot(&self) -> Arc<Vec<Arc<Room>>> {
        self.inner.store.rooms_snapshot()
    }

    pub fn groups_snapshot(&self) -> Arc<Vec<Arc<Group>>> {
        self.inner.store.groups_snapshot()
    }

    pub fn scenes_snapshot(&self) -> Arc<Vec<Arc<Scene>>> {
        self.inner.store.scenes_snapshot()
    }

    pub fn devices(&self) -> EntityStream<DeviceEntry> {
        self.inner.store.subscribe_devices()
    }

    pub fn scenes(&self) -> EntityStream<Scene> {
        self.inner.store.subscribe_scenes()
    }
}

fn build_transport(config: &BridgeConfig) -> TransportConfig {
    TransportConfig {
        tls: match &config.tls {
            TlsVerification::SystemDefaults => TlsMode::System,
            TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
        },
        timeout: config.timeout,
        ..TransportConfig::default()
    }
}

// ── Event stream bridge ──────────────────────────────────────────────

/// Forward stream status into the engine's input queue.
async fn stream_bridge_task(
    mut stream_rx: broadcast::Receiver<Arc<StreamEvent>>,
    input_tx: mpsc::UnboundedSender<Input>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = stream_rx.recv() => {
                let input = match result {
                    Ok(event) => match &*event {
                        StreamEvent::Connected => StreamInput::Connected,
                        StreamEvent::Frame(events) => StreamInput::Frame(Arc::clone(events)),
                        StreamEvent::Disconnected { reason } => StreamInput::Disconnected {
                            reason: reason.clone(),
                        },
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "stream bridge: receiver lagged");
                        StreamInput::Lagged(n)
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if input_tx.send(Input::Stream(input)).is_err() {
                    break;
                }
            }
        }
    }
}

// ── Engine driver ────────────────────────────────────────────────────

/// Owns the engine and turns its effects into spawned work.
struct Driver {
    engine: Engine,
    client: BridgeClient,
    inner: Arc<ControllerInner>,
    input_tx: mpsc::UnboundedSender<Input>,
    cancel: CancellationToken,
    /// Armed timers by token, with the generation they were armed at.
    timers: HashMap<TimerToken, (u64, CancellationToken)>,
    failures: u32,
}

impl Driver {
    async fn run(
        mut self,
        mut input_rx: mpsc::UnboundedReceiver<Input>,
        mut command_rx: mpsc::Receiver<CommandEnvelope>,
    ) {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                input = input_rx.recv() => {
                    let Some(input) = input else { break };
                    self.process(input);
                }
                envelope = command_rx.recv() => {
                    let Some(envelope) = envelope else { break };
                    self.process(Input::Command(envelope));
                }
            }
        }

        self.process(Input::Stop);
        for (_, (_, timer)) in self.timers.drain() {
            timer.cancel();
        }
        // Commands still queued were never seen by the engine.
        command_rx.close();
        while let Ok(envelope) = command_rx.try_recv() {
            let _ = envelope.response_tx.send(Err(CoreError::Disconnected));
        }
    }

    fn process(&mut self, input: Input) {
        let mut queue = VecDeque::from([input]);
        while let Some(input) = queue.pop_front() {
            if let Input::Timer(ticket) = &input {
                if self
                    .timers
                    .get(&ticket.token)
                    .is_some_and(|(generation, _)| *generation == ticket.generation)
                {
                    self.timers.remove(&ticket.token);
                }
            }
            let step = self.engine.handle(input, Utc::now());
            self.apply(step, &mut queue);
        }
    }

    fn apply(&mut self, step: Step, queue: &mut VecDeque<Input>) {
        let Step {
            events,
            effects,
            failure,
        } = step;

        if let Some(err) = failure {
            self.failures = self.failures.saturating_add(1);
            self.inner.last_failure.send_replace(Some(err));
        }

        for event in events {
            self.deliver(event, queue);
        }
        for effect in effects {
            self.execute(effect);
        }
    }

    fn deliver(&mut self, event: SinkEvent, queue: &mut VecDeque<Input>) {
        match &event {
            SinkEvent::Connectivity { connected: true } => {
                self.failures = 0;
                self.inner.last_failure.send_replace(None);
                let _ = self
                    .inner
                    .connection_state
                    .send(ConnectionState::Connected);
            }
            SinkEvent::Connectivity { connected: false } => {
                let was_connected =
                    *self.inner.connection_state.borrow() == ConnectionState::Connected;
                if was_connected || self.failures > 0 {
                    let _ = self.inner.connection_state.send(ConnectionState::Reconnecting {
                        attempt: self.failures,
                    });
                }
            }
            _ => {}
        }

        if let Err(e) = event.deliver(self.inner.store.as_ref()) {
            warn!(error = %e, "data store rejected update");
        }
        for sink in &self.inner.sinks {
            if let Err(e) = event.deliver(sink.as_ref()) {
                queue.push_back(Input::SinkFailed {
                    message: e.to_string(),
                });
            }
        }
        let _ = self.inner.event_tx.send(Arc::new(event));
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::Timer(TimerCommand::Arm(ticket)) => self.arm(ticket),
            Effect::Timer(TimerCommand::Disarm(token)) => {
                if let Some((_, timer)) = self.timers.remove(&token) {
                    timer.cancel();
                }
            }
            Effect::FetchSnapshot {
                cycle,
                resource_type,
            } => {
                let client = self.client.clone();
                self.spawn_request(async move {
                    let result = client
                        .list_resources(resource_type)
                        .await
                        .map_err(CoreError::from);
                    Some(Input::SnapshotFetched {
                        cycle,
                        resource_type,
                        result,
                    })
                });
            }
            Effect::FetchDevice { device_id, purpose } => {
                let client = self.client.clone();
                self.spawn_request(async move {
                    let result = client.get_device(&device_id).await.map_err(CoreError::from);
                    if purpose == FetchPurpose::Lazy {
                        debug!(device_id = %device_id, ok = result.is_ok(), "metadata fetched");
                    }
                    Some(Input::DeviceFetched {
                        device_id,
                        purpose,
                        result,
                    })
                });
            }
            Effect::Write {
                request,
                completion,
            } => {
                let client = self.client.clone();
                self.spawn_request(async move {
                    let result = client
                        .update_resource(request.resource_type, &request.resource_id, &request.body)
                        .await
                        .map(|_| ())
                        .map_err(CoreError::from);
                    match completion {
                        WriteCompletion::Reply {
                            responder,
                            result: on_success,
                        } => {
                            let _ = responder.send(result.map(|()| on_success));
                            None
                        }
                        WriteCompletion::Rename {
                            device_id,
                            generation,
                        } => Some(Input::RenameWritten {
                            device_id,
                            generation,
                            result,
                        }),
                    }
                });
            }
        }
    }

    fn arm(&mut self, ticket: TimerTicket<TimerToken>) {
        let timer = self.cancel.child_token();
        if let Some((_, previous)) = self
            .timers
            .insert(ticket.token.clone(), (ticket.generation, timer.clone()))
        {
            previous.cancel();
        }
        let input_tx = self.input_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = timer.cancelled() => {}
                () = tokio::time::sleep(ticket.delay) => {
                    let _ = input_tx.send(Input::Timer(ticket));
                }
            }
        });
    }

    /// Run a bridge request under the connection's cancellation token,
    /// feeding its completion (if any) back to the engine.
    fn spawn_request<F>(&self, request: F)
    where
        F: std::future::Future<Output = Option<Input>> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let input_tx = self.input_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                completion = request => {
                    if let Some(input) = completion {
                        let _ = input_tx.send(input);
                    }
                }
            }
        });
    }
}
