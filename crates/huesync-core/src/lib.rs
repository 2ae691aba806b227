//! Synchronization engine that mirrors a Hue bridge into a canonical
//! device/channel model.
//!
//! - **[`Controller`]**: lifecycle facade. [`connect()`](Controller::connect)
//!   starts the engine driver and the event stream;
//!   [`execute()`](Controller::execute) routes [`Command`]s through the
//!   engine; [`Controller::oneshot()`] runs a single request against one
//!   consistent snapshot.
//!
//! - **Engine**: staggered snapshot cycles with per-type retries, lazy
//!   device metadata fetches, a reconciler that derives channels and
//!   announces only real changes, stream event handlers, the button
//!   multi-press debouncer, and the rotary pulse resetter. All timers go
//!   through the single-flight [`scheduler`].
//!
//! - **[`StateSink`]**: the host-side boundary. The engine emits ordered
//!   [`SinkEvent`]s; the reactive [`DataStore`] is always one of the sinks
//!   and vends [`EntityStream`] subscriptions.

pub mod button;
pub mod color;
pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod lazy_fetch;
pub mod model;
pub mod rotary;
pub mod scheduler;
pub mod sink;
pub mod snapshot;
pub mod store;
pub mod stream;

mod decode;
mod engine;
mod ingest;
mod reconcile;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::{Command, CommandResult};
pub use config::{BridgeConfig, SyncTuning, TlsVerification};
pub use controller::{ConnectionState, Controller};
pub use error::CoreError;
pub use huesync_api::ResourceType;
pub use sink::{SinkEvent, StateSink};
pub use store::{ChannelState, DataStore, DeviceEntry};
pub use stream::EntityStream;

pub use model::{
    Channel, ChannelKey, ChannelKind, ChannelValue, DataType, Device, DeviceClass, Group, Room,
    Scene, SceneState,
};
