// ── Command API ──
//
// Every write flows through the `Command` enum. The controller hands
// each envelope to the engine, which validates and translates it into a
// single bridge `PUT` before any network call is made.

pub(crate) mod translate;

use std::time::Duration;

use serde_json::Value;

use crate::error::CoreError;
use crate::model::ChannelValue;

/// A command envelope sent through the command channel.
/// Contains the command and a oneshot response channel.
pub(crate) struct CommandEnvelope {
    pub command: Command,
    pub response_tx: tokio::sync::oneshot::Sender<Result<CommandResult, CoreError>>,
}

/// All write operations against the bridge.
#[derive(Debug, Clone)]
pub enum Command {
    /// Write a channel value. `value` is validated against the channel:
    /// a boolean for `on`, a number for `bri`/`ct`/`ctPreset`, and
    /// `{"r","g","b"}` or `"#rrggbb"` for `color`.
    ChannelWrite {
        device_id: String,
        channel_id: String,
        value: Value,
    },
    /// Recall a scene. `action` is `activate` (default), `deactivate`,
    /// `dynamic`, or a raw bridge action.
    SceneInvoke {
        scene_id: String,
        group_id: Option<String>,
        action: String,
    },
    /// Rename a device and wait until the bridge reports the new name.
    DeviceRename { device_id: String, name: String },
    /// Start a light effect. A duration selects the timed-effect form.
    DeviceEffect {
        device_id: String,
        effect_id: String,
        duration: Option<Duration>,
    },
}

/// Result of a successfully executed command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    Ok,
    /// The value the bridge was asked to apply, after clamping.
    Written { value: Option<ChannelValue> },
}
