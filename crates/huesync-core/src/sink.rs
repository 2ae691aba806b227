// ── Host-side state sink ──
//
// The engine never mutates host state directly. It produces an ordered
// list of `SinkEvent`s per step; the controller delivers each one to
// every registered `StateSink` and broadcasts it to subscribers.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::CoreError;
use crate::model::{Channel, ChannelValue, Device, Group, Room, Scene};

/// Receiver of canonical model changes.
///
/// Calls are fire-and-report: an `Err` marks the current sync as failed
/// and the engine re-announces everything on the next cycle.
pub trait StateSink: Send + Sync {
    fn device_upsert(&self, device: &Device, channels: &[Channel]) -> Result<(), CoreError>;
    fn device_remove(&self, device_id: &str) -> Result<(), CoreError>;
    fn channel_value(
        &self,
        device_id: &str,
        channel_id: &str,
        value: &ChannelValue,
        timestamp: DateTime<Utc>,
    ) -> Result<(), CoreError>;
    fn room_upsert(&self, room: &Room) -> Result<(), CoreError>;
    fn room_remove(&self, room_id: &str) -> Result<(), CoreError>;
    fn group_upsert(&self, group: &Group) -> Result<(), CoreError>;
    fn group_remove(&self, group_id: &str) -> Result<(), CoreError>;
    fn scenes_replace(&self, scenes: &[Scene]) -> Result<(), CoreError>;
    fn connectivity(&self, connected: bool) -> Result<(), CoreError>;

    /// Called once per committed snapshot cycle, after its changes.
    fn full_sync_completed(&self) -> Result<(), CoreError> {
        Ok(())
    }
}

/// One change, in the order the engine produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SinkEvent {
    DeviceUpsert {
        device: Device,
        channels: Vec<Channel>,
    },
    DeviceRemove {
        device_id: String,
    },
    ChannelValue {
        device_id: String,
        channel_id: String,
        value: ChannelValue,
        timestamp: DateTime<Utc>,
    },
    RoomUpsert {
        room: Room,
    },
    RoomRemove {
        room_id: String,
    },
    GroupUpsert {
        group: Group,
    },
    GroupRemove {
        group_id: String,
    },
    ScenesReplace {
        scenes: Vec<Scene>,
    },
    Connectivity {
        connected: bool,
    },
    FullSyncCompleted,
}

impl SinkEvent {
    /// Deliver this event to `sink`.
    pub fn deliver(&self, sink: &dyn StateSink) -> Result<(), CoreError> {
        match self {
            Self::DeviceUpsert { device, channels } => sink.device_upsert(device, channels),
            Self::DeviceRemove { device_id } => sink.device_remove(device_id),
            Self::ChannelValue {
                device_id,
                channel_id,
                value,
                timestamp,
            } => sink.channel_value(device_id, channel_id, value, *timestamp),
            Self::RoomUpsert { room } => sink.room_upsert(room),
            Self::RoomRemove { room_id } => sink.room_remove(room_id),
            Self::GroupUpsert { group } => sink.group_upsert(group),
            Self::GroupRemove { group_id } => sink.group_remove(group_id),
            Self::ScenesReplace { scenes } => sink.scenes_replace(scenes),
            Self::Connectivity { connected } => sink.connectivity(*connected),
            Self::FullSyncCompleted => sink.full_sync_completed(),
        }
    }

    /// The device this event concerns, if any.
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Self::DeviceUpsert { device, .. } => Some(&device.external_id),
            Self::DeviceRemove { device_id } | Self::ChannelValue { device_id, .. } => {
                Some(device_id)
            }
            _ => None,
        }
    }
}
