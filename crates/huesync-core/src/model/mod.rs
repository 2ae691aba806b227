// ── Canonical domain model ──
//
// What the engine announces to the host: devices with their derived
// channel sets, rooms, groups, and scenes. Bridge resource shapes stop
// at the reconciler; everything here is bridge-agnostic.

pub mod channel;
pub mod device;
pub mod group;

pub use channel::{
    ButtonEventCode, Channel, ChannelChoice, ChannelFlags, ChannelKey, ChannelKind, ChannelValue,
    ConnectivityStatus, DataType, SensitivityLevel, SoftwareUpdateStatus,
};
pub use device::{Device, DeviceClass, DeviceFlags, EffectCategory, EffectDescriptor};
pub use group::{Group, ResourceBinding, Room, Scene, SceneState};
