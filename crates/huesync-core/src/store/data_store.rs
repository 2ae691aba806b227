// ── Central reactive data store ──
//
// The default state sink: the canonical model the engine announces,
// held in reactive collections that CLI consumers subscribe to.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use super::collection::EntityCollection;
use crate::error::CoreError;
use crate::model::{Channel, ChannelKey, ChannelValue, Device, Group, Room, Scene};
use crate::sink::StateSink;
use crate::stream::EntityStream;

/// A device together with its current channel set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceEntry {
    pub device: Device,
    pub channels: Vec<Channel>,
}

/// The latest reported value of one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelState {
    pub device_id: String,
    pub channel_id: String,
    pub value: ChannelValue,
    pub timestamp: DateTime<Utc>,
}

fn value_key(device_id: &str, channel_id: &str) -> String {
    format!("{device_id}/{channel_id}")
}

/// Reactive store for everything announced about one bridge.
///
/// Reads never block the engine. Mutations are broadcast to
/// subscribers via `watch` channels.
pub struct DataStore {
    pub(crate) devices: EntityCollection<DeviceEntry>,
    pub(crate) values: EntityCollection<ChannelState>,
    pub(crate) rooms: EntityCollection<Room>,
    pub(crate) groups: EntityCollection<Group>,
    pub(crate) scenes: EntityCollection<Scene>,
    pub(crate) connected: watch::Sender<bool>,
    pub(crate) last_full_sync: watch::Sender<Option<DateTime<Utc>>>,
}

impl DataStore {
    pub fn new() -> Self {
        let (connected, _) = watch::channel(false);
        let (last_full_sync, _) = watch::channel(None);

        Self {
            devices: EntityCollection::new(),
            values: EntityCollection::new(),
            rooms: EntityCollection::new(),
            groups: EntityCollection::new(),
            scenes: EntityCollection::new(),
            connected,
            last_full_sync,
        }
    }

    // ── Snapshot accessors ───────────────────────────────────────────

    pub fn devices_snapshot(&self) -> Arc<Vec<Arc<DeviceEntry>>> {
        self.devices.snapshot()
    }

    pub fn values_snapshot(&self) -> Arc<Vec<Arc<ChannelState>>> {
        self.values.snapshot()
    }

    pub fn rooms_snapshot(&self) -> Arc<Vec<Arc<Room>>> {
        self.rooms.snapshot()
    }

    pub fn groups_snapshot(&self) -> Arc<Vec<Arc<Group>>> {
        self.groups.snapshot()
    }

    pub fn scenes_snapshot(&self) -> Arc<Vec<Arc<Scene>>> {
        self.scenes.snapshot()
    }

    // ── Single-entity lookups ────────────────────────────────────────

    pub fn device(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        self.devices.get(device_id)
    }

    /// Look a device up by id, or by name when no id matches.
    pub fn resolve_device(&self, identifier: &str) -> Option<Arc<DeviceEntry>> {
        self.devices.get(identifier).or_else(|| {
            self.devices
                .snapshot()
                .iter()
                .find(|e| e.device.name.eq_ignore_ascii_case(identifier))
                .cloned()
        })
    }

    pub fn value_of(&self, key: &ChannelKey) -> Option<Arc<ChannelState>> {
        self.values.get(&value_key(&key.device_id, &key.channel_id))
    }

    pub fn scene(&self, scene_id: &str) -> Option<Arc<Scene>> {
        self.scenes.get(scene_id)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn last_full_sync(&self) -> Option<DateTime<Utc>> {
        *self.last_full_sync.borrow()
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn subscribe_devices(&self) -> EntityStream<DeviceEntry> {
        EntityStream::new(self.devices.subscribe())
    }

    pub fn subscribe_values(&self) -> EntityStream<ChannelState> {
        EntityStream::new(self.values.subscribe())
    }

    pub fn subscribe_rooms(&self) -> EntityStream<Room> {
        EntityStream::new(self.rooms.subscribe())
    }

    pub fn subscribe_groups(&self) -> EntityStream<Group> {
        EntityStream::new(self.groups.subscribe())
    }

    pub fn subscribe_scenes(&self) -> EntityStream<Scene> {
        EntityStream::new(self.scenes.subscribe())
    }

    pub fn subscribe_connectivity(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Fires with the completion time of every committed snapshot cycle.
    pub fn subscribe_full_sync(&self) -> watch::Receiver<Option<DateTime<Utc>>> {
        self.last_full_sync.subscribe()
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}

// ── StateSink implementation ─────────────────────────────────────────

impl StateSink for DataStore {
    fn device_upsert(&self, device: &Device, channels: &[Channel]) -> Result<(), CoreError> {
        let id = device.external_id.clone();
        self.values.remove_where(|key| {
            key.strip_prefix(id.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .is_some_and(|channel| !channels.iter().any(|c| c.id == channel))
        });
        self.devices.upsert(
            id,
            DeviceEntry {
                device: device.clone(),
                channels: channels.to_vec(),
            },
        );
        Ok(())
    }

    fn device_remove(&self, device_id: &str) -> Result<(), CoreError> {
        self.devices.remove(device_id);
        let prefix = format!("{device_id}/");
        self.values.remove_where(|key| key.starts_with(&prefix));
        Ok(())
    }

    fn channel_value(
        &self,
        device_id: &str,
        channel_id: &str,
        value: &ChannelValue,
        timestamp: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        self.values.upsert(
            value_key(device_id, channel_id),
            ChannelState {
                device_id: device_id.to_owned(),
                channel_id: channel_id.to_owned(),
                value: value.clone(),
                timestamp,
            },
        );
        Ok(())
    }

    fn room_upsert(&self, room: &Room) -> Result<(), CoreError> {
        self.rooms.upsert(room.external_id.clone(), room.clone());
        Ok(())
    }

    fn room_remove(&self, room_id: &str) -> Result<(), CoreError> {
        self.rooms.remove(room_id);
        Ok(())
    }

    fn group_upsert(&self, group: &Group) -> Result<(), CoreError> {
        self.groups.upsert(group.external_id.clone(), group.clone());
        Ok(())
    }

    fn group_remove(&self, group_id: &str) -> Result<(), CoreError> {
        self.groups.remove(group_id);
        Ok(())
    }

    fn scenes_replace(&self, scenes: &[Scene]) -> Result<(), CoreError> {
        self.scenes.replace_all(
            scenes
                .iter()
                .map(|s| (s.external_id.clone(), s.clone())),
        );
        Ok(())
    }

    fn connectivity(&self, connected: bool) -> Result<(), CoreError> {
        self.connected.send_replace(connected);
        Ok(())
    }

    fn full_sync_completed(&self) -> Result<(), CoreError> {
        self.last_full_sync.send_replace(Some(Utc::now()));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    use crate::model::{ChannelKind, DataType};

    fn lamp() -> Device {
        let mut device = Device::placeholder("d1");
        device.name = "Desk Lamp".into();
        device
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-05-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn removing_a_device_drops_its_values() {
        let store = DataStore::new();
        let on = Channel::new("on", "On", ChannelKind::PowerOnOff, DataType::Bool);
        store.device_upsert(&lamp(), &[on]).unwrap();
        store
            .channel_value("d1", "on", &ChannelValue::Bool(true), now())
            .unwrap();
        assert!(store.value_of(&ChannelKey::new("d1", "on")).is_some());

        store.device_remove("d1").unwrap();
        assert_eq!(store.device_count(), 0);
        assert!(store.values_snapshot().is_empty());
    }

    #[test]
    fn reshaped_device_drops_stale_values_only() {
        let store = DataStore::new();
        let on = Channel::new("on", "On", ChannelKind::PowerOnOff, DataType::Bool);
        let bri = Channel::new("bri", "Brightness", ChannelKind::Brightness, DataType::Float);
        store.device_upsert(&lamp(), &[on.clone(), bri]).unwrap();
        store
            .channel_value("d1", "on", &ChannelValue::Bool(true), now())
            .unwrap();
        store
            .channel_value("d1", "bri", &ChannelValue::Float(40.0), now())
            .unwrap();

        store.device_upsert(&lamp(), &[on]).unwrap();
        let keys: Vec<String> = store
            .values_snapshot()
            .iter()
            .map(|v| v.channel_id.clone())
            .collect();
        assert_eq!(keys, vec!["on".to_owned()]);
    }

    #[test]
    fn resolves_devices_by_name() {
        let store = DataStore::new();
        store.device_upsert(&lamp(), &[]).unwrap();
        assert!(store.resolve_device("desk lamp").is_some());
        assert!(store.resolve_device("d1").is_some());
        assert!(store.resolve_device("nope").is_none());
    }

    #[tokio::test]
    async fn subscribers_see_connectivity_and_full_sync() {
        let store = DataStore::new();
        let mut connected = store.subscribe_connectivity();
        let mut synced = store.subscribe_full_sync();
        store.connectivity(true).unwrap();
        store.full_sync_completed().unwrap();
        connected.changed().await.unwrap();
        synced.changed().await.unwrap();
        assert!(*connected.borrow());
        assert!(store.last_full_sync().is_some());
    }
}
