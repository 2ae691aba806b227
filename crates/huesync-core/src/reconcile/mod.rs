// ── Model builder / reconciler ──
//
// `ReconcileState` owns every cache the builder needs: device metadata,
// derived channels and write bindings, raw group and scene resources,
// and what was last emitted to the sink. `build` runs once per completed
// snapshot cycle; the stream handlers use the value-reporting and
// refresh entry points in between.

mod channels;
mod groups;
mod metadata;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use huesync_api::{ResourceRef, ResourceType};

use crate::color::Gamut;
use crate::decode::{self, merge_patch, owner_device, resource_id};
use crate::engine::TimerToken;
use crate::lazy_fetch::MetadataFetchQueue;
use crate::model::{
    Channel, ChannelKey, ChannelValue, Device, EffectDescriptor, Group, ResourceBinding, Room,
    Scene,
};
use crate::sink::SinkEvent;
use crate::snapshot::{SNAPSHOT_ORDER, Snapshot};

pub(crate) use channels::{DEFAULT_MIREK_MAX, DEFAULT_MIREK_MIN};
pub(crate) use metadata::light_effects;

/// The device a service resource belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Owner {
    pub device_id: String,
    pub resource_type: ResourceType,
}

/// Side effects requested by one reconciliation or ingestion step.
#[derive(Debug, Default)]
pub(crate) struct Outbox {
    pub events: Vec<SinkEvent>,
    /// Owner devices whose metadata should be fetched lazily.
    pub metadata_requests: Vec<String>,
    pub timers: Vec<(TimerToken, Duration)>,
    /// Topology changed; a debounced full resync is needed.
    pub resync: bool,
    pub removed_devices: Vec<String>,
}

impl Outbox {
    pub(crate) fn emit(&mut self, event: SinkEvent) {
        self.events.push(event);
    }

    pub(crate) fn request_metadata(&mut self, device_id: &str) {
        if !self.metadata_requests.iter().any(|d| d == device_id) {
            self.metadata_requests.push(device_id.to_owned());
        }
    }
}

/// Result of one `build`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BuildOutcome {
    /// Changes emitted. Lists the types that were degraded this cycle.
    Committed { degraded: Vec<ResourceType> },
    /// Owner metadata is missing and fetchable; build again when the
    /// lazy queue drains.
    AwaitingMetadata(Vec<String>),
    /// Owner metadata is missing and could not be fetched this cycle.
    /// Nothing was emitted.
    Blocked(Vec<String>),
}

#[derive(Debug, Default)]
pub(crate) struct ReconcileState {
    product_numbers: HashMap<String, String>,

    devices: HashMap<String, Device>,
    channels: BTreeMap<String, Vec<Channel>>,
    origins: HashMap<ChannelKey, ResourceType>,
    bindings: HashMap<ChannelKey, ResourceBinding>,
    owners: HashMap<String, Owner>,
    button_channels: HashMap<String, String>,
    gamuts: HashMap<String, Gamut>,

    raw_rooms: BTreeMap<String, Value>,
    raw_zones: BTreeMap<String, Value>,
    raw_scenes: BTreeMap<String, Value>,

    emitted_devices: HashMap<String, (Device, Vec<Channel>)>,
    emitted_rooms: BTreeMap<String, Room>,
    emitted_groups: BTreeMap<String, Group>,
    emitted_scenes: Option<Vec<Scene>>,

    values: HashMap<ChannelKey, ChannelValue>,
    pending_values: BTreeMap<ChannelKey, (ChannelValue, DateTime<Utc>)>,

    /// Devices present in the last committed cycle.
    present_devices: HashSet<String>,
    bootstrapped: bool,
}

impl ReconcileState {
    pub(crate) fn new(product_numbers: HashMap<String, String>) -> Self {
        Self {
            product_numbers,
            ..Self::default()
        }
    }

    /// At least one cycle has been committed.
    pub(crate) fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    // ── Full reconciliation ──────────────────────────────────────────

    pub(crate) fn build(
        &mut self,
        snapshot: &Snapshot,
        lazy: &MetadataFetchQueue,
        now: DateTime<Utc>,
        out: &mut Outbox,
    ) -> BuildOutcome {
        let mut snapshot_ids = HashSet::new();
        for raw in snapshot.resources(ResourceType::Device) {
            if let Some(id) = self.merge_device(raw) {
                snapshot_ids.insert(id);
            }
        }

        let missing = self.missing_owners(snapshot, lazy);
        if !missing.is_empty() {
            return BuildOutcome::AwaitingMetadata(missing);
        }

        let mut derived = channels::derive(snapshot, &mut self.devices);
        let carried = self.carry_over_degraded(snapshot, &mut derived);
        derived.sort();
        self.apply_snapshot_effects(snapshot);

        let unresolved: Vec<String> = derived
            .channels
            .keys()
            .filter(|id| !self.devices.get(*id).is_some_and(Device::has_metadata))
            .cloned()
            .collect();
        if !unresolved.is_empty() {
            return BuildOutcome::Blocked(unresolved);
        }

        let present: HashSet<String> = snapshot_ids
            .iter()
            .chain(derived.channels.keys())
            .chain(carried.iter())
            .cloned()
            .collect();

        self.channels = derived.channels;
        self.origins = derived.origins;
        self.bindings = derived.bindings;
        self.owners = derived.owners;
        self.button_channels = derived.button_channels;
        self.gamuts = derived.gamuts;
        self.raw_rooms = index_by_id(snapshot.resources(ResourceType::Room));
        self.raw_zones = index_by_id(snapshot.resources(ResourceType::Zone));
        self.raw_scenes = index_by_id(snapshot.resources(ResourceType::Scene));

        let seeded = self.stage_snapshot_values(snapshot, now);

        self.emit_removals(&present, lazy, out);
        let ids: Vec<String> = self.channels.keys().cloned().collect();
        for id in &ids {
            self.announce(id, out);
        }
        self.emit_groups(out);

        for (key, value, at) in seeded {
            if self.emitted_devices.contains_key(&key.device_id) {
                out.emit(value_event(&key, value, at));
            }
        }
        self.flush_pending(out);
        self.emit_scenes(out);

        self.present_devices = present;
        self.bootstrapped = true;
        BuildOutcome::Committed {
            degraded: snapshot.degraded_types().iter().copied().collect(),
        }
    }

    fn merge_device(&mut self, raw: &Value) -> Option<String> {
        let id = resource_id(raw)?;
        let merged = metadata::merge_device(self.devices.get(id), raw, &self.product_numbers)?;
        let id = merged.external_id.clone();
        self.devices.insert(id.clone(), merged);
        Some(id)
    }

    fn missing_owners(&self, snapshot: &Snapshot, lazy: &MetadataFetchQueue) -> Vec<String> {
        let mut missing: Vec<String> = SNAPSHOT_ORDER
            .iter()
            .filter(|rt| rt.is_service())
            .flat_map(|rt| snapshot.resources(*rt))
            .filter_map(owner_device)
            .filter(|owner| {
                !self.devices.get(owner).is_some_and(Device::has_metadata)
                    && !lazy.has_failed(owner)
            })
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }

    /// Keep last cycle's channels for types that could not be fetched.
    fn carry_over_degraded(
        &self,
        snapshot: &Snapshot,
        derived: &mut channels::Derivation,
    ) -> HashSet<String> {
        let mut carried = HashSet::new();
        for rt in snapshot.degraded_types() {
            let mut keys: Vec<&ChannelKey> = self
                .origins
                .iter()
                .filter(|(_, origin)| *origin == rt)
                .map(|(key, _)| key)
                .collect();
            keys.sort();
            for key in keys {
                let Some(channel) = self.channel(&key.device_id, &key.channel_id) else {
                    continue;
                };
                if derived.add(&key.device_id, *rt, channel.clone()) {
                    carried.insert(key.device_id.clone());
                    if let Some(binding) = self.bindings.get(key) {
                        derived.bindings.insert(key.clone(), binding.clone());
                    }
                }
            }
            for (rid, owner) in &self.owners {
                if owner.resource_type == *rt {
                    derived
                        .owners
                        .entry(rid.clone())
                        .or_insert_with(|| owner.clone());
                    if let Some(channel_id) = self.button_channels.get(rid) {
                        derived
                            .button_channels
                            .insert(rid.clone(), channel_id.clone());
                    }
                }
            }
        }
        if !carried.is_empty() {
            debug!(devices = carried.len(), "carried channels over degraded types");
        }
        carried
    }

    fn apply_snapshot_effects(&mut self, snapshot: &Snapshot) {
        let mut by_device: BTreeMap<String, Vec<EffectDescriptor>> = BTreeMap::new();
        for light in snapshot.resources(ResourceType::Light) {
            if let (Some(owner), Some(effects)) = (owner_device(light), light_effects(light)) {
                let list = by_device.entry(owner).or_default();
                for effect in effects {
                    if !list.iter().any(|e| e.id == effect.id) {
                        list.push(effect);
                    }
                }
            }
        }
        for (device_id, effects) in by_device {
            if let Some(device) = self.devices.get_mut(&device_id) {
                device.effects = effects;
            }
        }
    }

    fn emit_removals(
        &mut self,
        present: &HashSet<String>,
        lazy: &MetadataFetchQueue,
        out: &mut Outbox,
    ) {
        let mut gone: Vec<String> = self
            .present_devices
            .iter()
            .filter(|id| !present.contains(*id) && !lazy.is_pending(id))
            .cloned()
            .collect();
        gone.sort();
        for id in gone {
            self.remove_device(&id, out);
        }

        let mut silent: Vec<String> = self
            .emitted_devices
            .keys()
            .filter(|id| self.channels.get(*id).is_none_or(Vec::is_empty))
            .cloned()
            .collect();
        silent.sort();
        for id in silent {
            self.emitted_devices.remove(&id);
            self.values.retain(|key, _| key.device_id != id);
            out.emit(SinkEvent::DeviceRemove { device_id: id });
        }
    }

    // ── Announcements ────────────────────────────────────────────────

    /// Emit an upsert if the device's announced shape changed.
    fn announce(&mut self, device_id: &str, out: &mut Outbox) {
        let Some(channels) = self.channels.get(device_id).filter(|c| !c.is_empty()) else {
            return;
        };
        let Some(device) = self.devices.get(device_id).filter(|d| d.has_metadata()) else {
            return;
        };
        if self
            .emitted_devices
            .get(device_id)
            .is_some_and(|(d, c)| d == device && c == channels)
        {
            return;
        }

        let announced: Vec<Channel> = channels
            .iter()
            .map(|c| {
                let mut c = c.clone();
                c.last_value = self.values.get(&ChannelKey::new(device_id, &c.id)).cloned();
                c
            })
            .collect();
        out.emit(SinkEvent::DeviceUpsert {
            device: device.clone(),
            channels: announced,
        });
        self.emitted_devices
            .insert(device_id.to_owned(), (device.clone(), channels.clone()));
    }

    /// Re-announce an already announced device after a metadata change.
    pub(crate) fn refresh_announced(&mut self, device_id: &str, out: &mut Outbox) {
        if self.emitted_devices.contains_key(device_id) {
            self.announce(device_id, out);
        }
    }

    fn emit_groups(&mut self, out: &mut Outbox) {
        let owners = &self.owners;
        let resolve = |r: &ResourceRef| -> Vec<String> {
            if r.resource_type() == Some(ResourceType::Device) {
                return vec![r.rid.clone()];
            }
            owners
                .get(&r.rid)
                .map(|o| vec![o.device_id.clone()])
                .unwrap_or_default()
        };

        let rooms: BTreeMap<String, Room> = self
            .raw_rooms
            .values()
            .filter_map(|raw| groups::parse_room(raw, &resolve))
            .map(|room| (room.external_id.clone(), room))
            .collect();
        let resolve_zone = |r: &ResourceRef| -> Vec<String> {
            if r.resource_type() == Some(ResourceType::Room) {
                return rooms
                    .get(&r.rid)
                    .map(|room| room.members.clone())
                    .unwrap_or_default();
            }
            resolve(r)
        };
        let zones: BTreeMap<String, Group> = self
            .raw_zones
            .values()
            .filter_map(|raw| groups::parse_zone(raw, &resolve_zone))
            .map(|zone| (zone.external_id.clone(), zone))
            .collect();

        for (id, room) in &rooms {
            if self.emitted_rooms.get(id) != Some(room) {
                out.emit(SinkEvent::RoomUpsert { room: room.clone() });
            }
        }
        for id in self.emitted_rooms.keys() {
            if !rooms.contains_key(id) {
                out.emit(SinkEvent::RoomRemove { room_id: id.clone() });
            }
        }
        for (id, zone) in &zones {
            if self.emitted_groups.get(id) != Some(zone) {
                out.emit(SinkEvent::GroupUpsert { group: zone.clone() });
            }
        }
        for id in self.emitted_groups.keys() {
            if !zones.contains_key(id) {
                out.emit(SinkEvent::GroupRemove {
                    group_id: id.clone(),
                });
            }
        }
        self.emitted_rooms = rooms;
        self.emitted_groups = zones;
    }

    fn emit_scenes(&mut self, out: &mut Outbox) {
        let scenes: Vec<Scene> = self
            .raw_scenes
            .values()
            .filter_map(groups::parse_scene)
            .collect();
        if self.emitted_scenes.as_ref() != Some(&scenes) {
            out.emit(SinkEvent::ScenesReplace {
                scenes: scenes.clone(),
            });
            self.emitted_scenes = Some(scenes);
        }
    }

    // ── Values ───────────────────────────────────────────────────────

    /// Record values read from the snapshot, returning those that differ
    /// from what was last reported.
    fn stage_snapshot_values(
        &mut self,
        snapshot: &Snapshot,
        now: DateTime<Utc>,
    ) -> Vec<(ChannelKey, ChannelValue, DateTime<Utc>)> {
        let mut readings: Vec<(String, &str, ChannelValue, DateTime<Utc>)> = Vec::new();
        let mut push = |resource: &Value,
                        channel: &'static str,
                        value: ChannelValue,
                        at: DateTime<Utc>| {
            if let Some(owner) = owner_device(resource) {
                readings.push((owner, channel, value, at));
            }
        };

        for light in snapshot.resources(ResourceType::Light) {
            for (channel, value) in decode::light_readings(light) {
                push(light, channel, value, now);
            }
        }
        for motion in snapshot.resources(ResourceType::Motion) {
            if let Some((detected, at)) = decode::motion_reading(motion) {
                push(motion, "motion", ChannelValue::Bool(detected), at.unwrap_or(now));
            }
            if let Some(level) = decode::sensitivity_reading(motion) {
                push(motion, "motion_sensitivity", ChannelValue::Int(level.code()), now);
            }
        }
        for resource in snapshot.resources(ResourceType::Temperature) {
            if let Some((celsius, at)) = decode::temperature_reading(resource) {
                push(resource, "temperature", ChannelValue::Float(celsius), at.unwrap_or(now));
            }
        }
        for resource in snapshot.resources(ResourceType::LightLevel) {
            if let Some((lux, at)) = decode::illuminance_reading(resource) {
                push(resource, "illuminance", ChannelValue::Int(lux), at.unwrap_or(now));
            }
        }
        for resource in snapshot.resources(ResourceType::DevicePower) {
            if let Some(level) = decode::battery_reading(resource) {
                push(resource, "battery", ChannelValue::Int(level), now);
            }
        }
        for resource in snapshot.resources(ResourceType::ZigbeeConnectivity) {
            if let Some(status) = decode::connectivity_reading(resource) {
                push(resource, "zigbee_status", ChannelValue::Int(status.code()), now);
            }
        }
        for resource in snapshot.resources(ResourceType::DeviceSoftwareUpdate) {
            let firmware = owner_device(resource)
                .and_then(|owner| self.devices.get(&owner))
                .map(|d| d.firmware.clone())
                .unwrap_or_default();
            if let Some(payload) = decode::software_update_payload(resource, &firmware) {
                push(resource, "device_software_update", ChannelValue::Json(payload), now);
            }
        }

        let mut changed = Vec::new();
        for (device_id, channel_id, value, at) in readings {
            let key = ChannelKey::new(device_id, channel_id);
            if !self.has_channel(&key) || self.values.get(&key) == Some(&value) {
                continue;
            }
            self.values.insert(key.clone(), value.clone());
            changed.push((key, value, at));
        }
        changed
    }

    fn flush_pending(&mut self, out: &mut Outbox) {
        let pending = std::mem::take(&mut self.pending_values);
        for (key, (value, at)) in pending {
            if self.emitted_devices.contains_key(&key.device_id) && self.has_channel(&key) {
                if self.values.get(&key) != Some(&value) {
                    self.values.insert(key.clone(), value.clone());
                    out.emit(value_event(&key, value, at));
                }
            } else if self.devices.contains_key(&key.device_id) {
                self.pending_values.insert(key, (value, at));
            }
        }
    }

    /// Report a retained reading from the stream.
    ///
    /// Readings for devices or channels not yet announced are held and
    /// flushed after the next committed cycle. A reading for an announced
    /// device on a channel it doesn't have means its shape changed.
    pub(crate) fn report_value(
        &mut self,
        device_id: &str,
        channel_id: &str,
        value: ChannelValue,
        at: DateTime<Utc>,
        out: &mut Outbox,
    ) {
        let key = ChannelKey::new(device_id, channel_id);
        if self.emitted_devices.contains_key(device_id) && self.has_channel(&key) {
            self.values.insert(key.clone(), value.clone());
            out.emit(value_event(&key, value, at));
            return;
        }
        if self.emitted_devices.contains_key(device_id) {
            debug!(channel = %key, "reading for unknown channel");
            out.resync = true;
        }
        self.pending_values.insert(key, (value, at));
    }

    /// Report a transient event (button press, dial pulse). Never stored.
    pub(crate) fn report_event(
        &mut self,
        key: &ChannelKey,
        value: ChannelValue,
        at: DateTime<Utc>,
        out: &mut Outbox,
    ) {
        if self.emitted_devices.contains_key(&key.device_id) && self.has_channel(key) {
            out.emit(value_event(key, value, at));
        }
    }

    // ── Incremental cache updates ────────────────────────────────────

    /// Store metadata fetched for a single device.
    pub(crate) fn store_device(&mut self, raw: &Value) -> Option<String> {
        self.merge_device(raw)
    }

    /// Merge a device delta into its cached metadata and re-announce.
    pub(crate) fn apply_device_delta(&mut self, device_id: &str, delta: &Value, out: &mut Outbox) {
        let Some(previous) = self.devices.get(device_id).filter(|d| d.has_metadata()) else {
            return;
        };
        let mut raw = previous.meta.clone();
        merge_patch(&mut raw, delta);
        if let Some(merged) = metadata::merge_device(Some(previous), &raw, &self.product_numbers) {
            self.devices.insert(device_id.to_owned(), merged);
            self.refresh_announced(device_id, out);
        }
    }

    /// Mirror a status payload into the device's metadata blob.
    pub(crate) fn mirror_device_meta(
        &mut self,
        device_id: &str,
        key: &str,
        payload: &Value,
        out: &mut Outbox,
    ) {
        let Some(meta) = self
            .devices
            .get_mut(device_id)
            .and_then(|d| d.meta.as_object_mut())
        else {
            return;
        };
        let mut merged = meta.get(key).cloned().unwrap_or(Value::Null);
        merge_patch(&mut merged, payload);
        meta.insert(key.to_owned(), merged);
        self.refresh_announced(device_id, out);
    }

    pub(crate) fn set_effects(
        &mut self,
        device_id: &str,
        effects: Vec<EffectDescriptor>,
        out: &mut Outbox,
    ) {
        if let Some(device) = self.devices.get_mut(device_id) {
            if device.effects != effects {
                device.effects = effects;
                self.refresh_announced(device_id, out);
            }
        }
    }

    /// Merge a room or zone delta. Returns `false` if the group is not
    /// cached.
    pub(crate) fn apply_group_delta(
        &mut self,
        resource_type: ResourceType,
        id: &str,
        delta: &Value,
        out: &mut Outbox,
    ) -> bool {
        let raw = match resource_type {
            ResourceType::Room => self.raw_rooms.get_mut(id),
            ResourceType::Zone => self.raw_zones.get_mut(id),
            _ => None,
        };
        let Some(raw) = raw else {
            return false;
        };
        merge_patch(raw, delta);
        self.emit_groups(out);
        true
    }

    pub(crate) fn apply_scene_delta(&mut self, id: &str, delta: &Value, out: &mut Outbox) {
        let raw = self
            .raw_scenes
            .entry(id.to_owned())
            .or_insert_with(|| serde_json::json!({"id": id, "type": "scene"}));
        merge_patch(raw, delta);
        self.emit_scenes(out);
    }

    /// Drop a device and everything derived from it. Emits a removal if
    /// it was announced.
    pub(crate) fn remove_device(&mut self, device_id: &str, out: &mut Outbox) {
        if self.emitted_devices.remove(device_id).is_some() {
            out.emit(SinkEvent::DeviceRemove {
                device_id: device_id.to_owned(),
            });
        }
        self.devices.remove(device_id);
        self.channels.remove(device_id);
        self.origins.retain(|key, _| key.device_id != device_id);
        self.bindings.retain(|key, _| key.device_id != device_id);
        self.values.retain(|key, _| key.device_id != device_id);
        self.pending_values
            .retain(|key, _| key.device_id != device_id);

        let resources: Vec<String> = self
            .owners
            .iter()
            .filter(|(_, owner)| owner.device_id == device_id)
            .map(|(rid, _)| rid.clone())
            .collect();
        for rid in resources {
            self.owners.remove(&rid);
            self.button_channels.remove(&rid);
            self.gamuts.remove(&rid);
        }
        self.present_devices.remove(device_id);
        out.removed_devices.push(device_id.to_owned());
    }

    /// Forget what the sink has seen so the next build re-announces
    /// everything.
    pub(crate) fn forget_emitted(&mut self) {
        self.emitted_devices.clear();
        self.emitted_rooms.clear();
        self.emitted_groups.clear();
        self.emitted_scenes = None;
        self.values.clear();
    }

    // ── Lookups ──────────────────────────────────────────────────────

    pub(crate) fn device(&self, device_id: &str) -> Option<&Device> {
        self.devices.get(device_id)
    }

    pub(crate) fn has_device_metadata(&self, device_id: &str) -> bool {
        self.devices.get(device_id).is_some_and(Device::has_metadata)
    }

    pub(crate) fn is_announced(&self, device_id: &str) -> bool {
        self.emitted_devices.contains_key(device_id)
    }

    pub(crate) fn channel(&self, device_id: &str, channel_id: &str) -> Option<&Channel> {
        self.channels
            .get(device_id)?
            .iter()
            .find(|c| c.id == channel_id)
    }

    fn has_channel(&self, key: &ChannelKey) -> bool {
        self.channel(&key.device_id, &key.channel_id).is_some()
    }

    pub(crate) fn binding(&self, device_id: &str, channel_id: &str) -> Option<&ResourceBinding> {
        self.bindings.get(&ChannelKey::new(device_id, channel_id))
    }

    pub(crate) fn owner(&self, resource_id: &str) -> Option<&Owner> {
        self.owners.get(resource_id)
    }

    pub(crate) fn button_channel(&self, resource_id: &str) -> Option<&str> {
        self.button_channels.get(resource_id).map(String::as_str)
    }

    pub(crate) fn gamut(&self, light_id: &str) -> Option<&Gamut> {
        self.gamuts.get(light_id)
    }

    pub(crate) fn scene(&self, scene_id: &str) -> Option<&Scene> {
        self.emitted_scenes
            .as_ref()?
            .iter()
            .find(|s| s.external_id == scene_id)
    }

    /// Whether `group_id` names an announced room or zone.
    pub(crate) fn group_type(&self, group_id: &str) -> Option<ResourceType> {
        if self.emitted_rooms.contains_key(group_id) {
            Some(ResourceType::Room)
        } else if self.emitted_groups.contains_key(group_id) {
            Some(ResourceType::Zone)
        } else {
            None
        }
    }

    /// The light resource behind a device's light channels.
    pub(crate) fn light_for_device(&self, device_id: &str) -> Option<&str> {
        ["on", "bri", "ct", "color"]
            .iter()
            .filter_map(|channel| self.binding(device_id, channel))
            .find(|b| b.resource_type == ResourceType::Light)
            .map(|b| b.resource_id.as_str())
    }
}

fn index_by_id(resources: &[Value]) -> BTreeMap<String, Value> {
    resources
        .iter()
        .filter_map(|raw| resource_id(raw).map(|id| (id.to_owned(), raw.clone())))
        .collect()
}

fn value_event(key: &ChannelKey, value: ChannelValue, timestamp: DateTime<Utc>) -> SinkEvent {
    SinkEvent::ChannelValue {
        device_id: key.device_id.clone(),
        channel_id: key.channel_id.clone(),
        value,
        timestamp,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use crate::model::DeviceClass;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn device(id: &str, name: &str) -> Value {
        json!({"id": id, "type": "device", "metadata": {"name": name, "archetype": "sultan_bulb"},
               "product_data": {"model_id": "LCT015", "software_version": "1.0"}})
    }

    fn light(id: &str, owner: &str) -> Value {
        json!({"id": id, "type": "light", "owner": {"rid": owner, "rtype": "device"},
               "on": {"on": true}})
    }

    fn button(id: &str, owner: &str, cid: i64) -> Value {
        json!({"id": id, "type": "button", "owner": {"rid": owner, "rtype": "device"},
               "metadata": {"control_id": cid}, "button": {}})
    }

    fn snapshot(devices: Vec<Value>, lights: Vec<Value>, buttons: Vec<Value>) -> Snapshot {
        let mut s = Snapshot::default();
        for rt in SNAPSHOT_ORDER {
            s.insert(rt, Vec::new());
        }
        s.insert(ResourceType::Device, devices);
        s.insert(ResourceType::Light, lights);
        s.insert(ResourceType::Button, buttons);
        s
    }

    fn run(state: &mut ReconcileState, snap: &Snapshot) -> (BuildOutcome, Vec<SinkEvent>) {
        let lazy = MetadataFetchQueue::new(4);
        let mut out = Outbox::default();
        let outcome = state.build(snap, &lazy, now(), &mut out);
        (outcome, out.events)
    }

    fn removals(events: &[SinkEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::DeviceRemove { device_id } => Some(device_id.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn on_only_light_announced_with_value() {
        let mut state = ReconcileState::default();
        let snap = snapshot(vec![device("d1", "Desk")], vec![light("l1", "d1")], vec![]);
        let (outcome, events) = run(&mut state, &snap);
        assert_eq!(outcome, BuildOutcome::Committed { degraded: vec![] });

        let SinkEvent::DeviceUpsert { device, channels } = &events[0] else {
            panic!("expected upsert first, got {events:?}");
        };
        assert_eq!(device.name, "Desk");
        assert_eq!(device.class, DeviceClass::Light);
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].id, "on");
        assert_eq!(channels[0].last_value, Some(ChannelValue::Bool(true)));
        assert!(events.iter().any(|e| matches!(
            e,
            SinkEvent::ChannelValue { channel_id, value: ChannelValue::Bool(true), .. }
                if channel_id == "on"
        )));
    }

    #[test]
    fn identical_rebuild_emits_nothing() {
        let mut state = ReconcileState::default();
        let snap = snapshot(
            vec![device("d1", "Desk"), device("d2", "Remote")],
            vec![light("l1", "d1")],
            vec![button("b1", "d2", 1), button("b2", "d2", 2)],
        );
        let (_, first) = run(&mut state, &snap);
        assert!(!first.is_empty());
        let (outcome, second) = run(&mut state, &snap);
        assert_eq!(outcome, BuildOutcome::Committed { degraded: vec![] });
        assert_eq!(second, vec![]);
    }

    #[test]
    fn removed_device_reported_once() {
        let mut state = ReconcileState::default();
        let both = snapshot(
            vec![device("d1", "Desk"), device("d2", "Floor")],
            vec![light("l1", "d1"), light("l2", "d2")],
            vec![],
        );
        run(&mut state, &both);

        let one = snapshot(vec![device("d1", "Desk")], vec![light("l1", "d1")], vec![]);
        let (_, events) = run(&mut state, &one);
        assert_eq!(removals(&events), vec!["d2"]);

        let (_, again) = run(&mut state, &one);
        assert_eq!(removals(&again), Vec::<&str>::new());

        let mut out = Outbox::default();
        state.report_value("d2", "on", ChannelValue::Bool(false), now(), &mut out);
        assert_eq!(out.events, vec![]);
        let (_, after) = run(&mut state, &one);
        assert!(after.iter().all(|e| e.device_id() != Some("d2")));
    }

    #[test]
    fn degraded_buttons_keep_their_channels() {
        let mut state = ReconcileState::default();
        let full = snapshot(
            vec![device("d2", "Remote")],
            vec![],
            vec![button("b1", "d2", 1), button("b2", "d2", 2)],
        );
        run(&mut state, &full);

        let mut degraded = snapshot(vec![device("d2", "Remote renamed")], vec![], vec![]);
        degraded.mark_degraded(ResourceType::Button);
        let (outcome, events) = run(&mut state, &degraded);
        assert_eq!(
            outcome,
            BuildOutcome::Committed {
                degraded: vec![ResourceType::Button]
            }
        );
        assert_eq!(removals(&events), Vec::<&str>::new());
        let SinkEvent::DeviceUpsert { device, channels } = &events[0] else {
            panic!("expected rename upsert, got {events:?}");
        };
        assert_eq!(device.name, "Remote renamed");
        let ids: Vec<_> = channels.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["button1", "button2"]);
        assert_eq!(state.button_channel("b2"), Some("button2"));
    }

    #[test]
    fn unknown_owner_awaits_metadata() {
        let mut state = ReconcileState::default();
        let snap = snapshot(vec![], vec![light("l1", "ghost")], vec![]);
        let (outcome, events) = run(&mut state, &snap);
        assert_eq!(outcome, BuildOutcome::AwaitingMetadata(vec!["ghost".into()]));
        assert_eq!(events, vec![]);
    }

    #[test]
    fn failed_owner_blocks_cycle() {
        let mut state = ReconcileState::default();
        let snap = snapshot(vec![], vec![light("l1", "ghost")], vec![]);
        let mut lazy = MetadataFetchQueue::new(4);
        lazy.request("ghost");
        lazy.complete("ghost", false);
        let mut out = Outbox::default();
        let outcome = state.build(&snap, &lazy, now(), &mut out);
        assert_eq!(outcome, BuildOutcome::Blocked(vec!["ghost".into()]));
        assert_eq!(out.events, vec![]);
    }

    #[test]
    fn pending_values_flush_after_announcement() {
        let mut state = ReconcileState::default();
        let mut out = Outbox::default();
        state.report_value("d1", "on", ChannelValue::Bool(false), now(), &mut out);
        assert_eq!(out.events, vec![]);

        let snap = snapshot(vec![device("d1", "Desk")], vec![light("l1", "d1")], vec![]);
        let (_, events) = run(&mut state, &snap);
        let values: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::ChannelValue { value, .. } => Some(value.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            values,
            vec![ChannelValue::Bool(true), ChannelValue::Bool(false)]
        );
    }

    #[test]
    fn zone_expands_room_members() {
        let mut state = ReconcileState::default();
        let mut snap = snapshot(
            vec![device("d1", "Desk"), device("d2", "Floor")],
            vec![light("l1", "d1"), light("l2", "d2")],
            vec![],
        );
        snap.insert(
            ResourceType::Room,
            vec![json!({"id": "r1", "metadata": {"name": "Office", "archetype": "office"},
                        "children": [{"rid": "d1", "rtype": "device"}]})],
        );
        snap.insert(
            ResourceType::Zone,
            vec![json!({"id": "z1", "metadata": {"name": "Upstairs", "archetype": "home"},
                        "children": [{"rid": "r1", "rtype": "room"},
                                     {"rid": "l2", "rtype": "light"}]})],
        );
        let (_, events) = run(&mut state, &snap);
        let zone = events
            .iter()
            .find_map(|e| match e {
                SinkEvent::GroupUpsert { group } => Some(group.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(zone.members, vec!["d1", "d2"]);
    }
}
