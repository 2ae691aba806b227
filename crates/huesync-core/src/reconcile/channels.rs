// ── Channel derivation ──
//
// Turns the service resources of one snapshot into per-device channel
// lists, write bindings, and the resource → owner index. Runs from
// scratch on every reconciliation; nothing here patches previous state.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Value, json};

use huesync_api::{ResourceRef, ResourceType};

use super::Owner;
use crate::color::Gamut;
use crate::decode::{self, control_id, owner_device, resource_id};
use crate::model::{
    ButtonEventCode, Channel, ChannelChoice, ChannelKey, ChannelKind, ConnectivityStatus,
    DataType, Device, DeviceClass, ResourceBinding, SensitivityLevel,
};
use crate::rotary::DIAL_CHANNEL;
use crate::snapshot::Snapshot;

pub(crate) const DEFAULT_MIREK_MIN: f64 = 153.0;
pub(crate) const DEFAULT_MIREK_MAX: f64 = 500.0;

/// Everything derived from one snapshot, committed atomically.
#[derive(Debug, Default)]
pub(crate) struct Derivation {
    pub channels: BTreeMap<String, Vec<Channel>>,
    pub origins: HashMap<ChannelKey, ResourceType>,
    pub bindings: HashMap<ChannelKey, ResourceBinding>,
    pub owners: HashMap<String, Owner>,
    pub button_channels: HashMap<String, String>,
    pub gamuts: HashMap<String, Gamut>,
}

impl Derivation {
    /// Add a channel unless the device already has one with this id.
    pub(crate) fn add(&mut self, device_id: &str, origin: ResourceType, channel: Channel) -> bool {
        let list = self.channels.entry(device_id.to_owned()).or_default();
        if list.iter().any(|c| c.id == channel.id) {
            return false;
        }
        self.origins
            .insert(ChannelKey::new(device_id, &channel.id), origin);
        list.push(channel);
        true
    }

    fn bind(&mut self, device_id: &str, channel_id: &str, rtype: ResourceType, rid: &str) {
        self.bindings.insert(
            ChannelKey::new(device_id, channel_id),
            ResourceBinding::new(rtype, rid),
        );
    }

    fn own(&mut self, resource_id: &str, device_id: &str, resource_type: ResourceType) {
        self.owners.insert(
            resource_id.to_owned(),
            Owner {
                device_id: device_id.to_owned(),
                resource_type,
            },
        );
    }

    /// Canonical channel order, so carried-over channels compare equal.
    pub(crate) fn sort(&mut self) {
        for list in self.channels.values_mut() {
            list.sort_by(|a, b| (a.kind, &a.id).cmp(&(b.kind, &b.id)));
        }
    }
}

/// Derive channels for every service resource in `snapshot`.
pub(crate) fn derive(snapshot: &Snapshot, devices: &mut HashMap<String, Device>) -> Derivation {
    let mut d = Derivation::default();

    for light in snapshot.resources(ResourceType::Light) {
        derive_light(&mut d, devices, light);
    }
    for motion in snapshot.resources(ResourceType::Motion) {
        derive_motion(&mut d, devices, motion);
    }
    for resource in snapshot.resources(ResourceType::Temperature) {
        derive_simple(&mut d, devices, resource, ResourceType::Temperature, temperature());
    }
    for resource in snapshot.resources(ResourceType::LightLevel) {
        derive_simple(&mut d, devices, resource, ResourceType::LightLevel, illuminance());
    }
    for resource in snapshot.resources(ResourceType::DevicePower) {
        derive_power(&mut d, devices, resource);
    }
    derive_buttons(&mut d, devices, snapshot.resources(ResourceType::Button));
    for resource in snapshot.resources(ResourceType::ZigbeeConnectivity) {
        derive_connectivity(&mut d, devices, resource);
    }
    for resource in snapshot.resources(ResourceType::DeviceSoftwareUpdate) {
        derive_software_update(&mut d, devices, resource);
    }
    for resource in snapshot.resources(ResourceType::ZigbeeDeviceDiscovery) {
        if let (Some(id), Some(owner)) = (resource_id(resource), owner_device(resource)) {
            d.own(id, &owner, ResourceType::ZigbeeDeviceDiscovery);
            mirror_meta(devices, &owner, "zigbeeDeviceDiscovery", resource);
        }
    }
    for device in snapshot.resources(ResourceType::Device) {
        derive_device_services(&mut d, devices, device);
    }

    d
}

// ── Per-type rules ───────────────────────────────────────────────────

fn derive_light(d: &mut Derivation, devices: &mut HashMap<String, Device>, light: &Value) {
    let (Some(id), Some(owner)) = (resource_id(light), owner_device(light)) else {
        return;
    };
    d.own(id, &owner, ResourceType::Light);
    promote(devices, &owner, DeviceClass::Light);

    let mut add_bound = |d: &mut Derivation, channel: Channel| {
        let channel_id = channel.id.clone();
        d.add(&owner, ResourceType::Light, channel);
        d.bind(&owner, &channel_id, ResourceType::Light, id);
    };

    if light.get("on").is_some_and(Value::is_object) {
        add_bound(d, power());
    }
    if light.get("dimming").is_some_and(Value::is_object) {
        add_bound(d, brightness());
    }
    if let Some(ct) = light.get("color_temperature").filter(|v| v.is_object()) {
        let schema = ct.get("mirek_schema");
        let min = schema
            .and_then(|s| s.get("mirek_minimum"))
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_MIREK_MIN);
        let max = schema
            .and_then(|s| s.get("mirek_maximum"))
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_MIREK_MAX);
        add_bound(d, color_temperature(min, max));
        add_bound(d, color_temperature_preset(min, max));
    }
    if let Some(color) = light.get("color").filter(|c| c.get("xy").is_some()) {
        let gamut = color.get("gamut").and_then(Gamut::from_value);
        if let Some(gamut) = gamut {
            d.gamuts.insert(id.to_owned(), gamut);
        }
        add_bound(d, color_rgb(gamut.as_ref()));
    }
}

fn derive_motion(d: &mut Derivation, devices: &mut HashMap<String, Device>, motion: &Value) {
    let (Some(id), Some(owner)) = (resource_id(motion), owner_device(motion)) else {
        return;
    };
    d.own(id, &owner, ResourceType::Motion);
    promote(devices, &owner, DeviceClass::Sensor);
    d.add(&owner, ResourceType::Motion, motion_channel());
    if motion.get("sensitivity").is_some_and(Value::is_object) {
        d.add(&owner, ResourceType::Motion, motion_sensitivity());
    }
}

fn derive_simple(
    d: &mut Derivation,
    devices: &mut HashMap<String, Device>,
    resource: &Value,
    resource_type: ResourceType,
    channel: Channel,
) {
    let (Some(id), Some(owner)) = (resource_id(resource), owner_device(resource)) else {
        return;
    };
    d.own(id, &owner, resource_type);
    promote(devices, &owner, DeviceClass::Sensor);
    d.add(&owner, resource_type, channel);
}

fn derive_power(d: &mut Derivation, devices: &mut HashMap<String, Device>, resource: &Value) {
    let (Some(id), Some(owner)) = (resource_id(resource), owner_device(resource)) else {
        return;
    };
    d.own(id, &owner, ResourceType::DevicePower);
    d.add(&owner, ResourceType::DevicePower, battery());
    if let Some(device) = devices.get_mut(&owner) {
        device.flags.has_battery = true;
    }
}

fn derive_buttons(d: &mut Derivation, devices: &mut HashMap<String, Device>, buttons: &[Value]) {
    let mut by_owner: BTreeMap<String, Vec<(i64, &str)>> = BTreeMap::new();
    for button in buttons {
        if let (Some(id), Some(owner)) = (resource_id(button), owner_device(button)) {
            by_owner
                .entry(owner)
                .or_default()
                .push((control_id(button), id));
        }
    }

    for (owner, entries) in by_owner {
        promote(devices, &owner, DeviceClass::Button);
        let single = entries.len() == 1;
        for (cid, rid) in entries {
            let (channel_id, name) = if single {
                ("button".to_owned(), "Button".to_owned())
            } else {
                (format!("button{cid}"), format!("Button {cid}"))
            };
            d.own(rid, &owner, ResourceType::Button);
            d.button_channels.insert(rid.to_owned(), channel_id.clone());
            d.add(&owner, ResourceType::Button, button_channel(&channel_id, &name));
        }
    }
}

fn derive_connectivity(
    d: &mut Derivation,
    devices: &mut HashMap<String, Device>,
    resource: &Value,
) {
    let (Some(id), Some(owner)) = (resource_id(resource), owner_device(resource)) else {
        return;
    };
    d.own(id, &owner, ResourceType::ZigbeeConnectivity);
    d.add(&owner, ResourceType::ZigbeeConnectivity, zigbee_status());
    mirror_meta(devices, &owner, "zigbeeConnectivity", resource);
}

fn derive_software_update(
    d: &mut Derivation,
    devices: &mut HashMap<String, Device>,
    resource: &Value,
) {
    let (Some(id), Some(owner)) = (resource_id(resource), owner_device(resource)) else {
        return;
    };
    d.own(id, &owner, ResourceType::DeviceSoftwareUpdate);
    d.add(&owner, ResourceType::DeviceSoftwareUpdate, software_update());
    let firmware = devices
        .get(&owner)
        .map(|dev| dev.firmware.clone())
        .unwrap_or_default();
    if let Some(payload) = decode::software_update_payload(resource, &firmware) {
        mirror_meta(devices, &owner, "softwareUpdate", &payload);
    }
}

/// Channels implied by a device's service references rather than by a
/// fetched collection.
fn derive_device_services(
    d: &mut Derivation,
    devices: &mut HashMap<String, Device>,
    device: &Value,
) {
    let Some(device_id) = resource_id(device) else {
        return;
    };
    for service in ResourceRef::list_from_field(device, "services") {
        match service.resource_type() {
            Some(ResourceType::RelativeRotary) => {
                d.own(&service.rid, device_id, ResourceType::RelativeRotary);
                d.add(device_id, ResourceType::RelativeRotary, dial());
                promote(devices, device_id, DeviceClass::Switch);
            }
            Some(ResourceType::Tamper) => {
                d.own(&service.rid, device_id, ResourceType::Tamper);
                d.add(device_id, ResourceType::Tamper, tamper());
            }
            _ => {}
        }
    }
}

fn promote(devices: &mut HashMap<String, Device>, device_id: &str, class: DeviceClass) {
    if let Some(device) = devices.get_mut(device_id) {
        device.class = device.class.upgrade(class);
    }
}

fn mirror_meta(devices: &mut HashMap<String, Device>, device_id: &str, key: &str, value: &Value) {
    if let Some(meta) = devices
        .get_mut(device_id)
        .and_then(|dev| dev.meta.as_object_mut())
    {
        meta.insert(key.to_owned(), value.clone());
    }
}

// ── Channel definitions ──────────────────────────────────────────────

fn power() -> Channel {
    Channel::new("on", "Power", ChannelKind::PowerOnOff, DataType::Bool)
        .writable()
        .retained()
}

fn brightness() -> Channel {
    Channel::new("bri", "Brightness", ChannelKind::Brightness, DataType::Float)
        .range(0.0, 100.0, 1.0)
        .unit("%")
        .writable()
        .retained()
}

fn color_temperature(min: f64, max: f64) -> Channel {
    Channel::new(
        "ct",
        "Color Temperature",
        ChannelKind::ColorTemperature,
        DataType::Int,
    )
    .range(min, max, 1.0)
    .unit("mired")
    .writable()
    .retained()
}

const PRESET_LABELS: [&str; 5] = ["Coolest", "Cool", "Neutral", "Warm", "Warmest"];

fn color_temperature_preset(min: f64, max: f64) -> Channel {
    let choices = PRESET_LABELS
        .iter()
        .zip(0i64..)
        .map(|(label, value)| ChannelChoice {
            value,
            label: (*label).to_owned(),
        })
        .collect();
    Channel::new(
        "ctPreset",
        "Color Temperature Preset",
        ChannelKind::ColorTemperaturePreset,
        DataType::Enum,
    )
    .range(0.0, 4.0, 1.0)
    .choices(choices)
    .meta(json!({"mirekMin": min, "mirekMax": max}))
    .writable()
}

fn color_rgb(gamut: Option<&Gamut>) -> Channel {
    Channel::new("color", "Color", ChannelKind::ColorRgb, DataType::Color)
        .meta(json!({"colorCapabilities": {
            "space": "cie1931_xy",
            "gamut": gamut.map(Gamut::to_points),
        }}))
        .writable()
        .retained()
}

fn motion_channel() -> Channel {
    Channel::new("motion", "Motion", ChannelKind::Motion, DataType::Bool)
}

fn motion_sensitivity() -> Channel {
    Channel::new(
        "motion_sensitivity",
        "Motion Sensitivity",
        ChannelKind::MotionSensitivity,
        DataType::Enum,
    )
    .choices(SensitivityLevel::choices())
    .retained()
}

fn tamper() -> Channel {
    Channel::new("tamper", "Tamper", ChannelKind::Tamper, DataType::Bool)
}

fn temperature() -> Channel {
    Channel::new(
        "temperature",
        "Temperature",
        ChannelKind::Temperature,
        DataType::Float,
    )
    .unit("°C")
}

fn illuminance() -> Channel {
    Channel::new(
        "illuminance",
        "Illuminance",
        ChannelKind::Illuminance,
        DataType::Int,
    )
    .unit("lx")
}

fn battery() -> Channel {
    Channel::new("battery", "Battery", ChannelKind::Battery, DataType::Int)
        .range(0.0, 100.0, 1.0)
        .unit("%")
        .retained()
}

fn button_channel(id: &str, name: &str) -> Channel {
    Channel::new(id, name, ChannelKind::ButtonEvent, DataType::Int)
        .choices(ButtonEventCode::choices())
}

fn dial() -> Channel {
    Channel::new(
        DIAL_CHANNEL,
        "Dial",
        ChannelKind::RelativeRotation,
        DataType::Int,
    )
}

fn zigbee_status() -> Channel {
    Channel::new(
        "zigbee_status",
        "Zigbee Connectivity",
        ChannelKind::ConnectivityStatus,
        DataType::Enum,
    )
    .choices(ConnectivityStatus::choices())
    .retained()
}

fn software_update() -> Channel {
    Channel::new(
        "device_software_update",
        "Software Update",
        ChannelKind::DeviceSoftwareUpdate,
        DataType::Json,
    )
    .retained()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ids(d: &Derivation, device: &str) -> Vec<String> {
        d.channels[device].iter().map(|c| c.id.clone()).collect()
    }

    fn snapshot_with(rt: ResourceType, resources: Vec<Value>) -> Snapshot {
        let mut s = Snapshot::default();
        s.insert(rt, resources);
        s
    }

    #[test]
    fn on_only_light_yields_single_power_channel() {
        let snapshot = snapshot_with(
            ResourceType::Light,
            vec![json!({"id": "l1", "type": "light",
                        "owner": {"rid": "d1", "rtype": "device"},
                        "on": {"on": true}})],
        );
        let mut devices = HashMap::new();
        let d = derive(&snapshot, &mut devices);
        assert_eq!(ids(&d, "d1"), vec!["on"]);
        assert_eq!(
            d.bindings[&ChannelKey::new("d1", "on")],
            ResourceBinding::new(ResourceType::Light, "l1")
        );
    }

    #[test]
    fn color_light_gets_ct_preset_and_gamut() {
        let snapshot = snapshot_with(
            ResourceType::Light,
            vec![json!({"id": "l1", "type": "light",
                "owner": {"rid": "d1", "rtype": "device"},
                "on": {"on": true},
                "dimming": {"brightness": 50.0},
                "color_temperature": {"mirek": 300,
                    "mirek_schema": {"mirek_minimum": 153, "mirek_maximum": 454}},
                "color": {"xy": {"x": 0.3, "y": 0.3},
                    "gamut": {"red": {"x": 0.6915, "y": 0.3083},
                              "green": {"x": 0.17, "y": 0.7},
                              "blue": {"x": 0.1532, "y": 0.0475}}}})],
        );
        let mut devices = HashMap::new();
        let mut d = derive(&snapshot, &mut devices);
        d.sort();
        assert_eq!(ids(&d, "d1"), vec!["on", "bri", "ct", "ctPreset", "color"]);
        let ct = &d.channels["d1"][2];
        assert_eq!(ct.max, Some(454.0));
        assert!(d.gamuts.contains_key("l1"));
    }

    #[test]
    fn button_channels_namespaced_only_when_several() {
        let buttons = vec![
            json!({"id": "b1", "owner": {"rid": "remote", "rtype": "device"},
                   "metadata": {"control_id": 1}, "button": {}}),
            json!({"id": "b2", "owner": {"rid": "remote", "rtype": "device"},
                   "metadata": {"control_id": 2}, "button": {}}),
            json!({"id": "b3", "owner": {"rid": "switch", "rtype": "device"},
                   "metadata": {"control_id": 1}, "button": {}}),
        ];
        let snapshot = snapshot_with(ResourceType::Button, buttons);
        let mut devices = HashMap::new();
        let d = derive(&snapshot, &mut devices);
        assert_eq!(ids(&d, "remote"), vec!["button1", "button2"]);
        assert_eq!(ids(&d, "switch"), vec!["button"]);
        assert_eq!(d.button_channels["b2"], "button2");
    }

    #[test]
    fn rotary_service_reference_yields_dial() {
        let snapshot = snapshot_with(
            ResourceType::Device,
            vec![json!({"id": "tap", "type": "device", "services": [
                {"rid": "r1", "rtype": "relative_rotary"},
                {"rid": "b1", "rtype": "button"}
            ]})],
        );
        let mut devices = HashMap::new();
        devices.insert("tap".to_owned(), Device::placeholder("tap"));
        let d = derive(&snapshot, &mut devices);
        assert_eq!(ids(&d, "tap"), vec!["dial"]);
        assert_eq!(d.owners["r1"].device_id, "tap");
        assert_eq!(devices["tap"].class, DeviceClass::Switch);
    }

    #[test]
    fn battery_sets_flag() {
        let snapshot = snapshot_with(
            ResourceType::DevicePower,
            vec![json!({"id": "p1", "owner": {"rid": "d1", "rtype": "device"},
                        "power_state": {"battery_level": 80}})],
        );
        let mut devices = HashMap::new();
        devices.insert("d1".to_owned(), Device::placeholder("d1"));
        derive(&snapshot, &mut devices);
        assert!(devices["d1"].flags.has_battery);
    }
}
