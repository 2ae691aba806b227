// ── Device metadata merge ──

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::decode::resource_id;
use crate::model::{Device, DeviceClass, EffectCategory, EffectDescriptor};

const DEFAULT_DEVICE_NAME: &str = "Hue Device";
const ICON_URL_BASE: &str = "https://www.zigbee2mqtt.io/images/devices/";

/// Metadata keys filled in from service resources rather than the raw
/// device object. They survive a device refresh.
const MIRRORED_META_KEYS: [&str; 3] = [
    "zigbeeConnectivity",
    "softwareUpdate",
    "zigbeeDeviceDiscovery",
];

/// Merge a raw bridge device object over the cached entry, if any.
pub(crate) fn merge_device(
    previous: Option<&Device>,
    raw: &Value,
    product_numbers: &HashMap<String, String>,
) -> Option<Device> {
    let id = resource_id(raw)?;
    let product = raw.get("product_data");
    let metadata = raw.get("metadata");
    let text = |v: Option<&Value>, key: &str| -> Option<String> {
        v.and_then(|v| v.get(key))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    };
    let carried = |field: fn(&Device) -> &String| -> String {
        previous.map(|p| field(p).clone()).unwrap_or_default()
    };

    let name = text(metadata, "name")
        .or_else(|| text(product, "product_name"))
        .unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_owned());
    let manufacturer =
        text(product, "manufacturer_name").unwrap_or_else(|| carried(|d| &d.manufacturer));
    let model = text(product, "model_id").unwrap_or_else(|| carried(|d| &d.model));
    let firmware = text(product, "software_version").unwrap_or_else(|| carried(|d| &d.firmware));

    let mut class = previous.map_or(DeviceClass::Unknown, |p| p.class);
    let hints = [
        text(metadata, "archetype"),
        text(product, "product_archetype"),
        text(product, "product_name"),
    ];
    for hint in hints.iter().flatten() {
        class = class.upgrade(DeviceClass::from_hint(hint));
    }

    let mut meta = match raw {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    meta.insert(
        "serviceRefs".to_owned(),
        raw.get("services").cloned().unwrap_or(Value::Array(Vec::new())),
    );
    if let Some(number) = product_numbers.get(&model) {
        meta.insert("productNumber".to_owned(), Value::String(number.clone()));
        if let Some(token) = icon_token(number) {
            meta.insert(
                "iconUrl".to_owned(),
                Value::String(format!("{ICON_URL_BASE}{token}.png")),
            );
        }
    }
    if let Some(prev_meta) = previous.and_then(|p| p.meta.as_object()) {
        for key in MIRRORED_META_KEYS {
            if let Some(v) = prev_meta.get(key) {
                meta.insert(key.to_owned(), v.clone());
            }
        }
    }

    Some(Device {
        external_id: id.to_owned(),
        name,
        manufacturer,
        model,
        firmware,
        class,
        flags: previous.map(|p| p.flags).unwrap_or_default(),
        meta: Value::Object(meta),
        effects: previous.map(|p| p.effects.clone()).unwrap_or_default(),
    })
}

/// Last non-empty token of a product number. Numbers may list several
/// variants separated by slashes, commas or whitespace.
fn icon_token(number: &str) -> Option<&str> {
    number
        .split(|c: char| c == '/' || c == ',' || c.is_whitespace())
        .rfind(|t| !t.is_empty())
}

/// Effects advertised by a light payload, or `None` if it carries no
/// effect lists at all.
pub(crate) fn light_effects(light: &Value) -> Option<Vec<EffectDescriptor>> {
    let mut found = false;
    let mut effects = Vec::new();
    for (key, category) in [
        ("effects", EffectCategory::Effects),
        ("timed_effects", EffectCategory::TimedEffects),
    ] {
        let Some(values) = light
            .get(key)
            .and_then(|e| e.get("effect_values"))
            .and_then(Value::as_array)
        else {
            continue;
        };
        found = true;
        effects.extend(
            values
                .iter()
                .filter_map(Value::as_str)
                .filter(|id| *id != "no_effect")
                .map(|id| EffectDescriptor::new(id, category)),
        );
    }
    found.then_some(effects)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn raw_bulb() -> Value {
        json!({
            "id": "d1",
            "type": "device",
            "metadata": {"name": " Desk ", "archetype": "sultan_bulb"},
            "product_data": {
                "manufacturer_name": "Signify Netherlands B.V.",
                "model_id": "LCA001",
                "product_name": "Hue color lamp",
                "software_version": "1.104.2"
            },
            "services": [{"rid": "l1", "rtype": "light"}]
        })
    }

    #[test]
    fn merge_takes_product_data_and_hints() {
        let mut numbers = HashMap::new();
        numbers.insert("LCA001".to_owned(), "9290022166".to_owned());
        let device = merge_device(None, &raw_bulb(), &numbers).unwrap();
        assert_eq!(device.name, "Desk");
        assert_eq!(device.model, "LCA001");
        assert_eq!(device.firmware, "1.104.2");
        assert_eq!(device.class, DeviceClass::Light);
        assert_eq!(device.meta["productNumber"], "9290022166");
        assert_eq!(
            device.meta["iconUrl"],
            "https://www.zigbee2mqtt.io/images/devices/9290022166.png"
        );
        assert_eq!(device.meta["serviceRefs"][0]["rid"], "l1");

        numbers.insert("LCA001".to_owned(), "9290022166 / 929002216601".to_owned());
        let device = merge_device(None, &raw_bulb(), &numbers).unwrap();
        assert_eq!(device.meta["productNumber"], "9290022166 / 929002216601");
        assert_eq!(
            device.meta["iconUrl"],
            "https://www.zigbee2mqtt.io/images/devices/929002216601.png"
        );

        numbers.insert("LCA001".to_owned(), " , / ".to_owned());
        let device = merge_device(None, &raw_bulb(), &numbers).unwrap();
        assert!(device.meta.get("iconUrl").is_none());
    }

    #[test]
    fn name_falls_back_to_product_then_placeholder() {
        let raw = json!({"id": "d2", "product_data": {"product_name": "Hue motion sensor"}});
        let device = merge_device(None, &raw, &HashMap::new()).unwrap();
        assert_eq!(device.name, "Hue motion sensor");
        assert_eq!(device.class, DeviceClass::Sensor);

        let bare = merge_device(None, &json!({"id": "d3"}), &HashMap::new()).unwrap();
        assert_eq!(bare.name, "Hue Device");
    }

    #[test]
    fn mirrored_keys_survive_refresh() {
        let mut first = merge_device(None, &raw_bulb(), &HashMap::new()).unwrap();
        first.meta["zigbeeConnectivity"] = json!({"status": "connected"});
        let second = merge_device(Some(&first), &raw_bulb(), &HashMap::new()).unwrap();
        assert_eq!(second.meta["zigbeeConnectivity"]["status"], "connected");
    }

    #[test]
    fn effects_skip_no_effect() {
        let light = json!({
            "effects": {"effect_values": ["no_effect", "candle", "fire"]},
            "timed_effects": {"effect_values": ["sunrise"]}
        });
        let effects = light_effects(&light).unwrap();
        let ids: Vec<_> = effects.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["candle", "fire", "sunrise"]);
        assert_eq!(effects[2].category, EffectCategory::TimedEffects);
        assert!(light_effects(&json!({"on": {"on": true}})).is_none());
    }
}
