// ── Command translation ──
//
// Validates a command against the reconciled model and builds the one
// bridge write it maps to. Nothing here touches the network; a malformed
// payload is rejected before a request exists.

use serde_json::{Value, json};

use huesync_api::ResourceType;

use crate::color::{Rgb, rgb_to_xy};
use crate::error::CoreError;
use crate::model::{ChannelValue, EffectCategory};
use crate::reconcile::{DEFAULT_MIREK_MAX, DEFAULT_MIREK_MIN, ReconcileState};

/// Protocol-level mired bounds for raw color-temperature writes.
const MIREK_WRITE_MIN: f64 = 100.0;
const MIREK_WRITE_MAX: f64 = 1000.0;
const PRESET_MAX_INDEX: i64 = 4;

/// One `PUT /clip/v2/resource/{type}/{id}`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WriteRequest {
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub body: Value,
}

impl WriteRequest {
    fn new(resource_type: ResourceType, resource_id: &str, body: Value) -> Self {
        Self {
            resource_type,
            resource_id: resource_id.to_owned(),
            body,
        }
    }
}

fn invalid(message: impl Into<String>) -> CoreError {
    CoreError::Validation {
        message: message.into(),
    }
}

// ── Channel writes ───────────────────────────────────────────────────

/// Translate a channel write, returning the request and the value it
/// will leave the channel at.
pub(crate) fn channel_write(
    state: &ReconcileState,
    device_id: &str,
    channel_id: &str,
    value: &Value,
) -> Result<(WriteRequest, ChannelValue), CoreError> {
    if state.device(device_id).is_none() {
        return Err(CoreError::DeviceNotFound {
            identifier: device_id.to_owned(),
        });
    }
    let channel = state
        .channel(device_id, channel_id)
        .ok_or_else(|| CoreError::ChannelNotFound {
            device_id: device_id.to_owned(),
            channel_id: channel_id.to_owned(),
        })?;
    if !channel.flags.write {
        return Err(CoreError::Unsupported {
            operation: format!("write to read-only channel {channel_id}"),
        });
    }
    let binding = state
        .binding(device_id, channel_id)
        .ok_or_else(|| CoreError::Unsupported {
            operation: format!("write to channel {channel_id} without a bridge resource"),
        })?;
    let target = |body: Value| WriteRequest::new(binding.resource_type, &binding.resource_id, body);

    match channel_id {
        "on" => {
            let on = value
                .as_bool()
                .ok_or_else(|| invalid(format!("on expects a boolean, got {value}")))?;
            Ok((target(json!({"on": {"on": on}})), ChannelValue::Bool(on)))
        }
        "bri" => {
            let brightness = number(value, "bri")?.clamp(0.0, 100.0);
            Ok((
                target(json!({"dimming": {"brightness": brightness}})),
                ChannelValue::Float(brightness),
            ))
        }
        "ct" => {
            let mirek = round_mirek(number(value, "ct")?.clamp(MIREK_WRITE_MIN, MIREK_WRITE_MAX));
            Ok((
                target(json!({"color_temperature": {"mirek": mirek}})),
                ChannelValue::Int(mirek),
            ))
        }
        "ctPreset" => {
            let index = preset_index(value)?;
            let bounds = |key: &str, default: f64| {
                channel
                    .meta
                    .get(key)
                    .and_then(Value::as_f64)
                    .unwrap_or(default)
            };
            let min = bounds("mirekMin", DEFAULT_MIREK_MIN);
            let max = bounds("mirekMax", DEFAULT_MIREK_MAX);
            let mirek = round_mirek(min + (max - min) * preset_fraction(index));
            Ok((
                target(json!({"color_temperature": {"mirek": mirek}})),
                ChannelValue::Int(index),
            ))
        }
        "color" => {
            let rgb = parse_rgb(value)?;
            let mut xy = rgb_to_xy(rgb);
            if let Some(gamut) = state.gamut(&binding.resource_id) {
                xy = gamut.clamp(xy);
            }
            Ok((
                target(json!({"color": {"xy": {"x": xy.x, "y": xy.y}}})),
                ChannelValue::Color(rgb),
            ))
        }
        other => Err(CoreError::Unsupported {
            operation: format!("write to channel {other}"),
        }),
    }
}

fn number(value: &Value, channel: &str) -> Result<f64, CoreError> {
    value
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| invalid(format!("{channel} expects a number, got {value}")))
}

fn preset_index(value: &Value) -> Result<i64, CoreError> {
    let raw = number(value, "ctPreset")?;
    let index = round_mirek(raw);
    if !(0..=PRESET_MAX_INDEX).contains(&index) {
        return Err(invalid(format!(
            "ctPreset expects 0..={PRESET_MAX_INDEX}, got {value}"
        )));
    }
    Ok(index)
}

#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
fn preset_fraction(index: i64) -> f64 {
    index as f64 / PRESET_MAX_INDEX as f64
}

#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn round_mirek(v: f64) -> i64 {
    v.round() as i64
}

/// `{"r":..,"g":..,"b":..}` with 0..=255 components, or `"#rrggbb"`.
fn parse_rgb(value: &Value) -> Result<Rgb, CoreError> {
    if let Some(hex) = value.as_str() {
        let digits = hex.strip_prefix('#').unwrap_or(hex);
        if digits.len() != 6 || !digits.is_ascii() {
            return Err(invalid(format!("color expects #rrggbb, got {hex}")));
        }
        let component = |i: usize| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| invalid(format!("color expects #rrggbb, got {hex}")))
        };
        return Ok(Rgb::new(component(0)?, component(2)?, component(4)?));
    }

    let component = |key: &str| -> Result<u8, CoreError> {
        value
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|v| u8::try_from(v).ok())
            .ok_or_else(|| invalid(format!("color component {key} must be an integer 0-255")))
    };
    if !value.is_object() {
        return Err(invalid(format!("color expects {{r, g, b}}, got {value}")));
    }
    Ok(Rgb::new(component("r")?, component("g")?, component("b")?))
}

// ── Scenes ───────────────────────────────────────────────────────────

/// Bridge recall action for a host-facing action name.
fn recall_action(action: &str) -> &str {
    match action.trim() {
        "" | "activate" => "active",
        "deactivate" => "inactive",
        "dynamic" => "dynamic_palette",
        other => other,
    }
}

pub(crate) fn scene_invoke(
    state: &ReconcileState,
    scene_id: &str,
    group_id: Option<&str>,
    action: &str,
) -> Result<WriteRequest, CoreError> {
    let scene = state
        .scene(scene_id)
        .ok_or_else(|| CoreError::SceneNotFound {
            identifier: scene_id.to_owned(),
        })?;

    let target = match group_id.map(str::trim).filter(|g| !g.is_empty()) {
        Some(group) => {
            let rtype = state.group_type(group).ok_or_else(|| {
                invalid(format!("unknown room or zone {group}"))
            })?;
            Some((group.to_owned(), rtype.as_ref().to_owned()))
        }
        None if !scene.scope_id.is_empty() => {
            let rtype = scene.target_rtype().map_or_else(
                || {
                    if scene.scope_type == "group" {
                        "zone".to_owned()
                    } else {
                        scene.scope_type.clone()
                    }
                },
                str::to_owned,
            );
            Some((scene.scope_id.clone(), rtype))
        }
        None => None,
    };

    let mut recall = json!({"action": recall_action(action)});
    if let Some((rid, rtype)) = target {
        recall["target"] = json!({"rid": rid, "rtype": rtype});
    }
    Ok(WriteRequest::new(
        ResourceType::Scene,
        scene_id,
        json!({"recall": recall}),
    ))
}

// ── Devices ──────────────────────────────────────────────────────────

/// Returns the request and the trimmed name to verify against.
pub(crate) fn device_rename(
    state: &ReconcileState,
    device_id: &str,
    name: &str,
) -> Result<(WriteRequest, String), CoreError> {
    if state.device(device_id).is_none() {
        return Err(CoreError::DeviceNotFound {
            identifier: device_id.to_owned(),
        });
    }
    let name = name.trim();
    if name.is_empty() {
        return Err(invalid("device name must not be empty"));
    }
    Ok((
        WriteRequest::new(
            ResourceType::Device,
            device_id,
            json!({"metadata": {"name": name}}),
        ),
        name.to_owned(),
    ))
}

pub(crate) fn device_effect(
    state: &ReconcileState,
    device_id: &str,
    effect_id: &str,
    duration: Option<std::time::Duration>,
) -> Result<WriteRequest, CoreError> {
    let device = state
        .device(device_id)
        .ok_or_else(|| CoreError::DeviceNotFound {
            identifier: device_id.to_owned(),
        })?;
    let light = state
        .light_for_device(device_id)
        .ok_or_else(|| CoreError::Unsupported {
            operation: format!("effects on {device_id}, which has no light"),
        })?;

    let descriptor = device.effects.iter().find(|e| e.id == effect_id);
    if descriptor.is_none() && effect_id != "no_effect" {
        return Err(invalid(format!("{device_id} does not support effect {effect_id}")));
    }
    let timed = duration.is_some()
        || descriptor.is_some_and(|e| e.category == EffectCategory::TimedEffects);

    let body = if timed {
        let mut timed_effect = json!({"effect": effect_id});
        if let Some(duration) = duration {
            timed_effect["duration"] = json!(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX));
        }
        json!({"timed_effects": timed_effect})
    } else {
        json!({"effects": {"effect": effect_id}})
    };
    Ok(WriteRequest::new(ResourceType::Light, light, body))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    use crate::lazy_fetch::MetadataFetchQueue;
    use crate::reconcile::Outbox;
    use crate::snapshot::{SNAPSHOT_ORDER, Snapshot};

    fn state() -> ReconcileState {
        let mut snap = Snapshot::default();
        for rt in SNAPSHOT_ORDER {
            snap.insert(rt, Vec::new());
        }
        snap.insert(
            ResourceType::Device,
            vec![
                json!({"id": "d1", "type": "device", "metadata": {"name": "Lamp"}}),
                json!({"id": "d2", "type": "device", "metadata": {"name": "Sensor"}}),
            ],
        );
        snap.insert(
            ResourceType::Light,
            vec![json!({
                "id": "l1", "type": "light", "owner": {"rid": "d1", "rtype": "device"},
                "on": {"on": true},
                "dimming": {"brightness": 50.0},
                "color_temperature": {"mirek": 300,
                    "mirek_schema": {"mirek_minimum": 153, "mirek_maximum": 453}},
                "color": {"xy": {"x": 0.3, "y": 0.3}, "gamut": {
                    "red": {"x": 0.675, "y": 0.322},
                    "green": {"x": 0.409, "y": 0.518},
                    "blue": {"x": 0.167, "y": 0.04}}},
                "effects": {"effect_values": ["no_effect", "candle"]},
                "timed_effects": {"effect_values": ["sunrise"]}
            })],
        );
        snap.insert(
            ResourceType::Motion,
            vec![json!({"id": "m1", "type": "motion",
                        "owner": {"rid": "d2", "rtype": "device"},
                        "motion": {"motion": false}})],
        );
        snap.insert(
            ResourceType::Room,
            vec![json!({"id": "r1", "type": "room", "metadata": {"name": "Office"},
                        "children": [{"rid": "d1", "rtype": "device"}]})],
        );
        snap.insert(
            ResourceType::Scene,
            vec![json!({"id": "s1", "type": "scene", "metadata": {"name": "Bright"},
                        "group": {"rid": "r1", "rtype": "room"}})],
        );
        let mut state = ReconcileState::default();
        let mut out = Outbox::default();
        state.build(&snap, &MetadataFetchQueue::new(4), Utc::now(), &mut out);
        state
    }

    #[test]
    fn on_requires_boolean() {
        let state = state();
        let (req, echo) = channel_write(&state, "d1", "on", &json!(false)).unwrap();
        assert_eq!(req.resource_type, ResourceType::Light);
        assert_eq!(req.resource_id, "l1");
        assert_eq!(req.body, json!({"on": {"on": false}}));
        assert_eq!(echo, ChannelValue::Bool(false));

        let err = channel_write(&state, "d1", "on", &json!("yes")).unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[test]
    fn brightness_clamps() {
        let state = state();
        let (req, echo) = channel_write(&state, "d1", "bri", &json!(140)).unwrap();
        assert_eq!(req.body, json!({"dimming": {"brightness": 100.0}}));
        assert_eq!(echo, ChannelValue::Float(100.0));
    }

    #[test]
    fn ct_clamps_to_protocol_range_not_device_range() {
        let state = state();
        let (req, _) = channel_write(&state, "d1", "ct", &json!(50)).unwrap();
        assert_eq!(req.body, json!({"color_temperature": {"mirek": 100}}));
        let (req, _) = channel_write(&state, "d1", "ct", &json!(999.6)).unwrap();
        assert_eq!(req.body, json!({"color_temperature": {"mirek": 1000}}));
    }

    #[test]
    fn preset_interpolates_device_range() {
        let state = state();
        let (req, echo) = channel_write(&state, "d1", "ctPreset", &json!(2)).unwrap();
        assert_eq!(req.body, json!({"color_temperature": {"mirek": 303}}));
        assert_eq!(echo, ChannelValue::Int(2));
        let (req, _) = channel_write(&state, "d1", "ctPreset", &json!(4)).unwrap();
        assert_eq!(req.body, json!({"color_temperature": {"mirek": 453}}));
        assert!(channel_write(&state, "d1", "ctPreset", &json!(5)).is_err());
    }

    #[test]
    fn red_is_clamped_into_gamut() {
        let state = state();
        let (req, echo) = channel_write(&state, "d1", "color", &json!("#ff0000")).unwrap();
        let x = req.body["color"]["xy"]["x"].as_f64().unwrap();
        let y = req.body["color"]["xy"]["y"].as_f64().unwrap();
        assert!((x - 0.675).abs() < 0.01, "x = {x}");
        assert!((y - 0.322).abs() < 0.01, "y = {y}");
        assert_eq!(echo, ChannelValue::Color(Rgb::new(255, 0, 0)));

        let err = channel_write(&state, "d1", "color", &json!({"r": 300, "g": 0, "b": 0}));
        assert!(matches!(err, Err(CoreError::Validation { .. })));
    }

    #[test]
    fn read_only_and_unknown_channels() {
        let state = state();
        assert!(matches!(
            channel_write(&state, "d2", "motion", &json!(true)),
            Err(CoreError::Unsupported { .. })
        ));
        assert!(matches!(
            channel_write(&state, "d1", "nope", &json!(true)),
            Err(CoreError::ChannelNotFound { .. })
        ));
        assert!(matches!(
            channel_write(&state, "ghost", "on", &json!(true)),
            Err(CoreError::DeviceNotFound { .. })
        ));
    }

    #[test]
    fn scene_recall_targets_scope() {
        let state = state();
        let req = scene_invoke(&state, "s1", None, "").unwrap();
        assert_eq!(req.resource_type, ResourceType::Scene);
        assert_eq!(
            req.body,
            json!({"recall": {"action": "active", "target": {"rid": "r1", "rtype": "room"}}})
        );
        let req = scene_invoke(&state, "s1", Some("r1"), "dynamic").unwrap();
        assert_eq!(req.body["recall"]["action"], "dynamic_palette");
        assert!(matches!(
            scene_invoke(&state, "s1", Some("zz"), "activate"),
            Err(CoreError::Validation { .. })
        ));
        assert!(matches!(
            scene_invoke(&state, "nope", None, ""),
            Err(CoreError::SceneNotFound { .. })
        ));
    }

    #[test]
    fn rename_trims_and_rejects_empty() {
        let state = state();
        let (req, name) = device_rename(&state, "d1", "  Desk lamp ").unwrap();
        assert_eq!(name, "Desk lamp");
        assert_eq!(req.body, json!({"metadata": {"name": "Desk lamp"}}));
        assert!(device_rename(&state, "d1", "   ").is_err());
    }

    #[test]
    fn effects_pick_plain_or_timed_form() {
        let state = state();
        let req = device_effect(&state, "d1", "candle", None).unwrap();
        assert_eq!(req.resource_id, "l1");
        assert_eq!(req.body, json!({"effects": {"effect": "candle"}}));

        let req = device_effect(
            &state,
            "d1",
            "sunrise",
            Some(std::time::Duration::from_secs(60)),
        )
        .unwrap();
        assert_eq!(
            req.body,
            json!({"timed_effects": {"effect": "sunrise", "duration": 60000}})
        );
        assert!(device_effect(&state, "d1", "disco", None).is_err());
    }
}
