// ── Resource field decoding ──
//
// Readers for the bridge's resource shapes. Snapshot seeding and the
// stream handlers share these, so a value decoded from a full snapshot
// and the same value arriving as a delta compare equal.

use chrono::{DateTime, Utc};
use serde_json::Value;

use huesync_api::{ResourceRef, ResourceType};

use crate::color::{Xy, xy_to_rgb};
use crate::model::{ButtonEventCode, ChannelValue, ConnectivityStatus, SensitivityLevel};

// ── Identity ─────────────────────────────────────────────────────────

pub(crate) fn resource_id(resource: &Value) -> Option<&str> {
    resource
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

pub(crate) fn resource_type(resource: &Value) -> Option<ResourceType> {
    resource
        .get("type")
        .and_then(Value::as_str)
        .and_then(ResourceType::parse)
}

/// The owning device id, when the owner is a device.
pub(crate) fn owner_device(resource: &Value) -> Option<String> {
    ResourceRef::from_field(resource, "owner")
        .filter(|owner| owner.resource_type() == Some(ResourceType::Device))
        .map(|owner| owner.rid)
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    at(value, path)?.as_str()
}

fn at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, key| v.get(key))
}

pub(crate) fn parse_time(raw: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw?)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Recursively merge `patch` into `target`; non-object values replace.
pub(crate) fn merge_patch(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                if let Some(existing) = target.get_mut(key) {
                    if existing.is_object() && value.is_object() {
                        merge_patch(existing, value);
                        continue;
                    }
                }
                target.insert(key.clone(), value.clone());
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

// ── Lights ───────────────────────────────────────────────────────────

/// Every light channel value present in a light payload or delta.
pub(crate) fn light_readings(light: &Value) -> Vec<(&'static str, ChannelValue)> {
    let mut readings = Vec::new();
    if let Some(on) = at(light, &["on", "on"]).and_then(Value::as_bool) {
        readings.push(("on", ChannelValue::Bool(on)));
    }
    if let Some(bri) = at(light, &["dimming", "brightness"]).and_then(Value::as_f64) {
        readings.push(("bri", ChannelValue::Float(bri)));
    }
    if let Some(mirek) = at(light, &["color_temperature", "mirek"]).and_then(Value::as_i64) {
        readings.push(("ct", ChannelValue::Int(mirek)));
    }
    if let Some(xy) = at(light, &["color", "xy"]).and_then(Xy::from_value) {
        readings.push(("color", ChannelValue::Color(xy_to_rgb(xy))));
    }
    readings
}

// ── Sensors ──────────────────────────────────────────────────────────

pub(crate) fn motion_reading(resource: &Value) -> Option<(bool, Option<DateTime<Utc>>)> {
    let motion = resource.get("motion")?;
    let report = motion.get("motion_report");
    let detected = report
        .and_then(|r| r.get("motion"))
        .or_else(|| motion.get("motion"))
        .and_then(Value::as_bool)?;
    let at = parse_time(report.and_then(|r| r.get("changed")).and_then(Value::as_str));
    Some((detected, at))
}

pub(crate) fn sensitivity_reading(resource: &Value) -> Option<SensitivityLevel> {
    at(resource, &["sensitivity", "sensitivity"])
        .and_then(Value::as_i64)
        .map(SensitivityLevel::from_bridge)
}

/// Latest tamper report; `true` while tampered.
pub(crate) fn tamper_reading(resource: &Value) -> Option<(bool, Option<DateTime<Utc>>)> {
    let reports = resource.get("tamper_reports")?.as_array()?;
    let latest = reports.iter().max_by_key(|r| {
        parse_time(r.get("changed").and_then(Value::as_str)).unwrap_or(DateTime::<Utc>::MIN_UTC)
    })?;
    let state = latest.get("state")?.as_str()?;
    let at = parse_time(latest.get("changed").and_then(Value::as_str));
    Some((state == "tampered", at))
}

/// Degrees Celsius. Values above 200 in magnitude are centi-degrees.
pub(crate) fn temperature_reading(resource: &Value) -> Option<(f64, Option<DateTime<Utc>>)> {
    let temperature = resource.get("temperature")?;
    let report = temperature.get("temperature_report");
    let raw = report
        .and_then(|r| r.get("temperature"))
        .or_else(|| temperature.get("temperature"))
        .and_then(Value::as_f64)?;
    let celsius = if raw.abs() > 200.0 { raw / 100.0 } else { raw };
    let at = parse_time(report.and_then(|r| r.get("changed")).and_then(Value::as_str));
    Some((celsius, at))
}

/// Lux, taken directly when reported, otherwise derived from the raw
/// logarithmic light level.
pub(crate) fn illuminance_reading(resource: &Value) -> Option<(i64, Option<DateTime<Utc>>)> {
    let light = resource.get("light")?;
    let report = light.get("light_level_report");
    let at = parse_time(report.and_then(|r| r.get("changed")).and_then(Value::as_str));

    let lux = report
        .and_then(|r| r.get("lux"))
        .or_else(|| light.get("lux"))
        .and_then(Value::as_f64);
    let lux = match lux {
        Some(lux) => lux,
        None => {
            let level = report
                .and_then(|r| r.get("light_level"))
                .or_else(|| light.get("light_level"))
                .and_then(Value::as_f64)?;
            10f64.powf((level - 1.0) / 10_000.0)
        }
    };
    Some((round_to_i64(lux), at))
}

pub(crate) fn battery_reading(resource: &Value) -> Option<i64> {
    at(resource, &["power_state", "battery_level"])
        .and_then(Value::as_i64)
        .filter(|level| (0..=100).contains(level))
}

// ── Status ───────────────────────────────────────────────────────────

pub(crate) fn connectivity_reading(resource: &Value) -> Option<ConnectivityStatus> {
    resource
        .get("status")
        .and_then(Value::as_str)
        .map(ConnectivityStatus::from_bridge)
}

/// Structured software-update payload for the channel and metadata.
pub(crate) fn software_update_payload(resource: &Value, current_version: &str) -> Option<Value> {
    let raw = resource.get("state").and_then(Value::as_str)?;
    let status = crate::model::SoftwareUpdateStatus::from_bridge(raw);
    let message = resource
        .get("problems")
        .and_then(Value::as_array)
        .map(|problems| {
            problems
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();

    let mut payload = serde_json::json!({
        "status": status.to_string(),
        "statusRaw": raw,
    });
    if !current_version.is_empty() {
        payload["currentVersion"] = Value::String(current_version.to_owned());
    }
    if !message.is_empty() {
        payload["message"] = Value::String(message);
    }
    Some(payload)
}

// ── Buttons ──────────────────────────────────────────────────────────

pub(crate) fn button_reading(
    resource: &Value,
) -> Option<(ButtonEventCode, Option<DateTime<Utc>>)> {
    let button = resource.get("button")?;
    if let Some(report) = button.get("button_report") {
        let code = report
            .get("event")
            .and_then(Value::as_str)
            .and_then(ButtonEventCode::from_bridge)?;
        let at = parse_time(report.get("updated").and_then(Value::as_str));
        return Some((code, at));
    }
    let code = button
        .get("last_event")
        .and_then(Value::as_str)
        .and_then(ButtonEventCode::from_bridge)?;
    Some((code, None))
}

/// `metadata.control_id`, at least 1.
pub(crate) fn control_id(resource: &Value) -> i64 {
    at(resource, &["metadata", "control_id"])
        .and_then(Value::as_i64)
        .filter(|id| *id > 0)
        .unwrap_or(1)
}

pub(crate) fn rotary_time(resource: &Value) -> Option<DateTime<Utc>> {
    parse_time(str_at(
        resource,
        &["relative_rotary", "rotary_report", "updated"],
    ))
}

#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn round_to_i64(v: f64) -> i64 {
    v.round() as i64
}
