// ── Event stream ingestion ──
//
// Routes each resource delta of a decoded frame to its per-type handler,
// in arrival order. Handlers update cached state through
// `ReconcileState` and request follow-up work (timers, lazy metadata,
// resync) through the `Outbox`; none of them block on I/O.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, trace};

use huesync_api::{BridgeEvent, EventKind, ResourceType};

use crate::button::{ButtonDebouncer, PressAggregate};
use crate::config::SyncTuning;
use crate::decode::{self, owner_device, resource_id, resource_type};
use crate::engine::TimerToken;
use crate::model::{ButtonEventCode, ChannelKey, ChannelValue};
use crate::reconcile::{Outbox, ReconcileState, light_effects};
use crate::rotary::{DIAL_CHANNEL, rotation_steps};

#[derive(Debug)]
pub(crate) struct Ingestor {
    buttons: ButtonDebouncer,
    dial_reset: Duration,
}

impl Ingestor {
    pub(crate) fn new(tuning: &SyncTuning) -> Self {
        Self {
            buttons: ButtonDebouncer::new(tuning.press_window, tuning.press_reset_gap),
            dial_reset: tuning.dial_reset,
        }
    }

    /// Apply one frame's events in order.
    pub(crate) fn ingest(
        &mut self,
        state: &mut ReconcileState,
        events: &[BridgeEvent],
        now: DateTime<Utc>,
        out: &mut Outbox,
    ) {
        for event in events {
            match event.kind {
                EventKind::Update => {
                    for delta in &event.data {
                        self.apply_update(state, delta, now, out);
                    }
                }
                EventKind::Delete => {
                    for delta in &event.data {
                        apply_delete(state, delta, out);
                    }
                }
                EventKind::Add => {
                    debug!(resources = event.data.len(), "resources added");
                    out.resync = true;
                }
                EventKind::Error | EventKind::Unknown => {
                    debug!(kind = ?event.kind, "ignoring stream event");
                }
            }
        }
    }

    /// The press window for `key` closed.
    pub(crate) fn on_button_window(
        &mut self,
        state: &mut ReconcileState,
        key: &ChannelKey,
        out: &mut Outbox,
    ) {
        if let Some(aggregate) = self.buttons.on_window_elapsed(key) {
            emit_aggregate(state, aggregate, out);
        }
    }

    /// The dial on `device_id` has been still long enough.
    pub(crate) fn on_dial_reset(
        &mut self,
        state: &mut ReconcileState,
        device_id: &str,
        now: DateTime<Utc>,
        out: &mut Outbox,
    ) {
        let key = ChannelKey::new(device_id, DIAL_CHANNEL);
        state.report_event(&key, ChannelValue::Int(0), now, out);
    }

    pub(crate) fn forget_device(&mut self, device_id: &str) {
        self.buttons.forget_device(device_id);
    }

    // ── Updates ──────────────────────────────────────────────────────

    fn apply_update(
        &mut self,
        state: &mut ReconcileState,
        delta: &Value,
        now: DateTime<Utc>,
        out: &mut Outbox,
    ) {
        let (Some(rt), Some(id)) = (resource_type(delta), resource_id(delta)) else {
            trace!("skipping delta of unhandled type");
            return;
        };

        match rt {
            ResourceType::Device => {
                state.apply_device_delta(id, delta, out);
                out.resync = true;
                return;
            }
            ResourceType::Room | ResourceType::Zone => {
                let topology = delta.get("children").is_some() || delta.get("services").is_some();
                if topology || !state.apply_group_delta(rt, id, delta, out) {
                    out.resync = true;
                }
                return;
            }
            ResourceType::Scene => {
                state.apply_scene_delta(id, delta, out);
                return;
            }
            _ => {}
        }

        let Some(owner) =
            owner_device(delta).or_else(|| state.owner(id).map(|o| o.device_id.clone()))
        else {
            debug!(resource_type = %rt, resource_id = id, "delta without owner");
            return;
        };
        if state.is_bootstrapped() && !state.has_device_metadata(&owner) {
            out.request_metadata(&owner);
        }

        match rt {
            ResourceType::Light => {
                for (channel, value) in decode::light_readings(delta) {
                    state.report_value(&owner, channel, value, now, out);
                }
                if let Some(effects) = light_effects(delta) {
                    state.set_effects(&owner, effects, out);
                }
            }
            ResourceType::Motion => {
                if let Some((detected, at)) = decode::motion_reading(delta) {
                    let at = at.unwrap_or(now);
                    state.report_value(&owner, "motion", ChannelValue::Bool(detected), at, out);
                }
                if let Some(level) = decode::sensitivity_reading(delta) {
                    let value = ChannelValue::Int(level.code());
                    state.report_value(&owner, "motion_sensitivity", value, now, out);
                }
            }
            ResourceType::Tamper => {
                if let Some((tampered, at)) = decode::tamper_reading(delta) {
                    let value = ChannelValue::Bool(tampered);
                    state.report_value(&owner, "tamper", value, at.unwrap_or(now), out);
                }
            }
            ResourceType::Temperature => {
                if let Some((celsius, at)) = decode::temperature_reading(delta) {
                    let value = ChannelValue::Float(celsius);
                    state.report_value(&owner, "temperature", value, at.unwrap_or(now), out);
                }
            }
            ResourceType::LightLevel => {
                if let Some((lux, at)) = decode::illuminance_reading(delta) {
                    let value = ChannelValue::Int(lux);
                    state.report_value(&owner, "illuminance", value, at.unwrap_or(now), out);
                }
            }
            ResourceType::DevicePower => {
                if let Some(level) = decode::battery_reading(delta) {
                    state.report_value(&owner, "battery", ChannelValue::Int(level), now, out);
                }
            }
            ResourceType::ZigbeeConnectivity => {
                state.mirror_device_meta(&owner, "zigbeeConnectivity", delta, out);
                if let Some(status) = decode::connectivity_reading(delta) {
                    let value = ChannelValue::Int(status.code());
                    state.report_value(&owner, "zigbee_status", value, now, out);
                }
            }
            ResourceType::DeviceSoftwareUpdate => {
                let firmware = state
                    .device(&owner)
                    .map(|d| d.firmware.clone())
                    .unwrap_or_default();
                if let Some(payload) = decode::software_update_payload(delta, &firmware) {
                    state.mirror_device_meta(&owner, "softwareUpdate", &payload, out);
                    let value = ChannelValue::Json(payload);
                    state.report_value(&owner, "device_software_update", value, now, out);
                }
            }
            ResourceType::ZigbeeDeviceDiscovery => {
                state.mirror_device_meta(&owner, "zigbeeDeviceDiscovery", delta, out);
            }
            ResourceType::Button => self.apply_button(state, id, &owner, delta, now, out),
            ResourceType::RelativeRotary => {
                if let Some(steps) = rotation_steps(delta) {
                    let key = ChannelKey::new(owner.as_str(), DIAL_CHANNEL);
                    let at = decode::rotary_time(delta).unwrap_or(now);
                    state.report_event(&key, ChannelValue::Int(steps), at, out);
                    out.timers
                        .push((TimerToken::DialReset(owner.clone()), self.dial_reset));
                }
            }
            ResourceType::Device | ResourceType::Room | ResourceType::Zone | ResourceType::Scene => {}
        }
    }

    fn apply_button(
        &mut self,
        state: &mut ReconcileState,
        rid: &str,
        owner: &str,
        delta: &Value,
        now: DateTime<Utc>,
        out: &mut Outbox,
    ) {
        let Some((code, at)) = decode::button_reading(delta) else {
            return;
        };
        let Some(channel_id) = state.button_channel(rid).map(str::to_owned) else {
            if state.is_announced(owner) {
                out.resync = true;
            }
            return;
        };
        let key = ChannelKey::new(owner, channel_id);
        let at = at.unwrap_or(now);

        state.report_event(&key, ChannelValue::Int(code.code()), at, out);

        let flushed = match code {
            ButtonEventCode::InitialPress => self.buttons.on_initial_press(&key, at),
            ButtonEventCode::ShortPressRelease => {
                let flushed = self.buttons.on_short_release(&key, at);
                out.timers
                    .push((TimerToken::ButtonWindow(key.clone()), self.buttons.window()));
                flushed
            }
            _ => None,
        };
        if let Some(aggregate) = flushed {
            emit_aggregate(state, aggregate, out);
        }
    }
}

fn apply_delete(state: &mut ReconcileState, delta: &Value, out: &mut Outbox) {
    let (Some(rt), Some(id)) = (resource_type(delta), resource_id(delta)) else {
        return;
    };
    if rt == ResourceType::Device {
        debug!(device_id = id, "device deleted");
        state.remove_device(id, out);
    }
    out.resync = true;
}

fn emit_aggregate(state: &mut ReconcileState, aggregate: PressAggregate, out: &mut Outbox) {
    debug!(channel = %aggregate.key, code = %aggregate.code, "multi-press");
    let value = ChannelValue::Int(aggregate.code.code());
    state.report_event(&aggregate.key, value, aggregate.timestamp, out);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use crate::lazy_fetch::MetadataFetchQueue;
    use crate::sink::SinkEvent;
    use crate::snapshot::{SNAPSHOT_ORDER, Snapshot};

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    /// A committed state with a lamp (`d1`/`l1`), a one-button switch
    /// (`d2`/`b1`), and a dial (`d3`/`r1`).
    fn bootstrapped() -> ReconcileState {
        let mut snap = Snapshot::default();
        for rt in SNAPSHOT_ORDER {
            snap.insert(rt, Vec::new());
        }
        snap.insert(
            ResourceType::Device,
            vec![
                json!({"id": "d1", "type": "device", "metadata": {"name": "Lamp"}}),
                json!({"id": "d2", "type": "device", "metadata": {"name": "Switch"}}),
                json!({"id": "d3", "type": "device", "metadata": {"name": "Tap dial"},
                       "services": [{"rid": "r1", "rtype": "relative_rotary"}]}),
            ],
        );
        snap.insert(
            ResourceType::Light,
            vec![json!({"id": "l1", "type": "light", "owner": {"rid": "d1", "rtype": "device"},
                        "on": {"on": false}, "dimming": {"brightness": 10.0}})],
        );
        snap.insert(
            ResourceType::Button,
            vec![json!({"id": "b1", "type": "button", "owner": {"rid": "d2", "rtype": "device"},
                        "metadata": {"control_id": 1}, "button": {}})],
        );
        let mut state = ReconcileState::default();
        let mut out = Outbox::default();
        state.build(&snap, &MetadataFetchQueue::new(4), t0(), &mut out);
        state
    }

    fn update(data: Value) -> BridgeEvent {
        serde_json::from_value(json!({"type": "update", "id": "e", "data": [data]})).unwrap()
    }

    fn release(at: DateTime<Utc>) -> BridgeEvent {
        update(json!({
            "id": "b1", "type": "button",
            "owner": {"rid": "d2", "rtype": "device"},
            "button": {"button_report": {"event": "short_release",
                                          "updated": at.to_rfc3339()}}
        }))
    }

    fn button_codes(events: &[SinkEvent]) -> Vec<i64> {
        events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::ChannelValue {
                    channel_id,
                    value: ChannelValue::Int(code),
                    ..
                } if channel_id == "button" => Some(*code),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn light_delta_reports_values() {
        let mut state = bootstrapped();
        let mut ingestor = Ingestor::new(&SyncTuning::default());
        let mut out = Outbox::default();
        let frame = [update(json!({
            "id": "l1", "type": "light",
            "owner": {"rid": "d1", "rtype": "device"},
            "on": {"on": true}, "dimming": {"brightness": 80.0}
        }))];
        ingestor.ingest(&mut state, &frame, t0(), &mut out);

        let values: Vec<_> = out
            .events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::ChannelValue {
                    channel_id, value, ..
                } => Some((channel_id.as_str(), value.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(
            values,
            vec![
                ("on", ChannelValue::Bool(true)),
                ("bri", ChannelValue::Float(80.0))
            ]
        );
        assert!(!out.resync);
    }

    #[test]
    fn four_quick_releases_yield_quadruple_press() {
        let mut state = bootstrapped();
        let mut ingestor = Ingestor::new(&SyncTuning::default());
        let mut out = Outbox::default();
        for i in 0..4 {
            let at = t0() + TimeDelta::milliseconds(300 * i);
            ingestor.ingest(&mut state, &[release(at)], at, &mut out);
        }
        assert_eq!(button_codes(&out.events), vec![3, 3, 3, 3]);
        assert_eq!(out.timers.len(), 4);
        assert_eq!(
            out.timers[3],
            (
                TimerToken::ButtonWindow(ChannelKey::new("d2", "button")),
                Duration::from_millis(1200)
            )
        );

        let mut window = Outbox::default();
        ingestor.on_button_window(&mut state, &ChannelKey::new("d2", "button"), &mut window);
        assert_eq!(
            button_codes(&window.events),
            vec![ButtonEventCode::QuadruplePress.code()]
        );
    }

    #[test]
    fn dial_pulse_arms_reset() {
        let mut state = bootstrapped();
        let mut ingestor = Ingestor::new(&SyncTuning::default());
        let mut out = Outbox::default();
        let frame = [update(json!({
            "id": "r1", "type": "relative_rotary",
            "owner": {"rid": "d3", "rtype": "device"},
            "relative_rotary": {"rotary_report": {
                "rotation": {"direction": "counter_clock_wise", "steps": 30}
            }}
        }))];
        ingestor.ingest(&mut state, &frame, t0(), &mut out);
        assert_eq!(
            out.events,
            vec![SinkEvent::ChannelValue {
                device_id: "d3".into(),
                channel_id: "dial".into(),
                value: ChannelValue::Int(-30),
                timestamp: t0(),
            }]
        );
        assert_eq!(
            out.timers,
            vec![(TimerToken::DialReset("d3".into()), Duration::from_millis(200))]
        );

        let mut reset = Outbox::default();
        ingestor.on_dial_reset(&mut state, "d3", t0(), &mut reset);
        assert!(matches!(
            reset.events.as_slice(),
            [SinkEvent::ChannelValue { value: ChannelValue::Int(0), .. }]
        ));
    }

    #[test]
    fn device_delete_removes_and_requests_resync() {
        let mut state = bootstrapped();
        let mut ingestor = Ingestor::new(&SyncTuning::default());
        let mut out = Outbox::default();
        let frame: BridgeEvent = serde_json::from_value(json!({
            "type": "delete", "id": "e",
            "data": [{"id": "d1", "type": "device"}]
        }))
        .unwrap();
        ingestor.ingest(&mut state, &[frame], t0(), &mut out);
        assert_eq!(
            out.events,
            vec![SinkEvent::DeviceRemove {
                device_id: "d1".into()
            }]
        );
        assert!(out.resync);
        assert_eq!(out.removed_devices, vec!["d1"]);
    }

    #[test]
    fn room_membership_change_is_topology() {
        let mut state = bootstrapped();
        let mut ingestor = Ingestor::new(&SyncTuning::default());
        let mut out = Outbox::default();
        let frame = [update(json!({
            "id": "room1", "type": "room",
            "children": [{"rid": "d1", "rtype": "device"}]
        }))];
        ingestor.ingest(&mut state, &frame, t0(), &mut out);
        assert!(out.resync);
        assert_eq!(out.events, vec![]);
    }

    #[test]
    fn unannounced_owner_triggers_metadata_request() {
        let mut state = bootstrapped();
        let mut ingestor = Ingestor::new(&SyncTuning::default());
        let mut out = Outbox::default();
        let frame = [update(json!({
            "id": "m9", "type": "motion",
            "owner": {"rid": "new-device", "rtype": "device"},
            "motion": {"motion": true}
        }))];
        ingestor.ingest(&mut state, &frame, t0(), &mut out);
        assert_eq!(out.metadata_requests, vec!["new-device"]);
        assert_eq!(out.events, vec![]);
    }
}
