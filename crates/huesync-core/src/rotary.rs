// ── Rotation pulses ──
//
// Dial rotations are reported as a signed step count followed by a
// reset to zero once the dial has been still for a moment. The engine
// arms a single-flight `DialReset` timer per device; re-arming replaces
// the pending reset.

use serde_json::Value;

/// Channel id of the dial on every device with a rotary service.
pub const DIAL_CHANNEL: &str = "dial";

/// Signed steps from a `relative_rotary` delta; clockwise is positive.
///
/// Newer firmware reports `rotary_report.rotation`, older firmware
/// `last_event.rotation`.
pub fn rotation_steps(resource: &Value) -> Option<i64> {
    let rotary = resource.get("relative_rotary")?;
    let rotation = rotary
        .get("rotary_report")
        .and_then(|r| r.get("rotation"))
        .or_else(|| rotary.get("last_event").and_then(|e| e.get("rotation")))?;

    let steps = rotation.get("steps")?.as_i64()?;
    match rotation.get("direction").and_then(Value::as_str) {
        Some("counter_clock_wise") => Some(-steps),
        Some("clock_wise") => Some(steps),
        _ => None,
    }
}
