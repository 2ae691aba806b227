// ── CLIP v2 wire models ──
//
// Resources are kept as raw `serde_json::Value` objects: the bridge adds
// fields between firmware releases and the core derives everything from
// shape. Only the envelope, relationship refs, and event frames are typed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::Error;

// ── ResourceType ─────────────────────────────────────────────────────

/// Resource types the synchronization engine consumes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
    IntoStaticStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResourceType {
    Device,
    Light,
    Motion,
    Tamper,
    Temperature,
    LightLevel,
    DevicePower,
    Button,
    ZigbeeConnectivity,
    ZigbeeDeviceDiscovery,
    DeviceSoftwareUpdate,
    RelativeRotary,
    Room,
    Zone,
    Scene,
}

impl ResourceType {
    /// Core types abort a snapshot cycle when unobtainable.
    pub fn is_core(self) -> bool {
        matches!(
            self,
            Self::Device | Self::Light | Self::Room | Self::Zone | Self::Scene
        )
    }

    /// Resources attached to an owner device.
    pub fn is_service(self) -> bool {
        !matches!(self, Self::Device | Self::Room | Self::Zone | Self::Scene)
    }

    /// Parse a bridge `type`/`rtype` string, ignoring types we don't consume.
    pub fn parse(raw: &str) -> Option<Self> {
        raw.parse().ok()
    }
}

// ── Relationships ────────────────────────────────────────────────────

/// A typed reference to another resource (`{"rid": ..., "rtype": ...}`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub rid: String,
    pub rtype: String,
}

impl ResourceRef {
    pub fn resource_type(&self) -> Option<ResourceType> {
        ResourceType::parse(&self.rtype)
    }

    /// Extract a reference stored under `key` (e.g. `owner`, `group`).
    pub fn from_field(resource: &Value, key: &str) -> Option<Self> {
        let raw = resource.get(key)?;
        let rid = raw.get("rid")?.as_str()?;
        if rid.is_empty() {
            return None;
        }
        Some(Self {
            rid: rid.to_owned(),
            rtype: raw.get("rtype").and_then(Value::as_str).unwrap_or("").to_owned(),
        })
    }

    /// Extract every reference in an array field (e.g. `services`, `children`).
    pub fn list_from_field(resource: &Value, key: &str) -> Vec<Self> {
        resource
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| serde_json::from_value::<Self>(item.clone()).ok())
                    .filter(|r| !r.rid.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ── Envelope ─────────────────────────────────────────────────────────

/// Every CLIP v2 response is `{ "errors": [...], "data": [...] }`.
#[derive(Debug, Deserialize)]
pub(crate) struct ClipResponse<T> {
    #[serde(default)]
    pub errors: Vec<ClipErrorEntry>,
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ClipErrorEntry {
    #[serde(default)]
    pub description: String,
}

impl<T> ClipResponse<T> {
    pub(crate) fn error_text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .errors
            .iter()
            .map(|e| e.description.trim())
            .filter(|d| !d.is_empty())
            .collect();
        (!parts.is_empty()).then(|| parts.join("; "))
    }
}

// ── Event frames ─────────────────────────────────────────────────────

/// Kind of change an event frame describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Update,
    Add,
    Delete,
    Error,
    #[serde(other)]
    Unknown,
}

/// One event object from the stream; `data` holds the resource deltas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub creationtime: Option<String>,
    #[serde(default)]
    pub data: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EventPayload {
    Batch(Vec<BridgeEvent>),
    Single(BridgeEvent),
}

/// Decode one `data:` payload: a batch array or a single event object.
pub fn parse_event_payload(payload: &str) -> Result<Vec<BridgeEvent>, Error> {
    match serde_json::from_str::<EventPayload>(payload) {
        Ok(EventPayload::Batch(events)) => Ok(events),
        Ok(EventPayload::Single(event)) => Ok(vec![event]),
        Err(e) => Err(Error::Deserialization {
            message: e.to_string(),
            body: payload.to_owned(),
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn resource_type_uses_bridge_names() {
        assert_eq!(ResourceType::LightLevel.as_ref(), "light_level");
        assert_eq!(
            ResourceType::parse("device_software_update"),
            Some(ResourceType::DeviceSoftwareUpdate)
        );
        assert_eq!(ResourceType::parse("grouped_light"), None);
    }

    #[test]
    fn core_and_secondary_split() {
        assert!(ResourceType::Scene.is_core());
        assert!(ResourceType::Light.is_core());
        assert!(!ResourceType::Button.is_core());
        assert!(!ResourceType::ZigbeeConnectivity.is_core());
    }

    #[test]
    fn owner_ref_extraction() {
        let light = json!({"id": "l1", "owner": {"rid": "d1", "rtype": "device"}});
        let owner = ResourceRef::from_field(&light, "owner").unwrap();
        assert_eq!(owner.rid, "d1");
        assert_eq!(owner.resource_type(), Some(ResourceType::Device));
        assert!(ResourceRef::from_field(&light, "group").is_none());
    }

    #[test]
    fn service_list_skips_malformed_entries() {
        let device = json!({"services": [
            {"rid": "l1", "rtype": "light"},
            {"rtype": "button"},
            {"rid": "", "rtype": "motion"},
            {"rid": "b1", "rtype": "button"}
        ]});
        let refs = ResourceRef::list_from_field(&device, "services");
        let ids: Vec<&str> = refs.iter().map(|r| r.rid.as_str()).collect();
        assert_eq!(ids, vec!["l1", "b1"]);
    }

    #[test]
    fn batch_payload() {
        let payload = json!([
            {"type": "update", "id": "e1", "creationtime": "2024-05-01T10:00:00Z",
             "data": [{"id": "l1", "type": "light", "on": {"on": true}}]},
            {"type": "delete", "data": [{"id": "d1", "type": "device"}]}
        ]);
        let events = parse_event_payload(&payload.to_string()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::Update);
        assert!(events[0].creationtime.is_some());
        assert_eq!(events[1].kind, EventKind::Delete);
    }

    #[test]
    fn single_object_payload() {
        let payload = r#"{"type":"update","data":[{"id":"x","type":"motion"}]}"#;
        let events = parse_event_payload(payload).unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn unknown_event_kind_is_tolerated() {
        let payload = r#"{"type":"heartbeat","data":[]}"#;
        let events = parse_event_payload(payload).unwrap();
        assert_eq!(events[0].kind, EventKind::Unknown);
    }

    #[test]
    fn malformed_payload_is_rejected() {
        let err = parse_event_payload("{not json").unwrap_err();
        assert!(matches!(err, Error::Deserialization { .. }));
    }
}
