// ── Rooms, groups, scenes, and write bindings ──

use serde::{Deserialize, Serialize};
use serde_json::Value;

use huesync_api::ResourceType;

/// A room: a set of member devices with an archetype label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub external_id: String,
    pub name: String,
    pub archetype: String,
    /// Sorted, deduplicated device external ids.
    pub members: Vec<String>,
}

/// A zone. Membership may include every device of a referenced room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub external_id: String,
    pub name: String,
    pub archetype: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SceneState {
    #[default]
    Inactive,
    ActiveStatic,
    ActiveDynamic,
}

impl SceneState {
    pub fn from_bridge(raw: &str) -> Self {
        match raw {
            "dynamic" | "dynamic_palette" => Self::ActiveDynamic,
            "static" | "active" => Self::ActiveStatic,
            _ => Self::Inactive,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub external_id: String,
    pub name: String,
    pub description: String,
    pub image: Option<String>,
    pub state: SceneState,
    /// `room` or `group`, empty when the scene has no scope.
    pub scope_type: String,
    pub scope_id: String,
    pub supports_dynamic_recall: bool,
    /// Raw scene payload.
    pub meta: Value,
}

impl Scene {
    /// Bridge resource type of the scene's target group.
    pub fn target_rtype(&self) -> Option<&str> {
        self.meta
            .get("group")
            .and_then(|g| g.get("rtype"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// The bridge resource that receives writes for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceBinding {
    pub resource_type: ResourceType,
    pub resource_id: String,
}

impl ResourceBinding {
    pub fn new(resource_type: ResourceType, resource_id: impl Into<String>) -> Self {
        Self {
            resource_type,
            resource_id: resource_id.into(),
        }
    }
}
