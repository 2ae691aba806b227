// ── Rooms, zones, and scenes ──

use serde_json::Value;

use huesync_api::{ResourceRef, ResourceType};

use crate::decode::resource_id;
use crate::model::{Group, Room, Scene, SceneState};

struct GroupParts {
    id: String,
    name: String,
    archetype: String,
    members: Vec<String>,
}

/// Resolve `children` and `services` to sorted device ids.
fn parse_parts(raw: &Value, resolve: &dyn Fn(&ResourceRef) -> Vec<String>) -> Option<GroupParts> {
    let id = resource_id(raw)?.to_owned();
    let metadata = raw.get("metadata");
    let field = |key: &str| {
        metadata
            .and_then(|m| m.get(key))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned()
    };

    let mut members: Vec<String> = ResourceRef::list_from_field(raw, "children")
        .into_iter()
        .chain(ResourceRef::list_from_field(raw, "services"))
        .flat_map(|r| resolve(&r))
        .collect();
    members.sort();
    members.dedup();

    Some(GroupParts {
        id,
        name: field("name"),
        archetype: field("archetype"),
        members,
    })
}

pub(crate) fn parse_room(raw: &Value, resolve: &dyn Fn(&ResourceRef) -> Vec<String>) -> Option<Room> {
    let parts = parse_parts(raw, resolve)?;
    Some(Room {
        external_id: parts.id,
        name: parts.name,
        archetype: parts.archetype,
        members: parts.members,
    })
}

pub(crate) fn parse_zone(raw: &Value, resolve: &dyn Fn(&ResourceRef) -> Vec<String>) -> Option<Group> {
    let parts = parse_parts(raw, resolve)?;
    Some(Group {
        external_id: parts.id,
        name: parts.name,
        archetype: parts.archetype,
        members: parts.members,
    })
}

/// A scene, or `None` when it has no id or no name.
pub(crate) fn parse_scene(raw: &Value) -> Option<Scene> {
    let id = resource_id(raw)?;
    let metadata = raw.get("metadata");
    let name = metadata
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())?;
    let description = metadata
        .and_then(|m| m.get("description"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let image = metadata
        .and_then(|m| ResourceRef::from_field(m, "image"))
        .map(|r| r.rid);
    let state = raw
        .get("status")
        .and_then(|s| s.get("active"))
        .and_then(Value::as_str)
        .map(SceneState::from_bridge)
        .unwrap_or_default();

    let (scope_type, scope_id) = match ResourceRef::from_field(raw, "group") {
        Some(group) => match group.resource_type() {
            Some(ResourceType::Room) => ("room", group.rid),
            Some(ResourceType::Zone) => ("group", group.rid),
            _ => ("", String::new()),
        },
        None => ("", String::new()),
    };

    let supports_dynamic_recall = ["status", "recall"].iter().any(|key| {
        raw.get(*key)
            .and_then(|v| v.get("action_values"))
            .and_then(Value::as_array)
            .is_some_and(|values| values.iter().any(|v| v == "dynamic_palette"))
    }) || raw.get("palette").is_some_and(palette_has_colors);

    Some(Scene {
        external_id: id.to_owned(),
        name: name.to_owned(),
        description: description.to_owned(),
        image,
        state,
        scope_type: scope_type.to_owned(),
        scope_id,
        supports_dynamic_recall,
        meta: raw.clone(),
    })
}

fn palette_has_colors(palette: &Value) -> bool {
    ["color", "color_temperature"].iter().any(|key| {
        palette
            .get(*key)
            .and_then(Value::as_array)
            .is_some_and(|list| !list.is_empty())
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn device_only(r: &ResourceRef) -> Vec<String> {
        if r.rtype == "device" {
            vec![r.rid.clone()]
        } else {
            Vec::new()
        }
    }

    #[test]
    fn room_members_sorted_and_deduplicated() {
        let raw = json!({
            "id": "r1",
            "metadata": {"name": "Kitchen", "archetype": "kitchen"},
            "children": [
                {"rid": "d2", "rtype": "device"},
                {"rid": "d1", "rtype": "device"},
                {"rid": "d2", "rtype": "device"}
            ],
            "services": [{"rid": "gl", "rtype": "grouped_light"}]
        });
        let room = parse_room(&raw, &device_only).unwrap();
        assert_eq!(room.name, "Kitchen");
        assert_eq!(room.archetype, "kitchen");
        assert_eq!(room.members, vec!["d1", "d2"]);
    }

    #[test]
    fn scene_scope_and_dynamic_support() {
        let raw = json!({
            "id": "s1",
            "metadata": {"name": "Relax", "image": {"rid": "img", "rtype": "public_image"}},
            "group": {"rid": "z1", "rtype": "zone"},
            "status": {"active": "dynamic_palette"},
            "palette": {"color": [{"color": {"xy": {"x": 0.3, "y": 0.3}}}]}
        });
        let scene = parse_scene(&raw).unwrap();
        assert_eq!(scene.scope_type, "group");
        assert_eq!(scene.scope_id, "z1");
        assert_eq!(scene.image.as_deref(), Some("img"));
        assert_eq!(scene.state, SceneState::ActiveDynamic);
        assert!(scene.supports_dynamic_recall);
        assert_eq!(scene.target_rtype(), Some("zone"));
    }

    #[test]
    fn nameless_scene_is_dropped() {
        assert!(parse_scene(&json!({"id": "s1", "metadata": {"name": "  "}})).is_none());
    }
}
