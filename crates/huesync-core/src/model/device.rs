// ── Device domain types ──

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical device class.
///
/// Classes only move forward: `Unknown` upgrades to anything, `Light`
/// yields to a more specific class found later (a plug exposes a light
/// service), and every other class is final.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceClass {
    #[default]
    Unknown,
    Light,
    Sensor,
    Switch,
    Plug,
    Button,
    Gateway,
}

impl DeviceClass {
    /// Apply a candidate class under the monotonic upgrade rule.
    #[must_use]
    pub fn upgrade(self, candidate: Self) -> Self {
        match (self, candidate) {
            (current, Self::Unknown) => current,
            (Self::Unknown, next) => next,
            (Self::Light, next) => next,
            (current, _) => current,
        }
    }

    /// Class suggested by free text (archetype, product name). Keywords
    /// match whole words, so "laptop" is not a tap.
    pub fn from_hint(text: &str) -> Self {
        const KEYWORDS: [(DeviceClass, &[&str]); 6] = [
            (DeviceClass::Gateway, &["bridge", "gateway"]),
            (DeviceClass::Plug, &["plug"]),
            (DeviceClass::Switch, &["switch", "dimmer"]),
            (DeviceClass::Sensor, &["sensor", "motion"]),
            (DeviceClass::Button, &["button", "remote", "tap"]),
            (DeviceClass::Light, &["light", "lightstrip", "bulb", "lamp"]),
        ];

        let text = text.to_ascii_lowercase();
        let words: Vec<&str> = text
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        KEYWORDS
            .iter()
            .find(|(_, keywords)| words.iter().any(|w| keywords.contains(w)))
            .map_or(Self::Unknown, |(class, _)| *class)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceFlags {
    pub has_battery: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectCategory {
    Effects,
    TimedEffects,
}

/// A light effect the device can run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EffectDescriptor {
    pub id: String,
    pub label: String,
    pub description: String,
    pub category: EffectCategory,
}

impl EffectDescriptor {
    pub fn new(id: &str, category: EffectCategory) -> Self {
        let label = id
            .split(['_', '-'])
            .filter(|w| !w.is_empty())
            .map(|w| {
                let mut chars = w.chars();
                chars.next().map_or_else(String::new, |first| {
                    first.to_uppercase().chain(chars).collect::<String>()
                })
            })
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            id: id.to_owned(),
            description: format!("Hue effect {label}"),
            label,
            category,
        }
    }
}

/// A physical device behind the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// The bridge's device id.
    pub external_id: String,
    pub name: String,
    pub manufacturer: String,
    pub model: String,
    pub firmware: String,
    pub class: DeviceClass,
    pub flags: DeviceFlags,
    /// Raw device payload plus derived extras. `Null` until metadata
    /// has been fetched.
    pub meta: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub effects: Vec<EffectDescriptor>,
}

impl Device {
    /// A device referenced by a service before its metadata is known.
    pub fn placeholder(external_id: &str) -> Self {
        Self {
            external_id: external_id.to_owned(),
            name: String::new(),
            manufacturer: String::new(),
            model: String::new(),
            firmware: String::new(),
            class: DeviceClass::Unknown,
            flags: DeviceFlags::default(),
            meta: Value::Null,
            effects: Vec::new(),
        }
    }

    pub fn has_metadata(&self) -> bool {
        self.meta.is_object()
    }
}
