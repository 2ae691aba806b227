// ── Channel domain types ──

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumIter, IntoEnumIterator};

use crate::color::Rgb;

/// What a channel represents. Declaration order is the order channels
/// are listed on a device.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
pub enum ChannelKind {
    PowerOnOff,
    Brightness,
    ColorTemperature,
    ColorTemperaturePreset,
    ColorRgb,
    Motion,
    Tamper,
    Temperature,
    Illuminance,
    Battery,
    MotionSensitivity,
    ButtonEvent,
    RelativeRotation,
    ConnectivityStatus,
    DeviceSoftwareUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    Int,
    Float,
    Enum,
    Color,
    /// Structured payload (software-update details).
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct ChannelFlags {
    pub read: bool,
    pub write: bool,
    pub report: bool,
    pub retained: bool,
}

/// One entry of an enumerated channel's choice list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelChoice {
    pub value: i64,
    pub label: String,
}

/// A value reported on (or written to) a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Color(Rgb),
    Json(Value),
}

impl fmt::Display for ChannelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Color(c) => write!(f, "#{:02x}{:02x}{:02x}", c.r, c.g, c.b),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

/// A canonical read/write point on a device.
///
/// The channel set of a device is derived from bridge resource shapes
/// and recomputed on every reconciliation; equality ignores
/// `last_value` so a new reading never counts as a shape change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub kind: ChannelKind,
    pub data_type: DataType,
    pub flags: ChannelFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<ChannelChoice>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub meta: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_value: Option<ChannelValue>,
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.name == other.name
            && self.kind == other.kind
            && self.data_type == other.data_type
            && self.flags == other.flags
            && self.min == other.min
            && self.max == other.max
            && self.step == other.step
            && self.unit == other.unit
            && self.choices == other.choices
            && self.meta == other.meta
    }
}

impl Channel {
    /// A read-only, reportable channel.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: ChannelKind,
        data_type: DataType,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            data_type,
            flags: ChannelFlags {
                read: true,
                write: false,
                report: true,
                retained: false,
            },
            min: None,
            max: None,
            step: None,
            unit: None,
            choices: Vec::new(),
            meta: Value::Null,
            last_value: None,
        }
    }

    pub fn writable(mut self) -> Self {
        self.flags.write = true;
        self
    }

    pub fn retained(mut self) -> Self {
        self.flags.retained = true;
        self
    }

    pub fn range(mut self, min: f64, max: f64, step: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self.step = Some(step);
        self
    }

    pub fn unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_owned());
        self
    }

    pub fn choices(mut self, choices: Vec<ChannelChoice>) -> Self {
        self.choices = choices;
        self
    }

    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }
}

/// `(device external id, channel id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelKey {
    pub device_id: String,
    pub channel_id: String,
}

impl ChannelKey {
    pub fn new(device_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            channel_id: channel_id.into(),
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.device_id, self.channel_id)
    }
}

// ── Enumerated channel values ────────────────────────────────────────

/// Codes reported on `ButtonEvent` channels.
///
/// `Double`..`Quintuple` are synthesized by the multi-press debouncer;
/// the rest mirror the bridge's raw button events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
pub enum ButtonEventCode {
    None,
    InitialPress,
    Repeat,
    ShortPressRelease,
    LongPress,
    LongPressRelease,
    DoublePress,
    TriplePress,
    QuadruplePress,
    QuintuplePress,
}

impl ButtonEventCode {
    pub fn code(self) -> i64 {
        match self {
            Self::None => 0,
            Self::InitialPress => 1,
            Self::Repeat => 2,
            Self::ShortPressRelease => 3,
            Self::LongPress => 4,
            Self::LongPressRelease => 5,
            Self::DoublePress => 6,
            Self::TriplePress => 7,
            Self::QuadruplePress => 8,
            Self::QuintuplePress => 9,
        }
    }

    /// Map a bridge `last_event` string.
    pub fn from_bridge(raw: &str) -> Option<Self> {
        match raw {
            "initial_press" => Some(Self::InitialPress),
            "repeat" => Some(Self::Repeat),
            "short_release" => Some(Self::ShortPressRelease),
            "long_press" => Some(Self::LongPress),
            "long_release" => Some(Self::LongPressRelease),
            "double_short_release" => Some(Self::DoublePress),
            _ => None,
        }
    }

    /// Aggregate for `count` presses in one burst; `None` below two.
    pub fn for_press_count(count: u32) -> Option<Self> {
        match count {
            0 | 1 => None,
            2 => Some(Self::DoublePress),
            3 => Some(Self::TriplePress),
            4 => Some(Self::QuadruplePress),
            _ => Some(Self::QuintuplePress),
        }
    }

    pub fn choices() -> Vec<ChannelChoice> {
        Self::iter()
            .map(|c| ChannelChoice {
                value: c.code(),
                label: c.to_string(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
pub enum ConnectivityStatus {
    Unknown,
    Connected,
    Limited,
    Disconnected,
}

impl ConnectivityStatus {
    pub fn code(self) -> i64 {
        match self {
            Self::Unknown => 0,
            Self::Connected => 1,
            Self::Limited => 2,
            Self::Disconnected => 3,
        }
    }

    pub fn from_bridge(raw: &str) -> Self {
        match raw {
            "connected" => Self::Connected,
            "connectivity_issue" | "unidirectional_incoming" => Self::Limited,
            "disconnected" => Self::Disconnected,
            _ => Self::Unknown,
        }
    }

    pub fn choices() -> Vec<ChannelChoice> {
        Self::iter()
            .map(|c| ChannelChoice {
                value: c.code(),
                label: c.to_string(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
pub enum SensitivityLevel {
    Unknown,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl SensitivityLevel {
    pub fn code(self) -> i64 {
        match self {
            Self::Unknown => 0,
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::VeryHigh => 4,
        }
    }

    /// The bridge reports sensitivity as 1..=4 (`sensitivity_max` is 4).
    pub fn from_bridge(raw: i64) -> Self {
        match raw {
            1 => Self::Low,
            2 => Self::Medium,
            3 => Self::High,
            4 => Self::VeryHigh,
            _ => Self::Unknown,
        }
    }

    pub fn choices() -> Vec<ChannelChoice> {
        Self::iter()
            .filter(|s| *s != Self::Unknown)
            .map(|s| ChannelChoice {
                value: s.code(),
                label: s.to_string(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum SoftwareUpdateStatus {
    Unknown,
    NoUpdate,
    UpdatePending,
    ReadyToInstall,
    Installing,
}

impl SoftwareUpdateStatus {
    pub fn from_bridge(raw: &str) -> Self {
        match raw {
            "no_update" => Self::NoUpdate,
            "update_pending" => Self::UpdatePending,
            "ready_to_install" => Self::ReadyToInstall,
            "installing" => Self::Installing,
            _ => Self::Unknown,
        }
    }
}
