pub mod registry;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub use registry::{DeviceEvent, DeviceRegistry};

/// Handle to a device registered in a [`DeviceRegistry`]. Only valid for the
/// registry that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterId {
    BooleanState,
    FanControl,
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterId::BooleanState => f.write_str("BooleanState"),
            ClusterId::FanControl => f.write_str("FanControl"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeId {
    StateValue,
    FanMode,
    PercentSetting,
    PercentCurrent,
    SpeedMax,
    SpeedSetting,
    SpeedCurrent,
}

impl AttributeId {
    pub fn cluster(self) -> ClusterId {
        match self {
            AttributeId::StateValue => ClusterId::BooleanState,
            AttributeId::FanMode
            | AttributeId::PercentSetting
            | AttributeId::PercentCurrent
            | AttributeId::SpeedMax
            | AttributeId::SpeedSetting
            | AttributeId::SpeedCurrent => ClusterId::FanControl,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AttributeId::StateValue => "stateValue",
            AttributeId::FanMode => "fanMode",
            AttributeId::PercentSetting => "percentSetting",
            AttributeId::PercentCurrent => "percentCurrent",
            AttributeId::SpeedMax => "speedMax",
            AttributeId::SpeedSetting => "speedSetting",
            AttributeId::SpeedCurrent => "speedCurrent",
        }
    }

    /// Attributes a controller may write. Every write to one of these is
    /// reported to its listeners, even when the value is unchanged.
    pub const CONTROLLER_WRITABLE: [AttributeId; 3] = [
        AttributeId::FanMode,
        AttributeId::PercentSetting,
        AttributeId::SpeedSetting,
    ];

    pub fn is_controller_writable(self) -> bool {
        Self::CONTROLLER_WRITABLE.contains(&self)
    }

    /// Whether `value` lies in this attribute's domain: the right variant and,
    /// for percents and speeds, within bounds.
    pub fn accepts(self, value: &AttributeValue) -> bool {
        match (self, *value) {
            (AttributeId::StateValue, AttributeValue::Bool(_)) => true,
            (AttributeId::FanMode, AttributeValue::FanMode(_)) => true,
            (AttributeId::PercentSetting | AttributeId::SpeedSetting, AttributeValue::Null) => true,
            (AttributeId::PercentSetting | AttributeId::PercentCurrent, AttributeValue::Uint(n)) => {
                n <= 100
            }
            (AttributeId::SpeedSetting | AttributeId::SpeedCurrent, AttributeValue::Uint(n)) => {
                n <= FAN_SPEED_MAX
            }
            (AttributeId::SpeedMax, AttributeValue::Uint(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Coarse fan control intent, as exposed to controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FanMode {
    Off = 0,
    Low = 1,
    Medium = 2,
    High = 3,
    On = 4,
    Auto = 5,
    Smart = 6,
}

impl fmt::Display for FanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FanMode::Off => "Off",
            FanMode::Low => "Low",
            FanMode::Medium => "Medium",
            FanMode::High => "High",
            FanMode::On => "On",
            FanMode::Auto => "Auto",
            FanMode::Smart => "Smart",
        };
        f.write_str(name)
    }
}

impl FanMode {
    pub fn from_repr(value: u8) -> Option<Self> {
        match value {
            0 => Some(FanMode::Off),
            1 => Some(FanMode::Low),
            2 => Some(FanMode::Medium),
            3 => Some(FanMode::High),
            4 => Some(FanMode::On),
            5 => Some(FanMode::Auto),
            6 => Some(FanMode::Smart),
            _ => None,
        }
    }
}

/// Accepts the mode name (any case) or its wire discriminant.
impl FromStr for FanMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if let Ok(n) = s.parse::<u8>() {
            return Self::from_repr(n).ok_or_else(|| format!("no fan mode with value {n}"));
        }
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(FanMode::Off),
            "low" => Ok(FanMode::Low),
            "medium" => Ok(FanMode::Medium),
            "high" => Ok(FanMode::High),
            "on" => Ok(FanMode::On),
            "auto" => Ok(FanMode::Auto),
            "smart" => Ok(FanMode::Smart),
            _ => Err(format!("unknown fan mode {s:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Uint(u8),
    FanMode(FanMode),
}

impl AttributeValue {
    pub fn as_uint(&self) -> Option<u8> {
        match self {
            AttributeValue::Uint(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Null => f.write_str("null"),
            AttributeValue::Bool(b) => write!(f, "{b}"),
            AttributeValue::Uint(n) => write!(f, "{n}"),
            AttributeValue::FanMode(mode) => write!(f, "{mode}"),
        }
    }
}

/// Highest discrete speed step the physical fan controller accepts.
pub const FAN_SPEED_MAX: u8 = 3;

/// A virtual device: identity plus the attribute set of its clusters.
#[derive(Debug, Clone)]
pub struct Device {
    pub name: String,
    pub serial: String,
    pub(crate) clusters: Vec<ClusterId>,
    pub(crate) attributes: HashMap<AttributeId, AttributeValue>,
}

impl Device {
    fn new(name: &str, serial: &str) -> Self {
        Self {
            name: name.to_string(),
            serial: serial.to_string(),
            clusters: Vec::new(),
            attributes: HashMap::new(),
        }
    }

    fn with_attribute(mut self, attribute: AttributeId, value: AttributeValue) -> Self {
        let cluster = attribute.cluster();
        if !self.clusters.contains(&cluster) {
            self.clusters.push(cluster);
        }
        self.attributes.insert(attribute, value);
        self
    }

    /// Contact sensor with a `BooleanState` cluster, initially open (`false`).
    pub fn contact_sensor(name: &str, serial: &str) -> Self {
        Self::new(name, serial).with_attribute(AttributeId::StateValue, AttributeValue::Bool(false))
    }

    /// Multi-speed fan with a `FanControl` cluster, initially off.
    pub fn fan(name: &str, serial: &str) -> Self {
        Self::new(name, serial)
            .with_attribute(AttributeId::FanMode, AttributeValue::FanMode(FanMode::Off))
            .with_attribute(AttributeId::PercentSetting, AttributeValue::Uint(0))
            .with_attribute(AttributeId::PercentCurrent, AttributeValue::Uint(0))
            .with_attribute(AttributeId::SpeedMax, AttributeValue::Uint(FAN_SPEED_MAX))
            .with_attribute(AttributeId::SpeedSetting, AttributeValue::Uint(0))
            .with_attribute(AttributeId::SpeedCurrent, AttributeValue::Uint(0))
    }

    pub fn has_cluster(&self, cluster: ClusterId) -> bool {
        self.clusters.contains(&cluster)
    }

    pub fn has_attribute(&self, attribute: AttributeId) -> bool {
        self.attributes.contains_key(&attribute)
    }
}
