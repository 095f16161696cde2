//! Inbound translators: MQTT status payloads to device attributes.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::device::{
    AttributeId, AttributeValue, ClusterId, DeviceId, DeviceRegistry, FAN_SPEED_MAX, FanMode,
};
use crate::error::{BridgeError, Result};

/// `true` only when the payload starts with the literal `locked`.
pub fn lock_state(payload: &str) -> bool {
    payload.starts_with("locked")
}

// Tasmota `Status 11` response; everything but the fan speed is ignored.
#[derive(Deserialize)]
struct FanStatus {
    #[serde(rename = "StatusSTS")]
    status_sts: Option<StatusSts>,
}

#[derive(Deserialize)]
struct StatusSts {
    #[serde(rename = "FanSpeed")]
    fan_speed: Option<u8>,
}

/// Extracts `StatusSTS.FanSpeed` from a fan telemetry payload. A missing
/// field is `Ok(None)`.
pub fn parse_fan_speed(topic: &str, payload: &str) -> Result<Option<u8>> {
    let malformed = |reason: String| BridgeError::MalformedPayload {
        topic: topic.to_string(),
        reason,
    };

    let status: FanStatus = serde_json::from_str(payload).map_err(|e| malformed(e.to_string()))?;
    let speed = status.status_sts.and_then(|sts| sts.fan_speed);
    match speed {
        Some(speed) if speed > FAN_SPEED_MAX => Err(malformed(format!(
            "FanSpeed {speed} is above the maximum of {FAN_SPEED_MAX}"
        ))),
        speed => Ok(speed),
    }
}

/// Parses a controller write for `attribute`. `null` clears a setting; a fan
/// mode is given by name or number, percents and speeds as decimals. Bounds
/// are left to the registry.
pub fn parse_control_value(
    attribute: AttributeId,
    topic: &str,
    payload: &str,
) -> Result<AttributeValue> {
    let malformed = |reason: String| BridgeError::MalformedPayload {
        topic: topic.to_string(),
        reason,
    };

    let payload = payload.trim();
    if payload.eq_ignore_ascii_case("null") {
        return Ok(AttributeValue::Null);
    }
    match attribute {
        AttributeId::FanMode => payload
            .parse::<FanMode>()
            .map(AttributeValue::FanMode)
            .map_err(malformed),
        _ => payload
            .parse::<u8>()
            .map(AttributeValue::Uint)
            .map_err(|e| malformed(format!("{attribute} {payload:?}: {e}"))),
    }
}

/// Cat-flap lock status (plain text) onto a contact sensor.
pub struct LockTranslator {
    registry: Arc<DeviceRegistry>,
    sensor: DeviceId,
}

impl LockTranslator {
    pub fn new(registry: Arc<DeviceRegistry>, sensor: DeviceId) -> Self {
        Self { registry, sensor }
    }

    /// Writes the state and emits a change event every time, changed or not.
    pub fn handle(&self, payload: &str) -> Result<()> {
        info!("Lock status received: {}", payload);
        let value = AttributeValue::Bool(lock_state(payload));
        self.registry
            .set_attribute(self.sensor, AttributeId::StateValue, value)?;
        self.registry
            .emit_change_event(self.sensor, ClusterId::BooleanState, value)
    }
}

/// Workshop LWT. Subscribed so the messages are seen, but nothing is mapped
/// onto the sensor yet.
pub struct PresenceTranslator {
    sensor_name: String,
}

impl PresenceTranslator {
    pub fn new(sensor_name: String) -> Self {
        Self { sensor_name }
    }

    pub fn handle(&self, payload: &str) -> Result<()> {
        debug!("LWT for {} ignored: {}", self.sensor_name, payload);
        Ok(())
    }
}

/// Fan telemetry (JSON) onto the fan's current discrete speed.
pub struct FanStatusTranslator {
    registry: Arc<DeviceRegistry>,
    fan: DeviceId,
    topic: String,
}

impl FanStatusTranslator {
    pub fn new(registry: Arc<DeviceRegistry>, fan: DeviceId, topic: String) -> Self {
        Self {
            registry,
            fan,
            topic,
        }
    }

    pub fn handle(&self, payload: &str) -> Result<()> {
        info!("Fan status received: {}", payload);
        let Some(speed) = parse_fan_speed(&self.topic, payload)? else {
            debug!("No StatusSTS.FanSpeed in fan status, nothing to update");
            return Ok(());
        };
        let value = AttributeValue::Uint(speed);
        self.registry
            .set_attribute(self.fan, AttributeId::SpeedCurrent, value)?;
        self.registry
            .emit_change_event(self.fan, ClusterId::FanControl, value)
    }
}

/// Controller writes of one fan attribute. The write goes through the
/// registry, which runs the fan mapper.
pub struct FanControlTranslator {
    registry: Arc<DeviceRegistry>,
    fan: DeviceId,
    attribute: AttributeId,
    topic: String,
}

impl FanControlTranslator {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        fan: DeviceId,
        attribute: AttributeId,
        topic: String,
    ) -> Self {
        Self {
            registry,
            fan,
            attribute,
            topic,
        }
    }

    pub fn handle(&self, payload: &str) -> Result<()> {
        info!("Fan {} write received: {}", self.attribute, payload);
        let value = parse_control_value(self.attribute, &self.topic, payload)?;
        self.registry.set_attribute(self.fan, self.attribute, value)
    }
}
