use std::collections::HashSet;
use std::env;

use crate::device::AttributeId;
use crate::error::{BridgeError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub topics: TopicConfig,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    /// Retained bridge availability topic ("online" / last-will "offline").
    pub status_topic: String,
}

/// The fixed set of Tasmota topics the bridge talks to.
#[derive(Debug, Clone)]
pub struct TopicConfig {
    pub lock_status: String,
    pub workshop_lwt: String,
    pub fan_status: String,
    /// Command prefix of the fan controller, e.g. `cmnd/tasmota_B7C8F7/`.
    pub fan_command_prefix: String,
    /// Prefix of the topics controllers write fan attributes on; the
    /// attribute name is appended, e.g. `.../fan/command/fanMode`.
    pub fan_control_prefix: String,
}

impl TopicConfig {
    /// Topic the derived discrete fan speed is published to.
    pub fn fan_speed_command(&self) -> String {
        format!("{}FanSpeed", self.fan_command_prefix)
    }

    /// Topic a controller writes `attribute` on.
    pub fn fan_control(&self, attribute: AttributeId) -> String {
        format!("{}{}", self.fan_control_prefix, attribute)
    }

    fn subscriptions(&self) -> Vec<(&'static str, String)> {
        let mut topics = vec![
            ("LOCK_STATUS_TOPIC", self.lock_status.clone()),
            ("WORKSHOP_LWT_TOPIC", self.workshop_lwt.clone()),
            ("FAN_STATUS_TOPIC", self.fan_status.clone()),
        ];
        for attribute in AttributeId::CONTROLLER_WRITABLE {
            topics.push(("FAN_CONTROL_PREFIX", self.fan_control(attribute)));
        }
        topics
    }
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            lock_status: "catflap/lockstatus".to_string(),
            workshop_lwt: "tele/tasmota_CFDC7C/LWT".to_string(),
            fan_status: "stat/tasmota_B7C8F7/STATUS11".to_string(),
            fan_command_prefix: "cmnd/tasmota_B7C8F7/".to_string(),
            fan_control_prefix: "tasmota-matter-bridge/fan/command/".to_string(),
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn required(&self, key: &str) -> Result<String> {
        (self.lookup)(key)
            .ok_or_else(|| BridgeError::Config(format!("{key} environment variable is required")))
    }

    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.is_empty())
    }

    fn or_default<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        (self.lookup)(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = Env { lookup };
        let defaults = TopicConfig::default();

        let config = Self {
            mqtt: MqttConfig {
                broker_host: env.required("MQTT_BROKER_HOST")?,
                broker_port: env.or_default("MQTT_BROKER_PORT", 1883),
                client_id: env.or_default("MQTT_CLIENT_ID", "tasmota-matter-bridge".to_string()),
                status_topic: env.or_default(
                    "MQTT_STATUS_TOPIC",
                    "tasmota-matter-bridge/status".to_string(),
                ),
            },
            topics: TopicConfig {
                lock_status: env
                    .optional("LOCK_STATUS_TOPIC")
                    .unwrap_or(defaults.lock_status),
                workshop_lwt: env
                    .optional("WORKSHOP_LWT_TOPIC")
                    .unwrap_or(defaults.workshop_lwt),
                fan_status: env.optional("FAN_STATUS_TOPIC").unwrap_or(defaults.fan_status),
                fan_command_prefix: env
                    .optional("FAN_COMMAND_PREFIX")
                    .unwrap_or(defaults.fan_command_prefix),
                fan_control_prefix: env
                    .optional("FAN_CONTROL_PREFIX")
                    .unwrap_or(defaults.fan_control_prefix),
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.mqtt.broker_host.is_empty() {
            return Err(BridgeError::Config("MQTT_BROKER_HOST must not be empty".into()));
        }
        if self.mqtt.client_id.is_empty() {
            return Err(BridgeError::Config("MQTT_CLIENT_ID must not be empty".into()));
        }

        let mut seen = HashSet::new();
        for (key, topic) in self.topics.subscriptions() {
            if topic.contains(['+', '#']) {
                return Err(BridgeError::Config(format!(
                    "{key} must be an exact topic, got wildcard topic {topic}"
                )));
            }
            if !seen.insert(topic.clone()) {
                return Err(BridgeError::Config(format!(
                    "{key} duplicates another subscribed topic: {topic}"
                )));
            }
        }

        if self.topics.fan_command_prefix.contains(['+', '#']) {
            return Err(BridgeError::Config(
                "FAN_COMMAND_PREFIX must not contain wildcards".into(),
            ));
        }
        Ok(())
    }
}
