//! Fan mode / percent / discrete speed mapping and the outbound fan commands.
//!
//! The virtual fan exposes three controller-writable attributes:
//!
//! ```text
//! fanMode ──► target percent ─┐
//!                             ├─► percentCurrent, speed_for_percent ─► speedCurrent ─► cmnd/<fan>/FanSpeed
//! percentSetting ─────────────┘
//! speedSetting ─────────────────────────────────────► speedCurrent ─► cmnd/<fan>/FanSpeed
//! ```
//!
//! Every write to a controller-writable attribute runs its trigger, even when
//! the value matches what is stored, so a command is never swallowed because
//! an earlier mode change left the setting attribute behind. The handlers only
//! ever write `percentCurrent` and `speedCurrent`, which no handler listens on,
//! so a change can never feed back into another trigger.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::device::{AttributeId, AttributeValue, DeviceId, DeviceRegistry, FanMode};
use crate::error::Result;
use crate::mqtt::CommandPublisher;

impl FanMode {
    /// Percent a mode selects. `Smart` has no fixed percent and leaves the
    /// fan where it is.
    pub fn target_percent(self) -> Option<u8> {
        match self {
            FanMode::Off => Some(0),
            FanMode::Low => Some(33),
            FanMode::Medium => Some(66),
            FanMode::High => Some(100),
            FanMode::On => Some(100),
            FanMode::Auto => Some(50),
            FanMode::Smart => None,
        }
    }
}

/// Discrete hardware step for a percent value.
pub fn speed_for_percent(percent: u8) -> u8 {
    if percent >= 66 {
        3
    } else if percent >= 33 {
        2
    } else if percent > 0 {
        1
    } else {
        0
    }
}

type Trigger = fn(&FanMapper, &AttributeValue, &AttributeValue);

/// Attribute each trigger listens on.
const TRIGGERS: [(AttributeId, Trigger); 3] = [
    (AttributeId::FanMode, FanMapper::on_mode_changed),
    (AttributeId::PercentSetting, FanMapper::on_percent_changed),
    (AttributeId::SpeedSetting, FanMapper::on_speed_changed),
];

/// Turns attribute changes on the virtual fan into `FanSpeed` commands for
/// the physical controller.
pub struct FanMapper {
    registry: Arc<DeviceRegistry>,
    fan: DeviceId,
    publisher: CommandPublisher,
    command_topic: String,
}

impl FanMapper {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        fan: DeviceId,
        publisher: CommandPublisher,
        command_topic: String,
    ) -> Self {
        Self {
            registry,
            fan,
            publisher,
            command_topic,
        }
    }

    /// Subscribes every trigger on the fan. A trigger whose attribute is
    /// missing is logged and skipped; the others are still wired. Returns how
    /// many were subscribed.
    pub fn subscribe(mapper: &Arc<Self>) -> usize {
        let mut subscribed = 0;
        for (attribute, trigger) in TRIGGERS {
            let target = Arc::clone(mapper);
            let listener = Arc::new(move |new: &AttributeValue, old: &AttributeValue| {
                trigger(&target, new, old);
            });
            match mapper.registry.subscribe(mapper.fan, attribute, listener) {
                Ok(()) => subscribed += 1,
                Err(e) => error!("subscribe error: {}", e),
            }
        }
        subscribed
    }

    /// Trigger A: mode → target percent → trigger B.
    pub fn on_mode_changed(&self, new: &AttributeValue, old: &AttributeValue) {
        let AttributeValue::FanMode(mode) = *new else {
            debug!("Fan mode changed to {}, ignoring", new);
            return;
        };
        info!("Fan mode changed from {} to {}", old, mode);
        match mode.target_percent() {
            Some(percent) => self.apply_percent(percent),
            None => match self.registry.get_attribute(self.fan, AttributeId::SpeedCurrent) {
                Ok(speed) => info!(
                    "Fan mode {} has no percent mapping, leaving fan at speed {}",
                    mode, speed
                ),
                Err(e) => warn!("Fan mode {}: {}", mode, e),
            },
        }
    }

    /// Trigger B entry point for a directly written percent.
    pub fn on_percent_changed(&self, new: &AttributeValue, old: &AttributeValue) {
        info!("Percent setting changed from {} to {}", old, new);
        let Some(percent) = new.as_uint() else {
            debug!("Percent setting is {}, nothing to apply", new);
            return;
        };
        self.apply_percent(percent);
    }

    /// Trigger C: discrete speed straight through, percent untouched.
    pub fn on_speed_changed(&self, new: &AttributeValue, old: &AttributeValue) {
        info!("Speed setting changed from {} to {}", old, new);
        let Some(speed) = new.as_uint() else {
            debug!("Speed setting is {}, nothing to apply", new);
            return;
        };
        self.run("speed", || {
            self.registry
                .set_attribute(self.fan, AttributeId::SpeedCurrent, AttributeValue::Uint(speed))?;
            self.send_speed(speed)
        });
    }

    fn apply_percent(&self, percent: u8) {
        self.run("percent", || {
            self.registry.set_attribute(
                self.fan,
                AttributeId::PercentCurrent,
                AttributeValue::Uint(percent),
            )?;
            let speed = speed_for_percent(percent);
            self.registry
                .set_attribute(self.fan, AttributeId::SpeedCurrent, AttributeValue::Uint(speed))?;
            self.send_speed(speed)
        });
    }

    fn send_speed(&self, speed: u8) -> Result<()> {
        info!("Publishing {}: {}", self.command_topic, speed);
        self.publisher.publish(&self.command_topic, speed.to_string())
    }

    fn run(&self, what: &str, f: impl FnOnce() -> Result<()>) {
        if let Err(e) = f() {
            warn!("Failed to apply fan {} change: {}", what, e);
        }
    }
}
