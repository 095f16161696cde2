//! Bridge core: device registration and the wiring of translators and the
//! fan mapper against the registry and the outbound publisher.

pub mod dispatcher;
pub mod fan;
pub mod translate;

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::config::TopicConfig;
use crate::device::{
    AttributeId, AttributeValue, ClusterId, Device, DeviceEvent, DeviceId, DeviceRegistry,
};
use crate::error::Result;
use crate::mqtt::CommandPublisher;

use dispatcher::TopicDispatcher;
use fan::FanMapper;
use translate::{FanControlTranslator, FanStatusTranslator, LockTranslator, PresenceTranslator};

/// Handles of the bridged devices, fixed once registration is done.
#[derive(Debug, Clone, Copy)]
pub struct Devices {
    pub workshop: DeviceId,
    pub cat_flap: DeviceId,
    pub fan: DeviceId,
}

/// First startup phase: put every bridged device into the registry.
pub fn register_devices(registry: &mut DeviceRegistry) -> Devices {
    Devices {
        workshop: registry.register(Device::contact_sensor("workshopContact", "0x123151164")),
        cat_flap: registry.register(Device::contact_sensor("catdoorContact", "0x123151165")),
        fan: registry.register(Device::fan("Fan", "serial_980545631229")),
    }
}

/// Second startup phase: build the translators and the fan mapper against
/// the registered devices. Returns the dispatcher for inbound messages.
pub fn wire(
    registry: &Arc<DeviceRegistry>,
    devices: &Devices,
    topics: &TopicConfig,
    publisher: CommandPublisher,
) -> Result<TopicDispatcher> {
    let mut dispatcher = TopicDispatcher::new();

    let lock = LockTranslator::new(registry.clone(), devices.cat_flap);
    dispatcher.add(
        topics.lock_status.as_str(),
        Box::new(move |payload: &str| lock.handle(payload)),
    )?;

    let presence = PresenceTranslator::new(registry.device_name(devices.workshop)?);
    dispatcher.add(
        topics.workshop_lwt.as_str(),
        Box::new(move |payload: &str| presence.handle(payload)),
    )?;

    let fan_status =
        FanStatusTranslator::new(registry.clone(), devices.fan, topics.fan_status.clone());
    dispatcher.add(
        topics.fan_status.as_str(),
        Box::new(move |payload: &str| fan_status.handle(payload)),
    )?;

    for attribute in AttributeId::CONTROLLER_WRITABLE {
        let topic = topics.fan_control(attribute);
        let control =
            FanControlTranslator::new(registry.clone(), devices.fan, attribute, topic.clone());
        dispatcher.add(topic, Box::new(move |payload: &str| control.handle(payload)))?;
    }

    let mapper = Arc::new(FanMapper::new(
        registry.clone(),
        devices.fan,
        publisher,
        topics.fan_speed_command(),
    ));
    let subscribed = FanMapper::subscribe(&mapper);
    info!("Fan mapper wired with {} attribute subscriptions", subscribed);

    Ok(dispatcher)
}

/// Both contact sensors start out `false`, announced with a change event.
pub fn reset_contacts(registry: &DeviceRegistry, devices: &Devices) {
    for sensor in [devices.workshop, devices.cat_flap] {
        let value = AttributeValue::Bool(false);
        let result = registry
            .set_attribute(sensor, AttributeId::StateValue, value)
            .and_then(|()| registry.emit_change_event(sensor, ClusterId::BooleanState, value))
            .and_then(|()| registry.device_name(sensor));
        match result {
            Ok(name) => info!("Set {} to false", name),
            Err(e) => error!("Failed to reset contact sensor: {}", e),
        }
    }
}

/// One log line for a change event.
pub fn describe_event(registry: &DeviceRegistry, event: &DeviceEvent) -> String {
    let name = registry
        .device_name(event.device)
        .unwrap_or_else(|_| format!("{:?}", event.device));
    format!("{} {} -> {}", name, event.cluster, event.value)
}

/// Logs every change event emitted on the registry.
pub async fn log_events(
    registry: Arc<DeviceRegistry>,
    mut events: broadcast::Receiver<DeviceEvent>,
) {
    loop {
        match events.recv().await {
            Ok(event) => info!("Change event: {}", describe_event(&registry, &event)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Change event log fell behind, {} events skipped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::FanMode;
    use crate::mqtt::MqttMessage;
    use tokio::sync::mpsc;

    struct Bridge {
        registry: Arc<DeviceRegistry>,
        devices: Devices,
        dispatcher: TopicDispatcher,
        topics: TopicConfig,
        rx: mpsc::Receiver<MqttMessage>,
    }

    fn bridge() -> Bridge {
        let mut registry = DeviceRegistry::new();
        let devices = register_devices(&mut registry);
        let registry = Arc::new(registry);
        let topics = TopicConfig::default();
        let (tx, rx) = mpsc::channel(16);
        let dispatcher = wire(&registry, &devices, &topics, CommandPublisher::new(tx)).unwrap();
        Bridge {
            registry,
            devices,
            dispatcher,
            topics,
            rx,
        }
    }

    #[test]
    fn dispatcher_covers_status_and_control_topics() {
        let b = bridge();
        assert_eq!(
            b.dispatcher.topics(),
            vec![
                "catflap/lockstatus".to_string(),
                "stat/tasmota_B7C8F7/STATUS11".to_string(),
                "tasmota-matter-bridge/fan/command/fanMode".to_string(),
                "tasmota-matter-bridge/fan/command/percentSetting".to_string(),
                "tasmota-matter-bridge/fan/command/speedSetting".to_string(),
                "tele/tasmota_CFDC7C/LWT".to_string(),
            ]
        );
    }

    #[test]
    fn locked_message_end_to_end() {
        let b = bridge();
        let mut events = b.registry.events();

        assert!(b.dispatcher.dispatch(&b.topics.lock_status, "locked"));

        assert_eq!(
            b.registry
                .get_attribute(b.devices.cat_flap, AttributeId::StateValue)
                .unwrap(),
            AttributeValue::Bool(true)
        );
        assert_eq!(
            events.try_recv().unwrap(),
            DeviceEvent {
                device: b.devices.cat_flap,
                cluster: ClusterId::BooleanState,
                value: AttributeValue::Bool(true),
            }
        );
        assert!(events.try_recv().is_err());
        assert_eq!(
            b.registry
                .get_attribute(b.devices.workshop, AttributeId::StateValue)
                .unwrap(),
            AttributeValue::Bool(false)
        );
    }

    #[test]
    fn fan_status_end_to_end() {
        let mut b = bridge();
        let mut events = b.registry.events();

        assert!(
            b.dispatcher
                .dispatch(&b.topics.fan_status, r#"{"StatusSTS":{"FanSpeed":2}}"#)
        );

        assert_eq!(
            b.registry
                .get_attribute(b.devices.fan, AttributeId::SpeedCurrent)
                .unwrap(),
            AttributeValue::Uint(2)
        );
        assert_eq!(events.try_recv().unwrap().value, AttributeValue::Uint(2));
        assert!(events.try_recv().is_err());
        // Telemetry never echoes back as a command.
        assert!(b.rx.try_recv().is_err());
    }

    #[test]
    fn malformed_fan_status_is_contained() {
        let mut b = bridge();
        let mut events = b.registry.events();

        assert!(b.dispatcher.dispatch(&b.topics.fan_status, "{not json"));
        assert!(b.dispatcher.dispatch(&b.topics.lock_status, "locked"));

        assert_eq!(
            b.registry
                .get_attribute(b.devices.fan, AttributeId::SpeedCurrent)
                .unwrap(),
            AttributeValue::Uint(0)
        );
        assert_eq!(events.try_recv().unwrap().device, b.devices.cat_flap);
        assert!(b.rx.try_recv().is_err());
    }

    #[test]
    fn lwt_message_changes_nothing() {
        let b = bridge();
        let mut events = b.registry.events();
        assert!(b.dispatcher.dispatch(&b.topics.workshop_lwt, "Offline"));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn unknown_topic_is_discarded() {
        let b = bridge();
        assert!(!b.dispatcher.dispatch("esp/garage/door", "open"));
    }

    #[test]
    fn fan_mode_high_end_to_end() {
        let mut b = bridge();
        b.registry
            .set_attribute(
                b.devices.fan,
                AttributeId::FanMode,
                AttributeValue::FanMode(FanMode::High),
            )
            .unwrap();

        assert_eq!(
            b.registry
                .get_attribute(b.devices.fan, AttributeId::PercentCurrent)
                .unwrap(),
            AttributeValue::Uint(100)
        );
        assert_eq!(
            b.rx.try_recv().unwrap(),
            MqttMessage {
                topic: "cmnd/tasmota_B7C8F7/FanSpeed".to_string(),
                payload: "3".to_string(),
            }
        );
        assert!(b.rx.try_recv().is_err());
    }

    #[test]
    fn fan_percent_end_to_end() {
        let mut b = bridge();
        b.registry
            .set_attribute(b.devices.fan, AttributeId::PercentSetting, AttributeValue::Uint(40))
            .unwrap();
        assert_eq!(b.rx.try_recv().unwrap().payload, "2");
    }

    #[test]
    fn fan_speed_end_to_end() {
        let mut b = bridge();
        b.registry
            .set_attribute(b.devices.fan, AttributeId::SpeedSetting, AttributeValue::Uint(1))
            .unwrap();
        assert_eq!(b.rx.try_recv().unwrap().payload, "1");
        assert_eq!(
            b.registry
                .get_attribute(b.devices.fan, AttributeId::PercentCurrent)
                .unwrap(),
            AttributeValue::Uint(0)
        );
    }

    #[test]
    fn reset_contacts_emits_for_both_sensors() {
        let b = bridge();
        let mut events = b.registry.events();
        b.dispatcher.dispatch(&b.topics.lock_status, "locked");
        events.try_recv().unwrap();

        reset_contacts(&b.registry, &b.devices);

        let first = events.try_recv().unwrap();
        let second = events.try_recv().unwrap();
        assert_eq!(first.device, b.devices.workshop);
        assert_eq!(second.device, b.devices.cat_flap);
        assert_eq!(second.value, AttributeValue::Bool(false));
        assert_eq!(
            b.registry
                .get_attribute(b.devices.cat_flap, AttributeId::StateValue)
                .unwrap(),
            AttributeValue::Bool(false)
        );
    }

    #[test]
    fn controller_writes_end_to_end() {
        let mut b = bridge();
        let mode = b.topics.fan_control(AttributeId::FanMode);
        let speed = b.topics.fan_control(AttributeId::SpeedSetting);
        let percent = b.topics.fan_control(AttributeId::PercentSetting);

        assert!(b.dispatcher.dispatch(&mode, "High"));
        assert_eq!(b.rx.try_recv().unwrap().payload, "3");

        // Settings still hold 0 from startup; the writes must not be dropped.
        assert!(b.dispatcher.dispatch(&speed, "0"));
        assert_eq!(b.rx.try_recv().unwrap().payload, "0");
        assert!(b.dispatcher.dispatch(&mode, "High"));
        assert_eq!(b.rx.try_recv().unwrap().payload, "3");
        assert!(b.dispatcher.dispatch(&percent, "0"));
        assert_eq!(b.rx.try_recv().unwrap().payload, "0");
        assert!(b.rx.try_recv().is_err());
    }

    #[test]
    fn bad_controller_writes_publish_nothing() {
        let mut b = bridge();
        let speed = b.topics.fan_control(AttributeId::SpeedSetting);

        assert!(b.dispatcher.dispatch(&speed, "9"));
        assert!(b.dispatcher.dispatch(&speed, "fast"));
        assert!(b.dispatcher.dispatch(&b.topics.fan_control(AttributeId::FanMode), "null"));
        assert!(b.dispatcher.dispatch(&b.topics.fan_control(AttributeId::PercentSetting), "250"));

        assert!(b.rx.try_recv().is_err());
        assert_eq!(
            b.registry
                .get_attribute(b.devices.fan, AttributeId::SpeedCurrent)
                .unwrap(),
            AttributeValue::Uint(0)
        );
    }

    #[test]
    fn change_events_are_described_by_device_name() {
        let b = bridge();
        let event = DeviceEvent {
            device: b.devices.cat_flap,
            cluster: ClusterId::BooleanState,
            value: AttributeValue::Bool(true),
        };
        assert_eq!(
            describe_event(&b.registry, &event),
            "catdoorContact BooleanState -> true"
        );
    }
}
