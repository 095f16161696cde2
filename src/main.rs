mod bridge;
mod config;
mod device;
mod error;
mod mqtt;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use device::DeviceRegistry;
use mqtt::{CommandPublisher, MqttMessage};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Starting tasmota-matter-bridge (mqtt={}:{}, fan command topic={})",
        config.mqtt.broker_host,
        config.mqtt.broker_port,
        config.topics.fan_speed_command(),
    );

    // Devices first, so everything wired below holds firm handles.
    let mut registry = DeviceRegistry::new();
    let devices = bridge::register_devices(&mut registry);
    let registry = Arc::new(registry);

    // Channels
    let (inbound_tx, mut inbound_rx) = mpsc::channel::<MqttMessage>(100);
    let (outbound_tx, outbound_rx) = mpsc::channel::<MqttMessage>(100);

    let dispatcher = match bridge::wire(
        &registry,
        &devices,
        &config.topics,
        CommandPublisher::new(outbound_tx),
    ) {
        Ok(d) => d,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let events_handle = tokio::spawn(bridge::log_events(registry.clone(), registry.events()));
    bridge::reset_contacts(&registry, &devices);

    let mqtt_client = mqtt::client::MqttClient::new(&config.mqtt, dispatcher.topics());
    let mqtt_handle = tokio::spawn(async move {
        mqtt_client.run(inbound_tx, outbound_rx).await;
    });

    // Main loop: one inbound message at a time + handle shutdown
    loop {
        tokio::select! {
            msg = inbound_rx.recv() => {
                let Some(msg) = msg else {
                    error!("MQTT client stopped");
                    break;
                };
                dispatcher.dispatch(&msg.topic, &msg.payload);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down");
                break;
            }
            _ = async {
                let mut sigterm = tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate()
                ).expect("Failed to register SIGTERM handler");
                sigterm.recv().await;
            } => {
                info!("Received SIGTERM, shutting down");
                break;
            }
        }
    }

    mqtt_handle.abort();
    events_handle.abort();
    info!("tasmota-matter-bridge stopped");
}
