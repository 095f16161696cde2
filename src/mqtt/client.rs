use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, QoS};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;

use super::MqttMessage;

pub struct MqttClient {
    client: AsyncClient,
    eventloop: EventLoop,
    subscriptions: Vec<String>,
    status_topic: String,
}

impl MqttClient {
    /// Prepares the broker connection. Nothing is sent until [`run`](Self::run)
    /// starts polling.
    pub fn new(config: &MqttConfig, subscriptions: Vec<String>) -> Self {
        let mut mqttopts = MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        mqttopts.set_keep_alive(Duration::from_secs(30));

        // Retained "offline" on the bridge status topic if we drop off the broker.
        let lwt = LastWill::new(
            &config.status_topic,
            "offline".as_bytes().to_vec(),
            QoS::AtLeastOnce,
            true,
        );
        mqttopts.set_last_will(lwt);

        let (client, eventloop) = AsyncClient::new(mqttopts, 100);

        Self {
            client,
            eventloop,
            subscriptions,
            status_topic: config.status_topic.clone(),
        }
    }

    /// Run the MQTT event loop. Subscribes to the bridge topics on every
    /// connect, forwards incoming publishes through `inbound_tx`, and
    /// publishes outbound commands received from `outbound_rx`.
    ///
    /// Outbound commands that arrive while the broker is unreachable are
    /// dropped, not queued.
    pub async fn run(
        mut self,
        inbound_tx: mpsc::Sender<MqttMessage>,
        mut outbound_rx: mpsc::Receiver<MqttMessage>,
    ) {
        let mut connected = false;

        loop {
            tokio::select! {
                event = self.eventloop.poll() => {
                    match event {
                        Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                            connected = true;
                            info!("Connected to MQTT broker");

                            if let Err(e) = self
                                .client
                                .publish(&self.status_topic, QoS::AtLeastOnce, true, "online")
                                .await
                            {
                                error!("Failed to publish online status: {}", e);
                            }

                            for topic in &self.subscriptions {
                                match self.client.subscribe(topic, QoS::AtLeastOnce).await {
                                    Ok(()) => info!("Subscribed to {}", topic),
                                    Err(e) => error!("Failed to subscribe to {}: {}", topic, e),
                                }
                            }
                        }
                        Ok(Event::Incoming(Incoming::Publish(publish))) => {
                            let payload = String::from_utf8_lossy(&publish.payload).to_string();
                            let msg = MqttMessage {
                                topic: publish.topic.clone(),
                                payload,
                            };
                            if inbound_tx.send(msg).await.is_err() {
                                warn!("Inbound channel closed");
                                return;
                            }
                        }
                        Ok(Event::Incoming(Incoming::Disconnect)) => {
                            connected = false;
                            info!("Disconnected from MQTT broker");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            connected = false;
                            error!("MQTT connection error: {}. Reconnecting...", e);
                            tokio::time::sleep(Duration::from_secs(5)).await;
                        }
                    }
                }
                msg = outbound_rx.recv() => {
                    let Some(msg) = msg else {
                        info!("Outbound channel closed, stopping MQTT client");
                        return;
                    };
                    if !connected {
                        warn!(
                            "Transport unavailable, dropping publish to {}: {}",
                            msg.topic, msg.payload
                        );
                        continue;
                    }
                    debug!("Publishing {}: {}", msg.topic, msg.payload);
                    if let Err(e) = self.client.try_publish(
                        &msg.topic,
                        QoS::AtLeastOnce,
                        false,
                        msg.payload.into_bytes(),
                    ) {
                        warn!("Failed to publish {}: {}", msg.topic, e);
                    }
                }
            }
        }
    }
}
