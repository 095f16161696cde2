pub mod client;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{BridgeError, Result};

/// A message travelling between the broker connection and the bridge core,
/// in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: String,
}

/// Fire-and-forget handle for outbound commands. Never waits on the broker.
#[derive(Debug, Clone)]
pub struct CommandPublisher {
    tx: mpsc::Sender<MqttMessage>,
}

impl CommandPublisher {
    pub fn new(tx: mpsc::Sender<MqttMessage>) -> Self {
        Self { tx }
    }

    pub fn publish(&self, topic: &str, payload: String) -> Result<()> {
        let msg = MqttMessage {
            topic: topic.to_string(),
            payload,
        };
        self.tx.try_send(msg).map_err(|e| match e {
            TrySendError::Full(msg) => BridgeError::TransportUnavailable(format!(
                "outbound queue full, dropping {}",
                msg.topic
            )),
            TrySendError::Closed(msg) => BridgeError::TransportUnavailable(format!(
                "broker connection gone, dropping {}",
                msg.topic
            )),
        })
    }
}
