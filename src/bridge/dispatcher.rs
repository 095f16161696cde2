//! Exact-match routing of inbound MQTT messages to topic handlers.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use tracing::{error, trace, warn};

use crate::error::{BridgeError, Result};

pub type Handler = Box<dyn Fn(&str) -> Result<()> + Send + Sync>;

/// Routes `(topic, payload)` pairs to the one handler registered for that
/// exact topic. Handler errors and panics are contained per message.
#[derive(Default)]
pub struct TopicDispatcher {
    routes: HashMap<String, Handler>,
}

impl TopicDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler for `topic`. Each topic may only be registered
    /// once.
    pub fn add(&mut self, topic: impl Into<String>, handler: Handler) -> Result<()> {
        let topic = topic.into();
        if self.routes.contains_key(&topic) {
            return Err(BridgeError::Config(format!(
                "topic {topic} already has a handler"
            )));
        }
        self.routes.insert(topic, handler);
        Ok(())
    }

    /// Topics with a registered handler, for the broker subscription.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.routes.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Delivers one message. Returns `false` if no handler matched.
    pub fn dispatch(&self, topic: &str, payload: &str) -> bool {
        let Some(handler) = self.routes.get(topic) else {
            trace!("No handler for topic {}, discarding", topic);
            return false;
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(payload)))
            .unwrap_or_else(|cause| {
                Err(BridgeError::HandlerFault {
                    topic: topic.to_string(),
                    reason: panic_reason(&*cause),
                })
            });

        match outcome {
            Ok(()) => {}
            Err(e @ (BridgeError::MalformedPayload { .. } | BridgeError::InvalidValue { .. })) => {
                warn!("Discarding message: {}", e);
            }
            Err(e) => {
                error!("Handler for {} failed: {}", topic, e);
            }
        }
        true
    }
}

fn panic_reason(cause: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = cause.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = cause.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
