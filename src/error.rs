use thiserror::Error;

use crate::device::{AttributeId, AttributeValue, ClusterId, DeviceId};

/// Everything that can go wrong between the broker and the device registry.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Inbound payload could not be parsed into what the topic carries.
    #[error("malformed payload on {topic}: {reason}")]
    MalformedPayload { topic: String, reason: String },

    /// The device has no such cluster or attribute.
    #[error("attribute {cluster}.{attribute} not found on device {device}")]
    AttributeNotFound {
        device: String,
        cluster: ClusterId,
        attribute: AttributeId,
    },

    #[error("cluster {cluster} not found on device {device}")]
    ClusterNotFound { device: String, cluster: ClusterId },

    /// The value is the wrong kind for the attribute or out of its range.
    #[error("value {value} is outside the domain of {device}.{attribute}")]
    InvalidValue {
        device: String,
        attribute: AttributeId,
        value: AttributeValue,
    },

    /// The handle was not issued by this registry.
    #[error("unknown device {0:?}")]
    UnknownDevice(DeviceId),

    /// An outbound message could not be handed to the broker connection.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// A topic handler failed in an unexpected way.
    #[error("handler fault on {topic}: {reason}")]
    HandlerFault { topic: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
