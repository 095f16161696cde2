use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::{BridgeError, Result};

use super::{AttributeId, AttributeValue, ClusterId, Device, DeviceId};

/// Change listener, called with `(new, old)` after an attribute transition.
pub type Listener = Arc<dyn Fn(&AttributeValue, &AttributeValue) + Send + Sync>;

/// A state-change event emitted on behalf of a device cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEvent {
    pub device: DeviceId,
    pub cluster: ClusterId,
    pub value: AttributeValue,
}

struct Slot {
    device: Device,
    listeners: HashMap<AttributeId, Vec<Listener>>,
}

/// In-memory owner of all virtual device state.
///
/// Each device sits behind its own mutex. Listeners run after the mutex is
/// released, so they may write other attributes of the same device.
pub struct DeviceRegistry {
    slots: Vec<Mutex<Slot>>,
    events: broadcast::Sender<DeviceEvent>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            slots: Vec::new(),
            events,
        }
    }

    pub fn register(&mut self, device: Device) -> DeviceId {
        let id = DeviceId(self.slots.len());
        info!(
            "Registered device {} ({}) clusters={:?}",
            device.name, device.serial, device.clusters
        );
        self.slots.push(Mutex::new(Slot {
            device,
            listeners: HashMap::new(),
        }));
        id
    }

    fn slot(&self, id: DeviceId) -> Result<&Mutex<Slot>> {
        self.slots.get(id.0).ok_or(BridgeError::UnknownDevice(id))
    }

    pub fn device_name(&self, id: DeviceId) -> Result<String> {
        Ok(self.slot(id)?.lock().device.name.clone())
    }

    /// Receiver for every change event emitted from now on.
    pub fn events(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    pub fn get_attribute(&self, id: DeviceId, attribute: AttributeId) -> Result<AttributeValue> {
        let slot = self.slot(id)?.lock();
        slot.device
            .attributes
            .get(&attribute)
            .copied()
            .ok_or_else(|| not_found(&slot.device, attribute))
    }

    /// Stores a new attribute value after checking it against the attribute's
    /// domain. Listeners are notified when the stored value changed, and on
    /// every write to a controller-writable attribute.
    pub fn set_attribute(
        &self,
        id: DeviceId,
        attribute: AttributeId,
        value: AttributeValue,
    ) -> Result<()> {
        let (old, listeners) = {
            let mut slot = self.slot(id)?.lock();
            let Slot { device, listeners } = &mut *slot;
            let Some(current) = device.attributes.get_mut(&attribute) else {
                return Err(not_found(device, attribute));
            };
            if !attribute.accepts(&value) {
                return Err(BridgeError::InvalidValue {
                    device: device.name.clone(),
                    attribute,
                    value,
                });
            }
            let old = std::mem::replace(current, value);
            if old == value && !attribute.is_controller_writable() {
                return Ok(());
            }
            debug!(
                "{}.{}.{}: {} -> {}",
                device.name,
                attribute.cluster(),
                attribute,
                old,
                value
            );
            (old, listeners.get(&attribute).cloned().unwrap_or_default())
        };

        for listener in listeners {
            listener(&value, &old);
        }
        Ok(())
    }

    /// Emits a state-change event for a cluster, regardless of whether any
    /// attribute changed.
    pub fn emit_change_event(
        &self,
        id: DeviceId,
        cluster: ClusterId,
        value: AttributeValue,
    ) -> Result<()> {
        {
            let slot = self.slot(id)?.lock();
            if !slot.device.has_cluster(cluster) {
                return Err(BridgeError::ClusterNotFound {
                    device: slot.device.name.clone(),
                    cluster,
                });
            }
            info!("{} {} state change event: {}", slot.device.name, cluster, value);
        }
        // No receivers is fine.
        let _ = self.events.send(DeviceEvent {
            device: id,
            cluster,
            value,
        });
        Ok(())
    }

    /// Registers a change listener. Fails if the device lacks the cluster or
    /// the attribute.
    pub fn subscribe(&self, id: DeviceId, attribute: AttributeId, listener: Listener) -> Result<()> {
        let mut slot = self.slot(id)?.lock();
        if !slot.device.has_cluster(attribute.cluster()) || !slot.device.has_attribute(attribute) {
            return Err(not_found(&slot.device, attribute));
        }
        info!(
            "Subscribed to {}.{}.{}",
            slot.device.name,
            attribute.cluster(),
            attribute
        );
        slot.listeners.entry(attribute).or_default().push(listener);
        Ok(())
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(device: &Device, attribute: AttributeId) -> BridgeError {
    BridgeError::AttributeNotFound {
        device: device.name.clone(),
        cluster: attribute.cluster(),
        attribute,
    }
}
