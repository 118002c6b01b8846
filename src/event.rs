// MIT License - Copyright (c) 2026 Peter Wright
// Device events

use serde_json::Value;

use crate::devices::state::ChangeSet;

/// All events emitted by managed devices.
///
/// Users subscribe via `hub.subscribe()` to receive a
/// `tokio::sync::broadcast::Receiver<DeviceEvent>`.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// Some properties of a device changed
    Updated {
        device_id: String,
        model: String,
        /// Only the properties whose value changed
        changes: ChangeSet,
        /// Full property snapshot after the update
        properties: Value,
    },
    /// Gateway children enumerated
    ChildrenLoaded { gateway_id: String, count: usize },
}

impl DeviceEvent {
    pub fn device_id(&self) -> &str {
        match self {
            DeviceEvent::Updated { device_id, .. } => device_id,
            DeviceEvent::ChildrenLoaded { gateway_id, .. } => gateway_id,
        }
    }
}

/// Type alias for the broadcast sender.
pub type EventSender = tokio::sync::broadcast::Sender<DeviceEvent>;

/// Type alias for the broadcast receiver.
pub type EventReceiver = tokio::sync::broadcast::Receiver<DeviceEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(capacity)
}

/// Broadcast an update if `changes` is non-empty. Returns whether an event was sent.
pub(crate) fn publish_changes(
    tx: &EventSender,
    device_id: &str,
    model: &str,
    changes: ChangeSet,
    properties: Value,
) -> bool {
    if changes.is_empty() {
        return false;
    }
    // No receivers is fine; nothing is listening yet.
    let _ = tx.send(DeviceEvent::Updated {
        device_id: device_id.to_string(),
        model: model.to_string(),
        changes,
        properties,
    });
    true
}
