//! Delivery of display events to overlay clients.
//!
//! A single `tokio::sync::broadcast` channel carries every published event;
//! each connected socket keeps the set of rooms it joined and drops the rest.

pub mod server;

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Slow sockets that fall this far behind skip events.
const BROADCAST_CAPACITY: usize = 1024;

pub const NEW_MESSAGE_EVENT: &str = "new-message";
pub const STOP_EVENT: &str = "stop";

/// Room an overlay joins to receive a guild's events.
pub fn guild_topic(guild_id: &str) -> String {
    format!("messages-{}", guild_id)
}

/// Fire-and-forget publish-by-topic.
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, event: &str, payload: Value);
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayEvent {
    pub topic: String,
    pub event: String,
    pub payload: Value,
}

#[derive(Clone)]
pub struct OverlayHub {
    sender: broadcast::Sender<Arc<OverlayEvent>>,
}

impl Default for OverlayHub {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<OverlayEvent>> {
        self.sender.subscribe()
    }
}

impl Publisher for OverlayHub {
    fn publish(&self, topic: &str, event: &str, payload: Value) {
        let event = OverlayEvent {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
        };
        // No connected overlay is not an error.
        match self.sender.send(Arc::new(event)) {
            Ok(receivers) => debug!("Published to {} socket(s) on {}", receivers, topic),
            Err(_) => debug!("No overlay connected, dropped event for {}", topic),
        }
    }
}
