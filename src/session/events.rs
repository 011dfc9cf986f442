use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::trace;

/// Channel every error frame is published on
pub const ERROR_CHANNEL: &str = "error";

const DEFAULT_CAPACITY: usize = 1024;

/// Named publish/subscribe channels for server frames
///
/// Channels are created on first listener. Listeners that fall more than
/// `capacity` frames behind lose the oldest ones.
#[derive(Debug)]
pub struct EventBroadcaster {
    channels: Mutex<HashMap<String, broadcast::Sender<Value>>>,
    capacity: usize,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<Value>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a listener on a channel
    pub fn on(&self, channel: &str) -> broadcast::Receiver<Value> {
        self.channels()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Remove every listener of a channel
    pub fn off(&self, channel: &str) {
        self.channels().remove(channel);
    }

    /// Publish a frame; returns how many listeners received it
    pub fn publish(&self, channel: &str, frame: Value) -> usize {
        let mut channels = self.channels();
        let Some(sender) = channels.get(channel) else {
            trace!(channel, "No listeners for channel");
            return 0;
        };

        match sender.send(frame) {
            Ok(count) => count,
            Err(_) => {
                // every receiver was dropped
                channels.remove(channel);
                0
            }
        }
    }

    pub fn listener_count(&self, channel: &str) -> usize {
        self.channels()
            .get(channel)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_publish_reaches_listeners_in_order() {
        let events = EventBroadcaster::new();
        let mut first = events.on("tick");
        let mut second = events.on("tick");

        assert_eq!(events.publish("tick", json!({"n": 1})), 2);
        assert_eq!(events.publish("tick", json!({"n": 2})), 2);

        assert_eq!(first.try_recv().unwrap(), json!({"n": 1}));
        assert_eq!(first.try_recv().unwrap(), json!({"n": 2}));
        assert_eq!(second.try_recv().unwrap(), json!({"n": 1}));
    }

    #[test]
    fn test_publish_without_listeners() {
        let events = EventBroadcaster::new();
        assert_eq!(events.publish("balance", json!({})), 0);
        assert_eq!(events.listener_count("balance"), 0);
    }

    #[test]
    fn test_off_removes_listeners() {
        let events = EventBroadcaster::new();
        let mut listener = events.on(ERROR_CHANNEL);
        events.off(ERROR_CHANNEL);
        assert_eq!(events.publish(ERROR_CHANNEL, json!({})), 0);
        assert!(listener.try_recv().is_err());
    }

    #[test]
    fn test_dropped_listeners_are_pruned() {
        let events = EventBroadcaster::new();
        let listener = events.on("tick");
        assert_eq!(events.listener_count("tick"), 1);
        drop(listener);
        assert_eq!(events.publish("tick", json!({})), 0);
        assert_eq!(events.listener_count("tick"), 0);
    }
}
