//! Per-tag event fan-out.
//!
//! Dispatches are published into a broadcast channel per event tag, so a
//! `MESSAGE_CREATE` subscriber never sees (or lags behind) traffic for
//! other tags, and dropping one subscription leaves every other tag's
//! listeners untouched. `subscribe_all` taps the firehose.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;

const ALL_EVENTS: &str = "*";

/// One decoded gateway dispatch.
#[derive(Debug, Clone)]
pub struct DispatchEvent {
    pub shard_id: u32,
    pub event_type: String,
    pub data: Value,
}

/// Typed dispatch fan-out, one broadcast channel per event tag.
pub struct EventBus {
    capacity: usize,
    channels: RwLock<HashMap<String, broadcast::Sender<Arc<DispatchEvent>>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe to one event tag (e.g. `"MESSAGE_CREATE"`).
    pub fn subscribe(&self, event_type: &str) -> broadcast::Receiver<Arc<DispatchEvent>> {
        self.receiver_for(event_type)
    }

    /// Subscribe to every dispatch regardless of tag.
    pub fn subscribe_all(&self) -> broadcast::Receiver<Arc<DispatchEvent>> {
        self.receiver_for(ALL_EVENTS)
    }

    fn receiver_for(&self, tag: &str) -> broadcast::Receiver<Arc<DispatchEvent>> {
        if let Some(tx) = self.channels.read().get(tag) {
            return tx.subscribe();
        }
        let mut channels = self.channels.write();
        channels
            .entry(tag.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub(crate) fn publish(&self, event: DispatchEvent) {
        let event = Arc::new(event);
        let mut dead: Vec<String> = Vec::new();
        {
            let channels = self.channels.read();
            for tag in [event.event_type.as_str(), ALL_EVENTS] {
                if let Some(tx) = channels.get(tag) {
                    if tx.send(event.clone()).is_err() {
                        // Every receiver for this tag is gone.
                        dead.push(tag.to_string());
                    }
                }
            }
        }
        if !dead.is_empty() {
            let mut channels = self.channels.write();
            for tag in dead {
                // Re-check under the write lock: a new subscriber may have
                // appeared in between.
                if channels
                    .get(&tag)
                    .is_some_and(|tx| tx.receiver_count() == 0)
                {
                    channels.remove(&tag);
                }
            }
        }
    }

    #[cfg(test)]
    fn channel_count(&self) -> usize {
        self.channels.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(tag: &str) -> DispatchEvent {
        DispatchEvent {
            shard_id: 0,
            event_type: tag.to_string(),
            data: Value::Null,
        }
    }

    #[tokio::test]
    async fn tags_are_independent() {
        let bus = EventBus::new(16);
        let mut messages = bus.subscribe("MESSAGE_CREATE");
        let mut guilds = bus.subscribe("GUILD_CREATE");

        bus.publish(event("MESSAGE_CREATE"));

        let got = messages.recv().await.unwrap();
        assert_eq!(got.event_type, "MESSAGE_CREATE");
        assert!(guilds.try_recv().is_err());
    }

    #[tokio::test]
    async fn subscribe_all_sees_everything() {
        let bus = EventBus::new(16);
        let mut all = bus.subscribe_all();

        bus.publish(event("MESSAGE_CREATE"));
        bus.publish(event("PRESENCE_UPDATE"));

        assert_eq!(all.recv().await.unwrap().event_type, "MESSAGE_CREATE");
        assert_eq!(all.recv().await.unwrap().event_type, "PRESENCE_UPDATE");
    }

    #[tokio::test]
    async fn dropping_one_tag_leaves_others_alive() {
        let bus = EventBus::new(16);
        let messages = bus.subscribe("MESSAGE_CREATE");
        let mut guilds = bus.subscribe("GUILD_CREATE");
        drop(messages);

        // Publishing to the orphaned tag prunes it; the other tag still works.
        bus.publish(event("MESSAGE_CREATE"));
        bus.publish(event("GUILD_CREATE"));

        assert_eq!(got_type(&mut guilds).await, "GUILD_CREATE");
        assert_eq!(bus.channel_count(), 1);
    }

    async fn got_type(rx: &mut broadcast::Receiver<Arc<DispatchEvent>>) -> String {
        rx.recv().await.unwrap().event_type.clone()
    }
}
