//! Order book sink interface.
//!
//! A sink owns the live order book for one session. It consumes the ingest
//! queue through [`run_sink`], and the session reads it once, at unsubscribe
//! time, to learn which channel ids the server assigned.

use crate::{BookSnapshot, ChannelId, IngestConsumer, QueueItem};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Consumer side of a session: applies queued frames to an order book.
pub trait OrderBookSink: Send + Sync {
    /// Apply one queued frame.
    fn apply_message(&mut self, item: &QueueItem);

    /// Channel ids currently open on the server, for per-channel unsubscription.
    fn known_channel_ids(&self) -> Vec<ChannelId>;

    /// Current best-known book.
    fn render_snapshot(&self) -> BookSnapshot;
}

/// Sink shared between its drain task (writer) and its session (reader).
pub type SharedSink = Arc<RwLock<dyn OrderBookSink>>;

/// Wrap a sink for sharing.
pub fn shared<S: OrderBookSink + 'static>(sink: S) -> SharedSink {
    Arc::new(RwLock::new(sink))
}

/// Apply queued items to `sink` until the producing session is gone.
///
/// Returns the number of items applied.
pub async fn run_sink(mut consumer: IngestConsumer, sink: SharedSink) -> u64 {
    debug!("Starting sink drain");
    let mut applied = 0u64;

    while let Some(item) = consumer.pop().await {
        sink.write().await.apply_message(&item);
        applied += 1;
    }

    debug!("Sink drain stopped after {} items", applied);
    applied
}

/// Tracks server-assigned channel ids from subscription envelopes.
///
/// Understands `{"event":"subscribed","channel":..,"chanId":..}` and
/// `{"event":"unsubscribed","chanId":..}`. An `info` event carrying a
/// `version` marks a fresh connection, so every id recorded before it is
/// forgotten.
#[derive(Debug, Clone, Default)]
pub struct ChannelTracker {
    channels: BTreeMap<ChannelId, String>,
}

impl ChannelTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect a frame. Returns true if it changed the tracked set.
    pub fn observe(&mut self, payload: &Value) -> bool {
        let Some(event) = payload.get("event").and_then(Value::as_str) else {
            return false;
        };
        let chan_id = payload.get("chanId").and_then(Value::as_u64);

        match (event, chan_id) {
            ("subscribed", Some(id)) => {
                let channel = payload
                    .get("channel")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                self.channels.insert(id, channel);
                true
            }
            ("unsubscribed", Some(id)) => self.channels.remove(&id).is_some(),
            ("info", _) if payload.get("version").is_some() => {
                let changed = !self.channels.is_empty();
                self.channels.clear();
                changed
            }
            _ => false,
        }
    }

    /// Ids in ascending order.
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.channels.keys().copied().collect()
    }

    /// Channel name (`book`, `trades`, ...) for an id.
    pub fn channel_name(&self, id: ChannelId) -> Option<&str> {
        self.channels.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
