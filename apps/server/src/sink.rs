//! Logging sink used by the server.
//!
//! Stands in for a real order book: it classifies frames by their envelope
//! (`type` for GDAX, `event` or channel name for Bitfinex) and tracks
//! channel ids so sessions can unsubscribe, but never interprets prices.

use ingest_core::Exchange;
use ingest_feeds::{BookSnapshot, ChannelId, ChannelTracker, OrderBookSink, QueueItem};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::trace;

pub struct LoggingSink {
    exchange: Exchange,
    symbol: String,
    channels: ChannelTracker,
    kinds: BTreeMap<String, u64>,
    applied: u64,
}

impl LoggingSink {
    pub fn new(exchange: Exchange, symbol: &str) -> Self {
        Self {
            exchange,
            symbol: symbol.to_string(),
            channels: ChannelTracker::new(),
            kinds: BTreeMap::new(),
            applied: 0,
        }
    }

    /// Frames seen per kind, e.g. `open=12 done=9 subscriptions=1`.
    pub fn summary(&self) -> String {
        self.kinds
            .iter()
            .map(|(kind, count)| format!("{}={}", kind, count))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn count(&self, kind: &str) -> u64 {
        self.kinds.get(kind).copied().unwrap_or(0)
    }

    fn classify(&self, item: &QueueItem) -> String {
        if let Some(kind) = item.message_type().or_else(|| item.event()) {
            return kind.to_string();
        }
        // Bitfinex data frames: [chanId, payload]
        let channel = item
            .payload
            .as_array()
            .and_then(|frame| frame.first())
            .and_then(Value::as_u64)
            .and_then(|id| self.channels.channel_name(id));
        match (channel, item.payload.get(1).and_then(Value::as_str)) {
            (Some(_), Some("hb")) => "heartbeat".to_string(),
            (Some(name), _) => name.to_string(),
            (None, _) => "unknown".to_string(),
        }
    }
}

impl OrderBookSink for LoggingSink {
    fn apply_message(&mut self, item: &QueueItem) {
        self.channels.observe(&item.payload);
        let kind = self.classify(item);
        trace!("{} {}: #{} {}", self.exchange, self.symbol, item.seq, kind);

        *self.kinds.entry(kind).or_default() += 1;
        self.applied += 1;
    }

    fn known_channel_ids(&self) -> Vec<ChannelId> {
        self.channels.channel_ids()
    }

    fn render_snapshot(&self) -> BookSnapshot {
        BookSnapshot {
            exchange: self.exchange,
            symbol: self.symbol.clone(),
            applied: self.applied,
            channels: self.channels.channel_ids(),
            rendered: self.summary(),
        }
    }
}
