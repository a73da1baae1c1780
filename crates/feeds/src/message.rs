//! Message types passed between sessions and order book sinks.

use crate::ChannelId;
use ingest_core::Exchange;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// One decoded frame as it came off the wire.
///
/// `seq` is the arrival index within the producing session, starting at 0
/// and never reused, so consumers can check ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    pub seq: u64,
    pub payload: Value,
}

impl QueueItem {
    pub fn new(seq: u64, payload: Value) -> Self {
        Self { seq, payload }
    }

    /// Bitfinex-style event envelope name (`subscribed`, `unsubscribed`, `info`, ...).
    pub fn event(&self) -> Option<&str> {
        self.payload.get("event").and_then(Value::as_str)
    }

    /// GDAX-style message type (`received`, `open`, `done`, ...).
    pub fn message_type(&self) -> Option<&str> {
        self.payload.get("type").and_then(Value::as_str)
    }
}

/// Point-in-time view of a sink, for logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BookSnapshot {
    pub exchange: Exchange,
    pub symbol: String,
    /// Queue items applied so far.
    pub applied: u64,
    /// Channel ids the sink currently knows about.
    pub channels: Vec<ChannelId>,
    /// Sink-specific rendering of its book.
    pub rendered: String,
}

impl BookSnapshot {
    /// A snapshot of a sink that has applied nothing.
    pub fn empty(exchange: Exchange, symbol: impl Into<String>) -> Self {
        Self {
            exchange,
            symbol: symbol.into(),
            applied: 0,
            channels: Vec::new(),
            rendered: String::new(),
        }
    }
}

impl fmt::Display for BookSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {} messages", self.exchange, self.symbol, self.applied)?;
        if !self.channels.is_empty() {
            write!(f, ", channels {:?}", self.channels)?;
        }
        if !self.rendered.is_empty() {
            write!(f, " [{}]", self.rendered)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_queue_item_envelope_accessors() {
        let item = QueueItem::new(0, json!({"event": "subscribed", "chanId": 7}));
        assert_eq!(item.event(), Some("subscribed"));
        assert_eq!(item.message_type(), None);

        let item = QueueItem::new(1, json!({"type": "open", "side": "buy"}));
        assert_eq!(item.message_type(), Some("open"));

        let item = QueueItem::new(2, json!([7, "hb"]));
        assert_eq!(item.event(), None);
        assert_eq!(item.message_type(), None);
    }

    #[test]
    fn test_book_snapshot_display() {
        let mut snapshot = BookSnapshot::empty(Exchange::Gdax, "BTC-USD");
        assert_eq!(snapshot.to_string(), "gdax BTC-USD: 0 messages");

        snapshot.applied = 12;
        snapshot.channels = vec![17, 18];
        snapshot.rendered = "open=7 done=5".to_string();
        assert_eq!(
            snapshot.to_string(),
            "gdax BTC-USD: 12 messages, channels [17, 18] [open=7 done=5]"
        );
    }
}
