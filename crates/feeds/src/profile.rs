//! Exchange wire dialects.
//!
//! An [`ExchangeProfile`] is built once per (exchange, symbol) and carries
//! every frame a session needs to send: the book subscription, an optional
//! trades subscription and the unsubscribe strategy. Sessions never look at
//! the exchange identity themselves; they only talk to the profile.

use crate::FeedError;
use ingest_core::Exchange;
use serde::Serialize;
use serde_json::Value;
use url::Url;

/// Server-assigned identifier of a subscribed stream.
pub type ChannelId = u64;

pub const GDAX_WS_URL: &str = "wss://ws-feed.gdax.com";
pub const BITFINEX_WS_URL: &str = "wss://api.bitfinex.com/ws/2";

/// Depth requested from Bitfinex raw books.
const BITFINEX_BOOK_LEN: &str = "100";

/// Default websocket endpoint for an exchange.
pub fn default_endpoint(exchange: Exchange) -> &'static str {
    match exchange {
        Exchange::Gdax => GDAX_WS_URL,
        Exchange::Bitfinex => BITFINEX_WS_URL,
    }
}

/// How a subscription is torn down, and how the server confirms it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsubscribeStrategy {
    /// A single precomputed request covers the whole subscription. The reply
    /// is any frame whose `type` equals `ack_type`.
    Single {
        frame: String,
        ack_type: &'static str,
    },
    /// One request per channel id the server assigned at subscribe time.
    /// The ids come from the order book sink. Each is confirmed by an
    /// `unsubscribed` event with `"status":"OK"` naming the same `chanId`.
    PerChannel,
}

/// One unsubscribe frame, with the channel it targets when there is one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribeRequest {
    pub frame: String,
    pub chan_id: Option<ChannelId>,
}

#[derive(Serialize)]
struct GdaxRequest<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    product_ids: [&'a str; 1],
    channels: [&'a str; 1],
}

#[derive(Serialize)]
struct BitfinexBookSubscribe<'a> {
    event: &'a str,
    channel: &'a str,
    prec: &'a str,
    freq: &'a str,
    symbol: &'a str,
    len: &'a str,
}

#[derive(Serialize)]
struct BitfinexTradesSubscribe<'a> {
    event: &'a str,
    channel: &'a str,
    symbol: &'a str,
}

#[derive(Serialize)]
struct BitfinexUnsubscribe<'a> {
    event: &'a str,
    #[serde(rename = "chanId")]
    chan_id: ChannelId,
}

/// Immutable description of one exchange's subscription handshake for one symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeProfile {
    exchange: Exchange,
    symbol: String,
    endpoint: String,
    subscribe: String,
    trades: Option<String>,
    unsubscribe: UnsubscribeStrategy,
}

impl ExchangeProfile {
    /// Build the profile for `symbol` on `exchange` using the public endpoint.
    pub fn new(exchange: Exchange, symbol: &str) -> Result<Self, FeedError> {
        Self::with_endpoint(exchange, symbol, default_endpoint(exchange))
    }

    /// Build a profile from a configured exchange name.
    pub fn from_name(exchange: &str, symbol: &str) -> Result<Self, FeedError> {
        Self::new(exchange.parse()?, symbol)
    }

    /// Build the profile against a specific endpoint (proxies, local test servers).
    pub fn with_endpoint(
        exchange: Exchange,
        symbol: &str,
        endpoint: &str,
    ) -> Result<Self, FeedError> {
        let endpoint = validate_endpoint(endpoint)?;

        let (subscribe, trades, unsubscribe) = match exchange {
            Exchange::Gdax => {
                let subscribe = serde_json::to_string(&GdaxRequest {
                    kind: "subscribe",
                    product_ids: [symbol],
                    channels: ["full"],
                })?;
                let unsubscribe = serde_json::to_string(&GdaxRequest {
                    kind: "unsubscribe",
                    product_ids: [symbol],
                    channels: ["full"],
                })?;
                let unsubscribe = UnsubscribeStrategy::Single {
                    frame: unsubscribe,
                    ack_type: "subscriptions",
                };
                (subscribe, None, unsubscribe)
            }
            Exchange::Bitfinex => {
                let subscribe = serde_json::to_string(&BitfinexBookSubscribe {
                    event: "subscribe",
                    channel: "book",
                    prec: "R0",
                    freq: "F0",
                    symbol,
                    len: BITFINEX_BOOK_LEN,
                })?;
                let trades = serde_json::to_string(&BitfinexTradesSubscribe {
                    event: "subscribe",
                    channel: "trades",
                    symbol,
                })?;
                (subscribe, Some(trades), UnsubscribeStrategy::PerChannel)
            }
        };

        Ok(Self {
            exchange,
            symbol: symbol.to_string(),
            endpoint,
            subscribe,
            trades,
            unsubscribe,
        })
    }

    pub fn exchange(&self) -> Exchange {
        self.exchange
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn subscribe_message(&self) -> &str {
        &self.subscribe
    }

    pub fn trades_message(&self) -> Option<&str> {
        self.trades.as_deref()
    }

    pub fn unsubscribe_strategy(&self) -> &UnsubscribeStrategy {
        &self.unsubscribe
    }

    /// Whether unsubscribing needs the channel ids recorded by the sink.
    pub fn requires_channel_ids(&self) -> bool {
        matches!(self.unsubscribe, UnsubscribeStrategy::PerChannel)
    }

    /// Frames to send after connecting, in order: book first, then trades.
    pub fn subscribe_frames(&self) -> Vec<&str> {
        std::iter::once(self.subscribe.as_str())
            .chain(self.trades.as_deref())
            .collect()
    }

    /// Requests that tear the subscription down.
    ///
    /// `channel_ids` is ignored for single-request profiles.
    pub fn unsubscribe_frames(
        &self,
        channel_ids: &[ChannelId],
    ) -> Result<Vec<UnsubscribeRequest>, FeedError> {
        match &self.unsubscribe {
            UnsubscribeStrategy::Single { frame, .. } => Ok(vec![UnsubscribeRequest {
                frame: frame.clone(),
                chan_id: None,
            }]),
            UnsubscribeStrategy::PerChannel => channel_ids
                .iter()
                .map(|&chan_id| -> Result<UnsubscribeRequest, FeedError> {
                    let frame = serde_json::to_string(&BitfinexUnsubscribe {
                        event: "unsubscribe",
                        chan_id,
                    })?;
                    Ok(UnsubscribeRequest {
                        frame,
                        chan_id: Some(chan_id),
                    })
                })
                .collect(),
        }
    }

    /// Whether a decoded frame acknowledges `request`.
    pub fn is_unsubscribe_ack(&self, request: &UnsubscribeRequest, reply: &Value) -> bool {
        match &self.unsubscribe {
            UnsubscribeStrategy::Single { ack_type, .. } => {
                reply.get("type").and_then(Value::as_str) == Some(*ack_type)
            }
            UnsubscribeStrategy::PerChannel => {
                reply.get("event").and_then(Value::as_str) == Some("unsubscribed")
                    && reply.get("status").and_then(Value::as_str) == Some("OK")
                    && reply.get("chanId").and_then(Value::as_u64) == request.chan_id
            }
        }
    }
}

fn validate_endpoint(endpoint: &str) -> Result<String, FeedError> {
    let url = Url::parse(endpoint)?;
    match url.scheme() {
        "ws" | "wss" => Ok(endpoint.to_string()),
        other => Err(FeedError::InvalidEndpoint(format!(
            "unsupported scheme {other:?} in {endpoint}"
        ))),
    }
}
