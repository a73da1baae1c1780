//! Order book ingestion from exchange websocket feeds.
//!
//! Each tracked (exchange, symbol) pair gets a [`ConnectionSession`] that
//! keeps one websocket subscribed and pushes every decoded frame into a
//! bounded queue. A consumer drains the queue into an [`OrderBookSink`].
//!
//! ## Architecture
//!
//! - `profile` - Per-exchange endpoints and subscribe/unsubscribe frames
//! - `session` - Connection lifecycle, reconnect budget and backoff
//! - `queue` - Bounded producer/consumer queue between session and sink
//! - `sink` - Order book sink interface and channel id tracking
//! - `supervisor` - Starts and stops sessions by key
//! - `websocket` - Transport seam and the `tokio-tungstenite` implementation

pub mod error;
pub mod feed;
pub mod message;
pub mod profile;
pub mod queue;
pub mod session;
pub mod sink;
pub mod supervisor;
pub mod websocket;

#[cfg(test)]
mod mock;

pub use error::*;
pub use feed::*;
pub use message::*;
pub use profile::*;
pub use queue::{IngestConsumer, IngestProducer, DEFAULT_QUEUE_CAPACITY};
pub use session::*;
pub use sink::*;
pub use supervisor::*;
pub use websocket::*;
