//! WebSocket transport for sessions.
//!
//! Sessions open connections through the [`Connector`] trait so the state
//! machine can be driven by a scripted transport in tests. [`WsConnector`]
//! is the production implementation on top of `tokio-tungstenite`.

use crate::FeedError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};

/// Opens connections to an endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Connection>, FeedError>;
}

/// One open connection, exclusively owned by a session.
#[async_trait]
pub trait Connection: Send {
    /// Send one text frame.
    async fn send(&mut self, frame: &str) -> Result<(), FeedError>;

    /// Wait for the next application frame.
    ///
    /// Returns [`FeedError::ConnectionClosed`] once the peer or the network
    /// closes the connection, and [`FeedError::Decode`] for a frame that is
    /// not valid text.
    async fn recv(&mut self) -> Result<String, FeedError>;

    /// Close the connection. Errors are ignored; the handle is dropped afterwards.
    async fn close(&mut self);
}

/// `tokio-tungstenite` connector.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Connection>, FeedError> {
        debug!("Connecting to {}", endpoint);

        let (stream, response) = tokio::time::timeout(self.connect_timeout, connect_async(endpoint))
            .await
            .map_err(|_| {
                FeedError::ConnectionOpenFailed(format!(
                    "timed out after {:?} connecting to {}",
                    self.connect_timeout, endpoint
                ))
            })?
            .map_err(|e| FeedError::ConnectionOpenFailed(e.to_string()))?;

        debug!("Connected to {} (status: {:?})", endpoint, response.status());
        Ok(Box::new(WsConnection { stream }))
    }
}

/// A live `tokio-tungstenite` connection.
pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, frame: &str) -> Result<(), FeedError> {
        self.stream
            .send(Message::Text(frame.to_string()))
            .await
            .map_err(|e| FeedError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Result<String, FeedError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Binary(data))) => {
                    return String::from_utf8(data).map_err(|e| FeedError::Decode(e.to_string()));
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        return Err(FeedError::ConnectionClosed(format!("PONG send failed: {}", e)));
                    }
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    debug!("Received close frame: {:?}", frame);
                    let reason = frame
                        .map(|f| format!("close frame {} {}", f.code, f.reason))
                        .unwrap_or_else(|| "close frame".to_string());
                    return Err(FeedError::ConnectionClosed(reason));
                }
                Some(Err(e)) => {
                    warn!("WebSocket read error: {}", e);
                    return Err(FeedError::ConnectionClosed(e.to_string()));
                }
                None => return Err(FeedError::ConnectionClosed("stream ended".to_string())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("Ignoring error while closing WebSocket: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{queue, sink, BookSnapshot, ChannelId, ConnectionSession, ExchangeProfile};
    use crate::{OrderBookSink, QueueItem, SessionConfig, SessionState};
    use ingest_core::Exchange;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_util::sync::CancellationToken;

    struct NullSink;

    impl OrderBookSink for NullSink {
        fn apply_message(&mut self, _item: &QueueItem) {}

        fn known_channel_ids(&self) -> Vec<ChannelId> {
            Vec::new()
        }

        fn render_snapshot(&self) -> BookSnapshot {
            BookSnapshot::empty(Exchange::Gdax, "BTC-USD")
        }
    }

    /// Single-connection feed server: records what the client sends, pushes
    /// one snapshot and acknowledges the unsubscribe.
    async fn serve_once(listener: TcpListener, received: oneshot::Sender<Vec<String>>) {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        let mut frames = Vec::new();

        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            frames.push(text.clone());
            if text.contains("\"subscribe\"") {
                ws.send(Message::Text(
                    r#"{"type":"snapshot","product_id":"BTC-USD","bids":[["100.0","1.5"]],"asks":[]}"#
                        .to_string(),
                ))
                .await
                .unwrap();
            } else if text.contains("\"unsubscribe\"") {
                ws.send(Message::Text(r#"{"type":"subscriptions","channels":[]}"#.to_string()))
                    .await
                    .unwrap();
            }
        }
        let _ = received.send(frames);
    }

    #[tokio::test]
    async fn test_session_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("ws://{}", listener.local_addr().unwrap());
        let (tx, rx) = oneshot::channel();
        tokio::spawn(serve_once(listener, tx));

        let profile = ExchangeProfile::with_endpoint(Exchange::Gdax, "BTC-USD", &endpoint).unwrap();
        let config = SessionConfig {
            connect_timeout_ms: 2_000,
            unsubscribe_ack_timeout_ms: 2_000,
            ..Default::default()
        };
        let (producer, mut consumer) = queue::bounded(config.queue_capacity);
        let connector = Arc::new(WsConnector::new(config.connect_timeout()));
        let mut session = ConnectionSession::new(
            profile,
            config,
            connector,
            producer,
            sink::shared(NullSink),
            CancellationToken::new(),
        );
        let cancel = session.cancel_token();
        let task = tokio::spawn(async move {
            let result = session.run().await;
            (session.state(), result)
        });

        let item = consumer.pop().await.unwrap();
        assert_eq!(item.seq, 0);
        assert_eq!(item.message_type(), Some("snapshot"));

        cancel.cancel();
        let (state, result) = task.await.unwrap();
        result.unwrap();
        assert_eq!(state, SessionState::Unsubscribed);

        let frames = rx.await.unwrap();
        assert_eq!(
            frames,
            vec![
                r#"{"type":"subscribe","product_ids":["BTC-USD"],"channels":["full"]}"#.to_string(),
                r#"{"type":"unsubscribe","product_ids":["BTC-USD"],"channels":["full"]}"#.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_connect_refused_is_open_failure() {
        // Nothing listens on the discard port on loopback.
        let connector = WsConnector::new(Duration::from_secs(2));
        let result = connector.connect("ws://127.0.0.1:9").await;
        assert!(matches!(result, Err(FeedError::ConnectionOpenFailed(_))));
    }

    #[test]
    fn test_default_timeout() {
        let connector = WsConnector::default();
        assert_eq!(connector.connect_timeout, Duration::from_secs(10));
    }
}
