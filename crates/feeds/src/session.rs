//! Per-symbol connection lifecycle.
//!
//! A [`ConnectionSession`] owns one websocket for one (exchange, symbol)
//! pair and cycles through connect → subscribe → receive until it is either
//! stopped or runs out of retries:
//!
//! ```text
//! Disconnected → Connecting → Subscribed → Receiving ─┬─ stop ──→ Unsubscribing → Unsubscribed
//!                    ↑                                │
//!                    └──────── Backoff ←── closed ────┘──→ Terminated (retries exhausted)
//! ```
//!
//! Every disconnect, including a failed open, spends one retry. A disconnect
//! soon after the last subscribe is throttled so exchanges that reject rapid
//! resubscription are not hammered.

use crate::{
    ChannelId, Connection, Connector, ExchangeProfile, FeedError, IngestProducer, SessionConfig,
    SessionState, SharedSink, UnsubscribeRequest,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How one connection ended.
#[derive(Debug)]
enum Exit {
    /// Stop was requested; the connection has been torn down.
    Stopped,
    /// The connection failed to open or was lost.
    Disconnected(FeedError),
}

/// Drives one websocket connection for one symbol on one exchange.
pub struct ConnectionSession {
    profile: ExchangeProfile,
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    producer: IngestProducer,
    sink: SharedSink,
    cancel: CancellationToken,
    state_tx: watch::Sender<SessionState>,
    retry_count: u32,
    last_subscribe: Option<Instant>,
    /// Error that moved the session to `Failed`.
    failure: Option<FeedError>,
}

impl ConnectionSession {
    pub fn new(
        profile: ExchangeProfile,
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        producer: IngestProducer,
        sink: SharedSink,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Self {
            profile,
            config,
            connector,
            producer,
            sink,
            cancel,
            state_tx,
            retry_count: 0,
            last_subscribe: None,
            failure: None,
        }
    }

    pub fn profile(&self) -> &ExchangeProfile {
        &self.profile
    }

    /// Disconnects counted so far. Never reset.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// When the last subscribe request went out.
    pub fn last_subscribe(&self) -> Option<Instant> {
        self.last_subscribe
    }

    pub fn state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Token that stops the session at its next suspension point.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until stopped or out of retries.
    ///
    /// Returns `Ok(())` after a graceful stop and
    /// [`FeedError::RetriesExhausted`] when the retry budget is spent.
    /// Calling `run` again on a finished session returns immediately without
    /// touching the network.
    pub async fn run(&mut self) -> Result<(), FeedError> {
        match self.state() {
            SessionState::Unsubscribed => return Ok(()),
            SessionState::Terminated { retries } => {
                return Err(FeedError::RetriesExhausted { attempts: retries })
            }
            SessionState::Failed { reason } => {
                return Err(self
                    .failure
                    .clone()
                    .unwrap_or(FeedError::ConnectionClosed(reason)))
            }
            _ => {}
        }

        let exchange = self.profile.exchange();
        info!("{} {}: Starting session", exchange, self.profile.symbol());

        loop {
            if self.cancel.is_cancelled() {
                self.set_state(SessionState::Unsubscribed);
                return Ok(());
            }

            let exit = match self.run_connection().await {
                Ok(exit) => exit,
                Err(e) => {
                    error!("{} {}: Session failed: {}", exchange, self.profile.symbol(), e);
                    self.set_state(SessionState::Failed {
                        reason: e.to_string(),
                    });
                    self.failure = Some(e.clone());
                    return Err(e);
                }
            };

            let reason = match exit {
                Exit::Stopped => {
                    info!("{} {}: Session stopped", exchange, self.profile.symbol());
                    self.set_state(SessionState::Unsubscribed);
                    return Ok(());
                }
                Exit::Disconnected(reason) => reason,
            };

            let since_subscribe = self
                .last_subscribe
                .map(|at| at.elapsed())
                .unwrap_or(Duration::ZERO);
            self.retry_count += 1;
            warn!(
                "{} {}: Subscription lost after {:?}: {} (retry #{})",
                exchange,
                self.profile.symbol(),
                since_subscribe,
                reason,
                self.retry_count
            );

            if self.retry_count >= self.config.max_retries {
                error!(
                    "{} {}: Ran out of reconnection attempts. Have already tried {} times.",
                    exchange,
                    self.profile.symbol(),
                    self.retry_count
                );
                self.set_state(SessionState::Terminated {
                    retries: self.retry_count,
                });
                return Err(FeedError::RetriesExhausted {
                    attempts: self.retry_count,
                });
            }

            let hold = self.config.backoff_hold(since_subscribe);
            self.set_state(SessionState::Backoff {
                retries: self.retry_count,
                hold: hold.unwrap_or(Duration::ZERO),
            });

            if let Some(hold) = hold {
                info!(
                    "{} {}: Sleeping {:.1}s before reconnecting",
                    exchange,
                    self.profile.symbol(),
                    hold.as_secs_f64()
                );
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        info!("{} {}: Stopped during backoff", exchange, self.profile.symbol());
                        self.set_state(SessionState::Unsubscribed);
                        return Ok(());
                    }
                    _ = tokio::time::sleep(hold) => {}
                }
            }

            info!(
                "{} {}: Retrying to connect... attempt #{}",
                exchange,
                self.profile.symbol(),
                self.retry_count
            );
        }
    }

    /// Open, subscribe and pump one connection. The connection is closed on
    /// every path out of here.
    async fn run_connection(&mut self) -> Result<Exit, FeedError> {
        self.set_state(SessionState::Connecting);

        let connected = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(Exit::Stopped),
            connected = self.connector.connect(self.profile.endpoint()) => connected,
        };
        let mut conn = match connected {
            Ok(conn) => conn,
            Err(e) => return Ok(Exit::Disconnected(e)),
        };

        let exit = self.pump(&mut *conn).await;
        if matches!(exit, Ok(Exit::Stopped)) && self.state().is_subscribed() {
            self.unsubscribe(&mut *conn).await;
        }
        conn.close().await;
        exit
    }

    /// Subscribe, then move frames from the connection into the queue.
    async fn pump(&mut self, conn: &mut dyn Connection) -> Result<Exit, FeedError> {
        let exchange = self.profile.exchange();

        for frame in self.profile.subscribe_frames() {
            if let Err(e) = conn.send(frame).await {
                return Ok(Exit::Disconnected(e));
            }
        }
        self.last_subscribe = Some(Instant::now());
        self.set_state(SessionState::Subscribed);
        info!(
            "{} {}: Subscription request sent ({} frame(s))",
            exchange,
            self.profile.symbol(),
            self.profile.subscribe_frames().len()
        );

        self.set_state(SessionState::Receiving);
        let max_push_wait = self.config.max_push_wait();

        loop {
            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(Exit::Stopped),
                received = conn.recv() => received,
            };

            let text = match received {
                Ok(text) => text,
                Err(FeedError::Decode(e)) => {
                    warn!("{} {}: Skipping undecodable frame: {}", exchange, self.profile.symbol(), e);
                    continue;
                }
                Err(e) => return Ok(Exit::Disconnected(e)),
            };

            let payload: Value = match serde_json::from_str(&text) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(
                        "{} {}: Skipping non-JSON frame ({}): {}",
                        exchange,
                        self.profile.symbol(),
                        e,
                        text.chars().take(200).collect::<String>()
                    );
                    continue;
                }
            };

            let pushed = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(Exit::Stopped),
                pushed = self.producer.push_within(payload, max_push_wait) => pushed,
            };

            match pushed {
                Ok(()) => {}
                Err(e) if e.counts_toward_retry() => {
                    warn!(
                        "{} {}: {}, forcing reconnect to resync order book",
                        exchange,
                        self.profile.symbol(),
                        e
                    );
                    return Ok(Exit::Disconnected(e));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Best-effort teardown of the live subscription.
    async fn unsubscribe(&mut self, conn: &mut dyn Connection) {
        self.set_state(SessionState::Unsubscribing);
        let exchange = self.profile.exchange();

        let channel_ids: Vec<ChannelId> = if self.profile.requires_channel_ids() {
            self.sink.read().await.known_channel_ids()
        } else {
            Vec::new()
        };

        let frames = match self.profile.unsubscribe_frames(&channel_ids) {
            Ok(frames) => frames,
            Err(e) => {
                warn!("{} {}: Could not build unsubscribe: {}", exchange, self.profile.symbol(), e);
                return;
            }
        };
        if frames.is_empty() {
            debug!("{} {}: No open channels to unsubscribe", exchange, self.profile.symbol());
        }

        let ack_timeout = self.config.unsubscribe_ack_timeout();
        for request in frames {
            debug!(
                "{} {}: Unsubscription request sent: {}",
                exchange,
                self.profile.symbol(),
                request.frame
            );
            if let Err(e) = conn.send(&request.frame).await {
                warn!("{} {}: Unsubscribe send failed: {}", exchange, self.profile.symbol(), e);
                continue;
            }

            let deadline = Instant::now() + ack_timeout;
            let waited = tokio::time::timeout_at(deadline, self.await_ack(conn, &request)).await;
            let ack = waited.unwrap_or_else(|_| {
                Err(FeedError::UnsubscribeAckMismatch(format!(
                    "no reply to {} within {:?}",
                    request.frame, ack_timeout
                )))
            });

            match ack {
                Ok(reply) => info!(
                    "{} {}: Unsubscribe successful {}",
                    exchange,
                    self.profile.symbol(),
                    reply
                ),
                Err(e) => warn!("{} {}: {}", exchange, self.profile.symbol(), e),
            }
        }
    }

    /// Read until the reply acknowledging `request`. Every JSON frame read
    /// here, the ack included, still goes to the queue so the sink sees it.
    async fn await_ack(
        &mut self,
        conn: &mut dyn Connection,
        request: &UnsubscribeRequest,
    ) -> Result<Value, FeedError> {
        loop {
            let text = match conn.recv().await {
                Ok(text) => text,
                Err(FeedError::Decode(_)) => continue,
                Err(e) => return Err(FeedError::UnsubscribeAckMismatch(e.to_string())),
            };
            let reply: Value = match serde_json::from_str(&text) {
                Ok(reply) => reply,
                Err(_) => {
                    debug!(
                        "{} {}: Ignoring non-JSON frame while unsubscribing",
                        self.profile.exchange(),
                        self.profile.symbol()
                    );
                    continue;
                }
            };

            let is_ack = self.profile.is_unsubscribe_ack(request, &reply);
            if let Err(e) = self.producer.push(reply.clone()).await {
                debug!(
                    "{} {}: Frame dropped while unsubscribing: {}",
                    self.profile.exchange(),
                    self.profile.symbol(),
                    e
                );
            }
            if is_ack {
                return Ok(reply);
            }
        }
    }

    fn set_state(&self, state: SessionState) {
        debug!(
            "{} {}: -> {}",
            self.profile.exchange(),
            self.profile.symbol(),
            state.as_str()
        );
        self.state_tx.send_replace(state);
    }
}
