//! Session supervisor.
//!
//! Starts one [`ConnectionSession`] plus one sink drain per tracked
//! (exchange, symbol) pair and lets callers stop them by key.

use crate::{
    queue, run_sink, ConnectionSession, Connector, ExchangeProfile, FeedError, SessionConfig,
    SessionState, SharedSink, WsConnector,
};
use dashmap::{mapref::entry::Entry, DashMap};
use ingest_core::Exchange;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Key identifying one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub exchange: Exchange,
    pub symbol: String,
}

impl SessionKey {
    pub fn new(exchange: Exchange, symbol: impl Into<String>) -> Self {
        Self {
            exchange,
            symbol: symbol.into(),
        }
    }
}

/// Control handle for a running session.
///
/// Cheap to clone. The session's terminal state doubles as its outcome
/// signal: [`SessionState::Unsubscribed`] after a stop,
/// [`SessionState::Terminated`] after retries ran out.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    key: SessionKey,
    cancel: CancellationToken,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Watch lifecycle transitions.
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Wait for the session to finish on its own.
    pub async fn wait(&self) -> SessionState {
        let mut state = self.state.clone();
        let terminal = match state.wait_for(SessionState::is_terminal).await {
            Ok(terminal) => terminal.clone(),
            // The session task went away without publishing a terminal state.
            Err(_) => SessionState::Failed {
                reason: "session task ended unexpectedly".to_string(),
            },
        };
        terminal
    }

    /// Ask the session to unsubscribe and wait until it has finished.
    ///
    /// Stopping a finished session returns its terminal state and sends nothing.
    pub async fn stop(&self) -> SessionState {
        if !self.is_finished() {
            self.cancel.cancel();
        }
        self.wait().await
    }
}

/// Owns the set of running sessions.
pub struct Supervisor {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    sessions: DashMap<SessionKey, SessionHandle>,
}

impl Supervisor {
    /// Supervisor using real websocket connections.
    pub fn new(config: SessionConfig) -> Self {
        let connector = Arc::new(WsConnector::new(config.connect_timeout()));
        Self::with_connector(config, connector)
    }

    pub fn with_connector(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            sessions: DashMap::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start a session for `symbol` on the exchange named `exchange`.
    ///
    /// Unknown exchange names are a configuration error.
    pub fn start(
        &self,
        symbol: &str,
        exchange: &str,
        sink: SharedSink,
    ) -> Result<SessionHandle, FeedError> {
        let profile = ExchangeProfile::from_name(exchange, symbol)?;
        self.start_profile(profile, sink)
    }

    /// Start a session from a prepared profile.
    ///
    /// Fails with [`FeedError::SessionExists`] while a session for the same
    /// key is still running. A finished session is replaced.
    pub fn start_profile(
        &self,
        profile: ExchangeProfile,
        sink: SharedSink,
    ) -> Result<SessionHandle, FeedError> {
        let key = SessionKey::new(profile.exchange(), profile.symbol());
        let (producer, consumer) = queue::bounded(self.config.queue_capacity);
        let cancel = CancellationToken::new();
        let mut session = ConnectionSession::new(
            profile,
            self.config.clone(),
            self.connector.clone(),
            producer,
            sink.clone(),
            cancel.clone(),
        );
        let handle = SessionHandle {
            key: key.clone(),
            cancel,
            state: session.subscribe_state(),
        };

        // Check and register under one shard lock so concurrent starts for
        // the same key admit exactly one session.
        match self.sessions.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_finished() {
                    return Err(FeedError::SessionExists {
                        exchange: key.exchange,
                        symbol: key.symbol,
                    });
                }
                entry.insert(handle.clone());
            }
            Entry::Vacant(entry) => {
                entry.insert(handle.clone());
            }
        }

        tokio::spawn(run_sink(consumer, sink));

        let task_key = key.clone();
        tokio::spawn(async move {
            match session.run().await {
                Ok(()) => info!(
                    "{} {}: Session unsubscribed",
                    task_key.exchange, task_key.symbol
                ),
                Err(e) => error!("{} {}: Session ended: {}", task_key.exchange, task_key.symbol, e),
            }
        });

        info!("{} {}: Session started", key.exchange, key.symbol);
        Ok(handle)
    }

    /// Stop the session for `symbol` on `exchange` and return its terminal state.
    ///
    /// Stopping an already finished session is a no-op that returns the same state.
    pub async fn stop(&self, symbol: &str, exchange: Exchange) -> Result<SessionState, FeedError> {
        let handle = self.handle(symbol, exchange).ok_or_else(|| FeedError::SessionNotFound {
            exchange,
            symbol: symbol.to_string(),
        })?;
        Ok(handle.stop().await)
    }

    /// Stop every session concurrently.
    pub async fn stop_all(&self) -> Vec<(SessionKey, SessionState)> {
        let handles: Vec<SessionHandle> = self.sessions.iter().map(|e| e.value().clone()).collect();
        let stops = handles.into_iter().map(|handle| async move {
            let state = handle.stop().await;
            (handle.key().clone(), state)
        });
        let mut results = futures_util::future::join_all(stops).await;
        results.sort_by(|a, b| a.0.cmp(&b.0));

        for (key, state) in &results {
            if !matches!(state, SessionState::Unsubscribed) {
                warn!("{} {}: Finished as {:?}", key.exchange, key.symbol, state);
            }
        }
        results
    }

    pub fn handle(&self, symbol: &str, exchange: Exchange) -> Option<SessionHandle> {
        self.sessions
            .get(&SessionKey::new(exchange, symbol))
            .map(|entry| entry.value().clone())
    }

    pub fn state(&self, symbol: &str, exchange: Exchange) -> Option<SessionState> {
        self.handle(symbol, exchange).map(|handle| handle.state())
    }

    /// Number of sessions that have not reached a terminal state.
    pub fn active_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| !entry.value().is_finished())
            .count()
    }

    pub fn keys(&self) -> Vec<SessionKey> {
        let mut keys: Vec<SessionKey> = self.sessions.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}
