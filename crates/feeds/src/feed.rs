//! Session lifecycle states and tuning.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifecycle state of a [`ConnectionSession`](crate::ConnectionSession).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Subscribed,
    Receiving,
    /// Waiting before the next connection attempt.
    Backoff { retries: u32, hold: Duration },
    Unsubscribing,
    /// Graceful terminal state after a stop request.
    Unsubscribed,
    /// Failure terminal state after the retry budget ran out.
    Terminated { retries: u32 },
    /// The session stopped on an error it cannot retry (e.g. its queue consumer went away).
    Failed { reason: String },
}

impl SessionState {
    /// Check if the session has finished and will make no further attempts.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Unsubscribed
                | SessionState::Terminated { .. }
                | SessionState::Failed { .. }
        )
    }

    /// Check if a subscribe has been sent on the current connection.
    pub fn is_subscribed(&self) -> bool {
        matches!(self, SessionState::Subscribed | SessionState::Receiving)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Subscribed => "subscribed",
            SessionState::Receiving => "receiving",
            SessionState::Backoff { .. } => "backoff",
            SessionState::Unsubscribing => "unsubscribing",
            SessionState::Unsubscribed => "unsubscribed",
            SessionState::Terminated { .. } => "terminated",
            SessionState::Failed { .. } => "failed",
        }
    }
}

/// Retry, backoff and queue tuning for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Disconnects tolerated before the session terminates.
    pub max_retries: u32,
    /// A disconnect within this long of the last subscribe is throttled (ms).
    pub backoff_window_ms: u64,
    /// Shortest throttled hold (ms).
    pub backoff_floor_ms: u64,
    /// How long to wait for each unsubscribe acknowledgment (ms).
    pub unsubscribe_ack_timeout_ms: u64,
    /// Longest a push may block on a full queue before the session resyncs (ms).
    /// `None` blocks indefinitely.
    pub max_push_wait_ms: Option<u64>,
    /// Capacity of the per-session ingest queue.
    pub queue_capacity: usize,
    /// Connection handshake timeout (ms).
    pub connect_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_retries: 30,
            backoff_window_ms: 5_000,
            backoff_floor_ms: 1_000,
            unsubscribe_ack_timeout_ms: 5_000,
            max_push_wait_ms: None,
            queue_capacity: 1000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl SessionConfig {
    pub fn backoff_window(&self) -> Duration {
        Duration::from_millis(self.backoff_window_ms)
    }

    pub fn backoff_floor(&self) -> Duration {
        Duration::from_millis(self.backoff_floor_ms)
    }

    pub fn unsubscribe_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.unsubscribe_ack_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn max_push_wait(&self) -> Option<Duration> {
        self.max_push_wait_ms.map(Duration::from_millis)
    }

    /// Hold to apply before reconnecting, given the time since the last subscribe.
    ///
    /// Returns `None` once the backoff window has passed.
    pub fn backoff_hold(&self, since_subscribe: Duration) -> Option<Duration> {
        let window = self.backoff_window();
        if since_subscribe >= window {
            return None;
        }
        Some((window - since_subscribe).max(self.backoff_floor()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_session_config_default() {
        let config = SessionConfig::default();
        assert_eq!(config.max_retries, 30);
        assert_eq!(config.backoff_window(), Duration::from_secs(5));
        assert_eq!(config.backoff_floor(), Duration::from_secs(1));
        assert_eq!(config.queue_capacity, 1000);
        assert_eq!(config.max_push_wait(), None);
    }

    #[test]
    fn test_backoff_hold_inside_window() {
        let config = SessionConfig::default();
        assert_eq!(
            config.backoff_hold(Duration::from_secs(2)),
            Some(Duration::from_secs(3))
        );
        assert_eq!(
            config.backoff_hold(Duration::from_secs(1)),
            Some(Duration::from_secs(4))
        );
        assert_eq!(config.backoff_hold(Duration::ZERO), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_backoff_hold_respects_floor() {
        let config = SessionConfig::default();
        assert_eq!(
            config.backoff_hold(Duration::from_millis(4_500)),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_backoff_hold_outside_window() {
        let config = SessionConfig::default();
        assert_eq!(config.backoff_hold(Duration::from_secs(5)), None);
        assert_eq!(config.backoff_hold(Duration::from_secs(6)), None);
    }

    #[test]
    fn test_session_config_partial_json() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"max_retries": 3, "max_push_wait_ms": 250}"#).unwrap();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_push_wait(), Some(Duration::from_millis(250)));
        assert_eq!(config.backoff_window_ms, 5_000);
    }

    #[test]
    fn test_session_state_terminal() {
        assert!(SessionState::Unsubscribed.is_terminal());
        assert!(SessionState::Terminated { retries: 30 }.is_terminal());
        assert!(!SessionState::Backoff {
            retries: 1,
            hold: Duration::from_secs(1)
        }
        .is_terminal());
        assert!(SessionState::Receiving.is_subscribed());
        assert!(!SessionState::Connecting.is_subscribed());
    }
}
