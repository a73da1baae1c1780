//! Application configuration.

use ingest_feeds::SessionConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Tracked (exchange, symbol) pairs.
    pub sessions: Vec<SessionSettings>,
    /// Retry, backoff and queue tuning shared by every session.
    pub session: SessionConfig,
    /// Seconds between sink summaries in the log. Zero disables them.
    pub snapshot_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sessions: vec![
                SessionSettings::new("gdax", "BTC-USD"),
                SessionSettings::new("bitfinex", "tBTCUSD"),
            ],
            session: SessionConfig::default(),
            snapshot_interval_secs: 10,
        }
    }
}

impl AppConfig {
    /// Load from a JSON file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();

        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: display,
                    source,
                })
            }
        };

        Self::from_json(&raw).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// One tracked pair. The exchange stays a name here so an unknown exchange
/// surfaces as a start error rather than a parse error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub exchange: String,
    pub symbol: String,
}

impl SessionSettings {
    pub fn new(exchange: &str, symbol: &str) -> Self {
        Self {
            exchange: exchange.to_string(),
            symbol: symbol.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.sessions.len(), 2);
        assert_eq!(config.session.max_retries, 30);
        assert_eq!(config.snapshot_interval_secs, 10);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config = AppConfig::from_json(
            r#"{
                "sessions": [{"exchange": "bitfinex", "symbol": "tETHUSD"}],
                "session": {"max_retries": 5}
            }"#,
        )
        .unwrap();

        assert_eq!(config.sessions, vec![SessionSettings::new("bitfinex", "tETHUSD")]);
        assert_eq!(config.session.max_retries, 5);
        assert_eq!(config.session.backoff_window_ms, 5000);
        assert_eq!(config.snapshot_interval_secs, 10);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = AppConfig::load("/nonexistent/book-ingest.json").unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let path = std::env::temp_dir().join("book-ingest-invalid-config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = AppConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed = AppConfig::from_json(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
