//! Exchange identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Exchange identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    /// GDAX (Coinbase Exchange) level 3 feed.
    Gdax,
    /// Bitfinex v2 public feed.
    Bitfinex,
}

/// Returned when a configured exchange name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown exchange: {0}")]
pub struct UnknownExchange(pub String);

impl Exchange {
    /// Lowercase name, as used in configuration files and log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Exchange::Gdax => "gdax",
            Exchange::Bitfinex => "bitfinex",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = UnknownExchange;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gdax" | "coinbase" => Ok(Exchange::Gdax),
            "bitfinex" => Ok(Exchange::Bitfinex),
            _ => Err(UnknownExchange(s.to_string())),
        }
    }
}
