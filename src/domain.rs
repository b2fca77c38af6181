//! Normalized domain types shared across exchange adapters.
//!
//! Exchange payloads differ positionally and by field name; everything is
//! converted into these records before crossing into the core.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Side {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "buy" | "long" => Ok(Side::Buy),
            "sell" | "short" => Ok(Side::Sell),
            _ => Err("invalid side; expected buy|sell"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
        }
    }
}

/// Terminal state of an observed fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FillStatus {
    Filled,
    PartiallyFilled,
    Canceled,
}

impl FillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FillStatus::Filled => "FILLED",
            FillStatus::PartiallyFilled => "PARTIALLY_FILLED",
            FillStatus::Canceled => "CANCELED",
        }
    }
}

/// One normalized OHLCV candle, timestamp in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Normalized response of `place_order`, consumed by the fill pollers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResult {
    pub status: String,
    pub order_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub price: Option<f64>,
    pub size: f64,
    /// Raw exchange response, kept for audit.
    pub raw: Value,
}

/// Execution report discovered by a poller.
///
/// `fee_quote` is the settlement fee in quote currency when the exchange
/// reports it that way; `fee_base` when already in the position's base
/// currency. Either may be absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub status: FillStatus,
    pub side: Side,
    pub qty: f64,
    pub avg_price: f64,
    pub fee_quote: Option<f64>,
    pub fee_base: Option<f64>,
    pub raw: Value,
}

/// API credentials, owned exclusively by one exchange client.
///
/// The passphrase is only meaningful for Coinbase.
#[derive(Debug, Clone)]
pub struct ExchangeCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: Option<String>,
}

impl ExchangeCredentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            passphrase: None,
        }
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_parses_aliases() {
        assert_eq!("buy".parse::<Side>().unwrap(), Side::Buy);
        assert_eq!("LONG".parse::<Side>().unwrap(), Side::Buy);
        assert_eq!("Sell".parse::<Side>().unwrap(), Side::Sell);
        assert!("hold".parse::<Side>().is_err());
    }

    #[test]
    fn fill_status_serializes_screaming() {
        let s = serde_json::to_string(&FillStatus::PartiallyFilled).unwrap();
        assert_eq!(s, "\"PARTIALLY_FILLED\"");
    }
}
