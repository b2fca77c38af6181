use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::domain::{Bar, OrderResult, OrderType, Side};
use crate::error::{GatewayError, Result};

/// The exchanges this gateway ships adapters for.
///
/// The factories are keyed by [`ExchangeClient::name`] strings, so additional
/// exchanges can be registered at runtime without touching this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    Binance,
    Coinbase,
    Kraken,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::Coinbase => "coinbase",
            Self::Kraken => "kraken",
        }
    }
}

impl std::fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "binance" => Ok(Self::Binance),
            "coinbase" | "cb" => Ok(Self::Coinbase),
            "kraken" => Ok(Self::Kraken),
            _ => Err("invalid exchange; expected binance|coinbase|kraken"),
        }
    }
}

pub fn parse_exchange_kind(raw: &str) -> Result<ExchangeKind> {
    ExchangeKind::from_str(raw).map_err(|e| GatewayError::Validation(e.to_string()))
}

/// Normalized exchange contract implemented by every adapter.
///
/// Market-data calls work unauthenticated; `place_order` and `order_fills`
/// require credentials and fail with an auth error when they are missing.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Registry key for factories (`"binance"`, `"coinbase"`, `"kraken"`, ...).
    fn name(&self) -> &str;

    /// Fetch candles normalized to [`Bar`]. An unknown timeframe fails with a
    /// validation error before any network call.
    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Bar>>;

    /// Raw order-book depth, exchange-native shape.
    async fn fetch_order_book(&self, symbol: &str, limit: u32) -> Result<Value>;

    /// Submit an order, signed per the exchange's scheme.
    async fn place_order(
        &self,
        symbol: &str,
        side: Side,
        order_type: OrderType,
        quantity: f64,
        price: Option<f64>,
    ) -> Result<OrderResult>;

    /// Raw execution lookup for a submitted order (trades / fills / order
    /// status, whichever the exchange exposes). Consumed by the fill pollers
    /// and fee calculators, which know their exchange's shape.
    async fn order_fills(&self, symbol: &str, order_id: &str) -> Result<Value>;
}
