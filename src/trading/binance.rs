//! Binance fill poller and fee calculator.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::fees::FeeCalculator;
use super::pollers::{OrderFillPoller, POLL_INTERVAL};
use crate::adapters::binance::value_f64;
use crate::domain::{Fill, FillStatus, OrderResult, Side};
use crate::error::Result;
use crate::exchange::ExchangeClient;

/// Strip the quote suffix to approximate the base asset of a spot symbol.
fn base_asset(symbol: &str) -> &str {
    let upper_len = symbol.len();
    for suffix in ["USDT", "USDC", "USD"] {
        if symbol.to_uppercase().ends_with(suffix) {
            return &symbol[..upper_len - suffix.len()];
        }
    }
    symbol
}

pub struct BinanceOrderFillPoller {
    client: Arc<dyn ExchangeClient>,
}

impl BinanceOrderFillPoller {
    pub fn new(client: Arc<dyn ExchangeClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OrderFillPoller for BinanceOrderFillPoller {
    async fn poll_fill(
        &self,
        symbol: &str,
        side: Side,
        order_result: &OrderResult,
        max_wait: Duration,
    ) -> Result<Option<Fill>> {
        let order_id = match order_result.order_id.as_deref() {
            Some(id) => id,
            None => return Ok(None),
        };
        let start = Instant::now();

        loop {
            if start.elapsed() >= max_wait {
                return Ok(None);
            }

            let raw = self.client.order_fills(symbol, order_id).await?;
            if let Some(trades) = raw.as_array() {
                // The most recent trade carries the current execution state.
                if let Some(last) = trades.last() {
                    let qty = last.get("qty").and_then(value_f64).unwrap_or(0.0);
                    let price = last.get("price").and_then(value_f64).unwrap_or(0.0);
                    let commission = last.get("commission").and_then(value_f64);
                    let asset = last.get("commissionAsset").and_then(|v| v.as_str());
                    let is_base = asset
                        .map(|a| a.eq_ignore_ascii_case(base_asset(symbol)))
                        .unwrap_or(false);
                    return Ok(Some(Fill {
                        status: FillStatus::Filled,
                        side,
                        qty,
                        avg_price: price,
                        fee_quote: if is_base { None } else { commission },
                        fee_base: if is_base { commission } else { None },
                        raw: last.clone(),
                    }));
                }
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

pub struct BinanceFeeCalculator {
    client: Arc<dyn ExchangeClient>,
}

impl BinanceFeeCalculator {
    pub fn new(client: Arc<dyn ExchangeClient>) -> Self {
        Self { client }
    }

    fn aggregate(symbol: &str, trades: &Value, avg_price: f64) -> f64 {
        let rows = match trades.as_array() {
            Some(rows) => rows,
            None => return 0.0,
        };
        let base = base_asset(symbol);
        let mut total = 0.0;
        for trade in rows {
            let commission = match trade.get("commission").and_then(value_f64) {
                Some(c) => c,
                None => continue,
            };
            let asset = match trade.get("commissionAsset").and_then(|v| v.as_str()) {
                Some(a) => a,
                None => continue,
            };
            if asset.eq_ignore_ascii_case(base) {
                total += commission;
            } else if avg_price > 0.0 {
                total += commission / avg_price;
            }
        }
        total
    }
}

#[async_trait]
impl FeeCalculator for BinanceFeeCalculator {
    async fn compute_fee_base(
        &self,
        symbol: &str,
        order_id: &str,
        avg_price: f64,
        _fill: &Fill,
    ) -> Result<f64> {
        let trades = self.client.order_fills(symbol, order_id).await?;
        Ok(Self::aggregate(symbol, &trades, avg_price))
    }
}
