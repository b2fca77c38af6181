//! Coinbase fill poller and fee calculator.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::fees::{fee_base_from_fill, FeeCalculator};
use super::pollers::{OrderFillPoller, POLL_INTERVAL};
use crate::adapters::binance::value_f64;
use crate::domain::{Fill, FillStatus, OrderResult, Side};
use crate::error::Result;
use crate::exchange::ExchangeClient;

/// Fills arrive either as a bare array or wrapped as `{"fills": [...]}`.
fn fills_array(raw: &Value) -> Option<&Vec<Value>> {
    raw.as_array()
        .or_else(|| raw.get("fills").and_then(|f| f.as_array()))
}

pub struct CoinbaseOrderFillPoller {
    client: Arc<dyn ExchangeClient>,
}

impl CoinbaseOrderFillPoller {
    pub fn new(client: Arc<dyn ExchangeClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OrderFillPoller for CoinbaseOrderFillPoller {
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
            if let Some(last) = fills_array(&raw).and_then(|fills| fills.last()) {
                let qty = last.get("size").and_then(value_f64).unwrap_or(0.0);
                let price = last.get("price").and_then(value_f64).unwrap_or(0.0);
                let fee_quote = last.get("fee").and_then(value_f64);
                return Ok(Some(Fill {
                    status: FillStatus::Filled,
                    side,
                    qty,
                    avg_price: price,
                    fee_quote,
                    fee_base: None,
                    raw: last.clone(),
                }));
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// Coinbase reports fees in the quote currency.
pub struct CoinbaseFeeCalculator;

impl CoinbaseFeeCalculator {
    pub fn new(_client: Arc<dyn ExchangeClient>) -> Self {
        Self
    }
}

#[async_trait]
impl FeeCalculator for CoinbaseFeeCalculator {
    async fn compute_fee_base(
        &self,
        _symbol: &str,
        _order_id: &str,
        avg_price: f64,
        fill: &Fill,
    ) -> Result<f64> {
        Ok(fee_base_from_fill(fill, avg_price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_wrapped_and_bare_fill_arrays() {
        let wrapped = json!({"fills": [{"size": "0.01"}]});
        let bare = json!([{"size": "0.01"}]);
        assert_eq!(fills_array(&wrapped).unwrap().len(), 1);
        assert_eq!(fills_array(&bare).unwrap().len(), 1);
        assert!(fills_array(&json!({"fills": null})).is_none());
    }
}
