//! Kraken fill poller and fee calculator.
//!
//! `QueryOrders` returns a map of txid to order info. A `closed` order with
//! executed volume is a fill; a `canceled` order ends polling immediately
//! with no fill.

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

fn order_info(raw: &Value) -> Option<&Value> {
    raw.get("result")
        .and_then(|r| r.as_object())
        .and_then(|obj| obj.values().next())
}

pub struct KrakenOrderFillPoller {
    client: Arc<dyn ExchangeClient>,
}

impl KrakenOrderFillPoller {
    pub fn new(client: Arc<dyn ExchangeClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OrderFillPoller for KrakenOrderFillPoller {
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
            let raw = self.client.order_fills(symbol, order_id).await?;
            if let Some(info) = order_info(&raw) {
                let status = info
                    .get("status")
                    .and_then(|s| s.as_str())
                    .unwrap_or("")
                    .to_ascii_uppercase();
                let vol_exec = info.get("vol_exec").and_then(value_f64).unwrap_or(0.0);

                if status == "CANCELED" || status == "CANCELLED" {
                    return Ok(None);
                }
                if (status == "CLOSED" || status == "FILLED") && vol_exec > 0.0 {
                    let price = info.get("price").and_then(value_f64).unwrap_or(0.0);
                    let fee_quote = info.get("fee").and_then(value_f64);
                    return Ok(Some(Fill {
                        status: FillStatus::Filled,
                        side,
                        qty: vol_exec,
                        avg_price: price,
                        fee_quote,
                        fee_base: None,
                        raw: info.clone(),
                    }));
                }
            }

            if start.elapsed() + POLL_INTERVAL > max_wait {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

pub struct KrakenFeeCalculator;

impl KrakenFeeCalculator {
    pub fn new(_client: Arc<dyn ExchangeClient>) -> Self {
        Self
    }
}

#[async_trait]
impl FeeCalculator for KrakenFeeCalculator {
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
    fn extracts_first_order_info() {
        let raw = json!({
            "error": [],
            "result": {"ABC123": {"status": "closed", "vol_exec": "0.0001"}}
        });
        let info = order_info(&raw).unwrap();
        assert_eq!(info["status"], "closed");
        assert!(order_info(&json!({"result": {}})).is_none());
    }
}
