//! Orchestration of the post-order cycle: poll the fill, then price the fee.

use std::sync::Arc;
use std::time::Duration;

use super::factories::{FeeCalculatorFactory, PollerFactory};
use crate::domain::{Fill, OrderResult, Side};
use crate::error::Result;
use crate::exchange::ExchangeClient;

#[derive(Debug, Clone)]
pub struct TradeOutcome {
    pub fill: Option<Fill>,
    pub fee_base: f64,
}

#[derive(Debug, Clone)]
pub struct TradeItem {
    pub symbol: String,
    pub side: Side,
    pub order_result: OrderResult,
}

#[derive(Debug, Clone)]
pub struct SymbolOutcome {
    pub symbol: String,
    pub side: Side,
    pub outcome: TradeOutcome,
}

/// Stateless coordinator over the two factories. Knows nothing about any
/// concrete exchange.
pub struct TradingService {
    pollers: Arc<PollerFactory>,
    fees: Arc<FeeCalculatorFactory>,
}

impl TradingService {
    pub fn new(pollers: Arc<PollerFactory>, fees: Arc<FeeCalculatorFactory>) -> Self {
        Self { pollers, fees }
    }

    /// Poll for the fill of one placed order and compute its base-currency
    /// fee. The fee calculator runs only when a fill was observed.
    pub async fn execute_symbol_trading(
        &self,
        client: Arc<dyn ExchangeClient>,
        symbol: &str,
        side: Side,
        order_result: &OrderResult,
        max_wait: Duration,
    ) -> Result<TradeOutcome> {
        let poller = self.pollers.create(client.clone());
        let fill = poller.poll_fill(symbol, side, order_result, max_wait).await?;

        let fill = match fill {
            Some(fill) => fill,
            None => {
                return Ok(TradeOutcome {
                    fill: None,
                    fee_base: 0.0,
                })
            }
        };

        let fee_calc = self.fees.create(client);
        let order_id = order_result.order_id.as_deref().unwrap_or("");
        let fee_base = fee_calc
            .compute_fee_base(symbol, order_id, fill.avg_price, &fill)
            .await?;

        Ok(TradeOutcome {
            fill: Some(fill),
            fee_base,
        })
    }

    /// Sequential multi-symbol cycle. The first error aborts the batch.
    pub async fn execute_multi_symbol_trading(
        &self,
        client: Arc<dyn ExchangeClient>,
        items: &[TradeItem],
        max_wait: Duration,
    ) -> Result<Vec<SymbolOutcome>> {
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            let outcome = self
                .execute_symbol_trading(
                    client.clone(),
                    &item.symbol,
                    item.side,
                    &item.order_result,
                    max_wait,
                )
                .await?;
            results.push(SymbolOutcome {
                symbol: item.symbol.clone(),
                side: item.side,
                outcome,
            });
        }
        Ok(results)
    }
}
