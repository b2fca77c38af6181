//! Fee calculation abstraction.
//!
//! Fees are reported per exchange in either the base or the quote currency;
//! callers always want the base-currency amount. Quote fees convert through
//! the average fill price.

use async_trait::async_trait;

use crate::domain::Fill;
use crate::error::Result;

#[async_trait]
pub trait FeeCalculator: Send + Sync {
    async fn compute_fee_base(
        &self,
        symbol: &str,
        order_id: &str,
        avg_price: f64,
        fill: &Fill,
    ) -> Result<f64>;
}

/// Fallback for exchanges without a registered calculator.
pub struct NullFeeCalculator;

#[async_trait]
impl FeeCalculator for NullFeeCalculator {
    async fn compute_fee_base(
        &self,
        _symbol: &str,
        _order_id: &str,
        _avg_price: f64,
        _fill: &Fill,
    ) -> Result<f64> {
        Ok(0.0)
    }
}

/// Shared conversion rule: prefer a base-currency fee, convert a
/// quote-currency fee through the average price, otherwise zero.
pub(crate) fn fee_base_from_fill(fill: &Fill, avg_price: f64) -> f64 {
    if let Some(fee_base) = fill.fee_base {
        return fee_base;
    }
    match fill.fee_quote {
        Some(fee_quote) if avg_price > 0.0 => fee_quote / avg_price,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FillStatus, Side};
    use serde_json::Value;

    fn fill(fee_quote: Option<f64>, fee_base: Option<f64>) -> Fill {
        Fill {
            status: FillStatus::Filled,
            side: Side::Buy,
            qty: 0.001,
            avg_price: 50000.0,
            fee_quote,
            fee_base,
            raw: Value::Null,
        }
    }

    #[test]
    fn base_fee_wins_over_quote() {
        let f = fill(Some(5.0), Some(0.0001));
        assert_eq!(fee_base_from_fill(&f, 50000.0), 0.0001);
    }

    #[test]
    fn quote_fee_converts_through_price() {
        let f = fill(Some(5.0), None);
        assert!((fee_base_from_fill(&f, 50000.0) - 0.0001).abs() < 1e-12);
    }

    #[test]
    fn zero_price_yields_zero() {
        let f = fill(Some(5.0), None);
        assert_eq!(fee_base_from_fill(&f, 0.0), 0.0);
    }

    #[test]
    fn no_fee_information_yields_zero() {
        let f = fill(None, None);
        assert_eq!(fee_base_from_fill(&f, 50000.0), 0.0);
    }
}
