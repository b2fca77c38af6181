//! Order fill polling abstraction.
//!
//! A poller repeatedly inspects an exchange's execution lookup until the
//! order is observed filled, the order is canceled, or the wait budget runs
//! out. Timeout and cancellation are `Ok(None)`, never errors.

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::{Fill, OrderResult, Side};
use crate::error::Result;

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[async_trait]
pub trait OrderFillPoller: Send + Sync {
    async fn poll_fill(
        &self,
        symbol: &str,
        side: Side,
        order_result: &OrderResult,
        max_wait: Duration,
    ) -> Result<Option<Fill>>;
}

/// Fallback for exchanges without a registered poller.
pub struct NullOrderFillPoller;

#[async_trait]
impl OrderFillPoller for NullOrderFillPoller {
    async fn poll_fill(
        &self,
        _symbol: &str,
        _side: Side,
        _order_result: &OrderResult,
        _max_wait: Duration,
    ) -> Result<Option<Fill>> {
        Ok(None)
    }
}
