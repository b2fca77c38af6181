//! Long-running service components.

pub mod metrics;

pub use metrics::{ExecutionPath, MetricsSnapshot, TradingMetricsCollector};
