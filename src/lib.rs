//! tradegate: multi-exchange trading execution gateway.
//!
//! Core pieces:
//! - `adapters`: Binance / Coinbase / Kraken REST clients and WebSocket
//!   streams behind the `ExchangeClient` trait.
//! - `infra`: token-bucket rate limiting, retry with exponential backoff,
//!   feature toggles with canary rollout and automatic rollback, runtime
//!   artifact reporting.
//! - `trading`: order fill pollers, fee calculators, their open factories
//!   and the `TradingService` orchestrator.
//! - `services`: trading execution metrics.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod infra;
pub mod services;
pub mod trading;

pub use config::Settings;
pub use domain::{Bar, ExchangeCredentials, Fill, FillStatus, OrderResult, OrderType, Side};
pub use error::{GatewayError, Result};
pub use exchange::{build_exchange_client, build_exchange_client_for, ExchangeClient, ExchangeKind};
pub use infra::{
    compute_backoff, ArtifactReporter, FeatureToggleManager, PathChoice, RateLimiter, RetryPolicy,
    TokenBucket, ToggleMode,
};
pub use services::{ExecutionPath, TradingMetricsCollector};
pub use trading::{
    FeeCalculator, FeeCalculatorFactory, OrderFillPoller, PollerFactory, TradingService,
};
