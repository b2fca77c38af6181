//! Post-order trading cycle: fill polling, fee pricing, orchestration.

pub mod binance;
pub mod coinbase;
pub mod factories;
pub mod fees;
pub mod kraken;
pub mod pollers;
pub mod service;

pub use factories::{FeeCalculatorFactory, PollerFactory};
pub use fees::{FeeCalculator, NullFeeCalculator};
pub use pollers::{NullOrderFillPoller, OrderFillPoller};
pub use service::{SymbolOutcome, TradeItem, TradeOutcome, TradingService};
