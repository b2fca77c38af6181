//! Exchange-specific REST and WebSocket adapters.

pub mod binance;
pub mod binance_ws;
pub mod coinbase;
pub mod coinbase_ws;
pub mod kraken;
pub mod signing;

pub use binance::BinanceClient;
pub use binance_ws::{BinanceKlineStream, KlineUpdate};
pub use coinbase::CoinbaseClient;
pub use coinbase_ws::{CoinbaseLevel2Stream, Level2Update};
pub use kraken::KrakenClient;
