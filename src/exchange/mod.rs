pub mod factory;
pub mod traits;

pub use factory::{build_exchange_client, build_exchange_client_for};
pub use traits::{parse_exchange_kind, ExchangeClient, ExchangeKind};
