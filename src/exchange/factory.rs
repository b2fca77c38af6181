use std::sync::Arc;

use crate::adapters::{BinanceClient, CoinbaseClient, KrakenClient};
use crate::config::Settings;
use crate::error::Result;

use super::{ExchangeClient, ExchangeKind};

/// Create the runtime exchange client configured in `Settings`.
pub fn build_exchange_client(settings: &Settings) -> Result<Arc<dyn ExchangeClient>> {
    build_exchange_client_for(settings.exchange, settings)
}

/// Create an exchange client for an explicit exchange kind.
///
/// Credentials are optional here; adapters fail fast with an auth error only
/// when an authenticated operation is actually invoked.
pub fn build_exchange_client_for(
    exchange: ExchangeKind,
    settings: &Settings,
) -> Result<Arc<dyn ExchangeClient>> {
    match exchange {
        ExchangeKind::Binance => {
            let client = BinanceClient::new(settings.binance_credentials.clone(), None)?;
            Ok(Arc::new(client))
        }
        ExchangeKind::Coinbase => {
            let client = CoinbaseClient::new(settings.coinbase_credentials.clone(), None)?;
            Ok(Arc::new(client))
        }
        ExchangeKind::Kraken => {
            let client = KrakenClient::new(
                settings.kraken_credentials.clone(),
                None,
                None,
                settings.kraken_use_sandbox,
            )?;
            Ok(Arc::new(client))
        }
    }
}
