//! Open registries mapping exchange names to poller and fee-calculator
//! constructors. New exchanges plug in through `register` without touching
//! the built-in set; unknown names fall back to the null implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::binance::{BinanceFeeCalculator, BinanceOrderFillPoller};
use super::coinbase::{CoinbaseFeeCalculator, CoinbaseOrderFillPoller};
use super::fees::{FeeCalculator, NullFeeCalculator};
use super::kraken::{KrakenFeeCalculator, KrakenOrderFillPoller};
use super::pollers::{NullOrderFillPoller, OrderFillPoller};
use crate::exchange::ExchangeClient;

pub type PollerCtor = fn(Arc<dyn ExchangeClient>) -> Box<dyn OrderFillPoller>;
pub type FeeCalculatorCtor = fn(Arc<dyn ExchangeClient>) -> Box<dyn FeeCalculator>;

pub struct PollerFactory {
    registry: RwLock<HashMap<String, PollerCtor>>,
}

impl PollerFactory {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_defaults() -> Self {
        let factory = Self::new();
        factory.register("binance", |c| Box::new(BinanceOrderFillPoller::new(c)));
        factory.register("coinbase", |c| Box::new(CoinbaseOrderFillPoller::new(c)));
        factory.register("kraken", |c| Box::new(KrakenOrderFillPoller::new(c)));
        factory
    }

    pub fn register(&self, name: &str, ctor: PollerCtor) {
        self.registry
            .write()
            .expect("poller registry poisoned")
            .insert(name.to_lowercase(), ctor);
    }

    pub fn create(&self, client: Arc<dyn ExchangeClient>) -> Box<dyn OrderFillPoller> {
        let name = client.name().to_lowercase();
        let ctor = self
            .registry
            .read()
            .expect("poller registry poisoned")
            .get(&name)
            .copied();
        match ctor {
            Some(ctor) => ctor(client),
            None => Box::new(NullOrderFillPoller),
        }
    }

    pub fn registered(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .registry
            .read()
            .expect("poller registry poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl Default for PollerFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}

pub struct FeeCalculatorFactory {
    registry: RwLock<HashMap<String, FeeCalculatorCtor>>,
}

impl FeeCalculatorFactory {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_defaults() -> Self {
        let factory = Self::new();
        factory.register("binance", |c| Box::new(BinanceFeeCalculator::new(c)));
        factory.register("coinbase", |c| Box::new(CoinbaseFeeCalculator::new(c)));
        factory.register("kraken", |c| Box::new(KrakenFeeCalculator::new(c)));
        factory
    }

    pub fn register(&self, name: &str, ctor: FeeCalculatorCtor) {
        self.registry
            .write()
            .expect("fee registry poisoned")
            .insert(name.to_lowercase(), ctor);
    }

    pub fn create(&self, client: Arc<dyn ExchangeClient>) -> Box<dyn FeeCalculator> {
        let name = client.name().to_lowercase();
        let ctor = self
            .registry
            .read()
            .expect("fee registry poisoned")
            .get(&name)
            .copied();
        match ctor {
            Some(ctor) => ctor(client),
            None => Box::new(NullFeeCalculator),
        }
    }

    pub fn registered(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .registry
            .read()
            .expect("fee registry poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl Default for FeeCalculatorFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_three_exchanges() {
        let pollers = PollerFactory::with_defaults();
        let fees = FeeCalculatorFactory::with_defaults();
        assert_eq!(pollers.registered(), vec!["binance", "coinbase", "kraken"]);
        assert_eq!(fees.registered(), vec!["binance", "coinbase", "kraken"]);
    }

    #[test]
    fn register_is_case_insensitive() {
        let pollers = PollerFactory::new();
        pollers.register("Bitstamp", |_| Box::new(NullOrderFillPoller));
        assert_eq!(pollers.registered(), vec!["bitstamp"]);
    }
}
