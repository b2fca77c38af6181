//! End-to-end execution cycle against a scripted Kraken client: place an
//! order, poll the fill, price the fee and roll everything into the metrics
//! snapshot. No network involved.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tradegate::domain::{Fill, OrderResult, OrderType, Side};
use tradegate::error::Result;
use tradegate::exchange::ExchangeClient;
use tradegate::services::{ExecutionPath, TradingMetricsCollector};
use tradegate::trading::{FeeCalculatorFactory, PollerFactory, TradingService};
use tradegate::Bar;

/// Scripted stand-in for the Kraken REST adapter. `order_fills` replays the
/// configured QueryOrders payload and counts invocations.
struct FakeKrakenClient {
    name: &'static str,
    query_orders: Value,
    fills_calls: AtomicUsize,
}

impl FakeKrakenClient {
    fn filled() -> Self {
        Self {
            name: "kraken",
            query_orders: json!({
                "error": [],
                "result": {
                    "ABC123": {
                        "status": "closed",
                        "price": "50080.0",
                        "vol_exec": "0.0001",
                        "fee": "0.005",
                        "descr": {"pair": "XBTUSD", "type": "buy"}
                    }
                }
            }),
            fills_calls: AtomicUsize::new(0),
        }
    }

    fn canceled() -> Self {
        Self {
            name: "kraken",
            query_orders: json!({
                "error": [],
                "result": {
                    "ABC123": {
                        "status": "canceled",
                        "price": "0.0",
                        "vol_exec": "0.0",
                        "fee": "0.0"
                    }
                }
            }),
            fills_calls: AtomicUsize::new(0),
        }
    }

    fn pending() -> Self {
        Self {
            name: "kraken",
            query_orders: json!({
                "error": [],
                "result": {
                    "ABC123": {"status": "open", "price": "0.0", "vol_exec": "0.0"}
                }
            }),
            fills_calls: AtomicUsize::new(0),
        }
    }

    fn unknown_exchange() -> Self {
        Self {
            name: "bitfinex",
            query_orders: Value::Null,
            fills_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ExchangeClient for FakeKrakenClient {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch_ohlcv(
        &self,
        _symbol: &str,
        _timeframe: &str,
        _start_ms: Option<i64>,
        _end_ms: Option<i64>,
        _limit: usize,
    ) -> Result<Vec<Bar>> {
        Ok(Vec::new())
    }

    async fn fetch_order_book(&self, _symbol: &str, _limit: u32) -> Result<Value> {
        Ok(json!({"bids": [], "asks": []}))
    }

    async fn place_order(
        &self,
        symbol: &str,
        side: Side,
        _order_type: OrderType,
        quantity: f64,
        price: Option<f64>,
    ) -> Result<OrderResult> {
        Ok(OrderResult {
            status: "accepted".to_string(),
            order_id: Some("ABC123".to_string()),
            symbol: symbol.to_string(),
            side,
            price,
            size: quantity,
            raw: json!({"result": {"txid": ["ABC123"]}}),
        })
    }

    async fn order_fills(&self, _symbol: &str, _order_id: &str) -> Result<Value> {
        self.fills_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.query_orders.clone())
    }
}

fn service() -> TradingService {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    TradingService::new(
        Arc::new(PollerFactory::with_defaults()),
        Arc::new(FeeCalculatorFactory::with_defaults()),
    )
}

#[tokio::test]
async fn kraken_fill_cycle_prices_fee_and_updates_metrics() {
    let client: Arc<dyn ExchangeClient> = Arc::new(FakeKrakenClient::filled());
    let metrics = TradingMetricsCollector::new();
    let service = service();

    let po_start = metrics.record_place_order_attempt(client.name());
    let order = client
        .place_order("XBTUSD", Side::Buy, OrderType::Market, 0.0001, None)
        .await
        .unwrap();
    metrics.record_place_order_result(
        client.name(),
        po_start.elapsed().as_secs_f64(),
        true,
        None,
    );
    assert_eq!(order.order_id.as_deref(), Some("ABC123"));

    let poll_start = metrics.record_attempt(client.name(), "buy", ExecutionPath::Service);
    let outcome = service
        .execute_symbol_trading(
            client.clone(),
            "XBTUSD",
            Side::Buy,
            &order,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

    let fill: &Fill = outcome.fill.as_ref().expect("order should be filled");
    assert_eq!(fill.qty, 0.0001);
    assert_eq!(fill.avg_price, 50080.0);
    assert_eq!(fill.fee_quote, Some(0.005));
    assert!((outcome.fee_base - 0.005 / 50080.0).abs() < 1e-12);

    metrics.record_success(
        client.name(),
        "buy",
        ExecutionPath::Service,
        poll_start.elapsed().as_secs_f64(),
        "FILLED",
    );
    metrics.record_fee_accuracy(
        client.name(),
        Some(outcome.fee_base),
        fill.fee_quote,
        Some(fill.avg_price),
    );

    let snap = metrics.snapshot(None, None, None);
    let kraken = &snap.by_exchange["kraken"];
    assert_eq!(kraken.place_order.attempts, 1);
    assert_eq!(kraken.place_order.success, 1);
    assert_eq!(kraken.fee_accuracy.samples, 1);
    assert!(kraken.fee_accuracy.mean_abs_pct < 1e-9);
    assert_eq!(kraken.statuses["FILLED"], 1);
    assert_eq!(snap.success_total, 1);
}

#[tokio::test]
async fn canceled_order_ends_polling_without_fill_or_fee() {
    let fake = Arc::new(FakeKrakenClient::canceled());
    let client: Arc<dyn ExchangeClient> = fake.clone();
    let service = service();

    let order = client
        .place_order("XBTUSD", Side::Buy, OrderType::Market, 0.0001, None)
        .await
        .unwrap();
    let outcome = service
        .execute_symbol_trading(
            client.clone(),
            "XBTUSD",
            Side::Buy,
            &order,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

    assert!(outcome.fill.is_none());
    assert_eq!(outcome.fee_base, 0.0);
    // Cancellation is detected on the first lookup, not after the timeout.
    assert_eq!(fake.fills_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn pending_order_times_out_promptly_with_zero_budget() {
    let client: Arc<dyn ExchangeClient> = Arc::new(FakeKrakenClient::pending());
    let service = service();

    let order = client
        .place_order("XBTUSD", Side::Sell, OrderType::Market, 0.0001, None)
        .await
        .unwrap();
    let outcome = service
        .execute_symbol_trading(client, "XBTUSD", Side::Sell, &order, Duration::ZERO)
        .await
        .unwrap();

    assert!(outcome.fill.is_none());
    assert_eq!(outcome.fee_base, 0.0);
}

#[tokio::test]
async fn unregistered_exchange_falls_back_to_null_implementations() {
    let client: Arc<dyn ExchangeClient> = Arc::new(FakeKrakenClient::unknown_exchange());
    let service = service();

    let order = client
        .place_order("BTCUSD", Side::Buy, OrderType::Market, 0.001, None)
        .await
        .unwrap();
    let outcome = service
        .execute_symbol_trading(
            client,
            "BTCUSD",
            Side::Buy,
            &order,
            Duration::from_secs(1),
        )
        .await
        .unwrap();

    assert!(outcome.fill.is_none());
    assert_eq!(outcome.fee_base, 0.0);
}

#[tokio::test]
async fn multi_symbol_cycle_preserves_order_and_outcomes() {
    use tradegate::trading::TradeItem;

    let client: Arc<dyn ExchangeClient> = Arc::new(FakeKrakenClient::filled());
    let service = service();

    let mut items = Vec::new();
    for symbol in ["XBTUSD", "ETHUSD"] {
        let order = client
            .place_order(symbol, Side::Buy, OrderType::Market, 0.0001, None)
            .await
            .unwrap();
        items.push(TradeItem {
            symbol: symbol.to_string(),
            side: Side::Buy,
            order_result: order,
        });
    }

    let results = service
        .execute_multi_symbol_trading(client, &items, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].symbol, "XBTUSD");
    assert_eq!(results[1].symbol, "ETHUSD");
    for res in &results {
        assert!(res.outcome.fill.is_some());
        assert!(res.outcome.fee_base > 0.0);
    }
}
