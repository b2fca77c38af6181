//! Kraken REST adapter.
//!
//! Private endpoints post form-encoded bodies with a strictly increasing
//! nonce and sign `path + SHA256(nonce + body)` with HMAC-SHA512 keyed by
//! the base64-decoded secret. Kraken reports failures in-band through the
//! `error` array even on HTTP 200, so the body is checked on every call.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::signing;
use crate::config::{env_bool, env_f64};
use crate::domain::{Bar, ExchangeCredentials, OrderResult, OrderType, Side};
use crate::error::{GatewayError, Result};
use crate::exchange::ExchangeClient;
use crate::infra::{RateLimiter, RetryPolicy};

const KRAKEN_PROD_BASE: &str = "https://api.kraken.com";
const KRAKEN_SANDBOX_BASE: &str = "https://api.sandbox.kraken.com";

fn interval_for(timeframe: &str) -> Option<u32> {
    match timeframe {
        "1m" => Some(1),
        "5m" => Some(5),
        "15m" => Some(15),
        "1h" => Some(60),
        "6h" => Some(360),
        "1d" => Some(1440),
        _ => None,
    }
}

fn bucket(env_prefix: &str, default_cap: f64, default_fr: f64) -> (f64, f64) {
    (
        env_f64(&format!("KRAKEN_RL_{}_CAP", env_prefix)).unwrap_or(default_cap),
        env_f64(&format!("KRAKEN_RL_{}_FR", env_prefix)).unwrap_or(default_fr),
    )
}

/// Extract bars from a Kraken OHLC payload. Rows are
/// `[time(s), open, high, low, close, vwap, volume, count]` keyed by the
/// resolved pair name under `result`, oldest first; the first `limit` rows
/// are kept.
pub(crate) fn normalize_kraken_ohlc(result: &Value, limit: usize) -> Result<Vec<Bar>> {
    let obj = result
        .as_object()
        .ok_or_else(|| GatewayError::Exchange("OHLC result is not an object".to_string()))?;
    let rows = obj
        .iter()
        .find(|(k, _)| *k != "last")
        .and_then(|(_, v)| v.as_array())
        .ok_or_else(|| GatewayError::Exchange("OHLC result has no pair data".to_string()))?;
    rows.iter()
        .take(limit)
        .map(|row| {
            let arr = row
                .as_array()
                .filter(|a| a.len() >= 7)
                .ok_or_else(|| GatewayError::Exchange("OHLC row too short".to_string()))?;
            let num = |idx: usize, name: &str| -> Result<f64> {
                super::binance::value_f64(&arr[idx])
                    .ok_or_else(|| GatewayError::Exchange(format!("OHLC {} missing", name)))
            };
            Ok(Bar {
                timestamp_ms: num(0, "time")? as i64 * 1000,
                open: num(1, "open")?,
                high: num(2, "high")?,
                low: num(3, "low")?,
                close: num(4, "close")?,
                volume: num(6, "volume")?,
            })
        })
        .collect()
}

pub struct KrakenClient {
    http: Client,
    base_url: String,
    credentials: Option<ExchangeCredentials>,
    limits: Arc<RateLimiter>,
    retry: RetryPolicy,
    nonce: AtomicU64,
}

impl KrakenClient {
    /// `base_url` overrides both `KRAKEN_BASE_URL` and the sandbox switch.
    /// With nothing set the client talks to the sandbox, never production.
    pub fn new(
        credentials: Option<ExchangeCredentials>,
        rate_limiter: Option<Arc<RateLimiter>>,
        base_url: Option<String>,
        use_sandbox: Option<bool>,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent("tradegate/0.1")
            .timeout(Duration::from_secs(10))
            .build()?;
        // Constructor arguments outrank the environment: explicit base_url,
        // then the use_sandbox switch, then KRAKEN_BASE_URL, then
        // KRAKEN_USE_SANDBOX, then the sandbox default.
        let from_sandbox_flag = |sandbox: bool| {
            if sandbox {
                KRAKEN_SANDBOX_BASE.to_string()
            } else {
                KRAKEN_PROD_BASE.to_string()
            }
        };
        let base_url = base_url
            .or_else(|| use_sandbox.map(from_sandbox_flag))
            .or_else(|| std::env::var("KRAKEN_BASE_URL").ok())
            .unwrap_or_else(|| {
                from_sandbox_flag(env_bool("KRAKEN_USE_SANDBOX").unwrap_or(true))
            });
        let limits = rate_limiter.unwrap_or_default();
        let defaults = [
            ("kraken:global", bucket("GLOBAL", 30.0, 3.0)),
            ("kraken:market_data", bucket("MD", 20.0, 2.0)),
            ("kraken:order", bucket("ORDER", 15.0, 5.0)),
            ("kraken:order_status", bucket("ORDER_STATUS", 15.0, 5.0)),
        ];
        for (key, (capacity, fill_rate)) in defaults {
            if !limits.is_registered(key) {
                limits.register(key, capacity, fill_rate);
            }
        }
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            limits,
            retry: RetryPolicy::default(),
            nonce: AtomicU64::new(0),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn handle_status(status: StatusCode, body: &str) -> Result<()> {
        match status.as_u16() {
            401 | 403 => Err(GatewayError::Auth(body.to_string())),
            429 => Err(GatewayError::RateLimited(body.to_string())),
            500..=599 => Err(GatewayError::Network(body.to_string())),
            s if !status.is_success() => {
                Err(GatewayError::Exchange(format!("status={} body={}", s, body)))
            }
            _ => Ok(()),
        }
    }

    /// Kraken signals errors through the body `error` array even on HTTP 200.
    fn check_body_errors(raw: &Value) -> Result<()> {
        let errors = match raw.get("error").and_then(|e| e.as_array()) {
            Some(errs) if !errs.is_empty() => errs,
            _ => return Ok(()),
        };
        let joined = errors
            .iter()
            .filter_map(|e| e.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        if joined.contains("Rate limit") {
            Err(GatewayError::RateLimited(joined))
        } else if joined.contains("Invalid key")
            || joined.contains("Invalid signature")
            || joined.contains("Permission denied")
        {
            Err(GatewayError::Auth(joined))
        } else {
            Err(GatewayError::Exchange(joined))
        }
    }

    async fn gate(&self, endpoint: &str, timeout: Duration) -> Result<()> {
        let ok_global = self
            .limits
            .acquire("kraken:global", 1.0, Some(timeout))
            .await;
        let ok_endpoint = self.limits.acquire(endpoint, 1.0, Some(timeout)).await;
        if ok_global && ok_endpoint {
            Ok(())
        } else {
            Err(GatewayError::RateLimited("local gate timeout".to_string()))
        }
    }

    fn credentials(&self) -> Result<&ExchangeCredentials> {
        self.credentials
            .as_ref()
            .ok_or_else(|| GatewayError::Auth("Kraken credentials required".to_string()))
    }

    /// Monotonic even when the clock jumps backwards.
    fn next_nonce(&self) -> u64 {
        let now = chrono::Utc::now().timestamp_millis() as u64;
        let mut last = self.nonce.load(Ordering::Relaxed);
        loop {
            let next = now.max(last + 1);
            match self.nonce.compare_exchange_weak(
                last,
                next,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(observed) => last = observed,
            }
        }
    }

    async fn public_get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.http.get(&url).query(query).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        Self::handle_status(status, &text)?;
        let raw: Value = serde_json::from_str(&text)?;
        Self::check_body_errors(&raw)?;
        Ok(raw)
    }

    async fn private_post(&self, path: &str, fields: &[(&str, String)]) -> Result<Value> {
        let creds = self.credentials()?;
        let nonce = self.next_nonce().to_string();
        let mut body = format!("nonce={}", nonce);
        for (k, v) in fields {
            body.push_str(&format!("&{}={}", k, urlencoding::encode(v)));
        }
        let signature = signing::kraken_sign(path, &nonce, &body, &creds.api_secret)?;
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .post(&url)
            .header("API-Key", &creds.api_key)
            .header("API-Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        Self::handle_status(status, &text)?;
        let raw: Value = serde_json::from_str(&text)?;
        Self::check_body_errors(&raw)?;
        Ok(raw)
    }

    pub async fn get_account_balance(&self) -> Result<Value> {
        self.retry
            .run("kraken.get_account_balance", || async move {
                self.gate("kraken:order_status", Duration::from_secs(3))
                    .await?;
                let raw = self.private_post("/0/private/Balance", &[]).await?;
                Ok(raw.get("result").cloned().unwrap_or(Value::Null))
            })
            .await
    }
}

#[async_trait]
impl ExchangeClient for KrakenClient {
    fn name(&self) -> &str {
        "kraken"
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        start_ms: Option<i64>,
        _end_ms: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Bar>> {
        let interval = interval_for(timeframe).ok_or_else(|| {
            GatewayError::Validation(format!("invalid timeframe: {}", timeframe))
        })?;

        self.retry
            .run("kraken.fetch_ohlcv", || async move {
                self.gate("kraken:market_data", Duration::from_secs(5))
                    .await?;
                let mut query = vec![
                    ("pair", symbol.to_uppercase()),
                    ("interval", interval.to_string()),
                ];
                if let Some(start) = start_ms {
                    query.push(("since", (start / 1000).to_string()));
                }
                let raw = self.public_get("/0/public/OHLC", &query).await?;
                let result = raw
                    .get("result")
                    .ok_or_else(|| GatewayError::Exchange("OHLC result missing".to_string()))?;
                normalize_kraken_ohlc(result, limit)
            })
            .await
    }

    async fn fetch_order_book(&self, symbol: &str, limit: u32) -> Result<Value> {
        self.retry
            .run("kraken.fetch_order_book", || async move {
                self.gate("kraken:market_data", Duration::from_secs(5))
                    .await?;
                self.public_get(
                    "/0/public/Depth",
                    &[
                        ("pair", symbol.to_uppercase()),
                        ("count", limit.to_string()),
                    ],
                )
                .await
            })
            .await
    }

    async fn place_order(
        &self,
        symbol: &str,
        side: Side,
        order_type: OrderType,
        quantity: f64,
        price: Option<f64>,
    ) -> Result<OrderResult> {
        self.credentials()?;
        if order_type == OrderType::Limit && price.is_none() {
            return Err(GatewayError::Validation(
                "limit orders require a price".to_string(),
            ));
        }

        self.retry
            .run("kraken.place_order", || async move {
                self.gate("kraken:order", Duration::from_secs(5)).await?;
                let mut fields = vec![
                    ("pair", symbol.to_uppercase()),
                    ("type", side.as_str().to_string()),
                    ("ordertype", order_type.as_str().to_string()),
                    ("volume", quantity.to_string()),
                ];
                if let Some(price) = price {
                    fields.push(("price", price.to_string()));
                }
                let raw = self.private_post("/0/private/AddOrder", &fields).await?;
                let order_id = raw
                    .get("result")
                    .and_then(|r| r.get("txid"))
                    .and_then(|t| t.as_array())
                    .and_then(|a| a.first())
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                Ok(OrderResult {
                    status: "accepted".to_string(),
                    order_id,
                    symbol: symbol.to_uppercase(),
                    side,
                    price,
                    size: quantity,
                    raw,
                })
            })
            .await
    }

    async fn order_fills(&self, _symbol: &str, order_id: &str) -> Result<Value> {
        self.retry
            .run("kraken.order_fills", || async move {
                self.gate("kraken:order_status", Duration::from_secs(3))
                    .await?;
                self.private_post(
                    "/0/private/QueryOrders",
                    &[("txid", order_id.to_string()), ("trades", "true".to_string())],
                )
                .await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    // Tests touching KRAKEN_* env vars serialize on this; the process
    // environment is shared across test threads.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_to_sandbox() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("KRAKEN_BASE_URL");
        std::env::remove_var("KRAKEN_USE_SANDBOX");
        let client = KrakenClient::new(None, None, None, None).unwrap();
        assert_eq!(client.base_url(), KRAKEN_SANDBOX_BASE);
    }

    #[test]
    fn explicit_base_url_wins() {
        let client = KrakenClient::new(
            None,
            None,
            Some("https://example.test/".to_string()),
            Some(false),
        )
        .unwrap();
        assert_eq!(client.base_url(), "https://example.test");
    }

    #[test]
    fn sandbox_flag_selects_production() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("KRAKEN_BASE_URL");
        let client = KrakenClient::new(None, None, None, Some(false)).unwrap();
        assert_eq!(client.base_url(), KRAKEN_PROD_BASE);
    }

    #[test]
    fn sandbox_flag_outranks_base_url_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("KRAKEN_BASE_URL", "https://env.test");
        let client = KrakenClient::new(None, None, None, Some(false)).unwrap();
        std::env::remove_var("KRAKEN_BASE_URL");
        assert_eq!(client.base_url(), KRAKEN_PROD_BASE);
    }

    #[test]
    fn nonce_is_strictly_increasing() {
        let client = KrakenClient::new(None, None, None, None).unwrap();
        let mut last = 0;
        for _ in 0..100 {
            let n = client.next_nonce();
            assert!(n > last);
            last = n;
        }
    }

    #[test]
    fn normalizes_ohlc_rows() {
        let result = json!({
            "XXBTZUSD": [
                [1700000000, "100.0", "102.0", "99.0", "101.0", "100.5", "12.5", 42]
            ],
            "last": 1700000000
        });
        let bars = normalize_kraken_ohlc(&result, 10).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].timestamp_ms, 1700000000000);
        assert_eq!(bars[0].volume, 12.5);
        assert_eq!(bars[0].close, 101.0);
    }

    #[test]
    fn limit_keeps_oldest_ohlc_rows() {
        let rows: Vec<_> = (1..=10)
            .map(|t| json!([1700000000 + t * 60, "1", "1", "1", "1", "1", "1", 1]))
            .collect();
        let result = json!({"XXBTZUSD": rows, "last": 1700000600});
        let bars = normalize_kraken_ohlc(&result, 3).unwrap();
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].timestamp_ms, 1700000060 * 1000);
        assert_eq!(bars[2].timestamp_ms, 1700000180 * 1000);
    }

    #[test]
    fn body_errors_are_mapped() {
        let rate = json!({"error": ["EAPI:Rate limit exceeded"]});
        assert!(matches!(
            KrakenClient::check_body_errors(&rate),
            Err(GatewayError::RateLimited(_))
        ));
        let auth = json!({"error": ["EAPI:Invalid key"]});
        assert!(matches!(
            KrakenClient::check_body_errors(&auth),
            Err(GatewayError::Auth(_))
        ));
        let other = json!({"error": ["EOrder:Insufficient funds"]});
        assert!(matches!(
            KrakenClient::check_body_errors(&other),
            Err(GatewayError::Exchange(_))
        ));
        assert!(KrakenClient::check_body_errors(&json!({"error": []})).is_ok());
    }

    #[test]
    fn unknown_timeframe_is_validation_error() {
        let client = KrakenClient::new(None, None, None, None).unwrap();
        let err = tokio_test::block_on(client.fetch_ohlcv("XBTUSD", "2h", None, None, 10))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }
}
