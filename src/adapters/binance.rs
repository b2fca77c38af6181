//! Binance spot REST adapter.
//!
//! Signed endpoints use HMAC-SHA256 over a canonical sorted query string with
//! the key in the `X-MBX-APIKEY` header. Binance signals bans with 418 in
//! addition to 429; both map to the rate-limit error.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::signing;
use crate::domain::{Bar, ExchangeCredentials, OrderResult, OrderType, Side};
use crate::error::{GatewayError, Result};
use crate::exchange::ExchangeClient;
use crate::infra::{RateLimiter, RetryPolicy};

const BINANCE_SPOT_BASE: &str = "https://api.binance.com";

// Global 1200 req/min -> 20 tokens/s with full-minute burst capacity;
// endpoint classes deliberately conservative.
const DEFAULT_LIMITS: &[(&str, f64, f64)] = &[
    ("binance:global", 1200.0, 20.0),
    ("binance:klines", 100.0, 2.0),
    ("binance:depth", 100.0, 2.0),
    ("binance:order", 30.0, 1.0),
    ("binance:order_status", 30.0, 2.0),
];

fn interval_for(timeframe: &str) -> Option<&'static str> {
    match timeframe {
        "1m" => Some("1m"),
        "3m" => Some("3m"),
        "5m" => Some("5m"),
        "15m" => Some("15m"),
        "30m" => Some("30m"),
        "1h" => Some("1h"),
        "2h" => Some("2h"),
        "4h" => Some("4h"),
        "6h" => Some("6h"),
        "8h" => Some("8h"),
        "12h" => Some("12h"),
        "1d" => Some("1d"),
        "3d" => Some("3d"),
        "1w" => Some("1w"),
        "1M" => Some("1M"),
        _ => None,
    }
}

/// Parse a JSON value that Binance may deliver as either number or string.
pub(crate) fn value_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Normalize one kline row `[openTime, o, h, l, c, v, closeTime, ...]`.
pub(crate) fn normalize_binance_kline(row: &Value) -> Result<Bar> {
    let arr = row
        .as_array()
        .ok_or_else(|| GatewayError::Exchange("kline row is not an array".to_string()))?;
    if arr.len() < 6 {
        return Err(GatewayError::Exchange(format!(
            "kline row too short: {} fields",
            arr.len()
        )));
    }
    let timestamp_ms = arr[0]
        .as_i64()
        .or_else(|| value_f64(&arr[0]).map(|f| f as i64))
        .ok_or_else(|| GatewayError::Exchange("kline open time missing".to_string()))?;
    let field = |idx: usize, name: &str| -> Result<f64> {
        value_f64(&arr[idx])
            .ok_or_else(|| GatewayError::Exchange(format!("kline {} missing", name)))
    };
    Ok(Bar {
        timestamp_ms,
        open: field(1, "open")?,
        high: field(2, "high")?,
        low: field(3, "low")?,
        close: field(4, "close")?,
        volume: field(5, "volume")?,
    })
}

pub struct BinanceClient {
    http: Client,
    base_url: String,
    credentials: Option<ExchangeCredentials>,
    limits: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl BinanceClient {
    pub fn new(
        credentials: Option<ExchangeCredentials>,
        rate_limiter: Option<Arc<RateLimiter>>,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent("tradegate/0.1")
            .timeout(Duration::from_secs(10))
            .build()?;
        let limits = rate_limiter.unwrap_or_default();
        for (key, capacity, fill_rate) in DEFAULT_LIMITS {
            if !limits.is_registered(key) {
                limits.register(key, *capacity, *fill_rate);
            }
        }
        Ok(Self {
            http,
            base_url: BINANCE_SPOT_BASE.to_string(),
            credentials,
            limits,
            retry: RetryPolicy::default(),
        })
    }

    fn handle_status(status: StatusCode, body: &str) -> Result<()> {
        match status.as_u16() {
            401 | 403 => Err(GatewayError::Auth(body.to_string())),
            418 | 429 => Err(GatewayError::RateLimited(body.to_string())),
            500..=599 => Err(GatewayError::Network(body.to_string())),
            s if !status.is_success() => {
                Err(GatewayError::Exchange(format!("status={} body={}", s, body)))
            }
            _ => Ok(()),
        }
    }

    /// Acquire the global bucket then the endpoint-class bucket. Acquisition
    /// failure surfaces as a rate-limit error, never a silent skip.
    async fn gate(&self, endpoint: &str, timeout: Duration) -> Result<()> {
        let ok_global = self
            .limits
            .acquire("binance:global", 1.0, Some(timeout))
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
            .ok_or_else(|| GatewayError::Auth("Binance credentials required".to_string()))
    }

    fn timestamp_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn canonical_query(params: &BTreeMap<&str, String>) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.http.get(&url).query(query).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        Self::handle_status(status, &text)?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn signed_get(&self, path: &str, mut params: BTreeMap<&str, String>) -> Result<Value> {
        let creds = self.credentials()?;
        params.insert("timestamp", Self::timestamp_ms().to_string());
        params.insert("recvWindow", "5000".to_string());
        let query = Self::canonical_query(&params);
        let signature = signing::binance_sign(&query, &creds.api_secret)?;
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);
        let resp = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &creds.api_key)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        Self::handle_status(status, &text)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    fn name(&self) -> &str {
        "binance"
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Bar>> {
        let interval = interval_for(timeframe).ok_or_else(|| {
            GatewayError::Validation(format!("invalid timeframe: {}", timeframe))
        })?;

        self.retry
            .run("binance.fetch_ohlcv", || async move {
                self.gate("binance:klines", Duration::from_secs(5)).await?;
                let mut query = vec![
                    ("symbol", symbol.to_uppercase()),
                    ("interval", interval.to_string()),
                    ("limit", limit.to_string()),
                ];
                if let Some(start) = start_ms {
                    query.push(("startTime", start.to_string()));
                }
                if let Some(end) = end_ms {
                    query.push(("endTime", end.to_string()));
                }
                let data = self.get_json("/api/v3/klines", &query).await?;
                let rows = data
                    .as_array()
                    .ok_or_else(|| GatewayError::Exchange("klines not an array".to_string()))?;
                rows.iter().map(normalize_binance_kline).collect()
            })
            .await
    }

    async fn fetch_order_book(&self, symbol: &str, limit: u32) -> Result<Value> {
        self.retry
            .run("binance.fetch_order_book", || async move {
                self.gate("binance:depth", Duration::from_secs(5)).await?;
                self.get_json(
                    "/api/v3/depth",
                    &[
                        ("symbol", symbol.to_uppercase()),
                        ("limit", limit.to_string()),
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
        let creds = self.credentials()?;

        self.retry
            .run("binance.place_order", || async move {
                self.gate("binance:order", Duration::from_secs(5)).await?;
                let mut params: BTreeMap<&str, String> = BTreeMap::new();
                params.insert("symbol", symbol.to_uppercase());
                params.insert("side", side.as_str().to_uppercase());
                params.insert("type", order_type.as_str().to_uppercase());
                params.insert("quantity", quantity.to_string());
                params.insert("recvWindow", "5000".to_string());
                params.insert("timestamp", Self::timestamp_ms().to_string());
                if let Some(price) = price {
                    params.insert("price", price.to_string());
                    params.insert("timeInForce", "GTC".to_string());
                }
                let query = Self::canonical_query(&params);
                let signature = signing::binance_sign(&query, &creds.api_secret)?;
                let url = format!(
                    "{}/api/v3/order?{}&signature={}",
                    self.base_url, query, signature
                );
                let resp = self
                    .http
                    .post(&url)
                    .header("X-MBX-APIKEY", &creds.api_key)
                    .send()
                    .await?;
                let status = resp.status();
                let text = resp.text().await?;
                Self::handle_status(status, &text)?;
                let raw: Value = serde_json::from_str(&text)?;

                let order_id = raw
                    .get("orderId")
                    .map(|v| match v {
                        Value::Number(n) => n.to_string(),
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    });
                Ok(OrderResult {
                    status: raw
                        .get("status")
                        .and_then(|v| v.as_str())
                        .unwrap_or("accepted")
                        .to_string(),
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

    async fn order_fills(&self, symbol: &str, order_id: &str) -> Result<Value> {
        self.retry
            .run("binance.order_fills", || async move {
                self.gate("binance:order_status", Duration::from_secs(3))
                    .await?;
                let mut params: BTreeMap<&str, String> = BTreeMap::new();
                params.insert("symbol", symbol.to_uppercase());
                params.insert("orderId", order_id.to_string());
                self.signed_get("/api/v3/myTrades", params).await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_kline_row() {
        let row = json!([
            1700000000000i64, "100.0", "102.0", "99.0", "101.0", "123.4",
            1700000299999i64, "0", 0, "0", "0", "0"
        ]);
        let bar = normalize_binance_kline(&row).unwrap();
        assert_eq!(bar.timestamp_ms, 1700000000000);
        assert_eq!(bar.open, 100.0);
        assert_eq!(bar.high, 102.0);
        assert_eq!(bar.low, 99.0);
        assert_eq!(bar.close, 101.0);
        assert_eq!(bar.volume, 123.4);
    }

    #[test]
    fn rejects_short_kline_row() {
        assert!(normalize_binance_kline(&json!([1, "2"])).is_err());
        assert!(normalize_binance_kline(&json!("not an array")).is_err());
    }

    #[test]
    fn unknown_timeframe_is_validation_error() {
        let client = BinanceClient::new(None, None).unwrap();
        let err = tokio_test::block_on(client.fetch_ohlcv("BTCUSDT", "7m", None, None, 10))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[test]
    fn place_order_without_credentials_fails_fast() {
        let client = BinanceClient::new(None, None).unwrap();
        let err = tokio_test::block_on(client.place_order(
            "BTCUSDT",
            Side::Buy,
            OrderType::Limit,
            0.001,
            Some(50000.0),
        ))
        .unwrap_err();
        assert!(matches!(err, GatewayError::Auth(_)));
    }

    #[test]
    fn status_mapping_matches_taxonomy() {
        assert!(matches!(
            BinanceClient::handle_status(StatusCode::UNAUTHORIZED, ""),
            Err(GatewayError::Auth(_))
        ));
        assert!(matches!(
            BinanceClient::handle_status(StatusCode::IM_A_TEAPOT, ""),
            Err(GatewayError::RateLimited(_))
        ));
        assert!(matches!(
            BinanceClient::handle_status(StatusCode::TOO_MANY_REQUESTS, ""),
            Err(GatewayError::RateLimited(_))
        ));
        assert!(matches!(
            BinanceClient::handle_status(StatusCode::BAD_GATEWAY, ""),
            Err(GatewayError::Network(_))
        ));
        assert!(matches!(
            BinanceClient::handle_status(StatusCode::BAD_REQUEST, "oops"),
            Err(GatewayError::Exchange(_))
        ));
        assert!(BinanceClient::handle_status(StatusCode::OK, "").is_ok());
    }
}
