//! Coinbase Exchange REST adapter.
//!
//! Signed requests carry `CB-ACCESS-KEY`, `CB-ACCESS-SIGN`,
//! `CB-ACCESS-TIMESTAMP` and `CB-ACCESS-PASSPHRASE`. The signature is a
//! base64 HMAC-SHA256 over `timestamp + METHOD + path + body`.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::signing;
use crate::domain::{Bar, ExchangeCredentials, OrderResult, OrderType, Side};
use crate::error::{GatewayError, Result};
use crate::exchange::ExchangeClient;
use crate::infra::{RateLimiter, RetryPolicy};

const COINBASE_BASE: &str = "https://api.exchange.coinbase.com";

const DEFAULT_LIMITS: &[(&str, f64, f64)] = &[
    ("coinbase:global", 20.0, 10.0),
    ("coinbase:candles", 20.0, 5.0),
    ("coinbase:book", 20.0, 5.0),
    ("coinbase:order", 10.0, 3.0),
];

fn granularity_for(timeframe: &str) -> Option<u32> {
    match timeframe {
        "1m" => Some(60),
        "5m" => Some(300),
        "15m" => Some(900),
        "1h" => Some(3600),
        "6h" => Some(21600),
        "1d" => Some(86400),
        _ => None,
    }
}

fn iso_from_ms(ms: i64) -> Result<String> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.to_rfc3339())
        .ok_or_else(|| GatewayError::Validation(format!("timestamp out of range: {}", ms)))
}

/// Normalize one candle row `[time(s), low, high, open, close, volume]`.
pub(crate) fn normalize_coinbase_candle(row: &Value) -> Result<Bar> {
    let arr = row
        .as_array()
        .ok_or_else(|| GatewayError::Exchange("candle row is not an array".to_string()))?;
    if arr.len() < 6 {
        return Err(GatewayError::Exchange(format!(
            "candle row too short: {} fields",
            arr.len()
        )));
    }
    let num = |idx: usize, name: &str| -> Result<f64> {
        super::binance::value_f64(&arr[idx])
            .ok_or_else(|| GatewayError::Exchange(format!("candle {} missing", name)))
    };
    Ok(Bar {
        timestamp_ms: num(0, "time")? as i64 * 1000,
        low: num(1, "low")?,
        high: num(2, "high")?,
        open: num(3, "open")?,
        close: num(4, "close")?,
        volume: num(5, "volume")?,
    })
}

pub struct CoinbaseClient {
    http: Client,
    base_url: String,
    credentials: Option<ExchangeCredentials>,
    limits: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl CoinbaseClient {
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
            base_url: COINBASE_BASE.to_string(),
            credentials,
            limits,
            retry: RetryPolicy::default(),
        })
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

    async fn gate(&self, endpoint: &str, timeout: Duration) -> Result<()> {
        let ok_global = self
            .limits
            .acquire("coinbase:global", 1.0, Some(timeout))
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
            .ok_or_else(|| GatewayError::Auth("Coinbase credentials required".to_string()))
    }

    async fn get_json(&self, path_and_query: &str) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let resp = self.http.get(&url).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        Self::handle_status(status, &text)?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn signed_request(
        &self,
        method: &str,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value> {
        let creds = self.credentials()?;
        let timestamp = format!("{:.3}", Utc::now().timestamp_millis() as f64 / 1000.0);
        let body_text = body.map(|b| b.to_string()).unwrap_or_default();
        let signature = signing::coinbase_sign(
            &timestamp,
            method,
            path,
            &body_text,
            &creds.api_secret,
        )?;
        let url = format!("{}{}", self.base_url, path);
        let mut req = match method {
            "POST" => self.http.post(&url),
            "DELETE" => self.http.delete(&url),
            _ => self.http.get(&url),
        };
        req = req
            .header("CB-ACCESS-KEY", &creds.api_key)
            .header("CB-ACCESS-SIGN", signature)
            .header("CB-ACCESS-TIMESTAMP", timestamp)
            .header(
                "CB-ACCESS-PASSPHRASE",
                creds.passphrase.as_deref().unwrap_or(""),
            )
            .header("Content-Type", "application/json");
        if !body_text.is_empty() {
            req = req.body(body_text);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        Self::handle_status(status, &text)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl ExchangeClient for CoinbaseClient {
    fn name(&self) -> &str {
        "coinbase"
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Bar>> {
        let granularity = granularity_for(timeframe).ok_or_else(|| {
            GatewayError::Validation(format!("invalid timeframe: {}", timeframe))
        })?;
        let start = match start_ms {
            Some(ms) => Some(iso_from_ms(ms)?),
            None => None,
        };
        let end = match end_ms {
            Some(ms) => Some(iso_from_ms(ms)?),
            None => None,
        };
        let start = start.as_deref();
        let end = end.as_deref();

        self.retry
            .run("coinbase.fetch_ohlcv", || async move {
                self.gate("coinbase:candles", Duration::from_secs(5)).await?;
                let mut path = format!(
                    "/products/{}/candles?granularity={}",
                    symbol.to_uppercase(),
                    granularity
                );
                if let Some(start) = start {
                    path.push_str(&format!("&start={}", urlencoding::encode(start)));
                }
                if let Some(end) = end {
                    path.push_str(&format!("&end={}", urlencoding::encode(end)));
                }
                let data = self.get_json(&path).await?;
                let rows = data
                    .as_array()
                    .ok_or_else(|| GatewayError::Exchange("candles not an array".to_string()))?;
                let mut bars = rows
                    .iter()
                    .map(normalize_coinbase_candle)
                    .collect::<Result<Vec<_>>>()?;
                // Coinbase returns newest-first.
                bars.sort_by_key(|b| b.timestamp_ms);
                if bars.len() > limit {
                    bars.drain(..bars.len() - limit);
                }
                Ok(bars)
            })
            .await
    }

    async fn fetch_order_book(&self, symbol: &str, limit: u32) -> Result<Value> {
        // Coinbase exposes aggregation levels 1..=3, not row counts.
        let level = limit.clamp(1, 3);
        self.retry
            .run("coinbase.fetch_order_book", || async move {
                self.gate("coinbase:book", Duration::from_secs(5)).await?;
                self.get_json(&format!(
                    "/products/{}/book?level={}",
                    symbol.to_uppercase(),
                    level
                ))
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
            .run("coinbase.place_order", || async move {
                self.gate("coinbase:order", Duration::from_secs(5)).await?;
                let mut body = json!({
                    "product_id": symbol.to_uppercase(),
                    "side": side.as_str(),
                    "type": order_type.as_str(),
                    "size": quantity.to_string(),
                });
                if let Some(price) = price {
                    body["price"] = json!(price.to_string());
                }
                let raw = self.signed_request("POST", "/orders", Some(&body)).await?;
                let order_id = raw.get("id").and_then(|v| v.as_str()).map(str::to_string);
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

    async fn order_fills(&self, _symbol: &str, order_id: &str) -> Result<Value> {
        self.retry
            .run("coinbase.order_fills", || async move {
                self.gate("coinbase:order", Duration::from_secs(3)).await?;
                self.signed_request("GET", &format!("/orders/{}/fills", order_id), None)
                    .await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_candle_row() {
        let row = json!([1700000000, 99.0, 102.0, 100.0, 101.0, 12.5]);
        let bar = normalize_coinbase_candle(&row).unwrap();
        assert_eq!(bar.timestamp_ms, 1700000000000);
        assert_eq!(bar.low, 99.0);
        assert_eq!(bar.high, 102.0);
        assert_eq!(bar.open, 100.0);
        assert_eq!(bar.close, 101.0);
        assert_eq!(bar.volume, 12.5);
    }

    #[test]
    fn unknown_timeframe_is_validation_error() {
        let client = CoinbaseClient::new(None, None).unwrap();
        let err = tokio_test::block_on(client.fetch_ohlcv("BTC-USD", "2h", None, None, 10))
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[test]
    fn limit_order_requires_price() {
        let creds = ExchangeCredentials::new("k", "c2VjcmV0").with_passphrase("pass");
        let client = CoinbaseClient::new(Some(creds), None).unwrap();
        let err = tokio_test::block_on(client.place_order(
            "BTC-USD",
            Side::Buy,
            OrderType::Limit,
            0.01,
            None,
        ))
        .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[test]
    fn level_is_clamped() {
        assert_eq!(9u32.clamp(1, 3), 3);
        assert_eq!(0u32.clamp(1, 3), 1);
    }
}
