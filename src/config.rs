//! Environment-driven settings.
//!
//! The gateway consumes configuration, it does not own it: everything comes
//! from environment variables so the supervising process decides deployment
//! shape. Credentials stay optional until an authenticated call needs them.

use std::path::PathBuf;
use std::time::Duration;

use crate::domain::ExchangeCredentials;
use crate::exchange::ExchangeKind;

/// Runtime settings for the execution gateway.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Exchange the client factory builds by default.
    pub exchange: ExchangeKind,
    pub binance_credentials: Option<ExchangeCredentials>,
    pub coinbase_credentials: Option<ExchangeCredentials>,
    pub kraken_credentials: Option<ExchangeCredentials>,
    /// Explicit sandbox/production switch for Kraken; `None` defers to
    /// `KRAKEN_USE_SANDBOX` / `KRAKEN_BASE_URL`.
    pub kraken_use_sandbox: Option<bool>,
    /// Upper bound for fill polling per order.
    pub order_fill_max_wait: Duration,
    /// Directory for the JSON runtime artifacts.
    pub runtime_dir: PathBuf,
    /// Cadence of the artifact reporter.
    pub report_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            exchange: ExchangeKind::Binance,
            binance_credentials: None,
            coinbase_credentials: None,
            kraken_credentials: None,
            kraken_use_sandbox: None,
            order_fill_max_wait: Duration::from_secs(5),
            runtime_dir: PathBuf::from("runtime"),
            report_interval: Duration::from_secs(30),
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let exchange = env_str("GATEWAY_EXCHANGE")
            .and_then(|v| v.parse().ok())
            .unwrap_or(ExchangeKind::Binance);

        let binance_credentials = credentials_from_env("BINANCE_API_KEY", "BINANCE_API_SECRET", None);
        let coinbase_credentials = credentials_from_env(
            "COINBASE_API_KEY",
            "COINBASE_API_SECRET",
            Some("COINBASE_PASSPHRASE"),
        );
        let kraken_credentials = credentials_from_env("KRAKEN_API_KEY", "KRAKEN_API_SECRET", None);

        Self {
            exchange,
            binance_credentials,
            coinbase_credentials,
            kraken_credentials,
            kraken_use_sandbox: None,
            order_fill_max_wait: Duration::from_secs_f64(
                env_f64("ORDER_FILL_MAX_WAIT_S").unwrap_or(5.0).max(0.0),
            ),
            runtime_dir: env_str("GATEWAY_RUNTIME_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("runtime")),
            report_interval: Duration::from_secs_f64(
                env_f64("GATEWAY_REPORT_INTERVAL_S").unwrap_or(30.0).max(1.0),
            ),
        }
    }

    pub fn credentials_for(&self, exchange: ExchangeKind) -> Option<&ExchangeCredentials> {
        match exchange {
            ExchangeKind::Binance => self.binance_credentials.as_ref(),
            ExchangeKind::Coinbase => self.coinbase_credentials.as_ref(),
            ExchangeKind::Kraken => self.kraken_credentials.as_ref(),
        }
    }
}

fn credentials_from_env(
    key_var: &str,
    secret_var: &str,
    passphrase_var: Option<&str>,
) -> Option<ExchangeCredentials> {
    let api_key = env_str(key_var)?;
    let api_secret = env_str(secret_var)?;
    let mut creds = ExchangeCredentials::new(api_key, api_secret);
    if let Some(var) = passphrase_var {
        if let Some(passphrase) = env_str(var) {
            creds = creds.with_passphrase(passphrase);
        }
    }
    Some(creds)
}

fn env_str(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Float env override, used for the per-bucket rate-limit tunables.
pub fn env_f64(name: &str) -> Option<f64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Boolean env flag (`1`/`true`/`yes`/`on`).
pub fn env_bool(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}
