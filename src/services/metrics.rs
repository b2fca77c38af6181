//! Trading execution metrics.
//!
//! One mutex guards all mutation; `snapshot` derives rates and averages
//! without touching the raw counters. Snapshots serialize directly into the
//! `metrics_trading.json` runtime artifact.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use crate::infra::FlagsSnapshot;
use crate::trading::{FeeCalculatorFactory, PollerFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPath {
    Service,
    Legacy,
}

impl ExecutionPath {
    fn as_str(&self) -> &'static str {
        match self {
            ExecutionPath::Service => "service",
            ExecutionPath::Legacy => "legacy",
        }
    }
}

#[derive(Debug, Default)]
struct SideStats {
    attempts: u64,
    success: u64,
    failure: u64,
}

#[derive(Debug, Default)]
struct PathStats {
    attempts: u64,
    durations: Vec<f64>,
}

#[derive(Debug, Default)]
struct PlaceOrderStats {
    attempts: u64,
    success: u64,
    failure: u64,
    durations: Vec<f64>,
    fail_reasons: HashMap<String, u64>,
}

#[derive(Debug, Default)]
struct FeeAccuracyStats {
    samples: u64,
    errors_abs_pct: Vec<f64>,
    unknown_samples: u64,
}

#[derive(Debug, Default)]
struct ExchangeStats {
    attempts: u64,
    success: u64,
    failure: u64,
    buy: SideStats,
    sell: SideStats,
    fill_times: Vec<f64>,
    statuses: HashMap<String, u64>,
    service_path: PathStats,
    legacy_path: PathStats,
    place_order: PlaceOrderStats,
    fee_accuracy: FeeAccuracyStats,
}

impl ExchangeStats {
    fn side_mut(&mut self, side: &str) -> &mut SideStats {
        if side.eq_ignore_ascii_case("buy") {
            &mut self.buy
        } else {
            &mut self.sell
        }
    }

    fn path_mut(&mut self, path: ExecutionPath) -> &mut PathStats {
        match path {
            ExecutionPath::Service => &mut self.service_path,
            ExecutionPath::Legacy => &mut self.legacy_path,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    attempts_total: u64,
    success_total: u64,
    failure_total: u64,
    by_exchange: HashMap<String, ExchangeStats>,
}

impl State {
    fn exchange_mut(&mut self, exchange: &str) -> &mut ExchangeStats {
        self.by_exchange
            .entry(exchange.to_lowercase())
            .or_default()
    }
}

#[derive(Default)]
pub struct TradingMetricsCollector {
    state: Mutex<State>,
}

fn avg(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

impl TradingMetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a polling attempt and returns the start instant for latency
    /// measurement.
    pub fn record_attempt(&self, exchange: &str, side: &str, path: ExecutionPath) -> Instant {
        let mut state = self.state.lock().expect("metrics lock poisoned");
        state.attempts_total += 1;
        let ex = state.exchange_mut(exchange);
        ex.attempts += 1;
        ex.side_mut(side).attempts += 1;
        ex.path_mut(path).attempts += 1;
        Instant::now()
    }

    pub fn record_success(
        &self,
        exchange: &str,
        side: &str,
        path: ExecutionPath,
        latency_s: f64,
        status: &str,
    ) {
        let mut state = self.state.lock().expect("metrics lock poisoned");
        state.success_total += 1;
        let ex = state.exchange_mut(exchange);
        ex.success += 1;
        ex.side_mut(side).success += 1;
        ex.fill_times.push(latency_s);
        *ex.statuses.entry(status.to_uppercase()).or_insert(0) += 1;
        ex.path_mut(path).durations.push(latency_s);
    }

    pub fn record_failure(
        &self,
        exchange: &str,
        side: &str,
        path: ExecutionPath,
        latency_s: f64,
        reason: &str,
    ) {
        let mut state = self.state.lock().expect("metrics lock poisoned");
        state.failure_total += 1;
        let ex = state.exchange_mut(exchange);
        ex.failure += 1;
        ex.side_mut(side).failure += 1;
        if latency_s >= 0.0 {
            ex.path_mut(path).durations.push(latency_s);
        }
        *ex.statuses.entry("FAIL".to_string()).or_insert(0) += 1;
        *ex.statuses
            .entry(format!("FAIL:{}", reason.to_uppercase()))
            .or_insert(0) += 1;
    }

    pub fn record_place_order_attempt(&self, exchange: &str) -> Instant {
        let mut state = self.state.lock().expect("metrics lock poisoned");
        state.exchange_mut(exchange).place_order.attempts += 1;
        Instant::now()
    }

    pub fn record_place_order_result(
        &self,
        exchange: &str,
        latency_s: f64,
        success: bool,
        reason: Option<&str>,
    ) {
        let mut state = self.state.lock().expect("metrics lock poisoned");
        let po = &mut state.exchange_mut(exchange).place_order;
        po.durations.push(latency_s);
        if success {
            po.success += 1;
        } else {
            po.failure += 1;
            let reason = reason.unwrap_or("unknown").to_uppercase();
            *po.fail_reasons.entry(reason).or_insert(0) += 1;
        }
    }

    /// Compares the reported base-currency fee against the quote-fee
    /// estimate. Missing inputs or a non-positive price count as unknown.
    pub fn record_fee_accuracy(
        &self,
        exchange: &str,
        fee_base: Option<f64>,
        fee_quote: Option<f64>,
        avg_price: Option<f64>,
    ) {
        let mut state = self.state.lock().expect("metrics lock poisoned");
        let fa = &mut state.exchange_mut(exchange).fee_accuracy;
        let (fee_base, fee_quote, avg_price) = match (fee_base, fee_quote, avg_price) {
            (Some(b), Some(q), Some(p)) if p > 0.0 => (b, q, p),
            _ => {
                fa.unknown_samples += 1;
                return;
            }
        };
        let estimated_base = fee_quote / avg_price;
        let denom = estimated_base.abs().max(1e-9);
        fa.errors_abs_pct.push((fee_base - estimated_base).abs() / denom);
        fa.samples += 1;
    }

    pub fn snapshot(
        &self,
        pollers: Option<&PollerFactory>,
        fees: Option<&FeeCalculatorFactory>,
        flags: Option<FlagsSnapshot>,
    ) -> MetricsSnapshot {
        let state = self.state.lock().expect("metrics lock poisoned");

        let mut all_fills: Vec<f64> = Vec::new();
        let mut service_all: Vec<f64> = Vec::new();
        let mut legacy_all: Vec<f64> = Vec::new();
        for ex in state.by_exchange.values() {
            all_fills.extend(&ex.fill_times);
            service_all.extend(&ex.service_path.durations);
            legacy_all.extend(&ex.legacy_path.durations);
        }

        let by_exchange = state
            .by_exchange
            .iter()
            .map(|(name, ex)| {
                let po = &ex.place_order;
                let fa = &ex.fee_accuracy;
                (
                    name.clone(),
                    ExchangeSnapshot {
                        attempts: ex.attempts,
                        success: ex.success,
                        failure: ex.failure,
                        success_rate: ex.success as f64 / ex.attempts.max(1) as f64,
                        avg_fill_time_s: avg(&ex.fill_times),
                        by_side: SideBreakdown {
                            buy: SideSnapshot::from(&ex.buy),
                            sell: SideSnapshot::from(&ex.sell),
                        },
                        statuses: ex.statuses.clone(),
                        path: PathSnapshot {
                            service_attempts: ex.service_path.attempts,
                            legacy_attempts: ex.legacy_path.attempts,
                            service_avg_latency_s: avg(&ex.service_path.durations),
                            legacy_avg_latency_s: avg(&ex.legacy_path.durations),
                        },
                        place_order: PlaceOrderSnapshot {
                            attempts: po.attempts,
                            success: po.success,
                            failure: po.failure,
                            success_rate: po.success as f64 / po.attempts.max(1) as f64,
                            avg_latency_s: avg(&po.durations),
                            fail_reasons: po.fail_reasons.clone(),
                        },
                        fee_accuracy: FeeAccuracySnapshot {
                            samples: fa.samples,
                            mean_abs_pct: avg(&fa.errors_abs_pct),
                            unknown_samples: fa.unknown_samples,
                        },
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            attempts_total: state.attempts_total,
            success_total: state.success_total,
            failure_total: state.failure_total,
            success_rate: state.success_total as f64 / state.attempts_total.max(1) as f64,
            avg_fill_time_s: avg(&all_fills),
            comparison: PathComparison {
                service_avg_latency_s: avg(&service_all),
                legacy_avg_latency_s: avg(&legacy_all),
            },
            by_exchange,
            extensibility: ExtensibilitySnapshot {
                poller_registry: pollers.map(|p| p.registered()).unwrap_or_default(),
                fee_registry: fees.map(|f| f.registered()).unwrap_or_default(),
                poller_registry_size: pollers.map(|p| p.registered().len()).unwrap_or(0),
                fee_registry_size: fees.map(|f| f.registered().len()).unwrap_or(0),
            },
            feature_flags: flags,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub attempts_total: u64,
    pub success_total: u64,
    pub failure_total: u64,
    pub success_rate: f64,
    pub avg_fill_time_s: f64,
    pub comparison: PathComparison,
    pub by_exchange: HashMap<String, ExchangeSnapshot>,
    pub extensibility: ExtensibilitySnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_flags: Option<FlagsSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct PathComparison {
    pub service_avg_latency_s: f64,
    pub legacy_avg_latency_s: f64,
}

#[derive(Debug, Serialize)]
pub struct ExchangeSnapshot {
    pub attempts: u64,
    pub success: u64,
    pub failure: u64,
    pub success_rate: f64,
    pub avg_fill_time_s: f64,
    pub by_side: SideBreakdown,
    pub statuses: HashMap<String, u64>,
    pub path: PathSnapshot,
    pub place_order: PlaceOrderSnapshot,
    pub fee_accuracy: FeeAccuracySnapshot,
}

#[derive(Debug, Serialize)]
pub struct SideBreakdown {
    pub buy: SideSnapshot,
    pub sell: SideSnapshot,
}

#[derive(Debug, Serialize)]
pub struct SideSnapshot {
    pub attempts: u64,
    pub success: u64,
    pub failure: u64,
    pub success_rate: f64,
}

impl From<&SideStats> for SideSnapshot {
    fn from(s: &SideStats) -> Self {
        Self {
            attempts: s.attempts,
            success: s.success,
            failure: s.failure,
            success_rate: s.success as f64 / s.attempts.max(1) as f64,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PathSnapshot {
    pub service_attempts: u64,
    pub legacy_attempts: u64,
    pub service_avg_latency_s: f64,
    pub legacy_avg_latency_s: f64,
}

#[derive(Debug, Serialize)]
pub struct PlaceOrderSnapshot {
    pub attempts: u64,
    pub success: u64,
    pub failure: u64,
    pub success_rate: f64,
    pub avg_latency_s: f64,
    pub fail_reasons: HashMap<String, u64>,
}

#[derive(Debug, Serialize)]
pub struct FeeAccuracySnapshot {
    pub samples: u64,
    pub mean_abs_pct: f64,
    pub unknown_samples: u64,
}

#[derive(Debug, Serialize)]
pub struct ExtensibilitySnapshot {
    pub poller_registry_size: usize,
    pub fee_registry_size: usize,
    pub poller_registry: Vec<String>,
    pub fee_registry: Vec<String>,
}
