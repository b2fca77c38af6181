//! Per-component feature toggles with canary rollout and automatic rollback.
//!
//! Routing is deterministic: in `auto` mode a stable hash of the routing key
//! decides the path, so the same symbol/exchange pair always lands on the
//! same side for a fixed rollout percentage. A burst of consecutive failures
//! on the new path quarantines it back to legacy for a bounded window.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Routing decision for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PathChoice {
    Legacy,
    New,
}

impl PathChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathChoice::Legacy => "legacy",
            PathChoice::New => "new",
        }
    }
}

/// Configured mode of one component toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToggleMode {
    Legacy,
    New,
    Auto,
}

impl ToggleMode {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "legacy" => ToggleMode::Legacy,
            "new" => ToggleMode::New,
            _ => ToggleMode::Auto,
        }
    }
}

/// Runtime state of one logical component (`executor`, `poller`, `fees`).
#[derive(Debug)]
pub struct ComponentToggle {
    pub mode: ToggleMode,
    pub rollout_pct: u32,
    pub max_consec_failures: u32,
    pub rollback_timeout: Duration,
    pub attempts: u64,
    pub success: u64,
    pub failure: u64,
    pub consecutive_failures: u32,
    pub rollback_until: Option<Instant>,
    pub last_error: Option<String>,
}

impl ComponentToggle {
    pub fn new(
        mode: ToggleMode,
        rollout_pct: u32,
        max_consec_failures: u32,
        rollback_timeout: Duration,
    ) -> Self {
        Self {
            mode,
            rollout_pct,
            max_consec_failures,
            rollback_timeout,
            attempts: 0,
            success: 0,
            failure: 0,
            consecutive_failures: 0,
            rollback_until: None,
            last_error: None,
        }
    }

    fn rollback_active(&self) -> bool {
        matches!(self.rollback_until, Some(until) if Instant::now() < until)
    }
}

impl Default for ComponentToggle {
    fn default() -> Self {
        Self::new(ToggleMode::Auto, 0, 5, Duration::from_secs(300))
    }
}

/// Serializable status of one component, for dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct ToggleStatus {
    pub mode: ToggleMode,
    pub rollout_pct: u32,
    pub attempts: u64,
    pub success: u64,
    pub failure: u64,
    pub consecutive_failures: u32,
    pub rollback_active: bool,
    pub rollback_remaining_s: f64,
    pub last_error: Option<String>,
}

/// Snapshot of every component toggle.
#[derive(Debug, Clone, Serialize)]
pub struct FlagsSnapshot {
    pub components: std::collections::BTreeMap<String, ToggleStatus>,
    pub ts: f64,
}

/// Feature-flag manager with automatic per-component rollback.
pub struct FeatureToggleManager {
    components: Mutex<HashMap<String, ComponentToggle>>,
}

impl FeatureToggleManager {
    pub fn new(components: HashMap<String, ComponentToggle>) -> Self {
        Self {
            components: Mutex::new(components),
        }
    }

    /// Build the standard `executor`/`poller`/`fees` toggles from the
    /// `FF_<COMPONENT>_*` environment families.
    pub fn from_env() -> Self {
        let mut components = HashMap::new();
        for (name, prefix) in [
            ("executor", "FF_EXECUTION"),
            ("poller", "FF_POLLER"),
            ("fees", "FF_FEES"),
        ] {
            components.insert(name.to_string(), toggle_from_env(prefix));
        }
        Self::new(components)
    }

    /// Stable percentage bucket for a routing key: first 4 bytes of SHA-256,
    /// mod 100.
    fn stable_percent(key: &str) -> u32 {
        let digest = Sha256::digest(key.as_bytes());
        let val = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        val % 100
    }

    /// Decide which code path handles this call. An active rollback always
    /// forces legacy; an unknown component routes legacy.
    pub fn choose_path(&self, component: &str, key: &str) -> PathChoice {
        let mut components = self.components.lock().expect("toggle lock poisoned");
        let toggle = match components.get_mut(component) {
            Some(t) => t,
            None => return PathChoice::Legacy,
        };

        let rollback_active = toggle.rollback_active();
        let decision = if rollback_active {
            PathChoice::Legacy
        } else {
            match toggle.mode {
                ToggleMode::Legacy => PathChoice::Legacy,
                ToggleMode::New => PathChoice::New,
                ToggleMode::Auto => {
                    if Self::stable_percent(key) < toggle.rollout_pct.min(100) {
                        PathChoice::New
                    } else {
                        PathChoice::Legacy
                    }
                }
            }
        };

        info!(
            event = "ff_decision",
            component,
            key,
            decision = decision.as_str(),
            mode = ?toggle.mode,
            rollout_pct = toggle.rollout_pct,
            rollback_active,
        );
        toggle.attempts += 1;
        decision
    }

    pub fn report_success(&self, component: &str) {
        let mut components = self.components.lock().expect("toggle lock poisoned");
        if let Some(toggle) = components.get_mut(component) {
            toggle.success += 1;
            toggle.consecutive_failures = 0;
        }
    }

    /// Record a failure. When the failing path was `new` and the consecutive
    /// failure threshold is reached, quarantine the new path for the
    /// configured window.
    pub fn report_failure(&self, component: &str, reason: &str, path_used: PathChoice) {
        let mut components = self.components.lock().expect("toggle lock poisoned");
        let toggle = match components.get_mut(component) {
            Some(t) => t,
            None => return,
        };
        toggle.failure += 1;
        toggle.consecutive_failures += 1;
        toggle.last_error = Some(reason.to_string());

        if path_used == PathChoice::New && toggle.consecutive_failures >= toggle.max_consec_failures
        {
            toggle.rollback_until = Some(Instant::now() + toggle.rollback_timeout);
            warn!(
                event = "ff_rollback",
                component,
                reason,
                max_consec_failures = toggle.max_consec_failures,
                rollback_timeout_s = toggle.rollback_timeout.as_secs_f64(),
                "new path quarantined, routing to legacy"
            );
        }
    }

    /// Read-only dump of all component counters.
    pub fn status_snapshot(&self) -> FlagsSnapshot {
        let components = self.components.lock().expect("toggle lock poisoned");
        let now = Instant::now();
        let out = components
            .iter()
            .map(|(name, t)| {
                let remaining = t
                    .rollback_until
                    .and_then(|until| until.checked_duration_since(now))
                    .map(|d| d.as_secs_f64())
                    .unwrap_or(0.0);
                (
                    name.clone(),
                    ToggleStatus {
                        mode: t.mode,
                        rollout_pct: t.rollout_pct,
                        attempts: t.attempts,
                        success: t.success,
                        failure: t.failure,
                        consecutive_failures: t.consecutive_failures,
                        rollback_active: t.rollback_active(),
                        rollback_remaining_s: remaining,
                        last_error: t.last_error.clone(),
                    },
                )
            })
            .collect();
        FlagsSnapshot {
            components: out,
            ts: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        }
    }
}

fn toggle_from_env(prefix: &str) -> ComponentToggle {
    let get = |suffix: &str| std::env::var(format!("{}_{}", prefix, suffix)).ok();
    let mode = ToggleMode::parse(&get("MODE").unwrap_or_else(|| "auto".to_string()));
    let rollout_pct = get("ROLLOUT_PCT")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);
    let max_consec = get("MAX_CONSEC_FAIL")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(5);
    let rollback_timeout_s: u64 = get("ROLLBACK_TIMEOUT_S")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(300);
    ComponentToggle::new(
        mode,
        rollout_pct,
        max_consec,
        Duration::from_secs(rollback_timeout_s),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with(mode: ToggleMode, rollout_pct: u32, max_fail: u32, timeout: Duration) -> FeatureToggleManager {
        let mut components = HashMap::new();
        components.insert(
            "executor".to_string(),
            ComponentToggle::new(mode, rollout_pct, max_fail, timeout),
        );
        FeatureToggleManager::new(components)
    }

    #[test]
    fn canary_decision_is_deterministic() {
        let mgr = manager_with(ToggleMode::Auto, 50, 5, Duration::from_secs(300));
        let first = mgr.choose_path("executor", "kraken:XBTUSD");
        for _ in 0..20 {
            assert_eq!(mgr.choose_path("executor", "kraken:XBTUSD"), first);
        }
    }

    #[test]
    fn rollout_bounds_route_everything() {
        let zero = manager_with(ToggleMode::Auto, 0, 5, Duration::from_secs(300));
        let full = manager_with(ToggleMode::Auto, 100, 5, Duration::from_secs(300));
        for key in ["a", "b", "binance:BTCUSDT", "coinbase:ETH-USD"] {
            assert_eq!(zero.choose_path("executor", key), PathChoice::Legacy);
            assert_eq!(full.choose_path("executor", key), PathChoice::New);
        }
    }

    #[test]
    fn unknown_component_routes_legacy() {
        let mgr = manager_with(ToggleMode::New, 0, 5, Duration::from_secs(300));
        assert_eq!(mgr.choose_path("nonsense", "k"), PathChoice::Legacy);
    }

    #[test]
    fn rollback_triggers_after_consecutive_new_failures() {
        let mgr = manager_with(ToggleMode::New, 0, 3, Duration::from_secs(300));
        assert_eq!(mgr.choose_path("executor", "k"), PathChoice::New);
        for _ in 0..3 {
            mgr.report_failure("executor", "timeout", PathChoice::New);
        }
        assert_eq!(mgr.choose_path("executor", "k"), PathChoice::Legacy);
        let snap = mgr.status_snapshot();
        let status = &snap.components["executor"];
        assert!(status.rollback_active);
        assert_eq!(status.consecutive_failures, 3);
        assert_eq!(status.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn legacy_failures_do_not_trigger_rollback() {
        let mgr = manager_with(ToggleMode::New, 0, 2, Duration::from_secs(300));
        for _ in 0..5 {
            mgr.report_failure("executor", "timeout", PathChoice::Legacy);
        }
        assert_eq!(mgr.choose_path("executor", "k"), PathChoice::New);
    }

    #[test]
    fn rollback_expires_after_timeout() {
        let mgr = manager_with(ToggleMode::New, 0, 1, Duration::from_millis(30));
        mgr.report_failure("executor", "boom", PathChoice::New);
        assert_eq!(mgr.choose_path("executor", "k"), PathChoice::Legacy);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(mgr.choose_path("executor", "k"), PathChoice::New);
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let mgr = manager_with(ToggleMode::New, 0, 3, Duration::from_secs(300));
        mgr.report_failure("executor", "a", PathChoice::New);
        mgr.report_failure("executor", "b", PathChoice::New);
        mgr.report_success("executor");
        mgr.report_failure("executor", "c", PathChoice::New);
        // Two more needed before the threshold of three fires again.
        assert_eq!(mgr.choose_path("executor", "k"), PathChoice::New);
    }
}
