//! Runtime artifact writer for the external dashboard.
//!
//! Each artifact is a single JSON object, replaced atomically (temp file +
//! rename) once per reporting interval so readers never observe a partial
//! write.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::Result;
use crate::infra::flags::FeatureToggleManager;
use crate::services::metrics::TradingMetricsCollector;
use crate::trading::factories::{FeeCalculatorFactory, PollerFactory};

/// Serialize `value` to `path`, atomically replacing any previous content.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Periodically dumps the metrics and feature-flag snapshots into the
/// runtime directory (`metrics_trading.json`, `feature_flags.json`).
pub struct ArtifactReporter {
    runtime_dir: PathBuf,
    interval: Duration,
    metrics: Arc<TradingMetricsCollector>,
    flags: Arc<FeatureToggleManager>,
    pollers: Arc<PollerFactory>,
    fees: Arc<FeeCalculatorFactory>,
}

impl ArtifactReporter {
    pub fn new(
        runtime_dir: impl Into<PathBuf>,
        interval: Duration,
        metrics: Arc<TradingMetricsCollector>,
        flags: Arc<FeatureToggleManager>,
        pollers: Arc<PollerFactory>,
        fees: Arc<FeeCalculatorFactory>,
    ) -> Self {
        Self {
            runtime_dir: runtime_dir.into(),
            interval,
            metrics,
            flags,
            pollers,
            fees,
        }
    }

    /// Write both artifacts once.
    pub fn write_once(&self) -> Result<()> {
        std::fs::create_dir_all(&self.runtime_dir)?;
        let flags_snapshot = self.flags.status_snapshot();
        let metrics_snapshot = self.metrics.snapshot(
            Some(self.pollers.as_ref()),
            Some(self.fees.as_ref()),
            Some(flags_snapshot.clone()),
        );
        write_json_atomic(
            &self.runtime_dir.join("metrics_trading.json"),
            &metrics_snapshot,
        )?;
        write_json_atomic(&self.runtime_dir.join("feature_flags.json"), &flags_snapshot)?;
        debug!(dir = %self.runtime_dir.display(), "runtime artifacts written");
        Ok(())
    }

    /// Reporting loop; runs until the owning task is cancelled.
    pub async fn run(self) {
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            if let Err(e) = self.write_once() {
                warn!(error = %e, "failed to write runtime artifacts");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn atomic_write_replaces_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_json_atomic(&path, &json!({"v": 1})).unwrap();
        write_json_atomic(&path, &json!({"v": 2})).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["v"], 2);
        assert!(!dir.path().join("out.json.tmp").exists());
    }
}
