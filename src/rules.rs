//! Rule weights loading and hot reload
//!
//! The watcher thread re-reads the weights JSON on a fixed interval and
//! publishes changed sets through the engine's double buffer. Reload never
//! takes anything down: a missing, unreadable or invalid file keeps the
//! active weights and logs the failure for monitoring.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use std::{fs, thread};

use thiserror::Error;

use crate::engine::{ModelWeights, RiskEngine};

const TARGET_RULES: &str = "AEGIS::RULES";

/// Granularity at which sleeping threads re-check the stop flag.
pub(crate) const STOP_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("failed to read rules file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse rules file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid weights: {0}")]
    Invalid(&'static str),
}

/// Load and validate a weight set from a JSON document on disk.
pub fn load_weights(path: &Path) -> Result<ModelWeights, RulesError> {
    let content = fs::read_to_string(path)?;
    let weights: ModelWeights = serde_json::from_str(&content)?;
    validate_weights(&weights)?;
    Ok(weights)
}

fn validate_weights(w: &ModelWeights) -> Result<(), RulesError> {
    if !w.velocity_threshold.is_finite() || w.velocity_threshold <= 0.0 {
        return Err(RulesError::Invalid("velocity_threshold must be > 0"));
    }
    if !w.structuring_threshold.is_finite() || w.structuring_threshold < 0.0 {
        return Err(RulesError::Invalid("structuring_threshold must be >= 0"));
    }
    for (value, what) in [
        (w.velocity_weight, "velocity_weight must be finite and >= 0"),
        (w.structuring_weight, "structuring_weight must be finite and >= 0"),
        (w.baseline, "baseline must be finite and >= 0"),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(RulesError::Invalid(what));
        }
    }
    Ok(())
}

/// Watcher thread body. Polls `path` every `poll_interval` (>= 1s by config
/// validation) and publishes through `engine` when the file's weights
/// differ from the last published set.
pub fn watch_rules(
    path: PathBuf,
    engine: Arc<RiskEngine>,
    poll_interval: Duration,
    stop: Arc<AtomicBool>,
) {
    tracing::info!(
        target: TARGET_RULES,
        path = %path.display(),
        interval_secs = poll_interval.as_secs(),
        "rules watcher started"
    );

    let mut last_published: Option<ModelWeights> = None;
    while !stop.load(Ordering::Relaxed) {
        sleep_observing_stop(poll_interval, &stop);
        if stop.load(Ordering::Relaxed) {
            break;
        }

        match load_weights(&path) {
            Ok(weights) => {
                if last_published != Some(weights) {
                    engine.publish_weights(weights);
                    last_published = Some(weights);
                    tracing::info!(
                        target: TARGET_RULES,
                        velocity_weight = weights.velocity_weight,
                        structuring_weight = weights.structuring_weight,
                        "rule weights published"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    target: TARGET_RULES,
                    error = %e,
                    "rules reload failed, keeping active weights"
                );
            }
        }
    }
}

/// Sleep for `total` in short slices so the stop flag is observed well
/// within the shutdown grace period.
pub(crate) fn sleep_observing_stop(total: Duration, stop: &AtomicBool) {
    let mut remaining = total;
    while remaining > Duration::ZERO && !stop.load(Ordering::Relaxed) {
        let slice = remaining.min(STOP_POLL);
        thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
}
