//! Aggregate performance statistics over recorded metrics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::metrics::ErrorReason;
use crate::metrics::recorder::{ConversionMetric, MetricKind};

/// Snapshot of conversion performance. All fields are zero on an empty
/// data set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub mean_ms: f64,
    /// Number of duration samples behind the percentiles.
    pub duration_samples: usize,
    /// Failed outcomes / all outcomes.
    pub error_rate: f64,
    pub error_rate_by_engine: BTreeMap<String, f64>,
    pub error_rate_by_reason: BTreeMap<ErrorReason, f64>,
    pub errors_by_reason: BTreeMap<ErrorReason, u64>,
    /// Success + error outcomes.
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    /// Operations that needed at least one retry.
    pub retried: u64,
}

impl PerformanceStats {
    pub fn compute(metrics: &[ConversionMetric]) -> Self {
        let mut durations: Vec<u64> = metrics.iter().filter_map(|m| m.duration_ms).collect();
        durations.sort_unstable();

        let mut stats = Self {
            duration_samples: durations.len(),
            p50_ms: percentile(&durations, 0.50),
            p95_ms: percentile(&durations, 0.95),
            mean_ms: if durations.is_empty() {
                0.0
            } else {
                durations.iter().sum::<u64>() as f64 / durations.len() as f64
            },
            ..Default::default()
        };

        // engine -> (outcomes, errors)
        let mut by_engine: BTreeMap<String, (u64, u64)> = BTreeMap::new();
        for metric in metrics {
            match metric.kind {
                MetricKind::Success | MetricKind::Error => {
                    let failed = metric.kind == MetricKind::Error;
                    stats.total += 1;
                    let engine = by_engine.entry(metric.engine.clone()).or_default();
                    engine.0 += 1;
                    if failed {
                        stats.failed += 1;
                        engine.1 += 1;
                        let reason = metric.error_reason.unwrap_or(ErrorReason::Unknown);
                        *stats.errors_by_reason.entry(reason).or_default() += 1;
                    } else {
                        stats.successful += 1;
                    }
                }
                MetricKind::Retry => {
                    if metric.retry_count.unwrap_or(0) > 0 {
                        stats.retried += 1;
                    }
                }
                MetricKind::Duration => {}
            }
        }

        stats.error_rate = ratio(stats.failed, stats.total);
        stats.error_rate_by_engine = by_engine
            .into_iter()
            .map(|(engine, (outcomes, errors))| (engine, ratio(errors, outcomes)))
            .collect();
        stats.error_rate_by_reason = stats
            .errors_by_reason
            .iter()
            .map(|(reason, count)| (*reason, ratio(*count, stats.total)))
            .collect();

        stats
    }
}

/// Nearest-rank percentile over sorted values; 0 when empty.
fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (p * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
