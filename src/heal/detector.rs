//! Detector - threshold violations in the most recent sample
//!
//! Stateless: the same window always yields the same violations. Only the
//! newest sample counts, so the loop reacts to the current state rather
//! than smoothed history.

use tracing::trace;

use super::models::*;
use crate::config::Thresholds;

/// Outcome of evaluating one window
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub violations: Vec<Violation>,
    /// The window held no samples; nothing could be judged
    pub insufficient_data: bool,
}

/// Threshold evaluator
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    thresholds: Thresholds,
}

impl AnomalyDetector {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn threshold(&self, metric: MetricName) -> f64 {
        match metric {
            MetricName::Latency => self.thresholds.latency_ms,
            MetricName::QueueLag => self.thresholds.queue_lag,
            MetricName::ErrorRate => self.thresholds.error_rate,
            MetricName::CpuUsage => self.thresholds.cpu_usage,
            MetricName::MemoryUsage => self.thresholds.memory_usage,
        }
    }

    /// Evaluate a window against the thresholds
    pub fn detect(&self, window: &MetricWindow) -> Detection {
        match window.latest() {
            Some(sample) => Detection {
                violations: self.evaluate(sample),
                insufficient_data: false,
            },
            None => Detection {
                violations: Vec::new(),
                insufficient_data: true,
            },
        }
    }

    /// Evaluate a single sample
    pub fn evaluate(&self, sample: &MetricSample) -> Vec<Violation> {
        let violations: Vec<Violation> = MetricName::ALL
            .iter()
            .filter_map(|&metric| {
                let observed = sample.value(metric);
                let threshold = self.threshold(metric);

                (observed > threshold).then(|| Violation {
                    metric_name: metric,
                    observed_value: observed,
                    threshold,
                    severity: severity_of(metric),
                })
            })
            .collect();

        trace!(
            target_id = %sample.target_id,
            count = violations.len(),
            "Evaluated sample"
        );

        violations
    }
}

fn severity_of(metric: MetricName) -> Severity {
    match metric {
        MetricName::Latency | MetricName::ErrorRate => Severity::Critical,
        MetricName::QueueLag | MetricName::CpuUsage | MetricName::MemoryUsage => Severity::Warning,
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}
