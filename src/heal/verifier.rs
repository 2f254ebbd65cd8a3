//! Verifier - did the remediation clear the violations?
//!
//! Samples the probe first and falls back to a short metrics-store window
//! when the probe cannot answer. Checks are repeated a bounded number of
//! times to ride out propagation lag.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::detector::AnomalyDetector;
use super::fetcher::MetricWindowFetcher;
use super::models::*;
use crate::backend::HealthProbe;
use crate::config::VerifierConfig;
use crate::error::HealError;

pub struct HealthVerifier {
    probe: Arc<dyn HealthProbe>,
    fetcher: MetricWindowFetcher,
    detector: AnomalyDetector,
    attempts: u32,
    interval: Duration,
    window: Duration,
}

impl HealthVerifier {
    pub fn new(
        probe: Arc<dyn HealthProbe>,
        fetcher: MetricWindowFetcher,
        detector: AnomalyDetector,
        config: &VerifierConfig,
    ) -> Self {
        Self {
            probe,
            fetcher,
            detector,
            attempts: config.attempts.max(1),
            interval: Duration::from_millis(config.interval_ms),
            window: Duration::from_secs(config.window_secs),
        }
    }

    /// Re-check the target. Healthy when none of `prior` is still violated.
    pub async fn verify(
        &self,
        target_id: &str,
        prior: &[Violation],
        deadline: Instant,
    ) -> Result<VerificationResult, HealError> {
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let (current, source) = self.sample(target_id, deadline).await?;
            let residual: Vec<Violation> = current
                .into_iter()
                .filter(|v| prior.iter().any(|p| p.metric_name == v.metric_name))
                .collect();

            let result = VerificationResult {
                healthy: residual.is_empty(),
                residual_violations: residual,
                checked_at: Utc::now(),
                attempts: attempt,
                source,
            };

            if result.healthy {
                info!(target_id, attempts = attempt, ?source, "Target verified healthy");
                return Ok(result);
            }

            if attempt >= self.attempts {
                warn!(
                    target_id,
                    attempts = attempt,
                    residual = result.residual_violations.len(),
                    "Violations persist after remediation"
                );
                return Ok(result);
            }

            if Instant::now() + self.interval >= deadline {
                warn!(target_id, attempts = attempt, "No budget left for another verification");
                return Ok(result);
            }

            debug!(
                target_id,
                attempt,
                residual = result.residual_violations.len(),
                "Still violating, checking again"
            );
            tokio::time::sleep(self.interval).await;
        }
    }

    /// Current violations and where they were read from.
    async fn sample(
        &self,
        target_id: &str,
        deadline: Instant,
    ) -> Result<(Vec<Violation>, SampleSource), HealError> {
        match self.probe.probe(target_id).await {
            Ok(sample) if sample.validate().is_ok() => {
                return Ok((self.detector.evaluate(&sample), SampleSource::Probe));
            }
            Ok(_) => warn!(target_id, "Probe returned an out-of-range sample, using metrics store"),
            Err(e) => warn!(target_id, error = %e, "Probe failed, using metrics store"),
        }

        match self.fetcher.fetch(target_id, self.window, deadline).await {
            Ok(window) => Ok((self.detector.detect(&window).violations, SampleSource::MetricsStore)),
            Err(HealError::EmptyWindow { .. }) => Err(HealError::Unavailable(format!(
                "no fresh telemetry for '{}' to verify against",
                target_id
            ))),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{sample, MockHealthProbe, MockMetricsStore};
    use crate::config::FetcherConfig;

    const HEALTHY: [f64; 5] = [65.0, 120.0, 0.004, 0.41, 0.58];
    const DEGRADED: [f64; 5] = [2100.0, 9200.0, 0.097, 0.89, 0.94];

    fn prior() -> Vec<Violation> {
        AnomalyDetector::default().evaluate(&sample("a", DEGRADED))
    }

    fn verifier(probe: MockHealthProbe, store: MockMetricsStore) -> HealthVerifier {
        HealthVerifier::new(
            Arc::new(probe),
            MetricWindowFetcher::new(Arc::new(store), &FetcherConfig::default()),
            AnomalyDetector::default(),
            &VerifierConfig::default(),
        )
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(10)
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovered_on_first_probe() {
        let probe = MockHealthProbe::new().with_samples("a", vec![sample("a", HEALTHY)]);
        let result = verifier(probe, MockMetricsStore::new())
            .verify("a", &prior(), deadline())
            .await
            .unwrap();

        assert!(result.healthy);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.source, SampleSource::Probe);
    }

    #[tokio::test(start_paused = true)]
    async fn test_propagation_lag_tolerated() {
        let probe = MockHealthProbe::new()
            .with_samples("a", vec![sample("a", DEGRADED), sample("a", HEALTHY)]);
        let result = verifier(probe, MockMetricsStore::new())
            .verify("a", &prior(), deadline())
            .await
            .unwrap();

        assert!(result.healthy);
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persisting_violations() {
        let probe = MockHealthProbe::new().with_samples("a", vec![sample("a", DEGRADED)]);
        let result = verifier(probe, MockMetricsStore::new())
            .verify("a", &prior(), deadline())
            .await
            .unwrap();

        assert!(!result.healthy);
        assert_eq!(result.attempts, 2);
        assert_eq!(result.residual_violations.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_violations_outside_prior_set_ignored() {
        // only latency was violating before; cpu is new
        let prior = vec![prior().remove(0)];
        let probe = MockHealthProbe::new()
            .with_samples("a", vec![sample("a", [65.0, 120.0, 0.004, 0.95, 0.58])]);

        let result = verifier(probe, MockMetricsStore::new())
            .verify("a", &prior, deadline())
            .await
            .unwrap();

        assert!(result.healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_to_metrics_store() {
        let probe = MockHealthProbe::new().with_available(false);
        let store = MockMetricsStore::new().with_samples("a", vec![sample("a", HEALTHY)]);

        let result = verifier(probe, store).verify("a", &prior(), deadline()).await.unwrap();

        assert!(result.healthy);
        assert_eq!(result.source, SampleSource::MetricsStore);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_telemetry_is_unavailable() {
        let probe = MockHealthProbe::new().with_available(false);
        let err = verifier(probe, MockMetricsStore::new())
            .verify("a", &prior(), deadline())
            .await
            .unwrap_err();

        assert!(matches!(err, HealError::Unavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_budget_exhausted() {
        let probe = MockHealthProbe::new().with_samples("a", vec![sample("a", DEGRADED)]);
        let result = verifier(probe, MockMetricsStore::new())
            .verify("a", &prior(), Instant::now() + Duration::from_millis(500))
            .await
            .unwrap();

        assert!(!result.healthy);
        assert_eq!(result.attempts, 1);
    }
}
