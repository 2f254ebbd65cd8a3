//! Fetcher - trailing metric windows from the metrics store

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::models::*;
use crate::backend::{BackendError, MetricsStore};
use crate::config::FetcherConfig;
use crate::error::HealError;

/// Retrieves time-ordered telemetry windows, retrying transient failures
pub struct MetricWindowFetcher {
    store: Arc<dyn MetricsStore>,
    retries: u32,
    backoff_base: Duration,
}

impl MetricWindowFetcher {
    pub fn new(store: Arc<dyn MetricsStore>, config: &FetcherConfig) -> Self {
        Self {
            store,
            retries: config.retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
        }
    }

    /// Fetch the trailing `window` of samples for `target_id`.
    ///
    /// Samples outside their documented ranges or belonging to another
    /// target are dropped. Zero usable samples is `EmptyWindow`.
    pub async fn fetch(
        &self,
        target_id: &str,
        window: Duration,
        deadline: Instant,
    ) -> Result<MetricWindow, HealError> {
        let until = Utc::now();
        let since = until
            - chrono::Duration::from_std(window)
                .map_err(|e| HealError::Config(format!("window too large: {}", e)))?;

        let mut attempts = 0u32;
        let raw = loop {
            attempts += 1;

            match self.store.query_window(target_id, since, until).await {
                Ok(samples) => break samples,
                Err(e) if e.is_retryable() && attempts <= self.retries => {
                    let delay = backoff(self.backoff_base, attempts);
                    if Instant::now() + delay >= deadline {
                        warn!(target_id, attempts, error = %e, "Metrics store retry would overrun deadline");
                        return Err(unavailable(e));
                    }
                    warn!(target_id, attempts, delay_ms = delay.as_millis() as u64, error = %e, "Metrics store query failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(unavailable(e)),
            }
        };

        let fetched = raw.len();
        let samples: Vec<MetricSample> = raw
            .into_iter()
            .filter(|s| {
                if s.target_id != target_id {
                    return false;
                }
                match s.validate() {
                    Ok(()) => true,
                    Err(field) => {
                        warn!(target_id, field, timestamp = %s.timestamp, "Dropping out-of-range sample");
                        false
                    }
                }
            })
            .collect();

        debug!(target_id, fetched, kept = samples.len(), attempts, "Fetched metric window");

        if samples.is_empty() {
            return Err(HealError::EmptyWindow {
                target_id: target_id.to_string(),
            });
        }

        Ok(MetricWindow::new(target_id, samples))
    }
}

/// Exponential backoff: `base * 2^(attempt - 1)`
pub(crate) fn backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}

fn unavailable(err: BackendError) -> HealError {
    HealError::Unavailable(format!("metrics store: {}", err))
}
