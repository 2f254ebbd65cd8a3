//! In-memory collaborators for tests and demo mode.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::traits::*;
use super::Backends;
use crate::heal::models::{InstanceBounds, MetricSample};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Build a sample stamped now: `[latency_ms, queue_lag, error_rate, cpu, memory]`.
pub fn sample(target_id: &str, values: [f64; 5]) -> MetricSample {
    sample_at(target_id, Utc::now(), values)
}

pub fn sample_at(target_id: &str, timestamp: DateTime<Utc>, values: [f64; 5]) -> MetricSample {
    let [latency_ms, queue_lag, error_rate, cpu_usage, memory_usage] = values;
    MetricSample {
        timestamp,
        target_id: target_id.to_string(),
        latency_ms,
        queue_lag,
        error_rate,
        cpu_usage,
        memory_usage,
    }
}

//=============================================================================
// METRICS STORE
//=============================================================================

#[derive(Default)]
pub struct MockMetricsStore {
    samples: Mutex<HashMap<String, Vec<MetricSample>>>,
    failures_remaining: AtomicU32,
    live_timestamps: bool,
    call_count: AtomicU32,
}

impl MockMetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_samples(self, target_id: &str, samples: Vec<MetricSample>) -> Self {
        self.set_samples(target_id, samples);
        self
    }

    /// Fail the next `count` queries with a network error.
    pub fn with_failures(self, count: u32) -> Self {
        self.failures_remaining.store(count, Ordering::SeqCst);
        self
    }

    /// Shift stored samples on every query so the newest lands at `until`.
    /// Relative spacing is kept, so a seeded window never ages out.
    pub fn with_live_timestamps(mut self) -> Self {
        self.live_timestamps = true;
        self
    }

    pub fn set_samples(&self, target_id: &str, samples: Vec<MetricSample>) {
        lock(&self.samples).insert(target_id.to_string(), samples);
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsStore for MockMetricsStore {
    async fn query_window(
        &self,
        target_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>, BackendError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BackendError::Network("mock store unreachable".to_string()));
        }

        let stored = lock(&self.samples);
        let Some(samples) = stored.get(target_id) else {
            return Ok(Vec::new());
        };

        let shift = match samples.iter().map(|s| s.timestamp).max() {
            Some(newest) if self.live_timestamps => until - newest,
            _ => chrono::Duration::zero(),
        };

        Ok(samples
            .iter()
            .cloned()
            .map(|mut s| {
                s.timestamp += shift;
                s
            })
            .filter(|s| s.timestamp >= since && s.timestamp <= until)
            .collect())
    }
}

//=============================================================================
// HEALTH PROBE
//=============================================================================

/// Replays queued samples per target; the last one repeats.
#[derive(Default)]
pub struct MockHealthProbe {
    samples: Mutex<HashMap<String, VecDeque<MetricSample>>>,
    unavailable: AtomicBool,
    call_count: AtomicU32,
}

impl MockHealthProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_samples(self, target_id: &str, samples: Vec<MetricSample>) -> Self {
        lock(&self.samples).insert(target_id.to_string(), samples.into());
        self
    }

    pub fn with_available(self, available: bool) -> Self {
        self.unavailable.store(!available, Ordering::SeqCst);
        self
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for MockHealthProbe {
    async fn probe(&self, target_id: &str) -> Result<MetricSample, BackendError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Network("mock probe unreachable".to_string()));
        }

        let mut samples = lock(&self.samples);
        let queue = samples
            .get_mut(target_id)
            .ok_or_else(|| BackendError::Rejected(format!("unknown target '{}'", target_id)))?;

        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };

        next.map(|mut s| {
            s.timestamp = Utc::now();
            s
        })
        .ok_or_else(|| BackendError::Rejected(format!("no probe data for '{}'", target_id)))
    }
}

//=============================================================================
// COMPUTE CONTROL
//=============================================================================

pub struct MockComputeControl {
    bounds: Mutex<HashMap<String, InstanceBounds>>,
    default_bounds: InstanceBounds,
    platform_max_instances: u32,
    reject_restart: AtomicBool,
    bounds_unavailable: AtomicBool,
    delay: Option<Duration>,
    set_bounds_calls: AtomicU32,
    restart_calls: AtomicU32,
}

impl MockComputeControl {
    pub fn new() -> Self {
        Self {
            bounds: Mutex::new(HashMap::new()),
            default_bounds: InstanceBounds::new(2, 10),
            platform_max_instances: 100,
            reject_restart: AtomicBool::new(false),
            bounds_unavailable: AtomicBool::new(false),
            delay: None,
            set_bounds_calls: AtomicU32::new(0),
            restart_calls: AtomicU32::new(0),
        }
    }

    pub fn with_bounds(self, target_id: &str, bounds: InstanceBounds) -> Self {
        lock(&self.bounds).insert(target_id.to_string(), bounds);
        self
    }

    pub fn with_platform_max(mut self, max_instances: u32) -> Self {
        self.platform_max_instances = max_instances;
        self
    }

    pub fn with_reject_restart(self, reject: bool) -> Self {
        self.reject_restart.store(reject, Ordering::SeqCst);
        self
    }

    /// Fail `instance_bounds` reads with a network error.
    pub fn with_bounds_unavailable(self, unavailable: bool) -> Self {
        self.bounds_unavailable.store(unavailable, Ordering::SeqCst);
        self
    }

    /// Delay every mutating call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn bounds_of(&self, target_id: &str) -> InstanceBounds {
        lock(&self.bounds)
            .get(target_id)
            .copied()
            .unwrap_or(self.default_bounds)
    }

    pub fn set_bounds_calls(&self) -> u32 {
        self.set_bounds_calls.load(Ordering::SeqCst)
    }

    pub fn restart_calls(&self) -> u32 {
        self.restart_calls.load(Ordering::SeqCst)
    }

    /// Total mutating operations issued
    pub fn mutations(&self) -> u32 {
        self.set_bounds_calls() + self.restart_calls()
    }
}

impl Default for MockComputeControl {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ComputeControl for MockComputeControl {
    async fn instance_bounds(&self, target_id: &str) -> Result<InstanceBounds, BackendError> {
        if self.bounds_unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Network("mock scaling API unreachable".to_string()));
        }
        Ok(self.bounds_of(target_id))
    }

    async fn set_instance_bounds(
        &self,
        target_id: &str,
        bounds: InstanceBounds,
    ) -> Result<(), BackendError> {
        self.set_bounds_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if bounds.max_instances > self.platform_max_instances {
            return Err(BackendError::Rejected(format!(
                "max_instances {} exceeds platform maximum {}",
                bounds.max_instances, self.platform_max_instances
            )));
        }

        lock(&self.bounds).insert(target_id.to_string(), bounds);
        Ok(())
    }

    async fn restart(&self, target_id: &str) -> Result<(), BackendError> {
        self.restart_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.reject_restart.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected(format!(
                "restart of '{}' refused",
                target_id
            )));
        }
        Ok(())
    }
}

//=============================================================================
// ORACLE
//=============================================================================

/// Scripted oracle. Replies are consumed in order; the last one repeats.
pub struct MockOracle {
    model_id: String,
    replies: Mutex<VecDeque<Result<serde_json::Value, BackendError>>>,
    delay: Option<Duration>,
    requests: Mutex<Vec<OracleRequest>>,
    call_count: AtomicU32,
}

impl MockOracle {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            replies: Mutex::new(VecDeque::new()),
            delay: None,
            requests: Mutex::new(Vec::new()),
            call_count: AtomicU32::new(0),
        }
    }

    /// Queue a JSON reply.
    pub fn with_reply(self, reply: serde_json::Value) -> Self {
        lock(&self.replies).push_back(Ok(reply));
        self
    }

    /// Queue a failure.
    pub fn with_error(self, error: BackendError) -> Self {
        lock(&self.replies).push_back(Err(error));
        self
    }

    /// Delay every reply, e.g. to simulate a hung oracle.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<OracleRequest> {
        lock(&self.requests).clone()
    }
}

impl Default for MockOracle {
    fn default() -> Self {
        Self::new("mock-oracle")
    }
}

#[async_trait]
impl ReasoningOracle for MockOracle {
    fn id(&self) -> &str {
        &self.model_id
    }

    async fn score(&self, request: &OracleRequest) -> Result<serde_json::Value, BackendError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut replies = lock(&self.replies);
        let reply = if replies.len() > 1 {
            replies.pop_front()
        } else {
            replies.front().cloned()
        };

        reply.unwrap_or_else(|| Err(BackendError::Network("mock oracle has no replies".to_string())))
    }
}

//=============================================================================
// DEMO
//=============================================================================

/// Collaborators seeded with a degraded target that recovers after scaling.
pub fn demo_backends(target_id: &str) -> Backends {
    let degraded = [2100.0, 9200.0, 0.097, 0.89, 0.94];
    let recovered = [65.0, 120.0, 0.004, 0.41, 0.58];
    let now = Utc::now();

    let history: Vec<MetricSample> = (0..5)
        .map(|i| sample_at(target_id, now - chrono::Duration::minutes(4 - i), degraded))
        .collect();

    Backends {
        metrics: Arc::new(
            MockMetricsStore::new()
                .with_samples(target_id, history)
                .with_live_timestamps(),
        ),
        oracle: Arc::new(MockOracle::new("demo-oracle").with_reply(serde_json::json!({
            "risk_score": 82,
            "recommended_action": "scale_up",
            "rationale": "Latency, lag and error rate exceed thresholds under high CPU; add capacity"
        }))),
        compute: Arc::new(MockComputeControl::new()),
        probe: Arc::new(MockHealthProbe::new().with_samples(target_id, vec![sample(target_id, recovered)])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_failures_then_success() {
        let store = MockMetricsStore::new()
            .with_samples("a", vec![sample("a", [1.0, 1.0, 0.0, 0.1, 0.1])])
            .with_failures(1);
        let since = Utc::now() - chrono::Duration::minutes(5);
        let until = Utc::now() + chrono::Duration::seconds(1);

        assert!(store.query_window("a", since, until).await.is_err());
        assert_eq!(store.query_window("a", since, until).await.unwrap().len(), 1);
        assert_eq!(store.call_count(), 2);
    }

    #[tokio::test]
    async fn test_demo_window_does_not_age_out() {
        let backends = demo_backends("user-api");
        let later = Utc::now() + chrono::Duration::hours(1);

        let samples = backends
            .metrics
            .query_window("user-api", later - chrono::Duration::minutes(5), later)
            .await
            .unwrap();

        assert_eq!(samples.len(), 5);
        assert_eq!(samples[4].timestamp, later);
        assert_eq!(samples[0].timestamp, later - chrono::Duration::minutes(4));
    }

    #[tokio::test]
    async fn test_oracle_replays_last_reply() {
        let oracle = MockOracle::default()
            .with_error(BackendError::Timeout)
            .with_reply(serde_json::json!({"risk_score": 10}));
        let request = OracleRequest {
            context: serde_json::Value::Null,
            temperature: 0.1,
            correction: None,
        };

        assert!(oracle.score(&request).await.is_err());
        assert!(oracle.score(&request).await.is_ok());
        assert!(oracle.score(&request).await.is_ok());
        assert_eq!(oracle.call_count(), 3);
    }

    #[tokio::test]
    async fn test_compute_rejects_over_platform_max() {
        let compute = MockComputeControl::new().with_platform_max(12);
        let result = compute
            .set_instance_bounds("a", InstanceBounds::new(3, 15))
            .await;

        assert!(matches!(result, Err(BackendError::Rejected(_))));
        assert_eq!(compute.bounds_of("a"), InstanceBounds::new(2, 10));
    }
}
