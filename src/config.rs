//! Controller configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::HealError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub heal: HealConfig,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub predictor: PredictorConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub verifier: VerifierConfig,
    #[serde(default)]
    pub backends: BackendsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Number of reports kept for GET /history
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

/// Loop-wide timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealConfig {
    /// Total budget for one invocation
    #[serde(default = "default_total_deadline")]
    pub total_deadline_ms: u64,

    /// Smallest remaining budget worth starting a phase with
    #[serde(default = "default_min_phase_budget")]
    pub min_phase_budget_ms: u64,

    /// Trailing window the detector looks at
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

/// Fixed violation thresholds, all strict (`observed > threshold`)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_latency_ms")]
    pub latency_ms: f64,
    #[serde(default = "default_queue_lag")]
    pub queue_lag: f64,
    #[serde(default = "default_error_rate")]
    pub error_rate: f64,
    #[serde(default = "default_cpu_usage")]
    pub cpu_usage: f64,
    #[serde(default = "default_memory_usage")]
    pub memory_usage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    #[serde(default = "default_fetch_retries")]
    pub retries: u32,
    #[serde(default = "default_fetch_backoff")]
    pub backoff_base_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorConfig {
    /// Cap on the whole predict phase
    #[serde(default = "default_predict_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_predict_retries")]
    pub max_retries: u32,
    #[serde(default = "default_predict_backoff")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Wait after a mutating action before verification
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_scale_step_min")]
    pub scale_step_min: u32,
    #[serde(default = "default_scale_step_max")]
    pub scale_step_max: u32,
    /// After a failed scale_up verification, try one restart
    #[serde(default)]
    pub fallback_to_restart: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    #[serde(default = "default_verify_attempts")]
    pub attempts: u32,
    #[serde(default = "default_verify_interval")]
    pub interval_ms: u64,
    /// Metrics-store fallback window when the probe is unreachable
    #[serde(default = "default_verify_window")]
    pub window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendsConfig {
    #[serde(default = "default_metrics_url")]
    pub metrics_url: String,
    #[serde(default = "default_probe_url")]
    pub probe_url: String,
    #[serde(default = "default_compute_url")]
    pub compute_url: String,
    #[serde(default)]
    pub compute_api_token: Option<String>,
    /// OpenAI-compatible base URL, e.g. `http://localhost:8000/v1`
    #[serde(default = "default_oracle_url")]
    pub oracle_url: String,
    #[serde(default = "default_oracle_model")]
    pub oracle_model: String,
    #[serde(default)]
    pub oracle_api_key: Option<String>,
    /// Per-request HTTP timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

// Defaults
fn default_listen() -> String { "0.0.0.0:8080".to_string() }
fn default_history_capacity() -> usize { 100 }
fn default_total_deadline() -> u64 { 10_000 }
fn default_min_phase_budget() -> u64 { 250 }
fn default_window_secs() -> u64 { 300 }
fn default_latency_ms() -> f64 { 1500.0 }
fn default_queue_lag() -> f64 { 5000.0 }
fn default_error_rate() -> f64 { 0.05 }
fn default_cpu_usage() -> f64 { 0.80 }
fn default_memory_usage() -> f64 { 0.85 }
fn default_fetch_retries() -> u32 { 2 }
fn default_fetch_backoff() -> u64 { 100 }
fn default_predict_timeout() -> u64 { 3000 }
fn default_predict_retries() -> u32 { 2 }
fn default_predict_backoff() -> u64 { 200 }
fn default_temperature() -> f32 { 0.1 }
fn default_settle_delay() -> u64 { 3000 }
fn default_scale_step_min() -> u32 { 1 }
fn default_scale_step_max() -> u32 { 5 }
fn default_verify_attempts() -> u32 { 2 }
fn default_verify_interval() -> u64 { 1000 }
fn default_verify_window() -> u64 { 60 }
fn default_metrics_url() -> String { "http://localhost:8081".to_string() }
fn default_probe_url() -> String { "http://localhost:8082".to_string() }
fn default_compute_url() -> String { "http://localhost:8083".to_string() }
fn default_oracle_url() -> String { "http://localhost:8000/v1".to_string() }
fn default_oracle_model() -> String { "gemini-2.5-flash".to_string() }
fn default_request_timeout() -> u64 { 2500 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            history_capacity: default_history_capacity(),
        }
    }
}

impl Default for HealConfig {
    fn default() -> Self {
        Self {
            total_deadline_ms: default_total_deadline(),
            min_phase_budget_ms: default_min_phase_budget(),
            window_secs: default_window_secs(),
        }
    }
}

impl HealConfig {
    pub fn total_deadline(&self) -> Duration {
        Duration::from_millis(self.total_deadline_ms)
    }

    pub fn min_phase_budget(&self) -> Duration {
        Duration::from_millis(self.min_phase_budget_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            latency_ms: default_latency_ms(),
            queue_lag: default_queue_lag(),
            error_rate: default_error_rate(),
            cpu_usage: default_cpu_usage(),
            memory_usage: default_memory_usage(),
        }
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            retries: default_fetch_retries(),
            backoff_base_ms: default_fetch_backoff(),
        }
    }
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_predict_timeout(),
            max_retries: default_predict_retries(),
            backoff_base_ms: default_predict_backoff(),
            temperature: default_temperature(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay(),
            scale_step_min: default_scale_step_min(),
            scale_step_max: default_scale_step_max(),
            fallback_to_restart: false,
        }
    }
}

impl ExecutorConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            attempts: default_verify_attempts(),
            interval_ms: default_verify_interval(),
            window_secs: default_verify_window(),
        }
    }
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            metrics_url: default_metrics_url(),
            probe_url: default_probe_url(),
            compute_url: default_compute_url(),
            compute_api_token: None,
            oracle_url: default_oracle_url(),
            oracle_model: default_oracle_model(),
            oracle_api_key: None,
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl Config {
    /// Load from a TOML file, falling back to defaults when it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, HealError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| HealError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, HealError> {
        let config: Config =
            toml::from_str(content).map_err(|e| HealError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the loop cannot work with.
    pub fn validate(&self) -> Result<(), HealError> {
        if self.heal.total_deadline_ms == 0 {
            return Err(HealError::Config("heal.total_deadline_ms must be > 0".into()));
        }
        if self.heal.window_secs == 0 || self.verifier.window_secs == 0 {
            return Err(HealError::Config("window sizes must be > 0".into()));
        }
        if self.verifier.attempts == 0 {
            return Err(HealError::Config("verifier.attempts must be >= 1".into()));
        }

        let t = &self.thresholds;
        for (name, value) in [
            ("error_rate", t.error_rate),
            ("cpu_usage", t.cpu_usage),
            ("memory_usage", t.memory_usage),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(HealError::Config(format!(
                    "thresholds.{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if t.latency_ms < 0.0 || t.queue_lag < 0.0 {
            return Err(HealError::Config("thresholds must be non-negative".into()));
        }
        if !(0.0..=2.0).contains(&self.predictor.temperature) {
            return Err(HealError::Config("predictor.temperature must be within [0, 2]".into()));
        }
        Ok(())
    }
}
