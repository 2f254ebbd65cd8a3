//! Core traits for external collaborators.
//!
//! The healing loop depends only on these contracts: a metrics store it
//! reads windows from, a reasoning oracle that scores risk, a compute
//! control plane that scales and restarts, and a fast health probe.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::heal::models::{InstanceBounds, MetricSample};

/// Error types for collaborator calls.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    /// Connection refused, DNS failure, reset
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    /// 5xx from the collaborator
    #[error("Server error: HTTP {status}: {body}")]
    Server { status: u16, body: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The collaborator understood the request and refused it
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl BackendError {
    /// Transport-level failures that may succeed on retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout | Self::Server { .. })
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Unauthorized(format!("HTTP {}: {}", status, body)),
            429 => Self::QuotaExceeded(format!("HTTP {}: {}", status, body)),
            500..=599 => Self::Server { status, body },
            _ => Self::Rejected(format!("HTTP {}: {}", status, body)),
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Parse(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Read side of the metrics store.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Samples for `target_id` with `since <= timestamp <= until`, any order.
    async fn query_window(
        &self,
        target_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>, BackendError>;
}

/// Structured scoring request sent to the reasoning oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleRequest {
    /// Window, violations and alert context
    pub context: serde_json::Value,
    /// Decoding temperature, kept low for repeatable verdicts
    pub temperature: f32,
    /// Set on the corrective re-prompt after a schema mismatch
    pub correction: Option<String>,
}

/// External reasoning service producing risk verdicts.
///
/// The reply is opaque JSON; callers must validate it.
#[async_trait]
pub trait ReasoningOracle: Send + Sync {
    /// Backend identifier (e.g., model name).
    fn id(&self) -> &str;

    async fn score(&self, request: &OracleRequest) -> Result<serde_json::Value, BackendError>;
}

/// Compute platform scaling and restart API.
#[async_trait]
pub trait ComputeControl: Send + Sync {
    async fn instance_bounds(&self, target_id: &str) -> Result<InstanceBounds, BackendError>;

    /// `Err(BackendError::Rejected)` when the platform refuses the bounds.
    async fn set_instance_bounds(
        &self,
        target_id: &str,
        bounds: InstanceBounds,
    ) -> Result<(), BackendError>;

    async fn restart(&self, target_id: &str) -> Result<(), BackendError>;
}

/// Direct probe of a target's current state, independent of ingestion lag.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, target_id: &str) -> Result<MetricSample, BackendError>;
}
