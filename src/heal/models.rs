//! Heal models - shared types for the remediation loop
//!
//! Telemetry samples, violations, risk assessments, remediation actions and
//! the per-invocation healing report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable name of a monitored service
pub type TargetId = String;

/// Unique identifier for one healing invocation
pub type InvocationId = String;

//=============================================================================
// TELEMETRY
//=============================================================================

/// A single point-in-time telemetry sample for a target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    #[serde(alias = "service_id")]
    pub target_id: TargetId,
    pub latency_ms: f64,
    #[serde(alias = "kafka_lag")]
    pub queue_lag: f64,
    /// Fraction of failed requests, 0.0 - 1.0
    pub error_rate: f64,
    /// Fraction of allotted CPU in use, 0.0 - 1.0
    pub cpu_usage: f64,
    /// Fraction of allotted memory in use, 0.0 - 1.0
    pub memory_usage: f64,
}

impl MetricSample {
    /// Check the documented value ranges.
    ///
    /// Returns the name of the first field that is out of range.
    pub fn validate(&self) -> Result<(), &'static str> {
        let unit = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
        let non_negative = |v: f64| v.is_finite() && v >= 0.0;

        if !non_negative(self.latency_ms) {
            return Err("latency_ms");
        }
        if !non_negative(self.queue_lag) {
            return Err("queue_lag");
        }
        if !unit(self.error_rate) {
            return Err("error_rate");
        }
        if !unit(self.cpu_usage) {
            return Err("cpu_usage");
        }
        if !unit(self.memory_usage) {
            return Err("memory_usage");
        }
        Ok(())
    }

    /// Read one metric by name
    pub fn value(&self, metric: MetricName) -> f64 {
        match metric {
            MetricName::Latency => self.latency_ms,
            MetricName::QueueLag => self.queue_lag,
            MetricName::ErrorRate => self.error_rate,
            MetricName::CpuUsage => self.cpu_usage,
            MetricName::MemoryUsage => self.memory_usage,
        }
    }
}

/// Chronologically ordered samples for one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricWindow {
    target_id: TargetId,
    samples: Vec<MetricSample>,
}

impl MetricWindow {
    /// Build a window, ordering samples by timestamp.
    pub fn new(target_id: impl Into<TargetId>, mut samples: Vec<MetricSample>) -> Self {
        samples.sort_by_key(|s| s.timestamp);
        Self {
            target_id: target_id.into(),
            samples,
        }
    }

    pub fn empty(target_id: impl Into<TargetId>) -> Self {
        Self::new(target_id, Vec::new())
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn samples(&self) -> &[MetricSample] {
        &self.samples
    }

    pub fn latest(&self) -> Option<&MetricSample> {
        self.samples.last()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// The metrics the detector evaluates, in reporting order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    Latency,
    QueueLag,
    ErrorRate,
    CpuUsage,
    MemoryUsage,
}

impl MetricName {
    pub const ALL: [MetricName; 5] = [
        MetricName::Latency,
        MetricName::QueueLag,
        MetricName::ErrorRate,
        MetricName::CpuUsage,
        MetricName::MemoryUsage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::Latency => "latency",
            MetricName::QueueLag => "queue_lag",
            MetricName::ErrorRate => "error_rate",
            MetricName::CpuUsage => "cpu_usage",
            MetricName::MemoryUsage => "memory_usage",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

/// One metric exceeding its threshold in the most recent sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub metric_name: MetricName,
    pub observed_value: f64,
    pub threshold: f64,
    pub severity: Severity,
}

//=============================================================================
// RISK
//=============================================================================

/// Closed set of actions the oracle may recommend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    None,
    ScaleUp,
    Restart,
}

impl RecommendedAction {
    /// Parse an oracle action string, accepting the aliases the hosted
    /// reasoning service is known to emit.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "none" | "monitor" => Some(Self::None),
            "scale_up" | "scale_out" | "scale" => Some(Self::ScaleUp),
            "restart" | "restart_service" => Some(Self::Restart),
            _ => None,
        }
    }

    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::None)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ScaleUp => "scale_up",
            Self::Restart => "restart",
        }
    }
}

impl fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The oracle's verdict for one healing attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_score: f64,
    pub recommended_action: RecommendedAction,
    pub rationale: String,
    /// Reply exactly as the oracle returned it
    pub raw_response: Option<serde_json::Value>,
    /// True when this is a conservative stand-in rather than an oracle verdict
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<String>,
}

impl RiskAssessment {
    /// Substituted when there is nothing to assess
    pub fn trivial() -> Self {
        Self {
            risk_score: 0.0,
            recommended_action: RecommendedAction::None,
            rationale: "No violations; oracle not consulted".to_string(),
            raw_response: None,
            degraded: false,
            degraded_reason: None,
        }
    }

    /// Conservative default used when the oracle cannot produce a usable verdict
    pub fn degraded(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            risk_score: 0.0,
            recommended_action: RecommendedAction::None,
            rationale: format!("Conservative default: {}", reason),
            raw_response: None,
            degraded: true,
            degraded_reason: Some(reason),
        }
    }
}

//=============================================================================
// REMEDIATION
//=============================================================================

/// Autoscaling bounds for a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceBounds {
    pub min_instances: u32,
    pub max_instances: u32,
}

impl InstanceBounds {
    pub fn new(min_instances: u32, max_instances: u32) -> Self {
        Self {
            min_instances,
            max_instances,
        }
    }
}

impl fmt::Display for InstanceBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min_instances, self.max_instances)
    }
}

/// Concrete operation issued against the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationAction {
    pub target_id: TargetId,
    pub kind: RecommendedAction,
    pub parameters: RemediationParameters,
    pub issued_at: DateTime<Utc>,
    pub acknowledged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_bounds: Option<InstanceBounds>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_bounds: Option<InstanceBounds>,
}

//=============================================================================
// VERIFICATION
//=============================================================================

/// Where the verifier got its post-action sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleSource {
    Probe,
    MetricsStore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub healthy: bool,
    pub residual_violations: Vec<Violation>,
    pub checked_at: DateTime<Utc>,
    pub attempts: u32,
    pub source: SampleSource,
}

//=============================================================================
// STATE MACHINE & REPORT
//=============================================================================

/// Orchestrator states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealState {
    Idle,
    Detecting,
    Predicting,
    Healing,
    Verifying,
    Resolved,
    ResolvedNoop,
    Escalated,
    AbortedTimeout,
    AbortedError,
}

impl HealState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Resolved
                | Self::ResolvedNoop
                | Self::Escalated
                | Self::AbortedTimeout
                | Self::AbortedError
        )
    }

    /// Whether the state machine permits moving from `self` to `next`
    pub fn can_transition_to(&self, next: HealState) -> bool {
        use HealState::*;

        if self.is_terminal() {
            return false;
        }
        if matches!(next, AbortedTimeout | AbortedError) {
            return true;
        }

        matches!(
            (self, next),
            (Idle, Detecting)
                | (Detecting, ResolvedNoop)
                | (Detecting, Predicting)
                | (Predicting, ResolvedNoop)
                | (Predicting, Healing)
                | (Healing, Verifying)
                | (Verifying, Resolved)
                | (Verifying, Escalated)
                // fallback remediation after a failed verification
                | (Verifying, Healing)
        )
    }
}

impl fmt::Display for HealState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Detecting => "DETECTING",
            Self::Predicting => "PREDICTING",
            Self::Healing => "HEALING",
            Self::Verifying => "VERIFYING",
            Self::Resolved => "RESOLVED",
            Self::ResolvedNoop => "RESOLVED_NOOP",
            Self::Escalated => "ESCALATED",
            Self::AbortedTimeout => "ABORTED_TIMEOUT",
            Self::AbortedError => "ABORTED_ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Detect,
    Predict,
    Heal,
    Verify,
}

impl Phase {
    /// State the orchestrator is in while this phase runs
    pub fn state(&self) -> HealState {
        match self {
            Phase::Detect => HealState::Detecting,
            Phase::Predict => HealState::Predicting,
            Phase::Heal => HealState::Healing,
            Phase::Verify => HealState::Verifying,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Completed,
    Failed,
    TimedOut,
    /// Not started because the remaining budget was too small
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseOutcome {
    pub phase: Phase,
    pub status: PhaseStatus,
    /// Offset from invocation start
    pub started_at_ms: u64,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Causal error carried by a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportError {
    pub kind: String,
    pub message: String,
}

/// Evidence from every phase of one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingReport {
    pub invocation_id: InvocationId,
    pub target_id: TargetId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub final_state: HealState,
    pub phases: Vec<PhaseOutcome>,
    pub violations: Vec<Violation>,
    pub insufficient_data: bool,
    pub assessment: Option<RiskAssessment>,
    /// Remediations issued, in order
    pub remediations: Vec<RemediationAction>,
    pub verification: Option<VerificationResult>,
    pub error: Option<ReportError>,
    pub total_elapsed_ms: u64,
}

impl HealingReport {
    pub fn risk_score(&self) -> Option<f64> {
        self.assessment.as_ref().map(|a| a.risk_score)
    }

    /// The last mutating action taken, if any
    pub fn action_taken(&self) -> RecommendedAction {
        self.remediations
            .iter()
            .rev()
            .map(|r| r.kind)
            .find(|k| k.is_mutating())
            .unwrap_or(RecommendedAction::None)
    }
}
