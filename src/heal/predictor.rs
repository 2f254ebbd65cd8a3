//! Predictor - risk assessment from the reasoning oracle
//!
//! Packages the window and its violations into a deterministic request,
//! retries transport failures with exponential backoff, and validates the
//! reply against a strict schema before anything leaves this module.
//!
//! Failure policy:
//! - schema mismatch: one corrective re-prompt, then a degraded default
//! - phase cap reached: degraded default
//! - retryable transport failure: retried, then `Unavailable`
//! - auth / quota: `OracleRefused`, not retried

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::fetcher::backoff;
use super::models::*;
use crate::backend::{BackendError, OracleRequest, ReasoningOracle};
use crate::config::PredictorConfig;
use crate::error::HealError;

/// Most recent samples included in the oracle context
const MAX_CONTEXT_SAMPLES: usize = 30;

/// Oracle reply after boundary validation
#[derive(Debug, Clone, PartialEq)]
pub enum OracleVerdict {
    Valid {
        risk_score: f64,
        action: RecommendedAction,
        rationale: String,
    },
    Invalid {
        reason: String,
    },
}

impl OracleVerdict {
    /// Validate an opaque oracle reply.
    pub fn validate(raw: &Value) -> Self {
        let invalid = |reason: String| OracleVerdict::Invalid { reason };

        let Some(obj) = raw.as_object() else {
            return invalid("reply is not a JSON object".to_string());
        };

        let risk_score = match obj.get("risk_score").and_then(Value::as_f64) {
            Some(score) => score,
            None => return invalid("risk_score is missing or not a number".to_string()),
        };
        if !(0.0..=100.0).contains(&risk_score) {
            return invalid(format!("risk_score {} is outside [0, 100]", risk_score));
        }

        let action = match obj.get("recommended_action").and_then(Value::as_str) {
            Some(raw_action) => match RecommendedAction::parse(raw_action) {
                Some(action) => action,
                None => {
                    return invalid(format!(
                        "recommended_action '{}' is not one of none, scale_up, restart",
                        raw_action
                    ))
                }
            },
            None => return invalid("recommended_action is missing or not a string".to_string()),
        };

        let rationale = ["rationale", "reasoning", "root_cause"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_str))
            .unwrap_or_default()
            .to_string();

        OracleVerdict::Valid {
            risk_score,
            action,
            rationale,
        }
    }
}

/// Client for the reasoning oracle
pub struct RiskPredictor {
    oracle: Arc<dyn ReasoningOracle>,
    timeout: Duration,
    max_retries: u32,
    backoff_base: Duration,
    temperature: f32,
}

impl RiskPredictor {
    pub fn new(oracle: Arc<dyn ReasoningOracle>, config: &PredictorConfig) -> Self {
        Self {
            oracle,
            timeout: Duration::from_millis(config.timeout_ms),
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            temperature: config.temperature,
        }
    }

    pub fn oracle_id(&self) -> &str {
        self.oracle.id()
    }

    /// Assess the risk of a violating window.
    ///
    /// Retries are skipped once their backoff would pass either the phase
    /// cap or the invocation `deadline`.
    pub async fn assess(
        &self,
        window: &MetricWindow,
        violations: &[Violation],
        alert_message: Option<&str>,
        deadline: Instant,
    ) -> Result<RiskAssessment, HealError> {
        if violations.is_empty() {
            debug!(target_id = %window.target_id(), "No violations, skipping oracle");
            return Ok(RiskAssessment::trivial());
        }

        let budget_end = (Instant::now() + self.timeout).min(deadline);
        let context = build_context(window, violations, alert_message);

        let result = match tokio::time::timeout(self.timeout, self.consult(context, budget_end)).await {
            Ok(result) => result,
            Err(_) => Err(HealError::Timeout("predict".to_string())),
        };

        match result {
            Ok(assessment) => {
                info!(
                    target_id = %window.target_id(),
                    risk_score = assessment.risk_score,
                    action = %assessment.recommended_action,
                    degraded = assessment.degraded,
                    "Risk assessed"
                );
                Ok(assessment)
            }
            Err(HealError::Timeout(_)) => {
                warn!(
                    target_id = %window.target_id(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Oracle exceeded phase budget, using conservative default"
                );
                Ok(RiskAssessment::degraded(
                    "oracle did not answer within the phase budget".to_string(),
                ))
            }
            Err(e) => Err(e),
        }
    }

    /// Ask, validate, and re-prompt once on a schema mismatch.
    async fn consult(&self, context: Value, budget_end: Instant) -> Result<RiskAssessment, HealError> {
        let mut request = OracleRequest {
            context,
            temperature: self.temperature,
            correction: None,
        };

        loop {
            let (verdict, raw) = match self.call_with_retry(&request, budget_end).await {
                Ok(raw) => (OracleVerdict::validate(&raw), Some(raw)),
                Err(HealError::MalformedResponse(reason)) => (OracleVerdict::Invalid { reason }, None),
                Err(e) => return Err(e),
            };

            match verdict {
                OracleVerdict::Valid {
                    risk_score,
                    action,
                    rationale,
                } => {
                    return Ok(RiskAssessment {
                        risk_score,
                        recommended_action: action,
                        rationale,
                        raw_response: raw,
                        degraded: false,
                        degraded_reason: None,
                    });
                }
                OracleVerdict::Invalid { reason } if request.correction.is_none() => {
                    warn!(oracle = %self.oracle.id(), %reason, "Oracle reply failed validation, re-prompting");
                    request.correction = Some(reason);
                }
                OracleVerdict::Invalid { reason } => {
                    warn!(oracle = %self.oracle.id(), %reason, "Oracle reply still malformed, using conservative default");
                    let err = HealError::MalformedResponse(reason);
                    let mut assessment = RiskAssessment::degraded(err.to_string());
                    assessment.raw_response = raw;
                    return Ok(assessment);
                }
            }
        }
    }

    async fn call_with_retry(
        &self,
        request: &OracleRequest,
        budget_end: Instant,
    ) -> Result<Value, HealError> {
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let err = match self.oracle.score(request).await {
                Ok(raw) => return Ok(raw),
                Err(e) => e,
            };

            match err {
                BackendError::Parse(msg) => return Err(HealError::MalformedResponse(msg)),
                e if e.is_retryable() && attempts <= self.max_retries => {
                    let delay = backoff(self.backoff_base, attempts);
                    if Instant::now() + delay >= budget_end {
                        return Err(HealError::Timeout("predict".to_string()));
                    }
                    warn!(
                        oracle = %self.oracle.id(),
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Oracle call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                e if e.is_retryable() => {
                    return Err(HealError::Unavailable(format!(
                        "oracle failed after {} attempts: {}",
                        attempts, e
                    )))
                }
                e => return Err(HealError::OracleRefused(e.to_string())),
            }
        }
    }
}

/// Deterministic context document for the oracle
fn build_context(window: &MetricWindow, violations: &[Violation], alert_message: Option<&str>) -> Value {
    let samples = window.samples();
    let recent = &samples[samples.len().saturating_sub(MAX_CONTEXT_SAMPLES)..];

    json!({
        "target_id": window.target_id(),
        "alert_message": alert_message,
        "window": {
            "sample_count": samples.len(),
            "from": samples.first().map(|s| s.timestamp),
            "to": samples.last().map(|s| s.timestamp),
            "samples": recent,
        },
        "latest": window.latest(),
        "violations": violations,
        "allowed_actions": ["none", "scale_up", "restart"],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{sample, MockOracle};
    use crate::heal::detector::AnomalyDetector;

    const DEGRADED: [f64; 5] = [2100.0, 9200.0, 0.097, 0.89, 0.94];

    fn degraded_window() -> (MetricWindow, Vec<Violation>) {
        let window = MetricWindow::new("user-api", vec![sample("user-api", DEGRADED)]);
        let violations = AnomalyDetector::default().detect(&window).violations;
        (window, violations)
    }

    fn predictor(oracle: Arc<MockOracle>) -> RiskPredictor {
        RiskPredictor::new(oracle, &PredictorConfig::default())
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[test]
    fn test_validate_accepts_schema() {
        let verdict = OracleVerdict::validate(&json!({
            "risk_score": 82,
            "recommended_action": "scale_up",
            "reasoning": "saturated"
        }));
        assert_eq!(
            verdict,
            OracleVerdict::Valid {
                risk_score: 82.0,
                action: RecommendedAction::ScaleUp,
                rationale: "saturated".to_string(),
            }
        );
    }

    #[test]
    fn test_validate_rejects_bad_replies() {
        for raw in [
            json!("scale up please"),
            json!({"risk_score": 140, "recommended_action": "scale_up"}),
            json!({"risk_score": -1, "recommended_action": "restart"}),
            json!({"risk_score": "high", "recommended_action": "restart"}),
            json!({"risk_score": 50, "recommended_action": "escalate_human"}),
            json!({"risk_score": 50}),
        ] {
            assert!(
                matches!(OracleVerdict::validate(&raw), OracleVerdict::Invalid { .. }),
                "accepted {}",
                raw
            );
        }
    }

    #[tokio::test]
    async fn test_skips_oracle_without_violations() {
        let oracle = Arc::new(MockOracle::default());
        let window = MetricWindow::new("user-api", vec![sample("user-api", [52.0, 15.0, 0.006, 0.48, 0.63])]);

        let assessment = predictor(oracle.clone()).assess(&window, &[], None, far_deadline()).await.unwrap();

        assert_eq!(assessment, RiskAssessment::trivial());
        assert_eq!(oracle.call_count(), 0);
    }

    #[tokio::test]
    async fn test_valid_reply() {
        let oracle = Arc::new(MockOracle::default().with_reply(json!({
            "risk_score": 82,
            "recommended_action": "scale_up",
            "rationale": "latency and lag under CPU saturation"
        })));
        let (window, violations) = degraded_window();

        let assessment = predictor(oracle.clone())
            .assess(&window, &violations, Some("High latency spike"), far_deadline())
            .await
            .unwrap();

        assert_eq!(assessment.risk_score, 82.0);
        assert_eq!(assessment.recommended_action, RecommendedAction::ScaleUp);
        assert!(!assessment.degraded);
        assert!(assessment.raw_response.is_some());

        let request = &oracle.requests()[0];
        assert!((request.temperature - 0.1).abs() < f32::EPSILON);
        assert_eq!(request.context["violations"].as_array().unwrap().len(), 5);
        assert_eq!(request.context["alert_message"], "High latency spike");
    }

    #[tokio::test]
    async fn test_corrective_reprompt_recovers() {
        let oracle = Arc::new(
            MockOracle::default()
                .with_reply(json!({"risk_score": 250, "recommended_action": "scale_up"}))
                .with_reply(json!({"risk_score": 80, "recommended_action": "restart"})),
        );
        let (window, violations) = degraded_window();

        let assessment = predictor(oracle.clone()).assess(&window, &violations, None, far_deadline()).await.unwrap();

        assert_eq!(assessment.recommended_action, RecommendedAction::Restart);
        assert_eq!(oracle.call_count(), 2);
        let correction = oracle.requests()[1].correction.clone().unwrap();
        assert!(correction.contains("outside [0, 100]"));
    }

    #[tokio::test]
    async fn test_malformed_twice_degrades() {
        let oracle = Arc::new(
            MockOracle::default().with_reply(json!({"risk_score": 250, "recommended_action": "scale_up"})),
        );
        let (window, violations) = degraded_window();

        let assessment = predictor(oracle.clone()).assess(&window, &violations, None, far_deadline()).await.unwrap();

        assert!(assessment.degraded);
        assert_eq!(assessment.risk_score, 0.0);
        assert_eq!(assessment.recommended_action, RecommendedAction::None);
        assert_eq!(oracle.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_retried() {
        let oracle = Arc::new(
            MockOracle::default()
                .with_error(BackendError::Server { status: 503, body: String::new() })
                .with_error(BackendError::Timeout)
                .with_reply(json!({"risk_score": 60, "recommended_action": "restart"})),
        );
        let (window, violations) = degraded_window();

        let assessment = predictor(oracle.clone()).assess(&window, &violations, None, far_deadline()).await.unwrap();

        assert_eq!(assessment.recommended_action, RecommendedAction::Restart);
        assert_eq!(oracle.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_exhausted() {
        let oracle = Arc::new(MockOracle::default().with_error(BackendError::Network("refused".into())));
        let (window, violations) = degraded_window();

        let err = predictor(oracle.clone()).assess(&window, &violations, None, far_deadline()).await.unwrap_err();

        assert!(matches!(err, HealError::Unavailable(_)));
        assert_eq!(oracle.call_count(), 3);
    }

    #[tokio::test]
    async fn test_terminal_failure_not_retried() {
        let oracle = Arc::new(MockOracle::default().with_error(BackendError::Unauthorized("bad key".into())));
        let (window, violations) = degraded_window();

        let err = predictor(oracle.clone()).assess(&window, &violations, None, far_deadline()).await.unwrap_err();

        assert!(matches!(err, HealError::OracleRefused(_)));
        assert_eq!(oracle.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_oracle_degrades() {
        let oracle = Arc::new(
            MockOracle::default()
                .with_reply(json!({"risk_score": 90, "recommended_action": "restart"}))
                .with_delay(Duration::from_secs(30)),
        );
        let (window, violations) = degraded_window();

        let started = Instant::now();
        let assessment = predictor(oracle).assess(&window, &violations, None, far_deadline()).await.unwrap();

        assert!(assessment.degraded);
        assert_eq!(assessment.recommended_action, RecommendedAction::None);
        assert!(started.elapsed() <= Duration::from_millis(3100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_skipped_past_invocation_deadline() {
        let oracle = Arc::new(
            MockOracle::default()
                .with_error(BackendError::Server { status: 503, body: String::new() })
                .with_reply(json!({"risk_score": 60, "recommended_action": "restart"}))
                .with_delay(Duration::from_millis(450)),
        );
        let (window, violations) = degraded_window();

        let started = Instant::now();
        let deadline = started + Duration::from_millis(600);
        let assessment = predictor(oracle.clone())
            .assess(&window, &violations, None, deadline)
            .await
            .unwrap();

        assert!(assessment.degraded);
        assert_eq!(assessment.recommended_action, RecommendedAction::None);
        assert_eq!(oracle.call_count(), 1);
        assert!(started.elapsed() < Duration::from_millis(600));
    }
}
