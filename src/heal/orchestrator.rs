//! Orchestrator - runs Detect, Predict, Heal and Verify under one deadline
//!
//! Every invocation holds its target's lock for its whole lifetime and
//! yields exactly one [`HealingReport`]. The remaining budget is checked
//! before each phase, and the running phase is cancelled when the total
//! deadline passes.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::detector::{AnomalyDetector, Detection};
use super::executor::RemediationExecutor;
use super::fetcher::MetricWindowFetcher;
use super::history::ReportHistory;
use super::lock::TargetLocks;
use super::models::*;
use super::predictor::RiskPredictor;
use super::verifier::HealthVerifier;
use crate::backend::Backends;
use crate::config::Config;
use crate::error::HealError;

pub struct Orchestrator {
    fetcher: MetricWindowFetcher,
    detector: AnomalyDetector,
    predictor: RiskPredictor,
    executor: RemediationExecutor,
    verifier: HealthVerifier,
    locks: TargetLocks,
    history: ReportHistory,
    total_deadline: Duration,
    min_phase_budget: Duration,
    window: Duration,
    fallback_to_restart: bool,
}

impl Orchestrator {
    pub fn new(config: &Config, backends: Backends) -> Self {
        let detector = AnomalyDetector::new(config.thresholds);

        Self {
            fetcher: MetricWindowFetcher::new(backends.metrics.clone(), &config.fetcher),
            detector: detector.clone(),
            predictor: RiskPredictor::new(backends.oracle, &config.predictor),
            executor: RemediationExecutor::new(backends.compute, &config.executor),
            verifier: HealthVerifier::new(
                backends.probe,
                MetricWindowFetcher::new(backends.metrics, &config.fetcher),
                detector,
                &config.verifier,
            ),
            locks: TargetLocks::new(),
            history: ReportHistory::new(config.server.history_capacity),
            total_deadline: config.heal.total_deadline(),
            min_phase_budget: config.heal.min_phase_budget(),
            window: config.heal.window(),
            fallback_to_restart: config.executor.fallback_to_restart,
        }
    }

    pub fn is_healing(&self, target_id: &str) -> bool {
        self.locks.is_held(target_id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.locks.in_flight_count()
    }

    pub fn history(&self) -> &ReportHistory {
        &self.history
    }

    pub fn oracle_id(&self) -> &str {
        self.predictor.oracle_id()
    }

    /// Run one healing invocation for `target_id`.
    ///
    /// The only error is `AlreadyHealing`; every other outcome, including
    /// aborts, is a report with a terminal `final_state`.
    pub async fn heal(
        &self,
        target_id: &str,
        alert_message: Option<&str>,
    ) -> Result<HealingReport, HealError> {
        let invocation_id = Uuid::new_v4().to_string();

        let Some(guard) = self.locks.try_acquire(target_id, &invocation_id) else {
            warn!(target_id, "Healing already in flight, rejecting");
            return Err(HealError::AlreadyHealing(target_id.to_string()));
        };

        info!(target_id, %invocation_id, alert = ?alert_message, "Healing invocation started");

        let mut inv = Invocation::new(invocation_id, target_id, alert_message, self.total_deadline);
        self.run(&mut inv, target_id, alert_message).await;
        let report = inv.into_report();

        drop(guard);

        match report.final_state {
            HealState::AbortedError => error!(
                target_id,
                invocation_id = %report.invocation_id,
                error = ?report.error.as_ref().map(|e| &e.message),
                elapsed_ms = report.total_elapsed_ms,
                "Healing invocation aborted"
            ),
            state => info!(
                target_id,
                invocation_id = %report.invocation_id,
                final_state = %state,
                action = %report.action_taken(),
                elapsed_ms = report.total_elapsed_ms,
                "Healing invocation finished"
            ),
        }

        self.history.record(report.clone()).await;
        Ok(report)
    }

    async fn run(&self, inv: &mut Invocation, target_id: &str, alert_message: Option<&str>) {
        let deadline = inv.deadline;

        // DETECT
        let detect = async {
            match self.fetcher.fetch(target_id, self.window, deadline).await {
                Ok(window) => {
                    let detection = self.detector.detect(&window);
                    Ok((window, detection))
                }
                Err(HealError::EmptyWindow { .. }) => Ok((
                    MetricWindow::empty(target_id),
                    Detection {
                        violations: Vec::new(),
                        insufficient_data: true,
                    },
                )),
                Err(e) => Err(e),
            }
        };
        let Some((window, detection)) = self.run_phase(inv, Phase::Detect, self.min_phase_budget, detect).await
        else {
            return;
        };

        inv.violations = detection.violations;
        inv.insufficient_data = detection.insufficient_data;

        if inv.violations.is_empty() {
            if inv.insufficient_data {
                warn!(target_id, "No telemetry in window, nothing to judge");
            }
            inv.transition(HealState::ResolvedNoop);
            return;
        }

        // PREDICT
        let violations = inv.violations.clone();
        let predict = self.predictor.assess(&window, &violations, alert_message, deadline);
        let Some(assessment) = self.run_phase(inv, Phase::Predict, self.min_phase_budget, predict).await
        else {
            return;
        };

        let mut action = assessment.recommended_action;
        let degraded = assessment.degraded;
        inv.assessment = Some(assessment);

        if degraded || action == RecommendedAction::None {
            debug!(target_id, degraded, "No remediation warranted");
            inv.transition(HealState::ResolvedNoop);
            return;
        }

        loop {
            // HEAL
            let mut issued = None;
            let heal = async {
                let remediation = self.executor.issue(target_id, action, None).await?;
                self.executor.settle(issued.insert(remediation)).await;
                Ok::<_, HealError>(())
            };
            let budget = self.min_phase_budget + self.executor.settle_delay();
            let healed = self.run_phase(inv, Phase::Heal, budget, heal).await;
            inv.remediations.extend(issued);
            if healed.is_none() {
                return;
            }

            // VERIFY
            let verify = self.verifier.verify(target_id, &violations, deadline);
            let Some(verification) = self.run_phase(inv, Phase::Verify, self.min_phase_budget, verify).await
            else {
                return;
            };

            let healthy = verification.healthy;
            inv.verification = Some(verification);

            if healthy {
                inv.transition(HealState::Resolved);
                return;
            }

            if self.fallback_to_restart && action == RecommendedAction::ScaleUp {
                warn!(target_id, "Scale-up did not clear violations, falling back to restart");
                action = RecommendedAction::Restart;
                continue;
            }

            inv.transition(HealState::Escalated);
            return;
        }
    }

    /// Run one phase under the invocation's deadline.
    ///
    /// `None` means the invocation has been aborted and no further phase
    /// may run.
    async fn run_phase<T>(
        &self,
        inv: &mut Invocation,
        phase: Phase,
        min_budget: Duration,
        work: impl Future<Output = Result<T, HealError>>,
    ) -> Option<T> {
        let offset_ms = inv.elapsed_ms();
        let remaining = inv.remaining();

        if remaining < min_budget {
            warn!(
                target_id = %inv.target_id,
                ?phase,
                remaining_ms = remaining.as_millis() as u64,
                needed_ms = min_budget.as_millis() as u64,
                "Insufficient budget, aborting before phase"
            );
            inv.record(
                phase,
                PhaseStatus::Skipped,
                offset_ms,
                0,
                Some(format!(
                    "{} ms remaining, {} ms needed",
                    remaining.as_millis(),
                    min_budget.as_millis()
                )),
            );
            inv.abort(HealError::Timeout(format!("{:?} phase", phase).to_lowercase()));
            return None;
        }

        inv.transition(phase.state());
        let started = Instant::now();
        let outcome = tokio::time::timeout(remaining, work).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(value)) => {
                debug!(target_id = %inv.target_id, ?phase, elapsed_ms, "Phase completed");
                inv.record(phase, PhaseStatus::Completed, offset_ms, elapsed_ms, None);
                Some(value)
            }
            Ok(Err(err)) => {
                warn!(target_id = %inv.target_id, ?phase, error = %err, "Phase failed");
                inv.record(phase, PhaseStatus::Failed, offset_ms, elapsed_ms, Some(err.to_string()));
                inv.abort(err);
                None
            }
            Err(_) => {
                warn!(target_id = %inv.target_id, ?phase, elapsed_ms, "Deadline passed mid-phase, cancelled");
                inv.record(phase, PhaseStatus::TimedOut, offset_ms, elapsed_ms, None);
                inv.abort(HealError::Timeout(format!("{:?} phase", phase).to_lowercase()));
                None
            }
        }
    }
}

/// Mutable state of one in-flight invocation
struct Invocation {
    id: InvocationId,
    target_id: TargetId,
    alert_message: Option<String>,
    started_at: DateTime<Utc>,
    clock: Instant,
    deadline: Instant,
    state: HealState,
    phases: Vec<PhaseOutcome>,
    violations: Vec<Violation>,
    insufficient_data: bool,
    assessment: Option<RiskAssessment>,
    remediations: Vec<RemediationAction>,
    verification: Option<VerificationResult>,
    error: Option<HealError>,
}

impl Invocation {
    fn new(id: InvocationId, target_id: &str, alert_message: Option<&str>, budget: Duration) -> Self {
        let clock = Instant::now();
        Self {
            id,
            target_id: target_id.to_string(),
            alert_message: alert_message.map(str::to_string),
            started_at: Utc::now(),
            clock,
            deadline: clock + budget,
            state: HealState::Idle,
            phases: Vec::new(),
            violations: Vec::new(),
            insufficient_data: false,
            assessment: None,
            remediations: Vec::new(),
            verification: None,
            error: None,
        }
    }

    fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    fn elapsed_ms(&self) -> u64 {
        self.clock.elapsed().as_millis() as u64
    }

    fn transition(&mut self, next: HealState) {
        if !self.state.can_transition_to(next) {
            error!(target_id = %self.target_id, from = %self.state, to = %next, "Illegal state transition");
            return;
        }
        debug!(target_id = %self.target_id, from = %self.state, to = %next, "State transition");
        self.state = next;
    }

    fn record(
        &mut self,
        phase: Phase,
        status: PhaseStatus,
        started_at_ms: u64,
        elapsed_ms: u64,
        detail: Option<String>,
    ) {
        self.phases.push(PhaseOutcome {
            phase,
            status,
            started_at_ms,
            elapsed_ms,
            detail,
        });
    }

    fn abort(&mut self, err: HealError) {
        let next = match err {
            HealError::Timeout(_) => HealState::AbortedTimeout,
            _ => HealState::AbortedError,
        };
        self.error = Some(err);
        self.transition(next);
    }

    fn into_report(self) -> HealingReport {
        let total_elapsed_ms = self.elapsed_ms();
        HealingReport {
            invocation_id: self.id,
            target_id: self.target_id,
            alert_message: self.alert_message,
            started_at: self.started_at,
            final_state: self.state,
            phases: self.phases,
            violations: self.violations,
            insufficient_data: self.insufficient_data,
            assessment: self.assessment,
            remediations: self.remediations,
            verification: self.verification,
            error: self.error.as_ref().map(ReportError::from),
            total_elapsed_ms,
        }
    }
}
