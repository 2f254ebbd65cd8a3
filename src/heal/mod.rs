//! Heal - closed-loop remediation for a monitored target
//!
//! One invocation observes recent telemetry, decides whether the target is
//! unhealthy, asks the reasoning oracle how risky it is, applies a bounded
//! remediation and checks that it worked, all inside a total deadline.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           ORCHESTRATOR                            │
//! │                  (target lock, deadline, report)                  │
//! │                                                                    │
//! │   ┌─────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐        │
//! │   │ Detect  │──▶│ Predict  │──▶│   Heal   │──▶│  Verify  │        │
//! │   └────┬────┘   └────┬─────┘   └────┬─────┘   └────┬─────┘        │
//! │        │             │              │              │              │
//! └────────┼─────────────┼──────────────┼──────────────┼──────────────┘
//!          ▼             ▼              ▼              ▼
//!    metrics store   reasoning     compute control   health probe
//!                     oracle                       (metrics store)
//! ```
//!
//! # States
//!
//! `IDLE → DETECTING → RESOLVED_NOOP` when nothing violates, otherwise
//! `DETECTING → PREDICTING → HEALING → VERIFYING → RESOLVED | ESCALATED`.
//! Any running state may end in `ABORTED_TIMEOUT` or `ABORTED_ERROR`.

pub mod detector;
pub mod executor;
pub mod fetcher;
pub mod history;
pub mod lock;
pub mod models;
pub mod orchestrator;
pub mod predictor;
pub mod verifier;

pub use detector::{AnomalyDetector, Detection};
pub use executor::RemediationExecutor;
pub use fetcher::MetricWindowFetcher;
pub use history::ReportHistory;
pub use lock::{TargetLockGuard, TargetLocks};
pub use models::*;
pub use orchestrator::Orchestrator;
pub use predictor::{OracleVerdict, RiskPredictor};
pub use verifier::HealthVerifier;
