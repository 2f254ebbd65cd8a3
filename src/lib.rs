//! autohealer: closed-loop remediation controller
//!
//! Detects threshold violations in a target's recent telemetry, asks a
//! reasoning oracle for a risk-scored recommendation, applies a bounded
//! remediation through the compute control plane, and verifies the result,
//! all under a strict end-to-end deadline.

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod heal;

pub use config::Config;
pub use error::{HealError, Result};
pub use heal::{HealState, HealingReport, Orchestrator};
