//! Executor - recommended actions to control-plane operations
//!
//! | Action     | Operation                                   |
//! |------------|---------------------------------------------|
//! | `none`     | nothing, acknowledged immediately           |
//! | `scale_up` | raise min and max instance bounds by a step |
//! | `restart`  | restart the target                          |
//!
//! Rejections are reported and never retried. Exclusivity is the caller's
//! job: the orchestrator holds the target lock across execute and verify.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::models::*;
use crate::backend::{BackendError, ComputeControl};
use crate::config::ExecutorConfig;
use crate::error::HealError;

pub struct RemediationExecutor {
    compute: Arc<dyn ComputeControl>,
    settle_delay: Duration,
    scale_step_min: u32,
    scale_step_max: u32,
}

impl RemediationExecutor {
    pub fn new(compute: Arc<dyn ComputeControl>, config: &ExecutorConfig) -> Self {
        Self {
            compute,
            settle_delay: config.settle_delay(),
            scale_step_min: config.scale_step_min,
            scale_step_max: config.scale_step_max,
        }
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// Current autoscaling bounds of the target
    pub async fn current_bounds(&self, target_id: &str) -> Result<InstanceBounds, HealError> {
        self.compute
            .instance_bounds(target_id)
            .await
            .map_err(|e| control_plane_error(target_id, e))
    }

    /// Bounds after one scale-up step. Never lower than `current`.
    pub fn scaled_bounds(&self, current: InstanceBounds) -> InstanceBounds {
        let min_instances = current.min_instances.saturating_add(self.scale_step_min);
        let max_instances = current
            .max_instances
            .saturating_add(self.scale_step_max)
            .max(min_instances);
        InstanceBounds::new(min_instances, max_instances)
    }

    /// Issue the action and wait out the settling delay if it mutated anything.
    pub async fn execute(
        &self,
        target_id: &str,
        action: RecommendedAction,
        current_bounds: Option<InstanceBounds>,
    ) -> Result<RemediationAction, HealError> {
        let issued = self.issue(target_id, action, current_bounds).await?;
        self.settle(&issued).await;
        Ok(issued)
    }

    /// Issue the action without settling.
    ///
    /// Only `scale_up` needs the current bounds; when `current_bounds` is
    /// `None` they are read from the control plane first.
    pub async fn issue(
        &self,
        target_id: &str,
        action: RecommendedAction,
        current_bounds: Option<InstanceBounds>,
    ) -> Result<RemediationAction, HealError> {
        let issued_at = Utc::now();

        let (previous_bounds, new_bounds) = match action {
            RecommendedAction::None => {
                debug!(target_id, "No remediation requested");
                (current_bounds, None)
            }
            RecommendedAction::ScaleUp => {
                let current = match current_bounds {
                    Some(bounds) => bounds,
                    None => self.current_bounds(target_id).await?,
                };
                let new_bounds = self.scaled_bounds(current);
                info!(
                    target_id,
                    from = %current,
                    to = %new_bounds,
                    "Scaling up"
                );
                self.compute
                    .set_instance_bounds(target_id, new_bounds)
                    .await
                    .map_err(|e| control_plane_error(target_id, e))?;
                (Some(current), Some(new_bounds))
            }
            RecommendedAction::Restart => {
                info!(target_id, "Restarting");
                self.compute
                    .restart(target_id)
                    .await
                    .map_err(|e| control_plane_error(target_id, e))?;
                (current_bounds, None)
            }
        };

        Ok(RemediationAction {
            target_id: target_id.to_string(),
            kind: action,
            parameters: RemediationParameters {
                previous_bounds,
                new_bounds,
            },
            issued_at,
            acknowledged: true,
        })
    }

    /// Wait for a mutating action to propagate.
    pub async fn settle(&self, action: &RemediationAction) {
        if action.kind.is_mutating() && !self.settle_delay.is_zero() {
            debug!(
                target_id = %action.target_id,
                delay_ms = self.settle_delay.as_millis() as u64,
                "Settling"
            );
            tokio::time::sleep(self.settle_delay).await;
        }
    }
}

fn control_plane_error(target_id: &str, err: BackendError) -> HealError {
    match err {
        BackendError::Rejected(reason)
        | BackendError::Unauthorized(reason)
        | BackendError::QuotaExceeded(reason) => {
            warn!(target_id, %reason, "Control plane rejected remediation");
            HealError::RemediationRejected {
                target_id: target_id.to_string(),
                reason,
            }
        }
        e => HealError::Unavailable(format!("compute control: {}", e)),
    }
}
