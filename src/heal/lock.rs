//! Per-target exclusivity
//!
//! At most one healing invocation per target. Acquisition never blocks and
//! release happens when the guard drops, on every exit path.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use super::models::{InvocationId, TargetId};

/// Invocation currently holding a target
#[derive(Debug, Clone, Serialize)]
pub struct InFlight {
    pub invocation_id: InvocationId,
    pub started_at: DateTime<Utc>,
}

/// Lock table keyed by target id
#[derive(Debug, Clone, Default)]
pub struct TargetLocks {
    in_flight: Arc<DashMap<TargetId, InFlight>>,
}

impl TargetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `target_id`, or `None` if it is already held.
    pub fn try_acquire(&self, target_id: &str, invocation_id: &str) -> Option<TargetLockGuard> {
        match self.in_flight.entry(target_id.to_string()) {
            Entry::Occupied(held) => {
                debug!(
                    target_id,
                    holder = %held.get().invocation_id,
                    "Target lock contended"
                );
                None
            }
            Entry::Vacant(slot) => {
                slot.insert(InFlight {
                    invocation_id: invocation_id.to_string(),
                    started_at: Utc::now(),
                });
                Some(TargetLockGuard {
                    in_flight: Arc::clone(&self.in_flight),
                    target_id: target_id.to_string(),
                    invocation_id: invocation_id.to_string(),
                })
            }
        }
    }

    pub fn is_held(&self, target_id: &str) -> bool {
        self.in_flight.contains_key(target_id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

/// Releases the target when dropped
#[derive(Debug)]
pub struct TargetLockGuard {
    in_flight: Arc<DashMap<TargetId, InFlight>>,
    target_id: TargetId,
    invocation_id: InvocationId,
}

impl Drop for TargetLockGuard {
    fn drop(&mut self) {
        let invocation_id = &self.invocation_id;
        self.in_flight
            .remove_if(&self.target_id, |_, held| &held.invocation_id == invocation_id);
        debug!(target_id = %self.target_id, %invocation_id, "Target lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusive_per_target() {
        let locks = TargetLocks::new();

        let _guard = locks.try_acquire("a", "inv-1").unwrap();
        assert!(locks.try_acquire("a", "inv-2").is_none());
        assert!(locks.try_acquire("b", "inv-3").is_some());
        assert!(locks.is_held("a"));
    }

    #[test]
    fn test_released_on_drop() {
        let locks = TargetLocks::new();
        {
            let _guard = locks.try_acquire("a", "inv-1").unwrap();
            assert!(locks.is_held("a"));
            assert_eq!(locks.in_flight_count(), 1);
        }
        assert!(!locks.is_held("a"));
        assert!(locks.try_acquire("a", "inv-2").is_some());
    }

    #[test]
    fn test_released_on_panic() {
        let locks = TargetLocks::new();
        let cloned = locks.clone();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = cloned.try_acquire("a", "inv-1").unwrap();
            panic!("phase blew up");
        }));

        assert!(result.is_err());
        assert!(!locks.is_held("a"));
    }

    #[test]
    fn test_concurrent_acquire_single_winner() {
        let locks = TargetLocks::new();
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let locks = locks.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    locks.try_acquire("a", &format!("inv-{i}")).map(std::mem::forget).is_some()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
