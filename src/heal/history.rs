//! Bounded history of completed healing reports

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::models::HealingReport;

#[derive(Debug, Clone)]
pub struct ReportHistory {
    reports: Arc<RwLock<VecDeque<HealingReport>>>,
    capacity: usize,
}

impl ReportHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            reports: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Append a report, evicting the oldest when full
    pub async fn record(&self, report: HealingReport) {
        let mut reports = self.reports.write().await;
        while reports.len() >= self.capacity {
            reports.pop_front();
        }
        reports.push_back(report);
    }

    /// Up to `limit` reports, newest first
    pub async fn recent(&self, limit: usize) -> Vec<HealingReport> {
        self.reports.read().await.iter().rev().take(limit).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.reports.read().await.len()
    }
}
