// Application state for HTTP handlers
use crate::application::poll_service::{CycleReport, PollError};
use crate::application::scheduler::{CycleSink, SchedulerHandle};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStatus {
    /// No cycle has finished yet
    Pending,
    Ok,
    /// Credentials rejected; polling continues but data will not refresh
    NeedsReauth,
    /// Last cycle failed; the previous report is still served
    Stale,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub status: PublishStatus,
    pub last_success: Option<DateTime<FixedOffset>>,
    pub last_error: Option<String>,
    pub pod_count: usize,
}

/// Latest published sensor values, kept until the next successful cycle.
pub struct SensorStore {
    latest: RwLock<Option<Arc<CycleReport>>>,
    status: RwLock<StatusSnapshot>,
}

impl SensorStore {
    pub fn new() -> Self {
        Self {
            latest: RwLock::new(None),
            status: RwLock::new(StatusSnapshot {
                status: PublishStatus::Pending,
                last_success: None,
                last_error: None,
                pod_count: 0,
            }),
        }
    }

    pub fn latest(&self) -> Option<Arc<CycleReport>> {
        self.latest.read().clone()
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.read().clone()
    }
}

impl Default for SensorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CycleSink for SensorStore {
    async fn publish(&self, report: CycleReport) {
        tracing::debug!(
            "Publishing {} PODs, {} skipped items",
            report.pods.len(),
            report.skipped.len()
        );
        {
            let mut status = self.status.write();
            status.status = PublishStatus::Ok;
            status.last_success = Some(report.cycle_timestamp);
            status.last_error = None;
            status.pod_count = report.pods.len();
        }
        *self.latest.write() = Some(Arc::new(report));
    }

    async fn cycle_failed(&self, error: &PollError) {
        let mut status = self.status.write();
        status.status = match error {
            PollError::AuthFailed(_) => PublishStatus::NeedsReauth,
            PollError::UpdateFailed(_) => PublishStatus::Stale,
        };
        status.last_error = Some(error.to_string());
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SensorStore>,
    pub scheduler: SchedulerHandle,
}
