//! Progress reporting for task bodies and event streaming for pollers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::jobs::manager::JobManager;
use crate::jobs::types::{Job, JobStatus, JobType};

/// Event emitted on every job state transition or progress update.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub job_id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub processed_items: u64,
    pub total_items: u64,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub(crate) fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.job_id.clone(),
            job_type: job.job_type,
            status: job.status,
            processed_items: job.processed_items,
            total_items: job.total_items,
            progress: job.progress,
            error: job.error.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Handle a task body uses to report progress for its own job.
///
/// The handle is bound to one job id and can only report progress; it
/// cannot transition status or touch any other job field.
#[derive(Clone)]
pub struct ProgressHandle {
    job_id: String,
    manager: Arc<JobManager>,
}

impl ProgressHandle {
    pub(crate) fn new(job_id: String, manager: Arc<JobManager>) -> Self {
        Self { job_id, manager }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Reports how many items have been processed out of `total`.
    pub fn report(&self, processed: u64, total: u64) -> Result<()> {
        self.manager
            .update_progress(&self.job_id, processed, Some(total))
    }
}
