//! Job state shared between the orchestrator and its callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of background work.
///
/// The set is closed at configuration time; at most one job of each type
/// may be running at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Transcribe,
    ManualImport,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobType::Transcribe => write!(f, "transcribe"),
            JobType::ManualImport => write!(f, "manual_import"),
        }
    }
}

/// Job execution status. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A tracked unit of asynchronous work.
///
/// Callers only ever see clones of the orchestrator's entry; mutating a
/// snapshot has no effect on the tracked job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    /// Percent complete (0-100), derived from the item counts.
    pub progress: u8,
    pub processed_items: u64,
    pub total_items: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Error message, present iff the job failed. Never auto-cleared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Opaque payload returned by the task body on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Opaque payload supplied by the caller at creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Job {
    pub(crate) fn new(
        job_type: JobType,
        total_items: u64,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            job_type,
            status: JobStatus::Pending,
            progress: 0,
            processed_items: 0,
            total_items,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
            metadata,
        }
    }

    /// Returns true if this job reached a terminal state.
    pub fn is_finished(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed)
    }

    pub(crate) fn recompute_progress(&mut self) {
        self.progress = if self.total_items > 0 {
            ((self.processed_items * 100) / self.total_items).min(100) as u8
        } else {
            0
        };
    }
}
