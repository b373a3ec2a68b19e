//! Workbench facade: one handle over the orchestrator and the record
//! store, with request/response shapes ready for a UI or HTTP layer.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::DataConfig;
use crate::error::{JobError, Result, ScribaError};
use crate::jobs::{Job, JobEvent, JobManager, JobType, TaskBody};
use crate::records::{CorrectionRecord, ImportOutcome, NewRecord, RecordStore};
use crate::storage::JsonTableStore;
use tokio::sync::broadcast;

/// Request to start a background job.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub job_type: JobType,
    /// Expected number of items; 0 when unknown up front.
    #[serde(default)]
    pub total_items: i64,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Response to a successful job start.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobCreated {
    pub job_id: String,
}

/// Response to a lock-state change.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStateResponse {
    pub id: String,
    pub locked: bool,
}

/// The correction workbench: job orchestration plus the record table,
/// sharing one data directory.
pub struct Workbench {
    jobs: Arc<JobManager>,
    records: Arc<RecordStore>,
    export_dir: PathBuf,
}

impl Workbench {
    /// Opens both stores under the configured data directory, creating it
    /// if needed.
    pub fn open(config: &DataConfig) -> Result<Self> {
        config.ensure_directories()?;
        let jobs = JobManager::open(Box::new(JsonTableStore::new(config.jobs_file())))?;
        let records = RecordStore::open(Box::new(JsonTableStore::new(config.records_file())))?;
        Ok(Self {
            jobs,
            records: Arc::new(records),
            export_dir: config.export_dir(),
        })
    }

    pub fn jobs(&self) -> &Arc<JobManager> {
        &self.jobs
    }

    pub fn records(&self) -> &Arc<RecordStore> {
        &self.records
    }

    /// Starts a background job and returns its id.
    ///
    /// Refuses early with [`JobError::Conflict`] when a job of the same
    /// type is already running, so the caller gets the conflict instead of
    /// a job that fails moments later. The authoritative check still
    /// happens when the spawned task tries to start.
    pub fn start_job(&self, request: CreateJobRequest, task: TaskBody) -> Result<JobCreated> {
        let (free, active) = self.jobs.can_start(request.job_type);
        if !free {
            return Err(JobError::Conflict {
                job_type: request.job_type,
                active_job_id: active.unwrap_or_else(|| "unknown".to_string()),
            }
            .into());
        }

        let job_id =
            self.jobs
                .run_async(request.job_type, request.total_items, request.metadata, task)?;
        Ok(JobCreated { job_id })
    }

    pub fn get_job(&self, job_id: &str) -> Result<Job> {
        self.jobs
            .get(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()).into())
    }

    /// Lists jobs newest first; `limit` defaults to 50.
    pub fn list_jobs(&self, limit: Option<usize>) -> Vec<Job> {
        self.jobs
            .list(limit.unwrap_or(crate::jobs::manager::DEFAULT_LIST_LIMIT))
    }

    /// Subscribes to job state-change events for live progress display.
    pub fn subscribe_jobs(&self) -> broadcast::Receiver<JobEvent> {
        self.jobs.subscribe()
    }

    pub fn list_records(&self) -> Vec<CorrectionRecord> {
        self.records.load_all()
    }

    pub fn update_correction(&self, id: &str, corrected_text: &str) -> Result<CorrectionRecord> {
        self.records.update_correction(id, corrected_text)
    }

    pub fn set_record_lock(&self, id: &str, locked: bool) -> Result<LockStateResponse> {
        let record = self.records.set_locked(id, locked)?;
        Ok(LockStateResponse {
            id: record.id,
            locked: record.locked,
        })
    }

    pub fn import_records(&self, batch: Vec<NewRecord>) -> Result<Vec<ImportOutcome>> {
        self.records.import_batch(batch)
    }

    /// Exports all records as CSV into the export directory and returns
    /// the file's path.
    pub fn export_records(&self, file_name: &str) -> Result<PathBuf> {
        let path = self.export_dir.join(file_name);
        self.records.export_csv(&path)?;
        Ok(path)
    }
}

/// Stable machine-readable code for an error, for transport layers that
/// map codes to HTTP statuses (conflict maps to 409, not_found to 404).
pub fn error_code(error: &ScribaError) -> &'static str {
    match error {
        ScribaError::Job(JobError::Conflict { .. }) => "conflict",
        ScribaError::Job(JobError::NotFound(_)) => "not_found",
        ScribaError::Job(JobError::Validation { .. }) => "validation",
        ScribaError::Record(crate::error::RecordError::NotFound(_)) => "not_found",
        ScribaError::Record(crate::error::RecordError::Locked(_)) => "locked",
        ScribaError::Record(crate::error::RecordError::Validation { .. }) => "validation",
        ScribaError::Persistence(_) => "persistence",
        ScribaError::Config(_) => "config",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RecordError;

    #[test]
    fn test_error_codes() {
        let conflict: ScribaError = JobError::Conflict {
            job_type: JobType::Transcribe,
            active_job_id: "job-1".to_string(),
        }
        .into();
        assert_eq!(error_code(&conflict), "conflict");

        let locked: ScribaError = RecordError::Locked("rec-1".to_string()).into();
        assert_eq!(error_code(&locked), "locked");

        let missing: ScribaError = JobError::NotFound("job-2".to_string()).into();
        assert_eq!(error_code(&missing), "not_found");
    }

    #[test]
    fn test_create_job_request_defaults() {
        let request: CreateJobRequest =
            serde_json::from_str(r#"{"jobType": "transcribe"}"#).unwrap();
        assert_eq!(request.job_type, JobType::Transcribe);
        assert_eq!(request.total_items, 0);
        assert!(request.metadata.is_none());
    }
}
