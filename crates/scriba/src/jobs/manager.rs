//! Background job orchestration with per-type mutual exclusion.
//!
//! The manager owns every [`Job`] entry. One mutex guards the in-memory
//! table together with the active-job-per-type map, so the `try_start`
//! check-and-set is a single critical section: two callers racing to start
//! same-type jobs can never both observe a free slot. Every state
//! transition is flushed to the persistent table *before* it is committed
//! to memory, which keeps a failed flush from leaving the two out of sync.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use log::{error, info, warn};
use tokio::sync::broadcast;

use crate::error::{JobError, Result};
use crate::jobs::progress::{JobEvent, ProgressHandle};
use crate::jobs::types::{Job, JobStatus, JobType};
use crate::storage::TableStore;

/// Default number of jobs returned by [`JobManager::list`].
pub const DEFAULT_LIST_LIMIT: usize = 50;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Outcome of a task body: an opaque result payload, or an error whose
/// message is preserved verbatim on the failed job.
pub type TaskResult =
    std::result::Result<serde_json::Value, Box<dyn std::error::Error + Send + Sync>>;

/// Caller-supplied unit of work executed under orchestrator supervision.
///
/// Receives a [`ProgressHandle`] bound to its job; everything else the
/// task touches (audio decoding, model inference, record appends) lives
/// outside the orchestrator.
pub type TaskBody = Box<dyn FnOnce(ProgressHandle) -> BoxFuture<'static, TaskResult> + Send>;

struct Inner {
    jobs: HashMap<String, Job>,
    /// Holds the id of the currently running job per type. Presence of a
    /// key is the mutual-exclusion token for that type.
    active_by_type: HashMap<JobType, String>,
}

/// Orchestrates background jobs: one running job per type, progress
/// tracking, and status persisted across restarts.
pub struct JobManager {
    inner: Mutex<Inner>,
    store: Box<dyn TableStore<Job>>,
    events: broadcast::Sender<JobEvent>,
}

impl JobManager {
    /// Opens the manager over a persisted job table.
    ///
    /// Jobs a crashed process left in `Running` are kept as-is and
    /// re-registered as active, so their type stays blocked until the
    /// operator calls [`fail`](Self::fail) on them.
    pub fn open(store: Box<dyn TableStore<Job>>) -> Result<Arc<Self>> {
        let rows = store.load()?;
        let mut jobs = HashMap::with_capacity(rows.len());
        let mut active_by_type: HashMap<JobType, String> = HashMap::new();

        for job in rows {
            if job.status == JobStatus::Running {
                warn!(
                    "job {} was left running by a previous process; mark it failed to release the {} slot",
                    job.job_id, job.job_type
                );
                if let Some(prev) = active_by_type.insert(job.job_type, job.job_id.clone()) {
                    warn!(
                        "multiple running {} jobs in persisted state ({} and {})",
                        job.job_type, prev, job.job_id
                    );
                }
            }
            jobs.insert(job.job_id.clone(), job);
        }

        info!("loaded {} jobs from persisted state", jobs.len());

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Arc::new(Self {
            inner: Mutex::new(Inner {
                jobs,
                active_by_type,
            }),
            store,
            events,
        }))
    }

    /// Subscribes to job state-change events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("job table lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Flushes the full table with `updated` substituted in, then commits
    /// the entry to memory. A persistence failure leaves memory unchanged,
    /// so a retry is safe.
    fn persist_and_commit(&self, inner: &mut Inner, updated: Job) -> Result<()> {
        let mut rows: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.job_id != updated.job_id)
            .cloned()
            .collect();
        rows.push(updated.clone());
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        self.store.replace(&rows)?;

        let event = JobEvent::from_job(&updated);
        inner.jobs.insert(updated.job_id.clone(), updated);
        // No active receivers is fine.
        let _ = self.events.send(event);
        Ok(())
    }

    /// Allocates a new pending job and persists it.
    pub fn create(
        &self,
        job_type: JobType,
        total_items: i64,
        metadata: Option<serde_json::Value>,
    ) -> Result<String> {
        if total_items < 0 {
            return Err(JobError::Validation {
                message: format!("total_items must be >= 0, got {}", total_items),
            }
            .into());
        }

        let job = Job::new(job_type, total_items as u64, metadata);
        let job_id = job.job_id.clone();

        let mut inner = self.lock_inner();
        self.persist_and_commit(&mut inner, job)?;
        drop(inner);

        info!("created {} job {}", job_type, job_id);
        Ok(job_id)
    }

    /// Advisory check whether a job of this type could start right now.
    ///
    /// Returns the active job's id when the slot is taken. Only
    /// [`try_start`](Self::try_start) is authoritative; this exists so an
    /// API layer can produce an early conflict signal.
    pub fn can_start(&self, job_type: JobType) -> (bool, Option<String>) {
        let inner = self.lock_inner();
        match inner.active_by_type.get(&job_type) {
            Some(active) => (false, Some(active.clone())),
            None => (true, None),
        }
    }

    /// Atomically transitions the job to `Running` unless another job of
    /// the same type already is; returns false (job left `Pending`) in
    /// that case.
    pub fn try_start(&self, job_id: &str) -> Result<bool> {
        let mut inner = self.lock_inner();

        let job = inner
            .jobs
            .get(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        if job.status != JobStatus::Pending {
            return Err(JobError::Validation {
                message: format!(
                    "job {} is {}, only pending jobs can start",
                    job_id, job.status
                ),
            }
            .into());
        }

        let job_type = job.job_type;
        if inner.active_by_type.contains_key(&job_type) {
            return Ok(false);
        }

        let mut updated = job.clone();
        updated.status = JobStatus::Running;
        updated.started_at = Some(Utc::now());

        self.persist_and_commit(&mut inner, updated)?;
        inner.active_by_type.insert(job_type, job_id.to_string());
        drop(inner);

        info!("job {} is now running", job_id);
        Ok(true)
    }

    /// Records progress for a job.
    ///
    /// `processed` is clamped to `[0, total_items]` and to monotonic: an
    /// out-of-order lower report never decreases the stored value. A new
    /// `total` may grow the item count but never shrinks it below what was
    /// already processed. Reports for finished jobs are ignored.
    pub fn update_progress(&self, job_id: &str, processed: u64, total: Option<u64>) -> Result<()> {
        let mut inner = self.lock_inner();

        let job = inner
            .jobs
            .get(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        if job.is_finished() {
            warn!("ignoring progress report for finished job {}", job_id);
            return Ok(());
        }

        let mut updated = job.clone();
        if let Some(total) = total {
            updated.total_items = total.max(updated.processed_items);
        }
        let clamped = processed.min(updated.total_items);
        updated.processed_items = updated.processed_items.max(clamped);
        updated.recompute_progress();

        self.persist_and_commit(&mut inner, updated)
    }

    /// Marks a job completed with an optional result payload.
    pub fn complete(&self, job_id: &str, result: Option<serde_json::Value>) -> Result<()> {
        self.finish(job_id, JobStatus::Completed, result, None)
    }

    /// Marks a job failed with a human-readable error.
    ///
    /// Also the operator's override for a job left frozen in `Running` by
    /// a crash: failing it releases the type's running slot.
    pub fn fail(&self, job_id: &str, error: &str) -> Result<()> {
        self.finish(job_id, JobStatus::Failed, None, Some(error.to_string()))
    }

    fn finish(
        &self,
        job_id: &str,
        status: JobStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<()> {
        let mut inner = self.lock_inner();

        let job = inner
            .jobs
            .get(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        if job.is_finished() {
            return Err(JobError::Validation {
                message: format!("job {} is already {}", job_id, job.status),
            }
            .into());
        }

        let job_type = job.job_type;
        let mut updated = job.clone();
        updated.status = status;
        updated.completed_at = Some(Utc::now());
        match status {
            JobStatus::Completed => {
                updated.processed_items = updated.total_items;
                updated.progress = 100;
                updated.result = result;
            }
            JobStatus::Failed => {
                // Progress stays at the last reported value.
                updated.error = error.clone();
            }
            JobStatus::Pending | JobStatus::Running => unreachable!("finish with non-terminal status"),
        }

        self.persist_and_commit(&mut inner, updated)?;

        // Release the type's running slot, but only if this job holds it.
        if inner.active_by_type.get(&job_type).map(String::as_str) == Some(job_id) {
            inner.active_by_type.remove(&job_type);
        }
        drop(inner);

        match status {
            JobStatus::Failed => warn!(
                "job {} failed: {}",
                job_id,
                error.as_deref().unwrap_or("unknown error")
            ),
            _ => info!("job {} completed", job_id),
        }
        Ok(())
    }

    /// Returns a snapshot of one job.
    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.lock_inner().jobs.get(job_id).cloned()
    }

    /// Returns job snapshots, newest first.
    pub fn list(&self, limit: usize) -> Vec<Job> {
        let inner = self.lock_inner();
        let mut jobs: Vec<Job> = inner.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        jobs
    }

    /// Returns the currently running job of a type, if any.
    pub fn active_job(&self, job_type: JobType) -> Option<Job> {
        let inner = self.lock_inner();
        inner
            .active_by_type
            .get(&job_type)
            .and_then(|id| inner.jobs.get(id))
            .cloned()
    }

    /// Creates a job and drives `task` on a spawned tokio task.
    ///
    /// Returns the job id immediately; the caller is never blocked on the
    /// task body. Start refusal, task errors and task panics all end as a
    /// `Failed` job with the message preserved - nothing propagates to the
    /// host process.
    pub fn run_async(
        self: &Arc<Self>,
        job_type: JobType,
        total_items: i64,
        metadata: Option<serde_json::Value>,
        task: TaskBody,
    ) -> Result<String> {
        let job_id = self.create(job_type, total_items, metadata)?;

        let manager = Arc::clone(self);
        let spawned_id = job_id.clone();
        tokio::spawn(async move {
            manager.drive(spawned_id, job_type, task).await;
        });

        Ok(job_id)
    }

    async fn drive(self: Arc<Self>, job_id: String, job_type: JobType, task: TaskBody) {
        match self.try_start(&job_id) {
            Ok(true) => {}
            Ok(false) => {
                let active = self
                    .active_job(job_type)
                    .map(|j| j.job_id)
                    .unwrap_or_else(|| "unknown".to_string());
                let message = format!("Another {} job is already running: {}", job_type, active);
                if let Err(e) = self.fail(&job_id, &message) {
                    error!("failed to record start conflict for job {}: {}", job_id, e);
                }
                return;
            }
            Err(e) => {
                error!("could not start job {}: {}", job_id, e);
                return;
            }
        }

        let handle = ProgressHandle::new(job_id.clone(), Arc::clone(&self));
        let outcome = std::panic::AssertUnwindSafe(task(handle)).catch_unwind().await;

        let recorded = match outcome {
            Ok(Ok(result)) => self.complete(&job_id, Some(result)),
            Ok(Err(e)) => self.fail(&job_id, &e.to_string()),
            Err(panic) => self.fail(&job_id, &panic_message(panic.as_ref())),
        };
        if let Err(e) = recorded {
            error!("failed to record outcome for job {}: {}", job_id, e);
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("task panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("task panicked: {}", message)
    } else {
        "task panicked".to_string()
    }
}
