//! Scriba: a workbench for correcting automatic speech-recognition
//! transcripts.
//!
//! Two pieces work together. The job orchestrator runs background work
//! (batch transcription, manual imports) with at most one running job per
//! type, live progress reporting and status that survives restarts. The
//! record store holds the transcription segments under correction, with
//! per-record locking for approved text and atomic persistence.
//!
//! [`api::Workbench`] ties both to one data directory and is the intended
//! entry point for a UI or HTTP layer.

pub mod api;
pub mod config;
pub mod error;
pub mod jobs;
pub mod logging;
pub mod records;
pub mod storage;

pub use api::Workbench;
pub use config::DataConfig;
pub use error::{Result, ScribaError};
pub use jobs::{Job, JobManager, JobStatus, JobType};
pub use records::{CorrectionRecord, RecordStore};
