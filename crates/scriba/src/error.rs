use std::path::PathBuf;
use thiserror::Error;

use crate::jobs::types::JobType;

#[derive(Error, Debug)]
pub enum ScribaError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not determine a data directory; set SCRIBA_DATA_DIR")]
    NoDataDir,

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum JobError {
    /// Another job of the same type already holds the running slot.
    /// Carries the active job's id so the caller can inspect or wait on it.
    #[error("Another {job_type} job is already running: {active_job_id}")]
    Conflict {
        job_type: JobType,
        active_job_id: String,
    },

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Invalid job request: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Record {0} is locked and cannot be edited")]
    Locked(String),

    #[error("Invalid record: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Failed to read table '{path}': {source}")]
    ReadTable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse table '{path}': {source}")]
    ParseTable {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize table '{path}': {source}")]
    SerializeTable {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write table '{path}': {source}")]
    WriteTable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to replace table '{path}': {source}")]
    ReplaceTable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write export '{path}': {source}")]
    WriteExport {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ScribaError>;
