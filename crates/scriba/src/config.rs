//! Runtime data locations.
//!
//! The workbench keeps everything under one data directory: the job table,
//! the record table and operator exports. The directory comes from
//! `SCRIBA_DATA_DIR` when set, otherwise from the platform-local data dir.

use std::env;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "SCRIBA_DATA_DIR";

const JOBS_FILE: &str = "jobs.json";
const RECORDS_FILE: &str = "records.json";
const EXPORT_DIR: &str = "exports";

/// Resolved data-directory layout.
#[derive(Debug, Clone)]
pub struct DataConfig {
    data_dir: PathBuf,
}

impl DataConfig {
    /// Uses an explicit data directory.
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    /// Resolves the data directory from the environment, falling back to
    /// the platform default (e.g. `~/.local/share/scriba` on Linux).
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Some(dir) = env::var_os(DATA_DIR_ENV) {
            return Ok(Self::new(PathBuf::from(dir)));
        }
        dirs::data_local_dir()
            .map(|base| Self::new(base.join("scriba")))
            .ok_or(ConfigError::NoDataDir)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path of the persisted job table.
    pub fn jobs_file(&self) -> PathBuf {
        self.data_dir.join(JOBS_FILE)
    }

    /// Path of the persisted record table.
    pub fn records_file(&self) -> PathBuf {
        self.data_dir.join(RECORDS_FILE)
    }

    /// Directory operator exports are written to.
    pub fn export_dir(&self) -> PathBuf {
        self.data_dir.join(EXPORT_DIR)
    }

    /// Creates the runtime directories if missing.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        for path in [self.data_dir.clone(), self.export_dir()] {
            std::fs::create_dir_all(&path).map_err(|e| ConfigError::CreateDirectory {
                path: path.clone(),
                source: e,
            })?;
        }
        Ok(())
    }
}
