//! Whole-table persistence with atomic replace.
//!
//! Both the job table and the record table funnel every write through a
//! [`TableStore`], so the backing medium is swappable without touching
//! orchestration logic.

use std::fs;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::PersistenceError;

/// Persistent storage for one table of rows.
///
/// `replace` must be atomic at whole-table granularity: if the process
/// crashes mid-write, the next `load` sees either the previous table or
/// the new one, never a half-written file.
pub trait TableStore<T>: Send + Sync {
    /// Reads the full table. A table that was never written is empty.
    fn load(&self) -> Result<Vec<T>, PersistenceError>;

    /// Replaces the full table atomically.
    fn replace(&self, rows: &[T]) -> Result<(), PersistenceError>;
}

/// [`TableStore`] over a JSON-array file.
///
/// Writes go to a sibling `.tmp` file which is then renamed over the
/// target; `rename` is atomic on a single filesystem, so readers never
/// observe a partial table.
pub struct JsonTableStore<T> {
    path: PathBuf,
    _rows: PhantomData<fn() -> T>,
}

impl<T> JsonTableStore<T> {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            _rows: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl<T> TableStore<T> for JsonTableStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn load(&self) -> Result<Vec<T>, PersistenceError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let bytes = fs::read(&self.path).map_err(|e| PersistenceError::ReadTable {
            path: self.path.clone(),
            source: e,
        })?;
        serde_json::from_slice(&bytes).map_err(|e| PersistenceError::ParseTable {
            path: self.path.clone(),
            source: e,
        })
    }

    fn replace(&self, rows: &[T]) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| PersistenceError::CreateDirectory {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        let json =
            serde_json::to_vec_pretty(rows).map_err(|e| PersistenceError::SerializeTable {
                path: self.path.clone(),
                source: e,
            })?;

        let temp_path = self.temp_path();
        let write_err = |e| PersistenceError::WriteTable {
            path: temp_path.clone(),
            source: e,
        };

        // The temp file must be fully on disk before the rename makes it
        // the table.
        let mut file = fs::File::create(&temp_path).map_err(write_err)?;
        file.write_all(&json).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        drop(file);

        fs::rename(&temp_path, &self.path).map_err(|e| PersistenceError::ReplaceTable {
            path: self.path.clone(),
            source: e,
        })
    }
}
