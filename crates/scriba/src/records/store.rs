//! In-memory record table with persistent whole-table flushes.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use log::{info, warn};

use crate::error::{PersistenceError, RecordError, Result};
use crate::records::types::{CorrectionRecord, ImportOutcome, NewRecord};
use crate::storage::TableStore;

struct Inner {
    rows: Vec<CorrectionRecord>,
    /// Maps record id to its position in `rows`.
    index: HashMap<String, usize>,
}

impl Inner {
    fn position(&self, id: &str) -> std::result::Result<usize, RecordError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| RecordError::NotFound(id.to_string()))
    }
}

/// Stores correction records: append, correct, lock and export.
///
/// All mutation goes persist-first: the candidate table is flushed to the
/// backing store before memory is updated, so a failed flush never leaves
/// the two disagreeing.
pub struct RecordStore {
    inner: Mutex<Inner>,
    store: Box<dyn TableStore<CorrectionRecord>>,
}

impl RecordStore {
    /// Opens the store over a persisted record table.
    ///
    /// Rows with a dangling lock timestamp are healed on load; duplicate
    /// ids keep the first occurrence and drop the rest with a warning.
    pub fn open(store: Box<dyn TableStore<CorrectionRecord>>) -> Result<Self> {
        let loaded = store.load()?;
        let mut rows: Vec<CorrectionRecord> = Vec::with_capacity(loaded.len());
        let mut index = HashMap::with_capacity(loaded.len());

        for mut record in loaded {
            if index.contains_key(&record.id) {
                warn!("dropping duplicate record id {} from persisted table", record.id);
                continue;
            }
            if !record.locked && record.locked_at.is_some() {
                warn!("clearing stale lock timestamp on unlocked record {}", record.id);
                record.locked_at = None;
            }
            index.insert(record.id.clone(), rows.len());
            rows.push(record);
        }

        info!("loaded {} correction records", rows.len());
        Ok(Self {
            inner: Mutex::new(Inner { rows, index }),
            store,
        })
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("record table lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Appends one record. The id must be unused.
    pub fn append(&self, new: NewRecord) -> Result<CorrectionRecord> {
        new.validate()?;
        let record = new.into_record();

        let mut inner = self.lock_inner();
        if inner.index.contains_key(&record.id) {
            return Err(RecordError::Validation {
                message: format!("record id {} already exists", record.id),
            }
            .into());
        }

        let mut candidate = inner.rows.clone();
        candidate.push(record.clone());
        self.store.replace(&candidate)?;

        let row_index = inner.rows.len();
        inner.index.insert(record.id.clone(), row_index);
        inner.rows = candidate;
        Ok(record)
    }

    /// Returns all records in table order.
    pub fn load_all(&self) -> Vec<CorrectionRecord> {
        self.lock_inner().rows.clone()
    }

    /// Returns one record by id.
    pub fn get(&self, id: &str) -> Option<CorrectionRecord> {
        let inner = self.lock_inner();
        inner.position(id).ok().map(|i| inner.rows[i].clone())
    }

    /// Replaces the corrected text of an unlocked record.
    pub fn update_correction(&self, id: &str, corrected_text: &str) -> Result<CorrectionRecord> {
        let mut inner = self.lock_inner();
        let position = inner.position(id)?;
        if inner.rows[position].locked {
            return Err(RecordError::Locked(id.to_string()).into());
        }

        let mut candidate = inner.rows.clone();
        candidate[position].corrected_text = corrected_text.to_string();
        candidate[position].updated_at = Utc::now();
        self.store.replace(&candidate)?;

        inner.rows = candidate;
        Ok(inner.rows[position].clone())
    }

    /// Sets a record's lock state.
    ///
    /// Already being in the requested state is not an error and does not
    /// rewrite the lock timestamp.
    pub fn set_locked(&self, id: &str, locked: bool) -> Result<CorrectionRecord> {
        let mut inner = self.lock_inner();
        let position = inner.position(id)?;
        if inner.rows[position].locked == locked {
            return Ok(inner.rows[position].clone());
        }

        let mut candidate = inner.rows.clone();
        let now = Utc::now();
        candidate[position].locked = locked;
        candidate[position].locked_at = if locked { Some(now) } else { None };
        candidate[position].updated_at = now;
        self.store.replace(&candidate)?;

        inner.rows = candidate;
        Ok(inner.rows[position].clone())
    }

    /// Locks a record, marking its correction approved.
    pub fn lock(&self, id: &str) -> Result<CorrectionRecord> {
        self.set_locked(id, true)
    }

    /// Unlocks a record, making its correction editable again.
    pub fn unlock(&self, id: &str) -> Result<CorrectionRecord> {
        self.set_locked(id, false)
    }

    /// Imports a batch of records with one flush at the end.
    ///
    /// Rows that fail validation or collide on id are reported in their
    /// outcome and skipped; the remainder still lands. A persistence
    /// failure fails the whole batch and leaves the table untouched.
    pub fn import_batch(&self, batch: Vec<NewRecord>) -> Result<Vec<ImportOutcome>> {
        let mut inner = self.lock_inner();
        let mut candidate = inner.rows.clone();
        let mut seen: HashMap<String, ()> = HashMap::new();
        let mut outcomes = Vec::with_capacity(batch.len());
        let mut accepted = Vec::new();

        for (index, new) in batch.into_iter().enumerate() {
            if let Err(e) = new.validate() {
                outcomes.push(ImportOutcome {
                    index,
                    id: new.id.clone(),
                    success: false,
                    error: Some(e.to_string()),
                });
                continue;
            }
            let record = new.into_record();
            if inner.index.contains_key(&record.id) || seen.contains_key(&record.id) {
                outcomes.push(ImportOutcome {
                    index,
                    id: Some(record.id.clone()),
                    success: false,
                    error: Some(format!("record id {} already exists", record.id)),
                });
                continue;
            }
            seen.insert(record.id.clone(), ());
            outcomes.push(ImportOutcome {
                index,
                id: Some(record.id.clone()),
                success: true,
                error: None,
            });
            candidate.push(record.clone());
            accepted.push(record);
        }

        if !accepted.is_empty() {
            self.store.replace(&candidate)?;
            for record in accepted {
                let next = inner.rows.len();
                inner.index.insert(record.id.clone(), next);
                inner.rows.push(record);
            }
        }

        Ok(outcomes)
    }

    /// Writes all records to `path` as CSV, atomically.
    ///
    /// Returns the number of data rows written.
    pub fn export_csv(&self, path: &Path) -> Result<usize> {
        let rows = self.load_all();

        let mut out = String::new();
        out.push_str("id,source_reference,original_text,corrected_text,origin_job_id,locked,locked_at\n");
        for record in &rows {
            let fields = [
                record.id.as_str(),
                record.source_reference.as_str(),
                record.original_text.as_str(),
                record.corrected_text.as_str(),
                record.origin_job_id.as_deref().unwrap_or(""),
                if record.locked { "true" } else { "false" },
                &record
                    .locked_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default(),
            ];
            let line: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
            out.push_str(&line.join(","));
            out.push('\n');
        }

        write_atomic(path, out.as_bytes())?;
        info!("exported {} records to {}", rows.len(), path.display());
        Ok(rows.len())
    }
}

/// Quotes a CSV field when it contains a delimiter, quote or newline.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::result::Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
    }

    let mut temp: PathBuf = path.to_path_buf();
    temp.set_extension("tmp");
    let write_err = |e| PersistenceError::WriteExport {
        path: path.to_path_buf(),
        source: e,
    };

    let mut file = fs::File::create(&temp).map_err(write_err)?;
    file.write_all(bytes).map_err(write_err)?;
    file.sync_all().map_err(write_err)?;
    drop(file);

    fs::rename(&temp, path).map_err(write_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScribaError;
    use crate::storage::JsonTableStore;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> RecordStore {
        RecordStore::open(Box::new(JsonTableStore::new(dir.path().join("records.json"))))
            .unwrap()
    }

    fn new_record(source: &str, text: &str) -> NewRecord {
        NewRecord {
            source_reference: source.to_string(),
            original_text: text.to_string(),
            ..NewRecord::default()
        }
    }

    #[test]
    fn test_append_and_load_all() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let a = store.append(new_record("tape1.wav#0", "eerste zin")).unwrap();
        let b = store.append(new_record("tape1.wav#1", "tweede zin")).unwrap();

        let all = store.load_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, a.id);
        assert_eq!(all[1].id, b.id);
        assert_eq!(store.get(&a.id).unwrap().original_text, "eerste zin");
    }

    #[test]
    fn test_append_rejects_duplicate_id() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store
            .append(NewRecord {
                id: Some("rec-1".to_string()),
                ..new_record("tape1.wav#0", "zin")
            })
            .unwrap();

        let duplicate = store.append(NewRecord {
            id: Some("rec-1".to_string()),
            ..new_record("tape1.wav#1", "andere zin")
        });
        assert!(matches!(
            duplicate,
            Err(ScribaError::Record(RecordError::Validation { .. }))
        ));
        assert_eq!(store.load_all().len(), 1);
    }

    #[test]
    fn test_update_correction_keeps_original_text() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let record = store.append(new_record("tape1.wav#0", "hallo werld")).unwrap();
        let updated = store.update_correction(&record.id, "hallo wereld").unwrap();

        assert_eq!(updated.original_text, "hallo werld");
        assert_eq!(updated.corrected_text, "hallo wereld");
        assert!(updated.updated_at >= record.updated_at);
    }

    #[test]
    fn test_locked_record_rejects_correction() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let record = store.append(new_record("tape1.wav#0", "zin")).unwrap();
        store.set_locked(&record.id, true).unwrap();

        let result = store.update_correction(&record.id, "andere zin");
        assert!(matches!(
            result,
            Err(ScribaError::Record(RecordError::Locked(_)))
        ));

        // Unlocking makes it editable again.
        store.set_locked(&record.id, false).unwrap();
        store.update_correction(&record.id, "andere zin").unwrap();
    }

    #[test]
    fn test_lock_is_idempotent_without_timestamp_churn() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let record = store.append(new_record("tape1.wav#0", "zin")).unwrap();
        let first = store.lock(&record.id).unwrap();
        let second = store.lock(&record.id).unwrap();

        assert!(second.locked);
        assert_eq!(first.locked_at, second.locked_at);

        let unlocked = store.unlock(&record.id).unwrap();
        assert!(!unlocked.locked);
        assert!(unlocked.locked_at.is_none());
        // Unlocking twice is equally harmless.
        assert!(!store.unlock(&record.id).unwrap().locked);
    }

    #[test]
    fn test_unknown_record_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        assert!(matches!(
            store.update_correction("missing", "text"),
            Err(ScribaError::Record(RecordError::NotFound(_)))
        ));
        assert!(matches!(
            store.set_locked("missing", true),
            Err(ScribaError::Record(RecordError::NotFound(_)))
        ));
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_import_batch_reports_per_row_outcomes() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .append(NewRecord {
                id: Some("rec-1".to_string()),
                ..new_record("tape1.wav#0", "zin")
            })
            .unwrap();

        let outcomes = store
            .import_batch(vec![
                new_record("tape2.wav#0", "goede zin"),
                NewRecord {
                    id: Some("rec-1".to_string()),
                    ..new_record("tape2.wav#1", "botsing")
                },
                new_record("   ", "lege bron"),
                new_record("tape2.wav#2", "nog een"),
            ])
            .unwrap();

        assert_eq!(outcomes.len(), 4);
        assert!(outcomes[0].success);
        assert!(!outcomes[1].success);
        assert!(outcomes[1].error.as_deref().unwrap().contains("already exists"));
        assert!(!outcomes[2].success);
        assert!(outcomes[3].success);

        // Only the good rows landed, in batch order.
        let all = store.load_all();
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].original_text, "goede zin");
        assert_eq!(all[2].original_text, "nog een");
    }

    #[test]
    fn test_import_batch_rejects_duplicates_within_batch() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let outcomes = store
            .import_batch(vec![
                NewRecord {
                    id: Some("rec-1".to_string()),
                    ..new_record("a.wav", "een")
                },
                NewRecord {
                    id: Some("rec-1".to_string()),
                    ..new_record("b.wav", "twee")
                },
            ])
            .unwrap();

        assert!(outcomes[0].success);
        assert!(!outcomes[1].success);
        assert_eq!(store.load_all().len(), 1);
    }

    #[test]
    fn test_restart_reloads_records_and_heals_stale_locks() {
        let dir = TempDir::new().unwrap();
        let record_id;
        {
            let store = open_store(&dir);
            let record = store.append(new_record("tape1.wav#0", "zin")).unwrap();
            store.set_locked(&record.id, true).unwrap();
            record_id = record.id;
        }

        // Hand-corrupt the table: unlocked row with a leftover timestamp.
        let path = dir.path().join("records.json");
        let text = fs::read_to_string(&path)
            .unwrap()
            .replace("\"locked\": true", "\"locked\": false");
        fs::write(&path, text).unwrap();

        let store = open_store(&dir);
        let record = store.get(&record_id).unwrap();
        assert!(!record.locked);
        assert!(record.locked_at.is_none());
    }

    #[test]
    fn test_export_csv_quotes_awkward_fields() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store
            .append(NewRecord {
                id: Some("rec-1".to_string()),
                ..new_record("tape1.wav#0", "zin met, komma en \"quotes\"")
            })
            .unwrap();

        let export = dir.path().join("exports/records.csv");
        let written = store.export_csv(&export).unwrap();
        assert_eq!(written, 1);

        let csv = fs::read_to_string(&export).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "id,source_reference,original_text,corrected_text,origin_job_id,locked,locked_at"
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("rec-1,tape1.wav#0,"));
        assert!(row.contains("\"zin met, komma en \"\"quotes\"\"\""));
        assert!(row.ends_with(",false,"));
    }
}
