//! Correction record shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RecordError;

/// One transcription segment under correction.
///
/// `original_text` is frozen at creation; only `corrected_text` changes
/// afterwards. A locked record is an approved one: its correction is
/// read-only until someone unlocks it again.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionRecord {
    pub id: String,
    /// Where the segment came from, e.g. an audio file name plus offset.
    pub source_reference: String,
    pub original_text: String,
    pub corrected_text: String,
    /// Id of the job that produced this record, when one did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_job_id: Option<String>,
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input shape for appending a record.
///
/// A missing `id` gets a generated one; a missing `corrected_text`
/// starts out equal to the original.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub source_reference: String,
    pub original_text: String,
    #[serde(default)]
    pub corrected_text: Option<String>,
    #[serde(default)]
    pub origin_job_id: Option<String>,
}

impl NewRecord {
    pub(crate) fn validate(&self) -> Result<(), RecordError> {
        if self.source_reference.trim().is_empty() {
            return Err(RecordError::Validation {
                message: "source_reference must not be empty".to_string(),
            });
        }
        if let Some(id) = &self.id {
            if id.trim().is_empty() {
                return Err(RecordError::Validation {
                    message: "record id must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }

    pub(crate) fn into_record(self) -> CorrectionRecord {
        let now = Utc::now();
        let corrected_text = self
            .corrected_text
            .unwrap_or_else(|| self.original_text.clone());
        CorrectionRecord {
            id: self
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            source_reference: self.source_reference,
            original_text: self.original_text,
            corrected_text,
            origin_job_id: self.origin_job_id,
            locked: false,
            locked_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Per-row outcome of a batch import.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
