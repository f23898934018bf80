//! Durable transcript queue between the receiver and the transmitter
//!
//! The receiver publishes each transcribed utterance as a JSON file in the
//! pending directory; the orchestrator consumes them in filename order and
//! moves them to the processed directory. Writes go through a temp file
//! and an atomic rename so a reader never sees a partial record, and
//! consumption is an atomic rename so a crash between read and mark costs
//! at most one duplicate processing, never a loss.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// One transcribed utterance awaiting processing
///
/// Immutable once written; transitions are file moves, never in-place edits.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscriptRecord {
    /// Unique record id, so re-processing is detectable
    pub id: Uuid,

    /// Transcribed text
    pub text: String,

    /// When the utterance was captured
    pub timestamp: DateTime<Utc>,

    /// Capture channel the audio came from (e.g. "radio")
    pub source_channel: String,
}

impl TranscriptRecord {
    /// Create a record for text captured now
    #[must_use]
    pub fn new(text: impl Into<String>, source_channel: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            timestamp: Utc::now(),
            source_channel: source_channel.into(),
        }
    }

    /// File name carrying the capture time for ordered consumption
    fn file_name(&self) -> String {
        format!("{}_{}.json", self.timestamp.format("%Y%m%d_%H%M%S%.3f"), self.id)
    }
}

/// Directory-backed transcript queue
#[derive(Debug, Clone)]
pub struct TranscriptStore {
    pending_dir: PathBuf,
    processed_dir: PathBuf,
}

impl TranscriptStore {
    /// Open a store rooted at the given directories, creating them
    ///
    /// # Errors
    ///
    /// Returns error if a directory cannot be created.
    pub fn open(pending_dir: &Path, processed_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(pending_dir)?;
        std::fs::create_dir_all(processed_dir)?;
        Ok(Self {
            pending_dir: pending_dir.to_path_buf(),
            processed_dir: processed_dir.to_path_buf(),
        })
    }

    /// Publish a record (receiver side)
    ///
    /// Writes to a `.tmp` file, then renames into the pending directory.
    ///
    /// # Errors
    ///
    /// Returns error on serialization or IO failure.
    pub async fn write(&self, record: &TranscriptRecord) -> Result<()> {
        let name = record.file_name();
        let tmp = self.pending_dir.join(format!("{name}.tmp"));
        let dest = self.pending_dir.join(&name);

        let body = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &dest).await?;

        tracing::debug!(id = %record.id, path = %dest.display(), "transcript published");
        Ok(())
    }

    /// Read all pending records in filename (capture) order
    ///
    /// Malformed files are an ingestion fault: logged, marked seen, and
    /// excluded from the result. They are never retried.
    ///
    /// # Errors
    ///
    /// Returns error if the pending directory cannot be listed.
    pub async fn poll(&self) -> Result<Vec<TranscriptRecord>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.pending_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                names.push(path);
            }
        }
        names.sort();

        let mut records = Vec::new();
        for path in names {
            match self.read_record(&path).await {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "skipping malformed transcript"
                    );
                    self.move_to_processed(&path).await;
                }
            }
        }
        Ok(records)
    }

    /// Mark a record consumed by moving its file to the processed directory
    ///
    /// Idempotent: a record already marked (or never written) is a no-op,
    /// so crash-recovery replays are harmless.
    pub async fn mark_processed(&self, record: &TranscriptRecord) {
        let path = self.pending_dir.join(record.file_name());
        if path.exists() {
            self.move_to_processed(&path).await;
        }
    }

    async fn read_record(&self, path: &Path) -> Result<TranscriptRecord> {
        let raw = tokio::fs::read_to_string(path).await?;
        serde_json::from_str(&raw)
            .map_err(|e| Error::Ingestion(format!("{}: {e}", path.display())))
    }

    async fn move_to_processed(&self, path: &Path) {
        let Some(name) = path.file_name() else {
            return;
        };
        let dest = self.processed_dir.join(name);
        if let Err(e) = tokio::fs::rename(path, &dest).await {
            tracing::error!(path = %path.display(), error = %e, "failed to archive transcript");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, TranscriptStore) {
        let dir = tempfile::tempdir().unwrap();
        let store =
            TranscriptStore::open(&dir.path().join("pending"), &dir.path().join("processed"))
                .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn write_then_poll_round_trip() {
        let (_dir, store) = store();
        let record = TranscriptRecord::new("Hey Dude, you got your ears on?", "radio");
        store.write(&record).await.unwrap();

        let pending = store.poll().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, record.id);
        assert_eq!(pending[0].text, record.text);
    }

    #[tokio::test]
    async fn records_come_back_in_capture_order() {
        let (_dir, store) = store();
        let mut first = TranscriptRecord::new("first", "radio");
        first.timestamp = Utc::now() - chrono::Duration::seconds(10);
        let second = TranscriptRecord::new("second", "radio");

        // Write newest first; poll order must follow capture time
        store.write(&second).await.unwrap();
        store.write(&first).await.unwrap();

        let pending = store.poll().await.unwrap();
        let texts: Vec<_> = pending.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, ["first", "second"]);
    }

    #[tokio::test]
    async fn mark_processed_removes_from_pending() {
        let (_dir, store) = store();
        let record = TranscriptRecord::new("copy that", "radio");
        store.write(&record).await.unwrap();

        store.mark_processed(&record).await;
        assert!(store.poll().await.unwrap().is_empty());

        // Second mark is a no-op
        store.mark_processed(&record).await;
    }

    #[tokio::test]
    async fn malformed_file_is_archived_not_retried() {
        let (dir, store) = store();
        let bad = dir.path().join("pending").join("19990101_000000.000_junk.json");
        tokio::fs::write(&bad, "{truncated").await.unwrap();

        assert!(store.poll().await.unwrap().is_empty());
        assert!(!bad.exists());

        // Archived under processed, and a second poll stays clean
        assert!(dir
            .path()
            .join("processed")
            .join("19990101_000000.000_junk.json")
            .exists());
        assert!(store.poll().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn temp_files_are_invisible_to_poll() {
        let (dir, store) = store();
        tokio::fs::write(dir.path().join("pending").join("half.json.tmp"), "{")
            .await
            .unwrap();
        assert!(store.poll().await.unwrap().is_empty());
    }
}
