//! Append-only conversation record
//!
//! Every finalized exchange lands in a JSON-lines file, one entry per
//! utterance. The record is an audit artifact, not an input: nothing in
//! the pipeline reads it back.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// One recorded utterance
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecordEntry {
    /// When the utterance was recorded
    pub timestamp: DateTime<Utc>,

    /// Caller handle or persona name
    pub speaker: String,

    /// What was said
    pub text: String,
}

/// Append-only JSON-lines conversation log
#[derive(Debug, Clone)]
pub struct ConversationLog {
    path: PathBuf,
}

impl ConversationLog {
    /// Create a handle on the log file path
    #[must_use]
    pub fn new(path: &Path) -> Self {
        Self { path: path.to_path_buf() }
    }

    /// Append one entry
    ///
    /// # Errors
    ///
    /// Returns error on IO or serialization failure.
    pub fn append(&self, speaker: &str, text: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let entry = RecordEntry {
            timestamp: Utc::now(),
            speaker: speaker.to_string(),
            text: text.to_string(),
        };

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_append_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = ConversationLog::new(&dir.path().join("conversation.jsonl"));

        log.append("caller", "warehouse, you copy?").unwrap();
        log.append("warehouse_worker", "Go ahead.").unwrap();

        let raw = std::fs::read_to_string(dir.path().join("conversation.jsonl")).unwrap();
        let entries: Vec<RecordEntry> = raw
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].speaker, "caller");
        assert_eq!(entries[1].speaker, "warehouse_worker");
        assert_eq!(entries[1].text, "Go ahead.");
    }

    #[test]
    fn append_creates_missing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let log = ConversationLog::new(&dir.path().join("logs/deep/conversation.jsonl"));
        log.append("caller", "radio check").unwrap();
        assert!(dir.path().join("logs/deep/conversation.jsonl").exists());
    }
}
