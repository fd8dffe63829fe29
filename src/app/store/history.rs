use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Ledger, LedgerRead, LedgerRecord, LedgerWrite};
use crate::error::PlaybackError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HistoryEntry {
    #[serde(alias = "slug")]
    pub(crate) content_id: String,
    #[serde(alias = "episode")]
    pub(crate) episode_number: u32,
    #[serde(default, alias = "animeTitle")]
    pub(crate) title: String,
    #[serde(alias = "timestamp")]
    pub(crate) watched_at: DateTime<Utc>,
}

impl LedgerRecord for HistoryEntry {
    fn key(&self) -> (&str, u32) {
        (&self.content_id, self.episode_number)
    }

    fn stamped_at(&self) -> DateTime<Utc> {
        self.watched_at
    }
}

#[derive(Debug, Clone)]
pub(crate) struct HistoryStore {
    ledger: Ledger<HistoryEntry>,
}

impl HistoryStore {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            ledger: Ledger::new(path),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_capacity(path: PathBuf, capacity: usize) -> Self {
        Self {
            ledger: Ledger::with_capacity(path, capacity),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        self.ledger.path()
    }

    /// Re-watching an episode moves its entry forward instead of duplicating it.
    pub(crate) fn append(
        &self,
        entry: HistoryEntry,
    ) -> Result<LedgerWrite<HistoryEntry>, PlaybackError> {
        self.ledger.upsert(entry)
    }

    /// Newest first.
    pub(crate) fn list(&self) -> LedgerRead<HistoryEntry> {
        let mut read = self.ledger.load();
        read.entries.reverse();
        read
    }

    pub(crate) fn clear(&self) -> Result<bool, PlaybackError> {
        self.ledger.clear()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::TimeZone;

    use super::*;

    fn watched(content_id: &str, episode: u32, secs: i64) -> HistoryEntry {
        HistoryEntry {
            content_id: content_id.to_string(),
            episode_number: episode,
            title: content_id.to_uppercase(),
            watched_at: Utc
                .timestamp_opt(1_700_000_000 + secs, 0)
                .single()
                .expect("valid timestamp"),
        }
    }

    #[test]
    fn list_is_newest_first_and_capped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let history = HistoryStore::with_capacity(dir.path().join("history.json"), 3);
        for (index, slug) in ["a", "b", "c", "d"].iter().enumerate() {
            history
                .append(watched(slug, 1, index as i64))
                .expect("append");
        }

        let slugs: Vec<String> = history
            .list()
            .entries
            .into_iter()
            .map(|entry| entry.content_id)
            .collect();
        assert_eq!(slugs, vec!["d", "c", "b"]);
    }

    #[test]
    fn rewatch_moves_entry_to_the_front() {
        let dir = tempfile::tempdir().expect("tempdir");
        let history = HistoryStore::new(dir.path().join("history.json"));
        history.append(watched("a", 1, 1)).expect("append a");
        history.append(watched("b", 1, 2)).expect("append b");
        history.append(watched("a", 1, 3)).expect("rewatch a");

        let entries = history.list().entries;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content_id, "a");
    }

    #[test]
    fn reads_records_written_with_legacy_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("history.json");
        fs::write(
            &path,
            r#"[{"slug":"frieren","episode":3,"animeTitle":"Frieren","timestamp":"2024-05-01T12:00:00Z"}]"#,
        )
        .expect("write legacy history");

        let read = HistoryStore::new(path).list();
        assert!(read.warnings.is_empty());
        assert_eq!(read.entries[0].content_id, "frieren");
        assert_eq!(read.entries[0].title, "Frieren");
    }

    #[test]
    fn corrupt_history_is_backed_up_and_next_append_writes_a_fresh_array() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("history.json");
        fs::write(&path, "[{\"slug\":").expect("write truncated history");
        let history = HistoryStore::new(path.clone());

        let read = history.list();
        assert!(read.entries.is_empty());
        assert_eq!(read.warnings.len(), 1);
        assert!(dir.path().join("history.corrupt.json").exists());

        history.append(watched("a", 1, 1)).expect("append after reset");
        let raw = fs::read_to_string(&path).expect("history rewritten");
        let parsed: serde_json::Value = serde_json::from_str(&raw).expect("valid JSON");
        assert_eq!(parsed.as_array().map(Vec::len), Some(1));
        assert_eq!(history.list().entries[0].content_id, "a");
    }
}
