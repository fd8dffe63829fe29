use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Ledger, LedgerRead, LedgerRecord, LedgerWrite, Lookup, seconds};
use crate::error::PlaybackError;

/// Last known playback offset for one episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ResumeCheckpoint {
    #[serde(alias = "slug")]
    pub(crate) content_id: String,
    #[serde(alias = "episode")]
    pub(crate) episode_number: u32,
    #[serde(alias = "position", deserialize_with = "seconds")]
    pub(crate) position_seconds: u64,
    #[serde(default, alias = "duration", deserialize_with = "seconds")]
    pub(crate) duration_seconds: u64,
    #[serde(default, alias = "animeTitle", skip_serializing_if = "Option::is_none")]
    pub(crate) title: Option<String>,
    #[serde(alias = "timestamp")]
    pub(crate) updated_at: DateTime<Utc>,
}

impl LedgerRecord for ResumeCheckpoint {
    fn key(&self) -> (&str, u32) {
        (&self.content_id, self.episode_number)
    }

    fn stamped_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ResumeStore {
    ledger: Ledger<ResumeCheckpoint>,
}

impl ResumeStore {
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

    pub(crate) fn load(&self) -> LedgerRead<ResumeCheckpoint> {
        self.ledger.load()
    }

    pub(crate) fn get(&self, content_id: &str, episode: u32) -> Lookup<ResumeCheckpoint> {
        self.ledger.load().find(content_id, episode)
    }

    pub(crate) fn upsert(
        &self,
        checkpoint: ResumeCheckpoint,
    ) -> Result<LedgerWrite<ResumeCheckpoint>, PlaybackError> {
        self.ledger.upsert(checkpoint)
    }

    pub(crate) fn remove_one(
        &self,
        content_id: &str,
        episode: u32,
    ) -> Result<LedgerWrite<ResumeCheckpoint>, PlaybackError> {
        self.ledger
            .remove_where(|entry| entry.key() == (content_id, episode))
    }

    pub(crate) fn clear_all(&self) -> Result<bool, PlaybackError> {
        self.ledger.clear()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn saved(content_id: &str, episode: u32, secs: i64) -> ResumeCheckpoint {
        ResumeCheckpoint {
            content_id: content_id.to_string(),
            episode_number: episode,
            position_seconds: 300,
            duration_seconds: 1440,
            title: Some("Show".to_string()),
            updated_at: Utc
                .timestamp_opt(1_700_000_000 + secs, 0)
                .single()
                .expect("valid timestamp"),
        }
    }

    #[test]
    fn remove_one_drops_only_the_matching_episode() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ResumeStore::new(dir.path().join("resume.json"));
        store.upsert(saved("a", 1, 1)).expect("write a1");
        store.upsert(saved("a", 2, 2)).expect("write a2");

        let write = store.remove_one("a", 1).expect("remove");
        assert_eq!(write.dropped.len(), 1);
        assert!(store.get("a", 1).entry.is_none());
        assert!(store.get("a", 2).entry.is_some());

        let missing = store.remove_one("zzz", 9).expect("remove missing");
        assert!(missing.dropped.is_empty());
    }

    #[test]
    fn backdated_write_survives_a_full_ledger() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ResumeStore::with_capacity(dir.path().join("resume.json"), 2);
        store.upsert(saved("a", 1, 10)).expect("write a");
        store.upsert(saved("b", 1, 20)).expect("write b");

        let write = store.upsert(saved("old", 1, 0)).expect("write backdated");

        assert_eq!(write.dropped[0].content_id, "a");
        assert!(store.get("old", 1).entry.is_some());
        assert!(store.get("b", 1).entry.is_some());
    }

    #[test]
    fn clear_all_reports_whether_anything_was_stored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ResumeStore::new(dir.path().join("resume.json"));
        assert!(!store.clear_all().expect("clear empty"));
        store.upsert(saved("a", 1, 1)).expect("write");
        assert!(store.clear_all().expect("clear"));
        assert!(store.load().entries.is_empty());
    }
}
