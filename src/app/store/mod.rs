//! Durable, bounded JSON ledgers.
//!
//! Each ledger is one file holding a JSON array of records, kept in
//! chronological order (oldest first) and keyed by `(content id, episode)`.
//! Loading never fails: unreadable content is moved aside and the ledger
//! starts empty. Writing reports [`PlaybackError::PersistenceWriteFailed`]
//! and leaves the decision to continue with the caller.

mod history;
mod resume;

use std::fs;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::PlaybackError;
use crate::paths::corrupt_backup_path;

pub(crate) use history::{HistoryEntry, HistoryStore};
pub(crate) use resume::{ResumeCheckpoint, ResumeStore};

pub(crate) const LEDGER_CAPACITY: usize = 100;

pub(crate) trait LedgerRecord: Serialize + DeserializeOwned + Clone {
    fn key(&self) -> (&str, u32);
    fn stamped_at(&self) -> DateTime<Utc>;
}

#[derive(Debug)]
pub(crate) struct LedgerRead<T> {
    pub(crate) entries: Vec<T>,
    pub(crate) warnings: Vec<String>,
}

impl<T> Default for LedgerRead<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

impl<T: LedgerRecord> LedgerRead<T> {
    pub(crate) fn find(self, content_id: &str, episode: u32) -> Lookup<T> {
        let entry = self
            .entries
            .into_iter()
            .find(|entry| entry.key() == (content_id, episode));
        Lookup {
            entry,
            warnings: self.warnings,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Lookup<T> {
    pub(crate) entry: Option<T>,
    pub(crate) warnings: Vec<String>,
}

/// Result of a write. `dropped` holds evicted (upsert) or removed records.
#[derive(Debug)]
pub(crate) struct LedgerWrite<T> {
    pub(crate) dropped: Vec<T>,
    pub(crate) warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct Ledger<T> {
    path: PathBuf,
    capacity: usize,
    _record: PhantomData<T>,
}

impl<T: LedgerRecord> Ledger<T> {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self::with_capacity(path, LEDGER_CAPACITY)
    }

    pub(crate) fn with_capacity(path: PathBuf, capacity: usize) -> Self {
        Self {
            path,
            capacity: capacity.max(1),
            _record: PhantomData,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn load(&self) -> LedgerRead<T> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return LedgerRead::default(),
            Err(err) => {
                return LedgerRead {
                    entries: Vec::new(),
                    warnings: vec![format!("failed to read {}: {err}", self.path.display())],
                };
            }
        };
        // Undecodable bytes are corrupt content, not a read failure.
        let raw = match String::from_utf8(bytes) {
            Ok(raw) => raw,
            Err(err) => {
                return LedgerRead {
                    entries: Vec::new(),
                    warnings: self.reset_corrupt(&format!("not valid UTF-8: {err}")),
                };
            }
        };

        if raw.trim().is_empty() {
            let mut warnings = vec![format!("{} was empty, reset", self.path.display())];
            if let Err(err) = fs::remove_file(&self.path) {
                warnings.push(format!("failed to remove {}: {err}", self.path.display()));
            }
            return LedgerRead {
                entries: Vec::new(),
                warnings,
            };
        }

        match parse_records::<T>(&raw) {
            Ok((entries, skipped)) => {
                let mut warnings = Vec::new();
                if skipped > 0 {
                    warnings.push(format!(
                        "ignored {skipped} malformed record(s) in {}",
                        self.path.display()
                    ));
                }
                LedgerRead {
                    entries: normalize(entries),
                    warnings,
                }
            }
            Err(reason) => LedgerRead {
                entries: Vec::new(),
                warnings: self.reset_corrupt(&reason),
            },
        }
    }

    pub(crate) fn save(&self, entries: &[T]) -> Result<(), PlaybackError> {
        let write_failed = |source: io::Error| PlaybackError::PersistenceWriteFailed {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(write_failed)?;
        }
        let body = serde_json::to_string_pretty(entries).map_err(io::Error::other);
        fs::write(&self.path, body.map_err(write_failed)?).map_err(write_failed)?;
        debug!(path = %self.path.display(), entries = entries.len(), "ledger saved");
        Ok(())
    }

    /// Insert or overwrite the record with the same key, keep chronological
    /// order and evict the oldest other record once over capacity.
    pub(crate) fn upsert(&self, record: T) -> Result<LedgerWrite<T>, PlaybackError> {
        let LedgerRead {
            mut entries,
            warnings,
        } = self.load();

        match entries
            .iter()
            .position(|entry| entry.key() == record.key())
        {
            Some(index) => entries[index] = record.clone(),
            None => entries.push(record.clone()),
        }
        entries.sort_by_key(|entry| entry.stamped_at());
        let dropped = evict_overflow(&mut entries, &record, self.capacity);

        self.save(&entries)?;
        Ok(LedgerWrite { dropped, warnings })
    }

    pub(crate) fn remove_where<F>(&self, mut matches: F) -> Result<LedgerWrite<T>, PlaybackError>
    where
        F: FnMut(&T) -> bool,
    {
        let LedgerRead { entries, warnings } = self.load();
        let (dropped, kept): (Vec<T>, Vec<T>) =
            entries.into_iter().partition(|entry| matches(entry));
        if !dropped.is_empty() {
            self.save(&kept)?;
        }
        Ok(LedgerWrite { dropped, warnings })
    }

    /// Returns whether a file was removed.
    pub(crate) fn clear(&self) -> Result<bool, PlaybackError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(PlaybackError::PersistenceWriteFailed {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn reset_corrupt(&self, reason: &str) -> Vec<String> {
        let backup = corrupt_backup_path(&self.path);
        let mut warnings = vec![
            PlaybackError::PersistenceCorrupt {
                path: self.path.clone(),
                backup: backup.clone(),
                reason: reason.to_string(),
            }
            .to_string(),
        ];
        if let Err(err) = fs::rename(&self.path, &backup) {
            warn!(path = %self.path.display(), error = %err, "corrupt ledger backup failed");
            if let Err(err) = fs::remove_file(&self.path) {
                warnings.push(format!("failed to reset {}: {err}", self.path.display()));
            }
        }
        warnings
    }
}

fn parse_records<T: DeserializeOwned>(raw: &str) -> Result<(Vec<T>, usize), String> {
    let value: Value = serde_json::from_str(raw).map_err(|err| err.to_string())?;
    let Value::Array(items) = value else {
        return Err("expected a JSON array".to_string());
    };

    let mut entries = Vec::with_capacity(items.len());
    let mut skipped = 0;
    for item in items {
        match serde_json::from_value::<T>(item) {
            Ok(entry) => entries.push(entry),
            Err(_) => skipped += 1,
        }
    }
    Ok((entries, skipped))
}

/// Chronological order, one record per key (the newest wins).
fn normalize<T: LedgerRecord>(mut entries: Vec<T>) -> Vec<T> {
    entries.sort_by_key(|entry| entry.stamped_at());
    let mut out: Vec<T> = Vec::with_capacity(entries.len());
    for entry in entries {
        match out
            .iter()
            .position(|existing| existing.key() == entry.key())
        {
            Some(index) => {
                out.remove(index);
                out.push(entry);
            }
            None => out.push(entry),
        }
    }
    out
}

fn evict_overflow<T: LedgerRecord>(entries: &mut Vec<T>, written: &T, capacity: usize) -> Vec<T> {
    let mut evicted = Vec::new();
    while entries.len() > capacity {
        // Sorted oldest first, so the first foreign key is the oldest one.
        let Some(index) = entries
            .iter()
            .position(|entry| entry.key() != written.key())
        else {
            break;
        };
        evicted.push(entries.remove(index));
    }
    evicted
}

/// Accepts whole or fractional seconds; fractions are truncated.
fn seconds<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    if !raw.is_finite() || raw < 0.0 {
        return Err(serde::de::Error::custom(format!(
            "invalid seconds value {raw}"
        )));
    }
    Ok(raw.floor() as u64)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0)
            .single()
            .expect("valid timestamp")
    }

    fn checkpoint(content_id: &str, episode: u32, position: u64, secs: i64) -> ResumeCheckpoint {
        ResumeCheckpoint {
            content_id: content_id.to_string(),
            episode_number: episode,
            position_seconds: position,
            duration_seconds: 0,
            title: None,
            updated_at: at(secs),
        }
    }

    #[test]
    fn normalize_keeps_newest_record_per_key() {
        let entries = vec![
            checkpoint("a", 1, 30, 5),
            checkpoint("b", 1, 10, 1),
            checkpoint("a", 1, 90, 9),
            checkpoint("a", 1, 60, 7),
        ];
        let normalized = normalize(entries);
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[0].content_id, "b");
        assert_eq!(normalized[1].position_seconds, 90);
    }

    #[test]
    fn eviction_never_drops_the_record_just_written() {
        let written = checkpoint("new", 1, 20, 0);
        let mut entries = vec![
            written.clone(),
            checkpoint("a", 1, 20, 1),
            checkpoint("b", 1, 20, 2),
        ];
        let evicted = evict_overflow(&mut entries, &written, 2);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].content_id, "a");
        assert!(entries.iter().any(|entry| entry.content_id == "new"));
    }

    #[test]
    fn parse_records_counts_malformed_items() {
        let raw = r#"[
            {"contentId":"a","episodeNumber":1,"positionSeconds":12,"updatedAt":"2024-01-01T00:00:00Z"},
            {"contentId":"b"},
            42
        ]"#;
        let (entries, skipped) = parse_records::<ResumeCheckpoint>(raw).expect("array parses");
        assert_eq!(entries.len(), 1);
        assert_eq!(skipped, 2);
    }

    #[test]
    fn parse_records_rejects_non_arrays() {
        assert!(parse_records::<ResumeCheckpoint>(r#"{"a":1}"#).is_err());
        assert!(parse_records::<ResumeCheckpoint>("[{").is_err());
    }

    #[test]
    fn fractional_seconds_are_truncated() {
        let raw = r#"[{"slug":"a","episode":2,"position":41.9,"duration":1420.5,"timestamp":"2024-01-01T00:00:00Z"}]"#;
        let (entries, skipped) = parse_records::<ResumeCheckpoint>(raw).expect("array parses");
        assert_eq!(skipped, 0);
        assert_eq!(entries[0].position_seconds, 41);
        assert_eq!(entries[0].duration_seconds, 1420);
    }

    #[test]
    fn non_utf8_file_is_backed_up_and_reset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("resume.json");
        let garbage = [0xff, 0xfe, b'[', b']'];
        fs::write(&path, garbage).expect("write garbage");
        let ledger = Ledger::<ResumeCheckpoint>::new(path.clone());

        let read = ledger.load();
        assert!(read.entries.is_empty());
        assert!(read.warnings[0].contains("UTF-8"), "{:?}", read.warnings);
        assert!(!path.exists());
        let backup = dir.path().join("resume.corrupt.json");
        assert_eq!(fs::read(&backup).expect("backup kept"), garbage);

        ledger
            .upsert(checkpoint("a", 1, 20, 0))
            .expect("write after reset");
        assert_eq!(ledger.load().entries.len(), 1);
    }

    #[test]
    fn empty_file_is_removed_and_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("resume.json");
        fs::write(&path, "  \n").expect("write empty file");
        let ledger = Ledger::<ResumeCheckpoint>::new(path.clone());

        let read = ledger.load();
        assert!(read.entries.is_empty());
        assert_eq!(read.warnings.len(), 1);
        assert!(read.warnings[0].contains("was empty"));
        assert!(!path.exists());
        assert!(!dir.path().join("resume.corrupt.json").exists());
    }

    #[test]
    fn non_array_document_is_backed_up_and_reset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("resume.json");
        fs::write(&path, r#"{"a":1}"#).expect("write object");
        let ledger = Ledger::<ResumeCheckpoint>::new(path.clone());

        let read = ledger.load();
        assert!(read.entries.is_empty());
        assert!(read.warnings[0].contains("expected a JSON array"));
        assert!(!path.exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("resume.corrupt.json")).expect("backup kept"),
            r#"{"a":1}"#
        );
        assert!(ledger.load().warnings.is_empty());
    }

    #[test]
    fn save_reports_unwritable_location() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "x").expect("write blocker file");
        let ledger = Ledger::<ResumeCheckpoint>::new(blocker.join("resume.json"));

        let err = ledger
            .save(&[checkpoint("a", 1, 20, 0)])
            .expect_err("parent is a file");
        assert!(matches!(err, PlaybackError::PersistenceWriteFailed { .. }));
    }
}
