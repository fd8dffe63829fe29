use std::path::PathBuf;

use thiserror::Error;

/// Failures the playback pipeline knows how to recover from.
///
/// Only `PlayerNotFound` and `Spawn` can end a session as failed, and only
/// when browser fallback is disabled. The rest degrade to warnings.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("no media player found (searched known install paths and `{command}` on PATH)")]
    PlayerNotFound { command: String },

    #[error("failed to start {player}: {reason}")]
    Spawn { player: String, reason: String },

    #[error("control channel unavailable: {0}")]
    ControlChannelUnavailable(String),

    #[error("{} is unreadable ({reason}); starting empty, backup at {}", path.display(), backup.display())]
    PersistenceCorrupt {
        path: PathBuf,
        backup: PathBuf,
        reason: String,
    },

    #[error("failed to write {}: {source}", path.display())]
    PersistenceWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PlaybackError {
    pub fn spawn(player: impl Into<String>, reason: impl ToString) -> Self {
        Self::Spawn {
            player: player.into(),
            reason: reason.to_string(),
        }
    }
}
