use std::env;
use std::path::{Path, PathBuf};

#[cfg(windows)]
pub(crate) const PLAYER_COMMAND: &str = "mpv.exe";
#[cfg(not(windows))]
pub(crate) const PLAYER_COMMAND: &str = "mpv";

/// Finds an installed mpv: well-known install paths first, then PATH.
#[derive(Debug, Clone)]
pub(crate) struct PlayerLocator {
    candidates: Vec<PathBuf>,
    command: String,
}

impl PlayerLocator {
    pub(crate) fn for_current_platform() -> Self {
        let home = dirs::home_dir();
        Self::new(
            install_paths_for(env::consts::OS, home.as_deref()),
            PLAYER_COMMAND,
        )
    }

    pub(crate) fn new(candidates: Vec<PathBuf>, command: impl Into<String>) -> Self {
        Self {
            candidates,
            command: command.into(),
        }
    }

    pub(crate) fn command(&self) -> &str {
        &self.command
    }

    /// `None` is a normal answer: the player is simply not installed.
    pub(crate) fn find_player(&self) -> Option<PathBuf> {
        if let Some(found) = self.candidates.iter().find(|path| path.is_file()) {
            return Some(found.clone());
        }
        command_on_path(&self.command).then(|| PathBuf::from(&self.command))
    }
}

pub(crate) fn command_on_path(command: &str) -> bool {
    which::which(command).is_ok()
}

pub(crate) fn install_paths_for(os: &str, home: Option<&Path>) -> Vec<PathBuf> {
    let in_home = |parts: &[&str]| {
        home.map(|home| parts.iter().fold(home.to_path_buf(), |path, part| path.join(part)))
    };

    match os {
        "windows" => [
            in_home(&["scoop", "apps", "mpv", "current", "mpv.exe"]),
            Some(PathBuf::from(r"C:\Program Files\mpv\mpv.exe")),
            Some(PathBuf::from(r"C:\Program Files (x86)\mpv\mpv.exe")),
            Some(PathBuf::from(
                r"C:\ProgramData\chocolatey\lib\mpvio.install\tools\mpv.exe",
            )),
            Some(PathBuf::from(r"C:\ProgramData\chocolatey\bin\mpv.exe")),
            in_home(&["AppData", "Local", "Programs", "mpv", "mpv.exe"]),
            Some(PathBuf::from(r"C:\mpv\mpv.exe")),
        ]
        .into_iter()
        .flatten()
        .collect(),
        "macos" => [
            Some(PathBuf::from("/usr/local/bin/mpv")),
            Some(PathBuf::from("/opt/homebrew/bin/mpv")),
            Some(PathBuf::from("/opt/local/bin/mpv")),
            Some(PathBuf::from("/Applications/mpv.app/Contents/MacOS/mpv")),
            in_home(&["Applications", "mpv.app", "Contents", "MacOS", "mpv"]),
        ]
        .into_iter()
        .flatten()
        .collect(),
        "linux" => vec![
            PathBuf::from("/snap/bin/mpv"),
            PathBuf::from("/var/lib/flatpak/exports/bin/io.github.mpv.mpv"),
            PathBuf::from("/usr/bin/mpv"),
            PathBuf::from("/usr/local/bin/mpv"),
        ],
        _ => Vec::new(),
    }
}
