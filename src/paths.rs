use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Per-user storage layout. Everything lives under one root directory.
#[derive(Debug, Clone)]
pub struct AppPaths {
    root: PathBuf,
}

impl AppPaths {
    pub fn resolve() -> Result<Self> {
        if let Some(root) = root_from_env(env::var_os("ANICHI_CONFIG_DIR")) {
            return Ok(Self::at(root));
        }
        let base = dirs::config_dir().context("unable to resolve config directory")?;
        Ok(Self::at(base.join("anichi")))
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn resume_file(&self) -> PathBuf {
        self.root.join("resume.json")
    }

    pub fn history_file(&self) -> PathBuf {
        self.root.join("history.json")
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.root.join("scripts")
    }

    pub fn position_cache_dir(&self) -> PathBuf {
        self.root.join("resume-cache")
    }

    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create config directory {}", self.root.display()))
    }
}

fn root_from_env(value: Option<OsString>) -> Option<PathBuf> {
    match value {
        Some(value) if !value.is_empty() => Some(PathBuf::from(value)),
        _ => None,
    }
}

/// `resume.json` -> `resume.corrupt.json`
pub fn corrupt_backup_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "data".to_string());
    path.with_file_name(format!("{stem}.corrupt.json"))
}
