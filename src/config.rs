use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::app::TrackingMode;
use crate::paths::corrupt_backup_path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default, alias = "playerPath", skip_serializing_if = "Option::is_none")]
    pub player: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_args: Option<String>,
    #[serde(default = "enabled")]
    pub resume: bool,
    #[serde(default = "enabled")]
    pub browser_fallback: bool,
    /// `auto`, `socket` or `script`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking: Option<String>,
}

fn enabled() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            player: None,
            player_args: None,
            resume: true,
            browser_fallback: true,
            tracking: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct ConfigRead {
    pub config: AppConfig,
    pub warnings: Vec<String>,
}

impl AppConfig {
    /// Missing file means defaults. A malformed file is moved aside and
    /// replaced with `{}` so the next run starts clean.
    pub fn load(path: &Path) -> ConfigRead {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return ConfigRead::default(),
            Err(err) => {
                return ConfigRead {
                    config: AppConfig::default(),
                    warnings: vec![format!("failed to read {}: {err}", path.display())],
                };
            }
        };

        let parsed = String::from_utf8(bytes)
            .map_err(|err| format!("not valid UTF-8: {err}"))
            .and_then(|raw| parse_config(&raw));
        match parsed {
            Ok(config) => ConfigRead {
                config,
                warnings: Vec::new(),
            },
            Err(reason) => {
                let mut warnings = vec![format!(
                    "corrupt config file {} ({reason}); using defaults",
                    path.display()
                )];
                if let Err(err) = reset_corrupt(path) {
                    warnings.push(format!("{err:#}"));
                }
                ConfigRead {
                    config: AppConfig::default(),
                    warnings,
                }
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let body = serde_json::to_string_pretty(self).context("failed to encode config")?;
        fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "player" | "playerPath" => self.player = non_empty(value),
            "playerArgs" => self.player_args = non_empty(value),
            "resume" => self.resume = parse_bool(value)?,
            "browserFallback" => self.browser_fallback = parse_bool(value)?,
            "tracking" => {
                let mode = value.trim().to_ascii_lowercase();
                if TrackingMode::parse(&mode).is_none() {
                    return Err(anyhow!("expected auto, socket or script, got `{mode}`"));
                }
                self.tracking = Some(mode);
            }
            other => {
                return Err(anyhow!(
                    "unknown config key `{other}` (expected player, playerArgs, resume, browserFallback, tracking)"
                ));
            }
        }
        Ok(())
    }

    pub fn player_path(&self) -> Option<PathBuf> {
        self.player.as_deref().map(PathBuf::from)
    }

    /// Unknown values fall back to `auto` with a warning.
    pub fn tracking_mode(&self) -> (TrackingMode, Option<String>) {
        match self.tracking.as_deref() {
            None => (TrackingMode::Auto, None),
            Some(raw) => match TrackingMode::parse(raw) {
                Some(mode) => (mode, None),
                None => (
                    TrackingMode::Auto,
                    Some(format!("unknown tracking mode `{raw}`; using auto")),
                ),
            },
        }
    }
}

fn parse_config(raw: &str) -> Result<AppConfig, String> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|err| err.to_string())?;
    if !value.is_object() {
        return Err("expected a JSON object".to_string());
    }
    serde_json::from_value(value).map_err(|err| err.to_string())
}

fn reset_corrupt(path: &Path) -> Result<()> {
    let backup = corrupt_backup_path(path);
    fs::rename(path, &backup).with_context(|| {
        format!(
            "failed to move corrupt config {} to {}",
            path.display(),
            backup.display()
        )
    })?;
    fs::write(path, "{}").with_context(|| format!("failed to reset {}", path.display()))
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => Err(anyhow!("expected true/false, got `{other}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults_without_warnings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let read = AppConfig::load(&dir.path().join("config.json"));
        assert_eq!(read.config, AppConfig::default());
        assert!(read.warnings.is_empty());
    }

    #[test]
    fn accepts_legacy_player_path_key() {
        let config = parse_config(r#"{"playerPath":"/opt/mpv/mpv","playerArgs":"fs"}"#)
            .expect("config should parse");
        assert_eq!(config.player.as_deref(), Some("/opt/mpv/mpv"));
        assert_eq!(config.player_args.as_deref(), Some("fs"));
        assert!(config.resume);
        assert!(config.browser_fallback);
    }

    #[test]
    fn corrupt_file_is_backed_up_and_reset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").expect("write corrupt config");

        let read = AppConfig::load(&path);

        assert_eq!(read.config, AppConfig::default());
        assert_eq!(read.warnings.len(), 1, "warnings: {:?}", read.warnings);
        assert_eq!(fs::read_to_string(&path).expect("reset config"), "{}");
        let backup = dir.path().join("config.corrupt.json");
        assert_eq!(
            fs::read_to_string(backup).expect("backup kept"),
            "{ not json"
        );
    }

    #[test]
    fn non_utf8_config_is_backed_up_and_reset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(&path, [0xff, b'{', b'}']).expect("write garbage");

        let read = AppConfig::load(&path);

        assert_eq!(read.config, AppConfig::default());
        assert!(read.warnings[0].contains("UTF-8"), "{:?}", read.warnings);
        assert_eq!(fs::read_to_string(&path).expect("reset config"), "{}");
        assert!(dir.path().join("config.corrupt.json").exists());
    }

    #[test]
    fn non_object_config_counts_as_corrupt() {
        assert!(parse_config("[1, 2]").is_err());
        assert!(parse_config("null").is_err());
    }

    #[test]
    fn set_rejects_unknown_keys_and_bad_bools() {
        let mut config = AppConfig::default();
        config.set("resume", "off").expect("valid bool");
        assert!(!config.resume);
        config.set("player", "  ").expect("empty clears");
        assert_eq!(config.player, None);
        assert!(config.set("resume", "maybe").is_err());
        assert!(config.set("volume", "50").is_err());
    }

    #[test]
    fn tracking_mode_is_validated_on_set_and_tolerated_on_load() {
        let mut config = AppConfig::default();
        config.set("tracking", "Script").expect("known mode");
        assert_eq!(config.tracking.as_deref(), Some("script"));
        assert_eq!(config.tracking_mode(), (TrackingMode::Script, None));
        assert!(config.set("tracking", "dbus").is_err());

        let hand_edited = parse_config(r#"{"tracking":"dbus"}"#).expect("config should parse");
        let (mode, warning) = hand_edited.tracking_mode();
        assert_eq!(mode, TrackingMode::Auto);
        assert!(warning.is_some());
    }
}
