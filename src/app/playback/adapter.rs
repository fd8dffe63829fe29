use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::process::PlayerHandle;
use crate::app::api::StreamSource;
use crate::error::PlaybackError;
use crate::paths::AppPaths;

#[cfg(unix)]
use super::channel::{self, ControlChannel, EndpointGuard};
#[cfg(unix)]
use std::time::Duration;

pub(crate) const POSITION_SCRIPT_NAME: &str = "save-position.lua";

const POSITION_SCRIPT: &str = r#"-- Managed by anichi: records the last playback position on shutdown.
local options = require "mp.options"

local opts = { position_file = "" }
options.read_options(opts, "anichi")

local last_pos = nil
local duration = nil

mp.observe_property("time-pos", "number", function(_, value)
    if value then last_pos = value end
end)

mp.observe_property("duration", "number", function(_, value)
    if value then duration = value end
end)

mp.register_event("shutdown", function()
    if opts.position_file == "" or last_pos == nil then return end
    local f = io.open(opts.position_file, "w")
    if f then
        f:write(string.format("%d %d", math.floor(last_pos), math.floor(duration or 0)))
        f:close()
    end
end)
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PositionSource {
    Channel,
    ShutdownScript,
    /// Spawn-to-exit time. Overstates after pauses, understates after stalls.
    WallClock,
}

#[derive(Debug)]
pub(crate) struct PositionReport {
    pub(crate) position_seconds: u64,
    pub(crate) duration_seconds: u64,
    pub(crate) source: PositionSource,
    pub(crate) warnings: Vec<String>,
}

impl PositionReport {
    /// Waits for the player, then falls back to elapsed time.
    pub(crate) fn wall_clock(player: &mut PlayerHandle, warnings: Vec<String>) -> Self {
        player.wait();
        Self {
            position_seconds: player.elapsed().as_secs(),
            duration_seconds: 0,
            source: PositionSource::WallClock,
            warnings,
        }
    }
}

/// Per-session state from [`PlatformAdapter::prepare`]: extra player
/// arguments plus whatever the adapter needs to find the position later.
#[derive(Debug)]
pub(crate) struct TrackingSession {
    pub(crate) args: Vec<String>,
    endpoint: PathBuf,
}

/// How the final playback position comes back from the player.
pub(crate) trait PlatformAdapter {
    fn name(&self) -> &'static str;
    fn prepare(&self, source: &StreamSource) -> Result<TrackingSession, PlaybackError>;
    /// Blocks until the player exits. Never fails; degrades to wall-clock.
    fn observe(&self, session: TrackingSession, player: &mut PlayerHandle) -> PositionReport;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum TrackingMode {
    #[default]
    Auto,
    Socket,
    Script,
}

impl TrackingMode {
    pub(crate) fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "socket" | "ipc" => Some(Self::Socket),
            "script" => Some(Self::Script),
            _ => None,
        }
    }
}

/// Picked once at startup.
pub(crate) fn platform_adapter(mode: TrackingMode, paths: &AppPaths) -> Box<dyn PlatformAdapter> {
    match mode {
        TrackingMode::Script => Box::new(ScriptAdapter::new(paths)),
        TrackingMode::Auto | TrackingMode::Socket => native_adapter(paths),
    }
}

#[cfg(unix)]
fn native_adapter(_paths: &AppPaths) -> Box<dyn PlatformAdapter> {
    Box::new(SocketAdapter::new(channel::default_endpoint_dir()))
}

#[cfg(not(unix))]
fn native_adapter(paths: &AppPaths) -> Box<dyn PlatformAdapter> {
    Box::new(ScriptAdapter::new(paths))
}

#[cfg(unix)]
#[derive(Debug, Clone)]
pub(crate) struct SocketAdapter {
    endpoint_dir: PathBuf,
    connect_timeout: Duration,
}

#[cfg(unix)]
impl SocketAdapter {
    pub(crate) fn new(endpoint_dir: PathBuf) -> Self {
        Self {
            endpoint_dir,
            connect_timeout: channel::CONNECT_TIMEOUT,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[cfg(unix)]
impl PlatformAdapter for SocketAdapter {
    fn name(&self) -> &'static str {
        "ipc-socket"
    }

    fn prepare(&self, _source: &StreamSource) -> Result<TrackingSession, PlaybackError> {
        let endpoint = channel::endpoint_path(&self.endpoint_dir);
        Ok(TrackingSession {
            args: vec![format!("--input-ipc-server={}", endpoint.display())],
            endpoint,
        })
    }

    fn observe(&self, session: TrackingSession, player: &mut PlayerHandle) -> PositionReport {
        let _guard = EndpointGuard::new(session.endpoint.clone());
        let connected = ControlChannel::connect(&session.endpoint, self.connect_timeout, || {
            player.is_running()
        });
        let tracked = connected.and_then(ControlChannel::track);
        match tracked {
            Ok(clock) => {
                player.wait();
                match clock.position {
                    Some(position) => PositionReport {
                        position_seconds: position.floor() as u64,
                        duration_seconds: clock.duration.map(|d| d.floor() as u64).unwrap_or(0),
                        source: PositionSource::Channel,
                        warnings: Vec::new(),
                    },
                    None => PositionReport::wall_clock(
                        player,
                        vec!["player reported no position; using elapsed time".to_string()],
                    ),
                }
            }
            Err(err) => PositionReport::wall_clock(
                player,
                vec![format!("{err}; using elapsed time")],
            ),
        }
    }
}

/// For players without a usable socket: an mpv script writes the position
/// to a file on shutdown, read and deleted right after exit.
#[derive(Debug, Clone)]
pub(crate) struct ScriptAdapter {
    scripts_dir: PathBuf,
    cache_dir: PathBuf,
}

impl ScriptAdapter {
    pub(crate) fn new(paths: &AppPaths) -> Self {
        Self {
            scripts_dir: paths.scripts_dir(),
            cache_dir: paths.position_cache_dir(),
        }
    }

    pub(crate) fn script_path(&self) -> PathBuf {
        self.scripts_dir.join(POSITION_SCRIPT_NAME)
    }

    pub(crate) fn position_file(&self, source: &StreamSource) -> PathBuf {
        self.cache_dir.join(format!(
            "{}_{}.txt",
            file_safe(&source.content_id),
            source.episode_number
        ))
    }

    /// Writes the script when missing or out of date.
    fn ensure_script(&self) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.scripts_dir)?;
        fs::create_dir_all(&self.cache_dir)?;
        let path = self.script_path();
        let current = fs::read_to_string(&path).ok();
        if current.as_deref() != Some(POSITION_SCRIPT) {
            fs::write(&path, POSITION_SCRIPT)?;
            debug!(path = %path.display(), "position script installed");
        }
        Ok(path)
    }
}

impl PlatformAdapter for ScriptAdapter {
    fn name(&self) -> &'static str {
        "shutdown-script"
    }

    fn prepare(&self, source: &StreamSource) -> Result<TrackingSession, PlaybackError> {
        let script = self.ensure_script().map_err(|err| {
            PlaybackError::ControlChannelUnavailable(format!(
                "failed to install {}: {err}",
                self.script_path().display()
            ))
        })?;
        let endpoint = self.position_file(source);
        remove_if_present(&endpoint);

        Ok(TrackingSession {
            args: vec![
                format!("--script={}", script.display()),
                format!(
                    "--script-opts=anichi-position_file={}",
                    quote_opt_value(&endpoint.display().to_string())
                ),
                format!(
                    "--force-media-title={} - Episode {}",
                    source.title, source.episode_number
                ),
            ],
            endpoint,
        })
    }

    fn observe(&self, session: TrackingSession, player: &mut PlayerHandle) -> PositionReport {
        player.wait();
        let raw = fs::read_to_string(&session.endpoint);
        remove_if_present(&session.endpoint);

        match raw.ok().as_deref().and_then(parse_position_file) {
            Some((position_seconds, duration_seconds)) => PositionReport {
                position_seconds,
                duration_seconds,
                source: PositionSource::ShutdownScript,
                warnings: Vec::new(),
            },
            None => PositionReport::wall_clock(
                player,
                vec!["shutdown script left no position; using elapsed time".to_string()],
            ),
        }
    }
}

/// mpv's `%<bytes>%` form, so commas or `=` in the path cannot split the
/// key-value list.
pub(crate) fn quote_opt_value(value: &str) -> String {
    format!("%{}%{value}", value.len())
}

/// `"<position> [duration]"`, whole or fractional seconds.
pub(crate) fn parse_position_file(raw: &str) -> Option<(u64, u64)> {
    let mut parts = raw.split_whitespace();
    let position = parse_seconds(parts.next()?)?;
    let duration = parts.next().and_then(parse_seconds).unwrap_or(0);
    Some((position, duration))
}

fn parse_seconds(raw: &str) -> Option<u64> {
    let value = raw.parse::<f64>().ok()?;
    (value.is_finite() && value >= 0.0).then(|| value.floor() as u64)
}

fn file_safe(raw: &str) -> String {
    raw.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

fn remove_if_present(path: &Path) {
    if let Err(err) = fs::remove_file(path)
        && err.kind() != io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %err, "failed to remove position file");
    }
}
