//! mpv JSON IPC over a unix socket.
//!
//! mpv is started with `--input-ipc-server=<path>` and owns the listening
//! socket; we connect, subscribe to `time-pos` and `duration`, and read
//! newline-delimited events until the player goes away.

use std::env;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::PlaybackError;

pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_RETRY: Duration = Duration::from_millis(100);

const TIME_POS_OBSERVER: u64 = 1;
const DURATION_OBSERVER: u64 = 2;

/// Latest values reported by the player. Only ever moves to newer values;
/// `null` updates (sent while mpv shuts down) are ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct PlaybackClock {
    pub(crate) position: Option<f64>,
    pub(crate) duration: Option<f64>,
}

impl PlaybackClock {
    pub(crate) fn apply_line(&mut self, line: &str) {
        let Ok(event) = serde_json::from_str::<Value>(line) else {
            debug!(line, "ignoring non-JSON ipc line");
            return;
        };
        if event.get("event").and_then(Value::as_str) != Some("property-change") {
            return;
        }
        let Some(data) = event.get("data").and_then(Value::as_f64) else {
            return;
        };
        if !data.is_finite() || data < 0.0 {
            return;
        }
        match event.get("name").and_then(Value::as_str) {
            Some("time-pos") => self.position = Some(data),
            Some("duration") => self.duration = Some(data),
            _ => {}
        }
    }
}

/// `<temp>/anichi-mpv-<pid>-<nanos>.sock`, unique per session.
pub(crate) fn endpoint_path(dir: &Path) -> PathBuf {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    dir.join(format!("anichi-mpv-{}-{ts}.sock", std::process::id()))
}

pub(crate) fn default_endpoint_dir() -> PathBuf {
    env::temp_dir()
}

pub(crate) fn observe_command(id: u64, property: &str) -> String {
    let mut line = json!({ "command": ["observe_property", id, property] }).to_string();
    line.push('\n');
    line
}

/// Removes the socket file when the session ends, however it ends.
#[derive(Debug)]
pub(crate) struct EndpointGuard {
    path: PathBuf,
}

impl EndpointGuard {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Drop for EndpointGuard {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "ipc endpoint removed"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to remove ipc endpoint")
            }
        }
    }
}

#[derive(Debug)]
pub(crate) struct ControlChannel {
    stream: UnixStream,
}

impl ControlChannel {
    /// Retries until the player opens its socket. Gives up when the
    /// player is gone or `timeout` passes.
    pub(crate) fn connect<F>(
        path: &Path,
        timeout: Duration,
        mut alive: F,
    ) -> Result<Self, PlaybackError>
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            match UnixStream::connect(path) {
                Ok(stream) => {
                    debug!(path = %path.display(), "ipc connected");
                    return Ok(Self { stream });
                }
                Err(err) => {
                    if !alive() {
                        return Err(PlaybackError::ControlChannelUnavailable(format!(
                            "player exited before opening {} ({err})",
                            path.display()
                        )));
                    }
                    if Instant::now() >= deadline {
                        return Err(PlaybackError::ControlChannelUnavailable(format!(
                            "no connection to {} after {}s ({err})",
                            path.display(),
                            timeout.as_secs()
                        )));
                    }
                }
            }
            thread::sleep(CONNECT_RETRY);
        }
    }

    /// Subscribes and reads events until EOF, which is the player exiting.
    pub(crate) fn track(self) -> Result<PlaybackClock, PlaybackError> {
        let mut writer = &self.stream;
        for (id, property) in [(TIME_POS_OBSERVER, "time-pos"), (DURATION_OBSERVER, "duration")] {
            writer
                .write_all(observe_command(id, property).as_bytes())
                .map_err(|err| {
                    PlaybackError::ControlChannelUnavailable(format!(
                        "failed to subscribe to {property}: {err}"
                    ))
                })?;
        }

        let mut clock = PlaybackClock::default();
        for line in BufReader::new(&self.stream).lines() {
            match line {
                Ok(line) => clock.apply_line(&line),
                Err(err) => {
                    debug!(error = %err, "ipc read ended");
                    break;
                }
            }
        }
        Ok(clock)
    }
}
