use std::path::Path;
use std::process::{Child, Command as ProcessCommand, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, warn};

use crate::error::PlaybackError;

#[cfg(unix)]
use anyhow::anyhow;
#[cfg(unix)]
use std::os::unix::process::CommandExt;

pub(crate) const SPAWN_GRACE: Duration = Duration::from_millis(1500);
const SPAWN_POLL: Duration = Duration::from_millis(50);

pub(crate) trait Launcher {
    fn launch(&self, player: &Path, args: &[String]) -> Result<PlayerHandle, PlaybackError>;
}

/// Starts the player in its own session with discarded stdio, so it
/// outlives the CLI and never competes for the terminal.
#[derive(Debug, Clone)]
pub(crate) struct ProcessLauncher {
    grace: Duration,
}

impl ProcessLauncher {
    pub(crate) fn new() -> Self {
        Self::with_grace(SPAWN_GRACE)
    }

    pub(crate) fn with_grace(grace: Duration) -> Self {
        Self { grace }
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self, player: &Path, args: &[String]) -> Result<PlayerHandle, PlaybackError> {
        let player_name = player.display().to_string();
        let mut cmd = ProcessCommand::new(player);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        detach(&mut cmd);

        let child = cmd
            .spawn()
            .map_err(|err| PlaybackError::spawn(&player_name, err))?;
        debug!(player = %player_name, pid = child.id(), "player spawned");

        let mut handle = PlayerHandle::from_child(child);
        handle
            .confirm_started(self.grace)
            .map_err(|reason| PlaybackError::spawn(&player_name, reason))?;
        Ok(handle)
    }
}

#[cfg(unix)]
fn detach(cmd: &mut ProcessCommand) {
    unsafe {
        cmd.pre_exec(|| {
            // The session runs under `with_sigint_ignored`; mpv must not inherit that.
            libc::signal(libc::SIGINT, libc::SIG_DFL);
            libc::signal(libc::SIGQUIT, libc::SIG_DFL);
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(windows)]
fn detach(cmd: &mut ProcessCommand) {
    use std::os::windows::process::CommandExt;

    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach(_cmd: &mut ProcessCommand) {}

/// A launched player. Tracks its exit so elapsed wall-clock time can stand
/// in for the playback position when nothing better is available.
#[derive(Debug)]
pub(crate) struct PlayerHandle {
    child: Option<Child>,
    started_at: Instant,
    exited_at: Option<Instant>,
    exit_status: Option<ExitStatus>,
}

impl PlayerHandle {
    pub(crate) fn from_child(child: Child) -> Self {
        Self {
            child: Some(child),
            started_at: Instant::now(),
            exited_at: None,
            exit_status: None,
        }
    }

    /// A session that already ended after `elapsed`.
    #[cfg(test)]
    pub(crate) fn finished_after(elapsed: Duration) -> Self {
        let started_at = Instant::now();
        Self {
            child: None,
            started_at,
            exited_at: Some(started_at + elapsed),
            exit_status: None,
        }
    }

    pub(crate) fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    pub(crate) fn is_running(&mut self) -> bool {
        if self.exited_at.is_some() {
            return false;
        }
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                self.record_exit(status);
                false
            }
            Ok(None) => true,
            Err(err) => {
                warn!(error = %err, "failed to poll player process");
                false
            }
        }
    }

    /// Blocks until the player exits.
    pub(crate) fn wait(&mut self) -> Option<ExitStatus> {
        if self.exited_at.is_some() {
            return self.exit_status;
        }
        let child = self.child.as_mut()?;
        match child.wait() {
            Ok(status) => self.record_exit(status),
            Err(err) => {
                warn!(error = %err, "failed waiting on player process");
                self.exited_at = Some(Instant::now());
            }
        }
        self.exit_status
    }

    /// Spawn to exit, or spawn to now while still running.
    pub(crate) fn elapsed(&self) -> Duration {
        self.exited_at
            .unwrap_or_else(Instant::now)
            .saturating_duration_since(self.started_at)
    }

    /// Stop supervising; the detached player keeps running on its own.
    pub(crate) fn release(mut self) {
        if let Some(child) = self.child.take() {
            debug!(pid = child.id(), "player released");
        }
    }

    /// A player that dies inside the grace window with a failure status
    /// never really started. A clean exit inside the window is a short
    /// session, not a failure.
    fn confirm_started(&mut self, grace: Duration) -> Result<(), String> {
        let deadline = Instant::now() + grace;
        loop {
            if !self.is_running() {
                return match self.exit_status {
                    Some(status) if !status.success() => {
                        Err(format!("player exited immediately ({status})"))
                    }
                    _ => Ok(()),
                };
            }
            if Instant::now() >= deadline {
                return Ok(());
            }
            thread::sleep(SPAWN_POLL);
        }
    }

    fn record_exit(&mut self, status: ExitStatus) {
        debug!(%status, "player exited");
        self.exited_at = Some(Instant::now());
        self.exit_status = Some(status);
    }
}

#[cfg(unix)]
struct ScopedSigaction {
    signum: libc::c_int,
    old_action: libc::sigaction,
}

#[cfg(unix)]
impl ScopedSigaction {
    fn ignore(signum: libc::c_int) -> Result<Self> {
        unsafe {
            let mut new_action: libc::sigaction = std::mem::zeroed();
            new_action.sa_sigaction = libc::SIG_IGN;
            libc::sigemptyset(&mut new_action.sa_mask);
            new_action.sa_flags = 0;

            let mut old_action: libc::sigaction = std::mem::zeroed();
            if libc::sigaction(signum, &new_action, &mut old_action) != 0 {
                return Err(anyhow!("failed to update signal action for {signum}"));
            }

            Ok(Self { signum, old_action })
        }
    }
}

#[cfg(unix)]
impl Drop for ScopedSigaction {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::sigaction(self.signum, &self.old_action, std::ptr::null_mut());
        }
    }
}

/// Ctrl+C while waiting on the player must not skip the resume commit.
#[cfg(unix)]
pub(crate) fn with_sigint_ignored<F, R>(f: F) -> Result<R>
where
    F: FnOnce() -> R,
{
    let _sigint_guard = ScopedSigaction::ignore(libc::SIGINT)?;
    Ok(f())
}

#[cfg(not(unix))]
pub(crate) fn with_sigint_ignored<F, R>(f: F) -> Result<R>
where
    F: FnOnce() -> R,
{
    Ok(f())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn launch_sh(script: &str, grace: Duration) -> Result<PlayerHandle, PlaybackError> {
        let args = vec!["-c".to_string(), script.to_string()];
        ProcessLauncher::with_grace(grace).launch(Path::new("/bin/sh"), &args)
    }

    #[test]
    fn missing_executable_is_a_spawn_error() {
        let err = ProcessLauncher::with_grace(Duration::from_millis(10))
            .launch(Path::new("/nonexistent/anichi/mpv"), &[])
            .expect_err("missing binary must fail");
        assert!(matches!(err, PlaybackError::Spawn { .. }));
    }

    #[test]
    fn immediate_crash_inside_grace_window_is_a_spawn_error() {
        let err = launch_sh("exit 3", Duration::from_secs(2)).expect_err("crash must fail");
        match err {
            PlaybackError::Spawn { reason, .. } => assert!(reason.contains("immediately")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn quick_clean_exit_is_not_a_failure() {
        let mut handle = launch_sh("exit 0", Duration::from_secs(2)).expect("clean exit is fine");
        assert!(!handle.is_running());
        assert!(handle.wait().is_some_and(|status| status.success()));
    }

    #[test]
    fn slow_player_counts_as_started_after_grace() {
        let mut handle =
            launch_sh("sleep 1", Duration::from_millis(100)).expect("still running is fine");
        assert!(handle.is_running());
        assert!(handle.pid().is_some());
        handle.wait();
        assert!(handle.elapsed() >= Duration::from_millis(900));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn player_does_not_inherit_ignored_sigint() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("sigign.txt");
        let script = format!("grep '^SigIgn:' /proc/$$/status > '{}'", out.display());

        let mut handle = with_sigint_ignored(|| launch_sh(&script, Duration::from_secs(2)))
            .expect("sigaction")
            .expect("launch");
        handle.wait();

        let line = std::fs::read_to_string(&out).expect("status line");
        let mask = line.trim().trim_start_matches("SigIgn:").trim();
        let mask = u64::from_str_radix(mask, 16).expect("hex mask");
        let bit = |signal: libc::c_int| 1u64 << (signal - 1);
        assert_eq!(mask & bit(libc::SIGINT), 0, "SIGINT still ignored: {line}");
        assert_eq!(mask & bit(libc::SIGQUIT), 0, "SIGQUIT still ignored: {line}");
    }

    #[test]
    fn finished_handle_reports_fixed_elapsed() {
        let mut handle = PlayerHandle::finished_after(Duration::from_secs(42));
        assert!(!handle.is_running());
        assert_eq!(handle.wait(), None);
        assert_eq!(handle.elapsed().as_secs(), 42);
    }
}
