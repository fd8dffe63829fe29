use std::io;
use std::path::PathBuf;

use chrono::Utc;
use tracing::{debug, info};

use super::adapter::{
    PlatformAdapter, PositionReport, PositionSource, TrackingMode, TrackingSession,
    platform_adapter,
};
use super::locator::{PlayerLocator, command_on_path};
use super::process::{Launcher, PlayerHandle, ProcessLauncher};
use crate::app::api::StreamSource;
use crate::app::store::{HistoryEntry, HistoryStore, ResumeCheckpoint, ResumeStore};
use crate::error::PlaybackError;
use crate::paths::AppPaths;

/// Shorter sessions are treated as "opened by mistake" and not checkpointed.
pub(crate) const MIN_RESUME_POSITION: u64 = 10;
pub(crate) const DEFAULT_PLAYER_ARGS: &[&str] = &["--force-window=immediate"];
/// mpv hands streaming URLs to this.
pub(crate) const STREAM_HELPER: &str = "yt-dlp";

pub(crate) trait BrowserOpener {
    fn open_url(&self, url: &str) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SystemBrowser;

impl BrowserOpener for SystemBrowser {
    fn open_url(&self, url: &str) -> io::Result<()> {
        open::that(url)
    }
}

/// Everything a playback session talks to, built once per process.
pub(crate) struct PlaybackServices {
    pub(crate) locator: PlayerLocator,
    pub(crate) launcher: Box<dyn Launcher>,
    pub(crate) adapter: Box<dyn PlatformAdapter>,
    pub(crate) browser: Box<dyn BrowserOpener>,
    pub(crate) resume: ResumeStore,
    pub(crate) history: HistoryStore,
    /// Checked once a player is resolved; `None` skips the check.
    pub(crate) stream_helper: Option<&'static str>,
}

impl PlaybackServices {
    pub(crate) fn init(paths: &AppPaths, tracking: TrackingMode) -> Self {
        Self {
            locator: PlayerLocator::for_current_platform(),
            launcher: Box::new(ProcessLauncher::new()),
            adapter: platform_adapter(tracking, paths),
            browser: Box::new(SystemBrowser),
            resume: ResumeStore::new(paths.resume_file()),
            history: HistoryStore::new(paths.history_file()),
            stream_helper: Some(STREAM_HELPER),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PlayRequest {
    pub(crate) source: StreamSource,
    pub(crate) player_override: Option<PathBuf>,
    pub(crate) player_args: Vec<String>,
    /// Start from and record a resume checkpoint.
    pub(crate) resume: bool,
    pub(crate) browser_fallback: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Finish {
    Success,
    Fallback,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionState {
    Idle,
    PlayerResolved,
    Launching,
    Playing,
    Finished(Finish),
}

#[derive(Debug)]
pub(crate) struct PlaybackOutcome {
    pub(crate) finish: Finish,
    pub(crate) player: Option<PathBuf>,
    pub(crate) launch_args: Vec<String>,
    pub(crate) resumed_from: Option<u64>,
    pub(crate) final_position: Option<u64>,
    pub(crate) position_source: Option<PositionSource>,
    pub(crate) checkpoint_saved: bool,
    pub(crate) history_saved: bool,
    pub(crate) warnings: Vec<String>,
}

impl PlaybackOutcome {
    fn new() -> Self {
        Self {
            finish: Finish::Failed,
            player: None,
            launch_args: Vec::new(),
            resumed_from: None,
            final_position: None,
            position_source: None,
            checkpoint_saved: false,
            history_saved: false,
            warnings: Vec::new(),
        }
    }

    pub(crate) fn success(&self) -> bool {
        self.finish != Finish::Failed
    }
}

/// Drives one session: Idle -> PlayerResolved -> Launching -> Playing ->
/// Finished. Every failure ends in an outcome; nothing propagates.
pub(crate) struct Orchestrator<'a> {
    services: &'a PlaybackServices,
    state: SessionState,
}

impl<'a> Orchestrator<'a> {
    pub(crate) fn new(services: &'a PlaybackServices) -> Self {
        Self {
            services,
            state: SessionState::Idle,
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn play(&mut self, request: &PlayRequest) -> PlaybackOutcome {
        let mut outcome = PlaybackOutcome::new();
        let source = &request.source;

        if source.is_embed() {
            return self.fall_back(
                request,
                "stream is an embedded web player".to_string(),
                outcome,
            );
        }

        let resolved = request
            .player_override
            .clone()
            .or_else(|| self.services.locator.find_player());
        let Some(player) = resolved else {
            let err = PlaybackError::PlayerNotFound {
                command: self.services.locator.command().to_string(),
            };
            return self.fall_back(request, err.to_string(), outcome);
        };
        outcome.player = Some(player.clone());
        self.transition(SessionState::PlayerResolved);
        if let Some(helper) = self.missing_stream_helper() {
            outcome.warnings.push(format!(
                "{helper} not found on PATH; mpv may be unable to open streaming URLs"
            ));
        }

        let checkpoint = if request.resume {
            let lookup = self
                .services
                .resume
                .get(&source.content_id, source.episode_number);
            outcome.warnings.extend(lookup.warnings);
            lookup.entry
        } else {
            None
        };
        let tracking = if request.resume {
            self.prepare_tracking(source, &mut outcome.warnings)
        } else {
            None
        };

        let resume_at = checkpoint.map(|checkpoint| checkpoint.position_seconds);
        let tracking_args = tracking
            .as_ref()
            .map(|session| session.args.as_slice())
            .unwrap_or_default();
        let args = build_launch_args(&request.player_args, resume_at, tracking_args, &source.url);
        outcome.resumed_from = resume_at.filter(|position| *position > 0);
        outcome.launch_args = args.clone();

        self.transition(SessionState::Launching);
        let mut handle = match self.services.launcher.launch(&player, &args) {
            Ok(handle) => handle,
            Err(err) => return self.fall_back(request, err.to_string(), outcome),
        };
        self.transition(SessionState::Playing);
        info!(
            player = %player.display(),
            pid = ?handle.pid(),
            content_id = %source.content_id,
            episode = source.episode_number,
            "playback started"
        );

        if !request.resume {
            handle.release();
            self.record_history(source, &mut outcome);
            return self.finish(Finish::Success, outcome);
        }

        let report = self.observe(tracking, &mut handle);
        debug!(
            position = report.position_seconds,
            source = ?report.source,
            "playback ended"
        );
        outcome.warnings.extend(report.warnings.iter().cloned());
        outcome.final_position = Some(report.position_seconds);
        outcome.position_source = Some(report.source);

        if report.position_seconds > MIN_RESUME_POSITION {
            self.record_checkpoint(source, &report, &mut outcome);
        }
        self.record_history(source, &mut outcome);
        self.finish(Finish::Success, outcome)
    }

    fn missing_stream_helper(&self) -> Option<&'static str> {
        self.services
            .stream_helper
            .filter(|helper| !command_on_path(helper))
    }

    fn prepare_tracking(
        &self,
        source: &StreamSource,
        warnings: &mut Vec<String>,
    ) -> Option<TrackingSession> {
        match self.services.adapter.prepare(source) {
            Ok(session) => {
                debug!(adapter = self.services.adapter.name(), "position tracking prepared");
                Some(session)
            }
            Err(err) => {
                warnings.push(format!("{err}; resume position will be estimated"));
                None
            }
        }
    }

    fn observe(
        &self,
        tracking: Option<TrackingSession>,
        handle: &mut PlayerHandle,
    ) -> PositionReport {
        match tracking {
            Some(session) => self.services.adapter.observe(session, handle),
            None => PositionReport::wall_clock(handle, Vec::new()),
        }
    }

    fn record_checkpoint(
        &self,
        source: &StreamSource,
        report: &PositionReport,
        outcome: &mut PlaybackOutcome,
    ) {
        let checkpoint = ResumeCheckpoint {
            content_id: source.content_id.clone(),
            episode_number: source.episode_number,
            position_seconds: report.position_seconds,
            duration_seconds: report.duration_seconds,
            title: (!source.title.is_empty()).then(|| source.title.clone()),
            updated_at: Utc::now(),
        };
        match self.services.resume.upsert(checkpoint) {
            Ok(write) => {
                outcome.warnings.extend(write.warnings);
                outcome.checkpoint_saved = true;
            }
            Err(err) => outcome.warnings.push(err.to_string()),
        }
    }

    fn record_history(&self, source: &StreamSource, outcome: &mut PlaybackOutcome) {
        let entry = HistoryEntry {
            content_id: source.content_id.clone(),
            episode_number: source.episode_number,
            title: source.title.clone(),
            watched_at: Utc::now(),
        };
        match self.services.history.append(entry) {
            Ok(write) => {
                outcome.warnings.extend(write.warnings);
                outcome.history_saved = true;
            }
            Err(err) => outcome.warnings.push(err.to_string()),
        }
    }

    fn fall_back(
        &mut self,
        request: &PlayRequest,
        reason: String,
        mut outcome: PlaybackOutcome,
    ) -> PlaybackOutcome {
        outcome.warnings.push(reason);
        if !request.browser_fallback {
            return self.finish(Finish::Failed, outcome);
        }

        match self.services.browser.open_url(&request.source.url) {
            Ok(()) => {
                self.record_history(&request.source, &mut outcome);
                self.finish(Finish::Fallback, outcome)
            }
            Err(err) => {
                outcome
                    .warnings
                    .push(format!("failed to open browser: {err}"));
                self.finish(Finish::Failed, outcome)
            }
        }
    }

    fn finish(&mut self, finish: Finish, mut outcome: PlaybackOutcome) -> PlaybackOutcome {
        self.transition(SessionState::Finished(finish));
        outcome.finish = finish;
        outcome
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = ?self.state, to = ?next, "playback state");
        self.state = next;
    }
}

/// Caller arguments (or the default preset), then `--start`, then tracking
/// hooks, then the URL.
pub(crate) fn build_launch_args(
    custom: &[String],
    resume_at: Option<u64>,
    tracking_args: &[String],
    url: &str,
) -> Vec<String> {
    let mut args: Vec<String> = if custom.is_empty() {
        DEFAULT_PLAYER_ARGS.iter().map(|arg| arg.to_string()).collect()
    } else {
        custom.iter().map(|arg| normalize_player_arg(arg)).collect()
    };

    if let Some(position) = resume_at.filter(|position| *position > 0) {
        args.retain(|arg| !arg.starts_with("--start="));
        args.push(format!("--start={position}"));
    }
    args.extend(tracking_args.iter().cloned());
    args.push(url.to_string());
    args
}

/// `fs` -> `--fs`; anything already dashed is kept.
pub(crate) fn normalize_player_arg(arg: &str) -> String {
    if arg.starts_with('-') {
        arg.to_string()
    } else {
        format!("--{arg}")
    }
}

pub(crate) fn parse_player_args(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}
