mod adapter;
#[cfg(unix)]
mod channel;
mod locator;
mod orchestrator;
mod process;

pub(crate) use adapter::{PositionSource, TrackingMode};
pub(crate) use orchestrator::{
    Finish, MIN_RESUME_POSITION, Orchestrator, PlayRequest, PlaybackOutcome, PlaybackServices,
    parse_player_args,
};
pub(crate) use process::with_sigint_ignored;

#[cfg(test)]
pub(crate) use adapter::ScriptAdapter;
#[cfg(test)]
pub(crate) use locator::PlayerLocator;
#[cfg(test)]
pub(crate) use orchestrator::{BrowserOpener, SessionState, build_launch_args};
#[cfg(test)]
pub(crate) use process::{Launcher, PlayerHandle};
