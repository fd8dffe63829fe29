mod api;
mod playback;
mod store;


use anyhow::{Result, anyhow, bail};

use crate::cli::{Cli, Command, ConfigAction, PlayArgs, ResumeAction};
use crate::config::AppConfig;
use crate::paths::AppPaths;
use crate::ui;

use self::api::{ApiClient, EpisodeSelector, StreamSource};
use self::playback::{
    Finish, MIN_RESUME_POSITION, Orchestrator, PlayRequest, PlaybackOutcome, PlaybackServices,
    PositionSource, parse_player_args, with_sigint_ignored,
};
use self::store::{HistoryStore, ResumeStore};

pub(crate) use self::playback::TrackingMode;

pub fn run(cli: Cli) -> Result<()> {
    let paths = AppPaths::resolve()?;

    match cli.command {
        Command::Play(args) => run_play(&paths, args),
        Command::History { clear } => run_history(&paths, clear),
        Command::Resume { action } => run_resume(&paths, action.unwrap_or(ResumeAction::List)),
        Command::Config { action } => run_config(&paths, action.unwrap_or(ConfigAction::Show)),
    }
}

fn run_play(paths: &AppPaths, args: PlayArgs) -> Result<()> {
    paths.ensure_root()?;
    let read = AppConfig::load(&paths.config_file());
    ui::emit_warnings(&read.warnings);
    let config = read.config;

    let selector = EpisodeSelector::parse(&args.episode)?;
    let source = resolve_source(&args, selector)?;
    ui::info(&format!(
        "{} - Episode {}",
        display_title(&source),
        source.episode_number
    ));

    let (tracking, tracking_warning) = config.tracking_mode();
    if let Some(warning) = tracking_warning {
        ui::warn(&warning);
    }

    let player_args = args
        .args
        .as_deref()
        .or(config.player_args.as_deref())
        .map(parse_player_args)
        .unwrap_or_default();
    let request = PlayRequest {
        source,
        player_override: args.player.clone().or_else(|| config.player_path()),
        player_args,
        resume: config.resume,
        browser_fallback: config.browser_fallback && !args.no_browser,
    };

    let services = PlaybackServices::init(paths, tracking);
    let outcome = with_sigint_ignored(|| Orchestrator::new(&services).play(&request))?;
    report_outcome(&request, &outcome);

    if !outcome.success() {
        bail!("playback failed");
    }
    Ok(())
}

fn resolve_source(args: &PlayArgs, selector: EpisodeSelector) -> Result<StreamSource> {
    let Some(url) = args.url.as_deref() else {
        return ApiClient::from_env().resolve_stream(&args.slug, selector);
    };
    let EpisodeSelector::Number(episode_number) = selector else {
        return Err(anyhow!("--url needs an explicit episode number"));
    };
    Ok(StreamSource {
        url: url.trim().to_string(),
        content_id: args.slug.clone(),
        episode_number,
        title: args.title.clone().unwrap_or_default(),
    })
}

fn report_outcome(request: &PlayRequest, outcome: &PlaybackOutcome) {
    ui::emit_warnings(&outcome.warnings);

    match outcome.finish {
        Finish::Failed => {
            ui::error("No player could be started and the browser fallback is off or failed.");
            return;
        }
        Finish::Fallback => {
            ui::info(&format!("Opened {} in the browser", request.source.url));
        }
        Finish::Success => {
            if let Some(player) = &outcome.player {
                ui::muted(&format!("player: {}", player.display()));
            }
            if let Some(start) = outcome.resumed_from {
                ui::info(&format!("Resumed at {}", ui::format_position(start)));
            }
            match outcome.final_position {
                Some(position) => {
                    let note = match outcome.position_source {
                        Some(PositionSource::WallClock) => " (estimated from elapsed time)",
                        _ => "",
                    };
                    ui::success(&format!(
                        "Stopped at {}{note}",
                        ui::format_position(position)
                    ));
                    if outcome.checkpoint_saved {
                        ui::success("Resume point saved");
                    } else if position <= MIN_RESUME_POSITION {
                        ui::muted("Too short to save a resume point");
                    }
                }
                None => ui::success("Player started"),
            }
        }
    }

    if outcome.history_saved {
        ui::muted("Added to history");
    }
}

fn run_history(paths: &AppPaths, clear: bool) -> Result<()> {
    let history = HistoryStore::new(paths.history_file());
    if clear {
        if history.clear()? {
            ui::success("History cleared");
        } else {
            ui::muted(&format!("History is already empty ({})", history.path().display()));
        }
        return Ok(());
    }

    let read = history.list();
    ui::emit_warnings(&read.warnings);
    if read.entries.is_empty() {
        println!("No history yet. Run `anichi play <slug> <episode>` first.");
        return Ok(());
    }

    println!("{:<28} {:<36} {:<6} {:<16}", "SLUG", "TITLE", "EP", "WATCHED");
    for entry in read.entries {
        println!(
            "{:<28} {:<36} {:<6} {:<16}",
            ui::truncate(&entry.content_id, 28),
            ui::truncate(&entry.title, 36),
            entry.episode_number,
            ui::format_local_time(&entry.watched_at)
        );
    }
    Ok(())
}

fn run_resume(paths: &AppPaths, action: ResumeAction) -> Result<()> {
    let resume = ResumeStore::new(paths.resume_file());
    match action {
        ResumeAction::List => {
            let mut read = resume.load();
            ui::emit_warnings(&read.warnings);
            if read.entries.is_empty() {
                println!("No saved resume points.");
                return Ok(());
            }
            read.entries.reverse();

            println!(
                "{:<28} {:<6} {:<18} {:<16}",
                "SLUG", "EP", "POSITION", "UPDATED"
            );
            for entry in read.entries {
                let position = match entry.duration_seconds {
                    0 => ui::format_position(entry.position_seconds),
                    total => format!(
                        "{} / {}",
                        ui::format_position(entry.position_seconds),
                        ui::format_position(total)
                    ),
                };
                println!(
                    "{:<28} {:<6} {:<18} {:<16}",
                    ui::truncate(&entry.content_id, 28),
                    entry.episode_number,
                    position,
                    ui::format_local_time(&entry.updated_at)
                );
            }
        }
        ResumeAction::Clear => {
            if resume.clear_all()? {
                ui::success("Resume points cleared");
            } else {
                ui::muted("No saved resume points");
            }
        }
        ResumeAction::Remove { slug, episode } => {
            let write = resume.remove_one(&slug, episode)?;
            ui::emit_warnings(&write.warnings);
            if write.dropped.is_empty() {
                ui::muted(&format!("No resume point for {slug} episode {episode}"));
            } else {
                ui::success(&format!("Removed resume point for {slug} episode {episode}"));
            }
        }
    }
    Ok(())
}

fn run_config(paths: &AppPaths, action: ConfigAction) -> Result<()> {
    let path = paths.config_file();
    let read = AppConfig::load(&path);
    ui::emit_warnings(&read.warnings);
    let mut config = read.config;

    match action {
        ConfigAction::Show => {
            ui::muted(&path.display().to_string());
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save(&path)?;
            ui::success(&format!("Saved {key}"));
        }
    }
    Ok(())
}

fn display_title(source: &StreamSource) -> &str {
    if source.title.is_empty() {
        &source.content_id
    } else {
        &source.title
    }
}
