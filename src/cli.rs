use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "anichi",
    version,
    about = "Stream anime episodes in mpv and pick up where you left off"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Play an episode of a show
    Play(PlayArgs),
    /// Show watch history, newest first
    History {
        #[arg(long)]
        clear: bool,
    },
    /// Inspect or drop saved resume positions
    Resume {
        #[command(subcommand)]
        action: Option<ResumeAction>,
    },
    /// Show or change settings
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Debug, clap::Args)]
pub struct PlayArgs {
    /// Show slug as used by the API
    pub slug: String,
    /// Episode number, or `latest`
    pub episode: String,
    /// Player executable, skips discovery
    #[arg(short, long)]
    pub player: Option<PathBuf>,
    /// Extra player arguments, space separated
    #[arg(short, long, allow_hyphen_values = true)]
    pub args: Option<String>,
    /// Stream URL, skips the API lookup
    #[arg(long)]
    pub url: Option<String>,
    /// Display title, used with --url
    #[arg(long)]
    pub title: Option<String>,
    /// Fail instead of opening the browser when no player works
    #[arg(long)]
    pub no_browser: bool,
}

#[derive(Debug, Subcommand)]
pub enum ResumeAction {
    List,
    Clear,
    Remove { slug: String, episode: u32 },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    Show,
    Set { key: String, value: String },
}
