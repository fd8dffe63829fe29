mod app;
mod cli;
mod config;
mod error;
mod http;
mod paths;
mod ui;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    init_logging();
    let cli = cli::Cli::parse();
    app::run(cli)
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("ANICHI_LOG")
        .unwrap_or_else(|_| EnvFilter::new("anichi=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
