mod cli;
mod command_handlers;
mod config;
mod download;
mod installer;
mod lsp;
mod path_registrar;
mod platform;
mod progress;
mod receipt;
mod release;

use anyhow::Result;
use clap::Parser;

use crate::cli::Cli;
use crate::config::InstallerConfig;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = InstallerConfig::from_env()?;
    command_handlers::dispatch::dispatch(cli.command, cfg)
}
