use crate::cli::Commands;
use crate::command_handlers::{install, lsp};
use crate::config::InstallerConfig;
use anyhow::Result;

pub fn dispatch(cmd: Option<Commands>, cfg: InstallerConfig) -> Result<()> {
    match cmd {
        None => install::run_install(&cfg),
        Some(Commands::Lsp { config }) => lsp::run_lsp(cfg, config.as_deref()),
    }
}
