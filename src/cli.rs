use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    version,
    name = "sald-install",
    about = "Install the latest sald toolchain (sald, sald-lsp, salad) into ~/.sald/bin"
)]
pub struct Cli {
    /// With no subcommand the full toolchain is installed.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Find the language server, offering to download it when missing.
    /// Prints its path, or nothing when running without one.
    Lsp {
        /// Host settings file (defaults to ~/.sald/config.toml)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}
