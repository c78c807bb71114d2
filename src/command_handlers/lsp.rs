use anyhow::{anyhow, Context, Result};
use std::path::Path;

use crate::config::InstallerConfig;
use crate::download::http_client;
use crate::lsp::{DialoguerPrompt, LspAcquisition};
use crate::platform;

/// Prints the language server path for a host to launch. A missing server is
/// not an error: the host runs without one.
pub fn run_lsp(cfg: InstallerConfig, host_config: Option<&Path>) -> Result<()> {
    let target = platform::resolve_current().context("detecting platform")?;
    let client = http_client().context("building HTTP client")?;
    let mut acquisition = LspAcquisition::new(cfg, target, client, DialoguerPrompt);
    if let Some(path) = host_config {
        acquisition = acquisition.with_host_config(path);
    }
    let resolved = acquisition
        .resolve_in_background()
        .join()
        .map_err(|_| anyhow!("language server lookup panicked"))?;
    match resolved {
        Some(path) => println!("{}", path.display()),
        None => eprintln!("sald-lsp unavailable; continuing without language features"),
    }
    Ok(())
}
