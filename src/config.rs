use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::platform::platform;

pub const PRODUCT: &str = "sald";
pub const DEFAULT_REPO: (&str, &str) = ("sald-lang", "sald");
pub const DEFAULT_API_BASE: &str = "https://api.github.com";
/// Installed in this order; `sald-lsp` doubles as the LSP variant's asset.
pub const LOGICAL_ASSETS: [&str; 3] = ["sald", "sald-lsp", "salad"];
pub const LSP_ASSET: &str = "sald-lsp";
/// Size assumed for an asset the release metadata does not list.
pub const FALLBACK_ASSET_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct InstallerConfig {
    pub product: String,
    pub owner: String,
    pub repo: String,
    pub api_base: String,
    pub release_base: String,
    pub install_root: PathBuf,
    pub assets: Vec<String>,
    pub sample_interval: Duration,
    pub fallback_size: u64,
    pub modify_path: bool,
    pub api_token: Option<String>,
}

impl InstallerConfig {
    /// Defaults for `home`, before any environment overrides.
    pub fn defaults(home: &Path) -> Self {
        let (owner, repo) = DEFAULT_REPO;
        InstallerConfig {
            product: PRODUCT.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            release_base: default_release_base(owner, repo),
            install_root: home.join(format!(".{PRODUCT}")),
            assets: LOGICAL_ASSETS.iter().map(|s| s.to_string()).collect(),
            sample_interval: Duration::from_millis(100),
            fallback_size: FALLBACK_ASSET_SIZE,
            modify_path: true,
            api_token: None,
        }
    }

    pub fn from_env() -> Result<Self> {
        let home = platform()
            .home_dir()
            .ok_or_else(|| anyhow!("could not determine the home directory"))?;
        Self::defaults(&home).with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies `SALD_*` overrides looked up through `var`.
    pub fn with_overrides<F>(mut self, var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| var(key).filter(|v| !v.trim().is_empty());
        let mut release_base_set = false;
        if let Some(root) = lookup("SALD_INSTALL_ROOT") {
            self.install_root = absolute_root(PathBuf::from(root.trim()))?;
        }
        if let Some(spec) = lookup("SALD_REPO") {
            let (owner, repo) = spec
                .trim()
                .split_once('/')
                .filter(|(o, r)| !o.is_empty() && !r.is_empty() && !r.contains('/'))
                .ok_or_else(|| anyhow!("SALD_REPO must look like 'owner/repo', got '{spec}'"))?;
            self.owner = owner.to_string();
            self.repo = repo.to_string();
        }
        if let Some(api) = lookup("SALD_API_BASE") {
            self.api_base = api.trim_end_matches('/').to_string();
        }
        if let Some(base) = lookup("SALD_RELEASE_BASE") {
            self.release_base = base.trim_end_matches('/').to_string();
            release_base_set = true;
        }
        if !release_base_set {
            self.release_base = default_release_base(&self.owner, &self.repo);
        }
        if lookup("SALD_NO_MODIFY_PATH").is_some() {
            self.modify_path = false;
        }
        self.api_token = lookup("GITHUB_TOKEN");
        Ok(self)
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.install_root.join("bin")
    }

    pub fn host_config_path(&self) -> PathBuf {
        self.install_root.join("config.toml")
    }
}

/// The root ends up in PATH entries, which must not depend on the directory
/// the installer happened to run in.
fn absolute_root(root: PathBuf) -> Result<PathBuf> {
    if root.is_absolute() {
        return Ok(root);
    }
    let cwd = std::env::current_dir().context("resolving a relative SALD_INSTALL_ROOT")?;
    Ok(cwd.join(root))
}

fn default_release_base(owner: &str, repo: &str) -> String {
    format!("https://github.com/{owner}/{repo}/releases/download")
}

/// Settings an editor or other long-running host reads for the language server.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct HostConfig {
    #[serde(default)]
    pub lsp: LspSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct LspSettings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Explicit path to a `sald-lsp` binary; wins over the default install.
    #[serde(default)]
    pub path: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl Default for LspSettings {
    fn default() -> Self {
        LspSettings {
            enabled: true,
            path: None,
        }
    }
}

impl HostConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(HostConfig::default());
        }
        let data = fs_err::read_to_string(path)?;
        toml::from_str(&data).with_context(|| format!("parsing {}", path.display()))
    }

    /// Like [`HostConfig::load`], but a broken file degrades to defaults.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                log::warn!("ignoring host config: {e:#}");
                HostConfig::default()
            }
        }
    }

    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        let body = toml::to_string_pretty(&HostConfig::default())?;
        let commented = format!(
            "# sald host settings\n# lsp.path = \"/path/to/sald-lsp\" overrides the default install\n{body}"
        );
        fs_err::write(path, commented)?;
        Ok(())
    }
}
