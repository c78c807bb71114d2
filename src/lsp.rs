use dialoguer::{theme::ColorfulTheme, Select};
use reqwest::blocking::Client;
use std::io;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use thiserror::Error;

use crate::config::{HostConfig, InstallerConfig, LSP_ASSET};
use crate::download::{DownloadError, Downloader};
use crate::platform::{platform, PlatformTarget};
use crate::progress::Silent;
use crate::release::{AssetSpec, ReleaseError, ReleaseResolver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LspChoice {
    Download,
    OpenConfig,
    Cancel,
}

#[derive(Debug, Error)]
pub enum LspError {
    #[error(transparent)]
    Release(#[from] ReleaseError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error("preparing {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// How the host asks the user what to do when no language server is found.
pub trait Prompt {
    fn choose(&mut self, message: &str) -> LspChoice;
    fn show_error(&mut self, message: &str);

    fn open(&mut self, path: &Path) {
        if let Err(e) = open_in_editor(path) {
            self.show_error(&format!("could not open {}: {e}", path.display()));
        }
    }
}

pub struct DialoguerPrompt;

impl Prompt for DialoguerPrompt {
    fn choose(&mut self, message: &str) -> LspChoice {
        let items = ["Download now", "Open configuration", "Cancel"];
        let picked = Select::with_theme(&ColorfulTheme::default())
            .with_prompt(message)
            .items(&items)
            .default(0)
            .interact_opt();
        match picked {
            Ok(Some(0)) => LspChoice::Download,
            Ok(Some(1)) => LspChoice::OpenConfig,
            Ok(_) => LspChoice::Cancel,
            Err(e) => {
                log::debug!("prompt unavailable ({e}); treating as cancel");
                LspChoice::Cancel
            }
        }
    }

    fn show_error(&mut self, message: &str) {
        eprintln!("error: {message}");
    }
}

/// `$VISUAL`, then `$EDITOR`, then the desktop opener. The editor is spawned
/// and not waited on.
pub fn open_in_editor(path: &Path) -> io::Result<()> {
    let editor = std::env::var("VISUAL")
        .ok()
        .or_else(|| std::env::var("EDITOR").ok())
        .filter(|e| !e.trim().is_empty());
    let mut cmd = match editor {
        Some(editor) => std::process::Command::new(editor),
        None if cfg!(windows) => std::process::Command::new("notepad"),
        None => std::process::Command::new("xdg-open"),
    };
    cmd.arg(path).spawn()?;
    Ok(())
}

/// Find-or-fetch for `sald-lsp`: configured path, then the default install,
/// then ask.
pub struct LspAcquisition<P> {
    config: InstallerConfig,
    host_config_path: PathBuf,
    target: PlatformTarget,
    client: Client,
    prompt: P,
}

impl<P: Prompt> LspAcquisition<P> {
    pub fn new(config: InstallerConfig, target: PlatformTarget, client: Client, prompt: P) -> Self {
        let host_config_path = config.host_config_path();
        LspAcquisition {
            config,
            host_config_path,
            target,
            client,
            prompt,
        }
    }

    pub fn with_host_config(mut self, path: &Path) -> Self {
        self.host_config_path = path.to_path_buf();
        self
    }

    pub fn default_path(&self) -> PathBuf {
        self.config
            .bin_dir()
            .join(self.target.installed_filename(LSP_ASSET))
    }

    /// `None` means the host should run without a language server.
    pub fn resolve(&mut self) -> Option<PathBuf> {
        // Host settings may change between calls.
        let host = HostConfig::load_or_default(&self.host_config_path);
        if !host.lsp.enabled {
            log::info!("language server disabled in {}", self.host_config_path.display());
            return None;
        }

        let configured = host
            .lsp
            .path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty());
        if let Some(configured) = configured {
            let configured = PathBuf::from(configured);
            if configured.is_file() {
                log::debug!("using configured language server {}", configured.display());
                return Some(configured);
            }
            log::warn!("configured lsp.path {} does not exist", configured.display());
        }

        let default = self.default_path();
        if default.is_file() {
            return Some(default);
        }

        match self.prompt.choose("The sald language server is not installed.") {
            LspChoice::Download => match self.fetch(&default) {
                Ok(()) => Some(default),
                Err(e) => {
                    log::debug!("language server download failed: {e:?}");
                    self.prompt
                        .show_error(&format!("downloading {LSP_ASSET} failed: {e}"));
                    None
                }
            },
            LspChoice::OpenConfig => {
                match HostConfig::write_default_if_missing(&self.host_config_path) {
                    Ok(()) => self.prompt.open(&self.host_config_path),
                    Err(e) => self.prompt.show_error(&format!("{e:#}")),
                }
                None
            }
            LspChoice::Cancel => None,
        }
    }

    /// Writes straight to `dest`; there is only one file, so no staging.
    fn fetch(&self, dest: &Path) -> Result<(), LspError> {
        let release = ReleaseResolver::new(
            self.client.clone(),
            &self.config.api_base,
            self.config.api_token.clone(),
        )
        .fetch_latest(&self.config.owner, &self.config.repo)?;
        let spec = AssetSpec::resolve(
            LSP_ASSET,
            &self.target,
            &release,
            &self.config.release_base,
            self.config.fallback_size,
        );
        let io_err = |source| LspError::Io {
            path: dest.to_path_buf(),
            source,
        };
        if let Some(parent) = dest.parent() {
            fs_err::create_dir_all(parent).map_err(io_err)?;
        }
        let outcome = Downloader::new(self.client.clone()).download(
            &spec.url,
            dest,
            spec.expected_size,
            &mut Silent,
        )?;
        if self.target.needs_exec_bit() {
            platform().make_executable(dest).map_err(io_err)?;
        }
        log::info!(
            "installed {} {} ({} bytes)",
            LSP_ASSET,
            release.version_tag,
            outcome.bytes
        );
        Ok(())
    }
}

impl<P: Prompt + Send + 'static> LspAcquisition<P> {
    /// Runs [`LspAcquisition::resolve`] off the caller's thread so a host UI
    /// loop keeps going during the download.
    pub fn resolve_in_background(mut self) -> JoinHandle<Option<PathBuf>> {
        thread::spawn(move || self.resolve())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::http_client;
    use crate::platform::{Arch, Os};

    const LINUX: PlatformTarget = PlatformTarget {
        os: Os::Linux,
        arch: Arch::X86_64,
    };

    #[derive(Default)]
    struct Scripted {
        answer: Option<LspChoice>,
        asked: usize,
        errors: Vec<String>,
        opened: Vec<PathBuf>,
    }

    impl Scripted {
        fn answering(choice: LspChoice) -> Self {
            Scripted {
                answer: Some(choice),
                ..Default::default()
            }
        }
    }

    impl Prompt for Scripted {
        fn choose(&mut self, _message: &str) -> LspChoice {
            self.asked += 1;
            self.answer.unwrap_or(LspChoice::Cancel)
        }
        fn show_error(&mut self, message: &str) {
            self.errors.push(message.to_string());
        }
        fn open(&mut self, path: &Path) {
            self.opened.push(path.to_path_buf());
        }
    }

    fn acquisition(root: &Path, api: &str, prompt: Scripted) -> LspAcquisition<Scripted> {
        let mut config = InstallerConfig::defaults(root);
        config.install_root = root.join(".sald");
        config.api_base = api.to_string();
        config.release_base = format!("{api}/download");
        LspAcquisition::new(config, LINUX, http_client().unwrap(), prompt)
    }

    fn release_body(tag: &str) -> String {
        format!(r#"{{"tag_name":"{tag}","assets":[{{"name":"sald-lsp-linux-x86_64","size":5,"browser_download_url":""}}]}}"#)
    }

    #[test]
    fn configured_path_wins_without_prompting() {
        let root = tempfile::tempdir().unwrap();
        let mut acq = acquisition(root.path(), "http://127.0.0.1:9", Scripted::default());
        let custom = root.path().join("custom-lsp");
        fs_err::write(&custom, "bin").unwrap();
        fs_err::create_dir_all(root.path().join(".sald")).unwrap();
        fs_err::write(
            root.path().join(".sald/config.toml"),
            format!("[lsp]\npath = {:?}\n", custom.display().to_string()),
        )
        .unwrap();

        assert_eq!(acq.resolve(), Some(custom));
        assert_eq!(acq.prompt.asked, 0);
    }

    #[test]
    fn missing_configured_path_falls_back_to_default_install() {
        let root = tempfile::tempdir().unwrap();
        let mut acq = acquisition(root.path(), "http://127.0.0.1:9", Scripted::default());
        let default = acq.default_path();
        fs_err::create_dir_all(default.parent().unwrap()).unwrap();
        fs_err::write(&default, "bin").unwrap();
        fs_err::write(
            root.path().join(".sald/config.toml"),
            "[lsp]\npath = \"/nowhere/sald-lsp\"\n",
        )
        .unwrap();

        assert_eq!(acq.resolve(), Some(default));
        assert_eq!(acq.prompt.asked, 0);
    }

    #[test]
    fn disabled_host_config_returns_none_silently() {
        let root = tempfile::tempdir().unwrap();
        let mut acq = acquisition(root.path(), "http://127.0.0.1:9", Scripted::default());
        fs_err::create_dir_all(root.path().join(".sald")).unwrap();
        fs_err::write(root.path().join(".sald/config.toml"), "[lsp]\nenabled = false\n").unwrap();
        assert_eq!(acq.resolve(), None);
        assert_eq!(acq.prompt.asked, 0);
    }

    #[test]
    fn cancel_is_degraded_mode() {
        let root = tempfile::tempdir().unwrap();
        let mut acq = acquisition(
            root.path(),
            "http://127.0.0.1:9",
            Scripted::answering(LspChoice::Cancel),
        );
        assert_eq!(acq.resolve(), None);
        assert_eq!(acq.prompt.asked, 1);
        assert!(acq.prompt.errors.is_empty());
    }

    #[test]
    fn download_choice_fetches_into_default_path() {
        let mut server = mockito::Server::new();
        let _latest = server
            .mock("GET", "/repos/sald-lang/sald/releases/latest")
            .with_status(200)
            .with_body(release_body("v0.4.1"))
            .create();
        let blob = server
            .mock("GET", "/download/v0.4.1/sald-lsp-linux-x86_64")
            .with_status(200)
            .with_body("lsp!!")
            .create();
        let root = tempfile::tempdir().unwrap();
        let mut acq = acquisition(
            root.path(),
            &server.url(),
            Scripted::answering(LspChoice::Download),
        );

        let path = acq.resolve().unwrap();
        assert_eq!(path, acq.default_path());
        assert_eq!(fs_err::read_to_string(&path).unwrap(), "lsp!!");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs_err::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
        blob.assert();

        // Second resolve finds the installed binary.
        assert_eq!(acq.resolve(), Some(path));
        assert_eq!(acq.prompt.asked, 1);
    }

    #[test]
    fn failed_download_reports_and_returns_none() {
        let mut server = mockito::Server::new();
        let _latest = server
            .mock("GET", "/repos/sald-lang/sald/releases/latest")
            .with_status(200)
            .with_body(release_body("v0.4.1"))
            .create();
        let _blob = server
            .mock("GET", "/download/v0.4.1/sald-lsp-linux-x86_64")
            .with_status(503)
            .create();
        let root = tempfile::tempdir().unwrap();
        let mut acq = acquisition(
            root.path(),
            &server.url(),
            Scripted::answering(LspChoice::Download),
        );

        assert_eq!(acq.resolve(), None);
        assert_eq!(acq.prompt.errors.len(), 1);
        assert!(acq.prompt.errors[0].contains("503"), "{:?}", acq.prompt.errors);
        assert!(!acq.default_path().exists());
    }

    #[test]
    fn missing_tag_is_shown_as_error() {
        let mut server = mockito::Server::new();
        let _latest = server
            .mock("GET", "/repos/sald-lang/sald/releases/latest")
            .with_status(200)
            .with_body(r#"{"assets":[]}"#)
            .create();
        let root = tempfile::tempdir().unwrap();
        let mut acq = acquisition(
            root.path(),
            &server.url(),
            Scripted::answering(LspChoice::Download),
        );
        assert_eq!(acq.resolve(), None);
        assert!(acq.prompt.errors[0].contains("no version tag"));
    }

    #[test]
    fn open_config_writes_defaults_and_opens_them() {
        let root = tempfile::tempdir().unwrap();
        let mut acq = acquisition(
            root.path(),
            "http://127.0.0.1:9",
            Scripted::answering(LspChoice::OpenConfig),
        );
        assert_eq!(acq.resolve(), None);
        let cfg = root.path().join(".sald/config.toml");
        assert!(cfg.is_file());
        assert_eq!(acq.prompt.opened, vec![cfg]);
    }

    #[test]
    fn background_resolve_joins_with_the_result() {
        let root = tempfile::tempdir().unwrap();
        let acq = acquisition(root.path(), "http://127.0.0.1:9", Scripted::default());
        let default = acq.default_path();
        fs_err::create_dir_all(default.parent().unwrap()).unwrap();
        fs_err::write(&default, "bin").unwrap();
        assert_eq!(acq.resolve_in_background().join().unwrap(), Some(default));
    }
}
