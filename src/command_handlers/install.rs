use anyhow::{Context, Result};
use std::path::Path;

use crate::config::InstallerConfig;
use crate::download::{http_client, Downloader};
use crate::installer::{InstallLayout, InstallTransaction, InstalledAsset, ProgressMode};
use crate::path_registrar::{ensure_on_path, export_line, PathRecord, PathUpdate, ShellKind};
use crate::platform::{self, platform, Os, PlatformTarget};
use crate::receipt::{Receipt, RECEIPT_FILE};
use crate::release::{AssetSpec, ReleaseResolver};

pub struct InstallSummary {
    pub version: String,
    pub installed: Vec<InstalledAsset>,
    /// `None` when PATH registration was skipped or failed.
    pub path_update: Option<PathUpdate>,
}

pub fn run_install(cfg: &InstallerConfig) -> Result<()> {
    let target = platform::resolve_current().context("detecting platform")?;
    println!("Installing {} for {target}", cfg.product);
    let record = if cfg.modify_path {
        platform().default_path_record()
    } else {
        None
    };
    let progress = ProgressMode::Terminal {
        interval: cfg.sample_interval,
    };
    let summary = install(cfg, target, progress, record.as_ref())?;

    println!();
    println!("Installed {} {}:", cfg.product, summary.version);
    for asset in &summary.installed {
        println!("  {}", asset.path.display());
    }
    let bin_dir = cfg.bin_dir();
    match summary.path_update {
        Some(PathUpdate::Updated) => println!(
            "Added {} to PATH. Open a new terminal to pick it up.",
            bin_dir.display()
        ),
        Some(PathUpdate::AlreadyPresent) => {
            println!("{} is already on PATH.", bin_dir.display())
        }
        None => print_manual_path_hint(target, &bin_dir),
    }
    Ok(())
}

/// Resolve, download, relocate, record and register. Each fatal step
/// returns before anything later runs.
pub fn install(
    cfg: &InstallerConfig,
    target: PlatformTarget,
    progress: ProgressMode,
    record: Option<&PathRecord>,
) -> Result<InstallSummary> {
    let client = http_client().context("building HTTP client")?;
    let release = ReleaseResolver::new(client.clone(), &cfg.api_base, cfg.api_token.clone())
        .fetch_latest(&cfg.owner, &cfg.repo)?;
    log::info!("latest release of {}/{} is {}", cfg.owner, cfg.repo, release.version_tag);

    let specs: Vec<AssetSpec> = cfg
        .assets
        .iter()
        .map(|name| {
            AssetSpec::resolve(name, &target, &release, &cfg.release_base, cfg.fallback_size)
        })
        .collect();

    let layout = InstallLayout::new(&cfg.install_root);
    let downloader = Downloader::new(client);
    let report = InstallTransaction::new(&downloader, target, progress)
        .run(&specs, &layout)
        .map_err(|e| {
            let failed = e.failed_assets();
            if !failed.is_empty() {
                eprintln!("Not installed: {}", failed.join(", "));
            }
            anyhow::Error::new(e)
        })
        .context("installation aborted; nothing was changed in the bin directory")?;

    let receipt_path = cfg.install_root.join(RECEIPT_FILE);
    if let Err(e) = Receipt::new(&release.version_tag, &target, &report).save(&receipt_path) {
        log::warn!("could not write {}: {e:#}", receipt_path.display());
    }

    let path_update = match record {
        Some(record) => match ensure_on_path(record, &layout.bin_dir) {
            Ok(update) => Some(update),
            Err(e) => {
                log::warn!("could not update PATH in {}: {e}", record.describe());
                None
            }
        },
        None => None,
    };

    Ok(InstallSummary {
        version: release.version_tag,
        installed: report.installed,
        path_update,
    })
}

fn print_manual_path_hint(target: PlatformTarget, bin_dir: &Path) {
    println!("Add {} to your PATH to use it:", bin_dir.display());
    println!("  {}", manual_path_command(target.os, bin_dir));
}

/// One command the user can paste. On Windows this edits only the user
/// `Path`, leaving the machine entries and their length alone.
fn manual_path_command(os: Os, bin_dir: &Path) -> String {
    match os {
        Os::Windows => {
            let dir = bin_dir.display().to_string().replace('\'', "''");
            format!(
                "[Environment]::SetEnvironmentVariable('Path', \
                 [Environment]::GetEnvironmentVariable('Path', 'User') + ';{dir}', 'User')"
            )
        }
        Os::Linux => export_line(ShellKind::Posix, bin_dir),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Arch;

    const LINUX: PlatformTarget = PlatformTarget {
        os: Os::Linux,
        arch: Arch::X86_64,
    };

    fn config(root: &Path, api: &str) -> InstallerConfig {
        let mut cfg = InstallerConfig::defaults(root);
        cfg.api_base = api.to_string();
        cfg.release_base = format!("{api}/releases/download");
        cfg
    }

    fn latest_mock(server: &mut mockito::ServerGuard, body: &str) -> mockito::Mock {
        server
            .mock("GET", "/repos/sald-lang/sald/releases/latest")
            .with_status(200)
            .with_body(body)
            .create()
    }

    #[test]
    fn manual_hint_edits_only_the_user_path_on_windows() {
        let cmd = manual_path_command(Os::Windows, Path::new("C:\\Users\\o'neil\\.sald\\bin"));
        assert_eq!(
            cmd,
            "[Environment]::SetEnvironmentVariable('Path', \
             [Environment]::GetEnvironmentVariable('Path', 'User') + \
             ';C:\\Users\\o''neil\\.sald\\bin', 'User')"
        );
        assert!(!cmd.contains("setx"));
        assert!(!cmd.contains("%PATH%"));

        let unix = manual_path_command(Os::Linux, Path::new("/home/u/.sald/bin"));
        assert_eq!(unix, "export PATH=\"/home/u/.sald/bin:$PATH\"");
    }

    #[test]
    fn missing_tag_fails_before_any_download() {
        let mut server = mockito::Server::new();
        let _latest = latest_mock(&mut server, r#"{"tag_name":"","assets":[]}"#);
        let downloads = server
            .mock("GET", mockito::Matcher::Regex("^/releases/download/.*".into()))
            .expect(0)
            .create();
        let home = tempfile::tempdir().unwrap();
        let cfg = config(home.path(), &server.url());

        let err = install(&cfg, LINUX, ProgressMode::Silent, None)
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("no version tag"), "{err:#}");
        assert!(!cfg.install_root.exists());
        downloads.assert();
    }

    #[test]
    fn full_install_then_rerun_leaves_path_alone() {
        let mut server = mockito::Server::new();
        let sald = vec![1u8; 8_000_000];
        let _latest = latest_mock(
            &mut server,
            r#"{"tag_name":"v1.2.0","assets":[{"name":"sald-linux-x86_64","size":8000000,"browser_download_url":""}]}"#,
        );
        let _sald = server
            .mock("GET", "/releases/download/v1.2.0/sald-linux-x86_64")
            .with_status(200)
            .with_body(&sald)
            .expect(2)
            .create();
        let _rest = server
            .mock(
                "GET",
                mockito::Matcher::Regex(
                    "^/releases/download/v1.2.0/(sald-lsp|salad)-linux-x86_64$".into(),
                ),
            )
            .with_status(200)
            .with_body("tool")
            .expect(4)
            .create();
        let home = tempfile::tempdir().unwrap();
        let cfg = config(home.path(), &server.url());
        let record = PathRecord::shell_profile_for(home.path(), "/bin/bash");

        let first = install(&cfg, LINUX, ProgressMode::Silent, Some(&record)).unwrap();
        assert_eq!(first.version, "v1.2.0");
        assert_eq!(first.installed.len(), 3);
        assert_eq!(first.installed[0].bytes, 8_000_000);
        assert_eq!(first.path_update, Some(PathUpdate::Updated));
        let profile = record.read().unwrap();

        let second = install(&cfg, LINUX, ProgressMode::Silent, Some(&record)).unwrap();
        assert_eq!(second.path_update, Some(PathUpdate::AlreadyPresent));
        assert_eq!(record.read().unwrap(), profile);

        let receipt = Receipt::load(&cfg.install_root.join(RECEIPT_FILE))
            .unwrap()
            .unwrap();
        assert_eq!(receipt.version, "v1.2.0");
        assert_eq!(receipt.assets.len(), 3);
        assert_eq!(receipt.assets["sald-lsp"].bytes, 4);
    }

    #[test]
    fn failed_download_is_fatal_and_skips_path_registration() {
        let mut server = mockito::Server::new();
        let _latest = latest_mock(&mut server, r#"{"tag_name":"v2.0.0","assets":[]}"#);
        let _sald = server
            .mock("GET", "/releases/download/v2.0.0/sald-linux-x86_64")
            .with_status(200)
            .with_body("ok")
            .create();
        let _lsp = server
            .mock("GET", "/releases/download/v2.0.0/sald-lsp-linux-x86_64")
            .with_status(404)
            .create();
        let home = tempfile::tempdir().unwrap();
        let cfg = config(home.path(), &server.url());
        let record = PathRecord::shell_profile_for(home.path(), "/bin/zsh");

        assert!(install(&cfg, LINUX, ProgressMode::Silent, Some(&record)).is_err());
        assert!(!cfg.bin_dir().exists());
        assert_eq!(record.read().unwrap(), "");
    }
}
