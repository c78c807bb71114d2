use fs_err as fs;
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use thiserror::Error;

use crate::download::{DownloadError, Downloader};
use crate::platform::{platform, PlatformTarget};
use crate::progress::{DownloadObserver, Silent, TerminalProgress};
use crate::release::AssetSpec;

const SCRATCH_PREFIX: &str = ".sald-install-";

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("could not create scratch directory under {}: {source}", parent.display())]
    Scratch {
        parent: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("downloading {asset} failed: {source}")]
    Download {
        asset: String,
        /// Assets after the failed one that were never attempted.
        skipped: Vec<String>,
        #[source]
        source: DownloadError,
    },
    #[error("moving {asset} into {}: {source}", dest.display())]
    Relocate {
        asset: String,
        dest: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("creating {}: {source}", path.display())]
    BinDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("marking {} executable: {source}", path.display())]
    Permissions {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl InstallError {
    /// Names of the assets that did not make it into the install tree.
    pub fn failed_assets(&self) -> Vec<String> {
        match self {
            InstallError::Download { asset, skipped, .. } => {
                let mut out = vec![asset.clone()];
                out.extend(skipped.iter().cloned());
                out
            }
            InstallError::Relocate { asset, .. } => vec![asset.clone()],
            InstallError::Scratch { .. }
            | InstallError::BinDir { .. }
            | InstallError::Permissions { .. } => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstallLayout {
    pub install_root: PathBuf,
    pub bin_dir: PathBuf,
    /// Parent of the per-run scratch directory. Defaults to the install root so
    /// the final rename stays on one volume.
    pub scratch_parent: PathBuf,
}

impl InstallLayout {
    pub fn new(install_root: &Path) -> Self {
        InstallLayout {
            install_root: install_root.to_path_buf(),
            bin_dir: install_root.join("bin"),
            scratch_parent: install_root.to_path_buf(),
        }
    }

    pub fn with_scratch_parent(mut self, parent: &Path) -> Self {
        self.scratch_parent = parent.to_path_buf();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressMode {
    Terminal { interval: Duration },
    Silent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledAsset {
    pub logical_name: String,
    pub path: PathBuf,
    pub bytes: u64,
    pub url: String,
    pub sha256: String,
}

#[derive(Debug, Clone)]
pub struct InstallReport {
    pub installed: Vec<InstalledAsset>,
}

struct Staged<'a> {
    spec: &'a AssetSpec,
    path: PathBuf,
    bytes: u64,
    sha256: String,
}

pub struct InstallTransaction<'a> {
    downloader: &'a Downloader,
    target: PlatformTarget,
    progress: ProgressMode,
}

impl<'a> InstallTransaction<'a> {
    pub fn new(downloader: &'a Downloader, target: PlatformTarget, progress: ProgressMode) -> Self {
        InstallTransaction {
            downloader,
            target,
            progress,
        }
    }

    /// Downloads every asset into a fresh scratch directory, then moves them
    /// into `bin_dir`. Nothing reaches `bin_dir` unless every download
    /// succeeded; the scratch directory is removed on every exit path when the
    /// guard drops.
    pub fn run(
        &self,
        assets: &[AssetSpec],
        layout: &InstallLayout,
    ) -> Result<InstallReport, InstallError> {
        let scratch = self.create_scratch(&layout.scratch_parent)?;
        log::debug!(
            "staging {} assets for {} into {}",
            assets.len(),
            layout.install_root.display(),
            scratch.path().display()
        );

        let staged = self.stage_all(assets, scratch.path())?;

        fs::create_dir_all(&layout.bin_dir).map_err(|source| InstallError::BinDir {
            path: layout.bin_dir.clone(),
            source,
        })?;

        let mut installed = Vec::with_capacity(staged.len());
        for item in staged {
            let dest = layout.bin_dir.join(&item.spec.installed_name);
            relocate(&item.path, &dest).map_err(|source| InstallError::Relocate {
                asset: item.spec.logical_name.clone(),
                dest: dest.clone(),
                source,
            })?;
            if self.target.needs_exec_bit() {
                platform()
                    .make_executable(&dest)
                    .map_err(|source| InstallError::Permissions {
                        path: dest.clone(),
                        source,
                    })?;
            }
            log::debug!("installed {}", dest.display());
            installed.push(InstalledAsset {
                logical_name: item.spec.logical_name.clone(),
                path: dest,
                bytes: item.bytes,
                url: item.spec.url.clone(),
                sha256: item.sha256,
            });
        }
        Ok(InstallReport { installed })
    }

    fn create_scratch(&self, parent: &Path) -> Result<TempDir, InstallError> {
        let scratch_err = |source| InstallError::Scratch {
            parent: parent.to_path_buf(),
            source,
        };
        fs::create_dir_all(parent).map_err(scratch_err)?;
        tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(parent)
            .map_err(scratch_err)
    }

    /// Sequential and fail-fast: the first failed download stops the batch.
    fn stage_all<'s>(
        &self,
        assets: &'s [AssetSpec],
        scratch: &Path,
    ) -> Result<Vec<Staged<'s>>, InstallError> {
        let mut staged = Vec::with_capacity(assets.len());
        for (i, spec) in assets.iter().enumerate() {
            let dest = scratch.join(&spec.filename);
            if !spec.size_known {
                log::debug!(
                    "{} ({}): size unknown, progress is approximate",
                    spec.logical_name,
                    spec.platform_suffix
                );
            }
            let mut observer = self.observer_for(spec);
            let outcome = self
                .downloader
                .download(&spec.url, &dest, spec.expected_size, observer.as_mut())
                .map_err(|source| InstallError::Download {
                    asset: spec.logical_name.clone(),
                    skipped: assets[i + 1..].iter().map(|a| a.logical_name.clone()).collect(),
                    source,
                })?;
            let sha256 = file_sha256(&dest).map_err(|source| InstallError::Download {
                asset: spec.logical_name.clone(),
                skipped: assets[i + 1..].iter().map(|a| a.logical_name.clone()).collect(),
                source: DownloadError::Io(source),
            })?;
            log::debug!("{} from {} sha256 {sha256}", spec.filename, outcome.final_url);
            staged.push(Staged {
                spec,
                path: dest,
                bytes: outcome.bytes,
                sha256,
            });
        }
        Ok(staged)
    }

    fn observer_for(&self, spec: &AssetSpec) -> Box<dyn DownloadObserver> {
        match self.progress {
            ProgressMode::Terminal { interval } => {
                Box::new(TerminalProgress::new(&spec.logical_name, interval))
            }
            ProgressMode::Silent => Box::new(Silent),
        }
    }
}

/// Rename within a volume; copy then delete the source across volumes.
pub fn relocate(from: &Path, to: &Path) -> io::Result<()> {
    relocate_with(from, to, |a, b| fs::rename(a, b))
}

fn relocate_with<F>(from: &Path, to: &Path, rename: F) -> io::Result<()>
where
    F: Fn(&Path, &Path) -> io::Result<()>,
{
    match rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) => {
            log::debug!("rename failed ({e}); falling back to copy");
            fs::copy(from, to)?;
            fs::remove_file(from)?;
            Ok(())
        }
    }
}

pub fn file_sha256(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}
