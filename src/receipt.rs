use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::installer::InstallReport;
use crate::platform::PlatformTarget;

pub const RECEIPT_FILE: &str = "receipt.toml";

/// What the last successful install put on disk. Digests are recorded for
/// later inspection, not verified against anything.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Receipt {
    pub installed_at: DateTime<Utc>,
    pub installer_version: String,
    pub version: String,
    pub platform: String,
    pub assets: BTreeMap<String, ReceiptEntry>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ReceiptEntry {
    pub file: String,
    pub bytes: u64,
    pub url: String,
    pub sha256: String,
}

impl Receipt {
    pub fn new(version: &str, target: &PlatformTarget, report: &InstallReport) -> Self {
        let assets = report
            .installed
            .iter()
            .map(|a| {
                let file = a
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                (
                    a.logical_name.clone(),
                    ReceiptEntry {
                        file,
                        bytes: a.bytes,
                        url: a.url.clone(),
                        sha256: a.sha256.clone(),
                    },
                )
            })
            .collect();
        Receipt {
            installed_at: Utc::now(),
            installer_version: env!("CARGO_PKG_VERSION").to_string(),
            version: version.to_string(),
            platform: target.to_string(),
            assets,
        }
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = fs_err::read_to_string(path)?;
        let receipt = toml::from_str(&data)
            .with_context(|| format!("parsing receipt {}", path.display()))?;
        Ok(Some(receipt))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let body = toml::to_string_pretty(self).context("serializing receipt")?;
        fs_err::write(path, body)?;
        Ok(())
    }
}
