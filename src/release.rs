use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::platform::PlatformTarget;

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("failed to reach {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("GET {url} returned {status}")]
    Status { url: String, status: u16 },
    #[error("latest release of {repo} has no version tag")]
    MissingVersionTag { repo: String },
    #[error("malformed release metadata from {url}: {reason}")]
    Malformed { url: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetInfo {
    pub size: u64,
    pub download_url: String,
}

#[derive(Debug, Clone)]
pub struct ReleaseMetadata {
    pub version_tag: String,
    pub assets: BTreeMap<String, AssetInfo>,
}

#[derive(Deserialize)]
struct RawRelease {
    #[serde(default)]
    tag_name: Option<String>,
    #[serde(default)]
    assets: Vec<RawAsset>,
}

#[derive(Deserialize)]
struct RawAsset {
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    browser_download_url: String,
}

pub struct ReleaseResolver {
    client: Client,
    api_base: String,
    token: Option<String>,
}

impl ReleaseResolver {
    pub fn new(client: Client, api_base: &str, token: Option<String>) -> Self {
        ReleaseResolver {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
        }
    }

    pub fn latest_url(&self, owner: &str, repo: &str) -> String {
        format!("{}/repos/{owner}/{repo}/releases/latest", self.api_base)
    }

    pub fn fetch_latest(&self, owner: &str, repo: &str) -> Result<ReleaseMetadata, ReleaseError> {
        let url = self.latest_url(owner, repo);
        log::debug!("GET {url}");
        let mut req = self
            .client
            .get(&url)
            .header(USER_AGENT, concat!("sald-install/", env!("CARGO_PKG_VERSION")))
            .header(ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let resp = req.send().map_err(|source| ReleaseError::Network {
            url: url.clone(),
            source,
        })?;
        if resp.status().as_u16() != 200 {
            return Err(ReleaseError::Status {
                url,
                status: resp.status().as_u16(),
            });
        }
        let body = resp.text().map_err(|source| ReleaseError::Network {
            url: url.clone(),
            source,
        })?;
        parse_release(&body, &format!("{owner}/{repo}")).map_err(|e| match e {
            ReleaseError::Malformed { reason, .. } => ReleaseError::Malformed { url, reason },
            other => other,
        })
    }
}

fn parse_release(body: &str, repo: &str) -> Result<ReleaseMetadata, ReleaseError> {
    let raw: RawRelease = serde_json::from_str(body).map_err(|e| ReleaseError::Malformed {
        url: String::new(),
        reason: e.to_string(),
    })?;
    let version_tag = raw
        .tag_name
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ReleaseError::MissingVersionTag {
            repo: repo.to_string(),
        })?;
    let assets = raw
        .assets
        .into_iter()
        .map(|a| {
            (
                a.name,
                AssetInfo {
                    size: a.size,
                    download_url: a.browser_download_url,
                },
            )
        })
        .collect();
    Ok(ReleaseMetadata {
        version_tag,
        assets,
    })
}

/// One binary to fetch: release metadata combined with the host platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSpec {
    pub logical_name: String,
    pub platform_suffix: String,
    pub filename: String,
    pub installed_name: String,
    pub expected_size: u64,
    /// False when the size is the fallback estimate.
    pub size_known: bool,
    pub url: String,
}

impl AssetSpec {
    /// The URL always follows `{release_base}/{tag}/{filename}`; the metadata's
    /// own download URL is only cross-checked.
    pub fn resolve(
        logical_name: &str,
        target: &PlatformTarget,
        release: &ReleaseMetadata,
        release_base: &str,
        fallback_size: u64,
    ) -> Self {
        let filename = target.asset_filename(logical_name);
        let url = format!(
            "{}/{}/{}",
            release_base.trim_end_matches('/'),
            release.version_tag,
            filename
        );
        let (expected_size, size_known) = match release.assets.get(&filename) {
            Some(info) => {
                if !info.download_url.is_empty() && info.download_url != url {
                    log::warn!(
                        "{filename}: metadata URL {} differs from {url}; using the latter",
                        info.download_url
                    );
                }
                if info.size > 0 {
                    (info.size, true)
                } else {
                    (fallback_size, false)
                }
            }
            None => {
                log::warn!(
                    "{filename} is not listed in release {}; assuming ~{} bytes",
                    release.version_tag,
                    fallback_size
                );
                (fallback_size, false)
            }
        };
        AssetSpec {
            logical_name: logical_name.to_string(),
            platform_suffix: format!("{target}{}", target.binary_extension()),
            installed_name: target.installed_filename(logical_name),
            filename,
            expected_size,
            size_known,
            url,
        }
    }
}
