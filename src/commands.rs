//! Cache management operations behind the `compass-launcher` binary.
//!
//! Each command returns a serializable report so the CLI can print either
//! human-readable text or JSON.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::core::artifact::{ArtifactDescriptor, ArtifactRef};
use crate::core::cache::lock::DEFAULT_LOCK_WAIT;
use crate::core::cache::{CacheEntry, InstallLock};
use crate::core::config::LauncherConfig;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::platform::{self, PlatformId, SUPPORTED_PLATFORMS};

#[derive(Debug, Serialize)]
pub struct InstallReport {
    pub artifact: String,
    pub path: PathBuf,
    pub sha256: String,
    pub source_url: String,
    pub size: u64,
}

impl From<&CacheEntry> for InstallReport {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            artifact: entry.artifact.to_string(),
            path: entry.local_path.clone(),
            sha256: entry.digest.to_string(),
            source_url: entry.source_url.clone(),
            size: entry.size,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EvictReport {
    pub artifact: String,
    pub removed: bool,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerifyReport {
    Ok { artifact: String, path: PathBuf, sha256: String },
    Missing { artifact: String },
    Corrupt { artifact: String, reason: String },
}

#[derive(Debug, Serialize)]
pub struct CachedBinary {
    pub platform: String,
    pub version: String,
    pub path: PathBuf,
    pub sha256: String,
    pub size: u64,
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct WhichReport {
    pub artifact: String,
    pub path: PathBuf,
    pub installed: bool,
}

#[derive(Debug, Serialize)]
pub struct PlatformReport {
    pub platform: String,
    pub os: String,
    pub arch: String,
    pub supported: Vec<String>,
}

fn descriptor_for(config: &LauncherConfig, version: &str) -> LauncherResult<ArtifactDescriptor> {
    let platform = platform::resolve()?;
    config.locator().locate(version, platform)
}

/// Make sure the artifact is cached and verified, downloading if needed.
pub async fn install(config: &LauncherConfig, version: &str) -> LauncherResult<InstallReport> {
    let descriptor = descriptor_for(config, version)?;
    let entry = config.fetcher()?.fetch(&descriptor).await?;
    Ok(InstallReport::from(&entry))
}

/// Discard any cached copy and download a fresh one.
pub async fn reinstall(config: &LauncherConfig, version: &str) -> LauncherResult<InstallReport> {
    let descriptor = descriptor_for(config, version)?;
    if config.offline {
        return Err(LauncherError::Offline {
            url: descriptor.url,
        });
    }
    if evict_locked(config, &descriptor.artifact).await? {
        info!("Discarded cached {}", descriptor.artifact);
    }
    let entry = config.fetcher()?.fetch(&descriptor).await?;
    Ok(InstallReport::from(&entry))
}

/// Evict while holding the install lock, so a concurrent install is never
/// torn down halfway.
async fn evict_locked(config: &LauncherConfig, artifact: &ArtifactRef) -> LauncherResult<bool> {
    let cache = config.cache();
    let _lock = InstallLock::acquire(&cache.lock_path(artifact), DEFAULT_LOCK_WAIT).await?;
    cache.evict(artifact).await
}

pub async fn evict(config: &LauncherConfig, version: &str) -> LauncherResult<EvictReport> {
    let descriptor = descriptor_for(config, version)?;
    let removed = evict_locked(config, &descriptor.artifact).await?;
    Ok(EvictReport {
        artifact: descriptor.artifact.to_string(),
        removed,
    })
}

/// Re-hash the cached binary against its record. Corruption is reported,
/// not discarded.
pub async fn verify(config: &LauncherConfig, version: &str) -> LauncherResult<VerifyReport> {
    let descriptor = descriptor_for(config, version)?;
    let artifact = descriptor.artifact.to_string();
    match config.cache().health_check(&descriptor.artifact).await {
        Ok(Some(entry)) => Ok(VerifyReport::Ok {
            artifact,
            path: entry.local_path,
            sha256: entry.digest.to_string(),
        }),
        Ok(None) => Ok(VerifyReport::Missing { artifact }),
        Err(LauncherError::CacheCorruption { reason, .. }) => {
            Ok(VerifyReport::Corrupt { artifact, reason })
        }
        Err(err) => Err(err),
    }
}

pub async fn list(config: &LauncherConfig) -> LauncherResult<Vec<CachedBinary>> {
    let entries = config.cache().list().await?;
    Ok(entries
        .into_iter()
        .map(|entry| CachedBinary {
            platform: entry.artifact.platform.to_string(),
            version: entry.artifact.version.to_string(),
            path: entry.local_path,
            sha256: entry.digest.to_string(),
            size: entry.size,
            verified_at: entry.verified_at,
        })
        .collect())
}

/// Keep the `keep` most recently verified versions per platform.
pub async fn prune(config: &LauncherConfig, keep: usize) -> LauncherResult<Vec<String>> {
    let evicted = config.cache().prune(keep).await?;
    Ok(evicted.iter().map(ArtifactRef::to_string).collect())
}

/// Where the binary for `version` lives (or would live) in the cache.
pub async fn which(config: &LauncherConfig, version: &str) -> LauncherResult<WhichReport> {
    if let Some(path) = &config.binary_override {
        return Ok(WhichReport {
            artifact: "local override".to_string(),
            path: path.clone(),
            installed: path.is_file(),
        });
    }
    let descriptor = descriptor_for(config, version)?;
    let cache = config.cache();
    let installed = cache.lookup(&descriptor.artifact).await.is_some();
    Ok(WhichReport {
        artifact: descriptor.artifact.to_string(),
        path: cache.entry_path(&descriptor.artifact),
        installed,
    })
}

pub fn platform() -> LauncherResult<PlatformReport> {
    let id: PlatformId = platform::resolve()?;
    Ok(PlatformReport {
        platform: id.to_string(),
        os: id.os().to_string(),
        arch: id.arch().to_string(),
        supported: SUPPORTED_PLATFORMS.iter().map(|p| p.to_string()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::Path;

    fn config(dir: &Path) -> LauncherConfig {
        let vars: HashMap<String, String> = [
            ("COMPASS_CONFIG_HOME", dir.join("config")),
            ("COMPASS_CACHE_HOME", dir.join("cache")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.display().to_string()))
        .collect();
        LauncherConfig::from_vars(&vars).unwrap()
    }

    #[tokio::test]
    async fn empty_cache_reports_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());

        assert!(list(&config).await.unwrap().is_empty());
        assert!(prune(&config, 0).await.unwrap().is_empty());
        assert!(matches!(
            verify(&config, "1.0.0").await.unwrap(),
            VerifyReport::Missing { .. }
        ));
        assert!(!evict(&config, "1.0.0").await.unwrap().removed);
    }

    #[tokio::test]
    async fn which_points_into_the_cache_root() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let report = which(&config, "1.0.0").await.unwrap();
        assert!(!report.installed);
        assert!(report.path.starts_with(dir.path().join("cache")));
    }

    #[test]
    fn platform_report_lists_supported_targets() {
        let report = platform().unwrap();
        assert_eq!(report.supported.len(), SUPPORTED_PLATFORMS.len());
        assert!(report.supported.contains(&report.platform));
    }

    #[test]
    fn verify_report_is_tagged() {
        let json = serde_json::to_value(VerifyReport::Missing {
            artifact: "compass@1.0.0 (linux-x64)".into(),
        })
        .unwrap();
        assert_eq!(json["status"], "missing");
    }
}
