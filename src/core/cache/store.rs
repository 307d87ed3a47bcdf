use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::files::{ensure_executable, is_executable, sha256_file};
use super::lock::InstallLock;
use super::model::{CacheEntry, ENTRY_SCHEMA_VERSION};
use crate::core::artifact::ArtifactRef;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::platform::PlatformId;

const STAGING_DIR: &str = ".staging";
const METADATA_SUFFIX: &str = ".json";
pub const STAGING_SUFFIX: &str = "part";

/// On-disk store of verified binaries.
///
/// Layout under the root:
/// - `.staging/<uuid>.part`: in-flight downloads
/// - `<platform>/compass-<version>`: the executable
/// - `<platform>/compass-<version>.json`: its [`CacheEntry`]
/// - `<platform>/.compass-<version>.lock`: install lock
#[derive(Debug, Clone)]
pub struct BinaryCache {
    root: PathBuf,
}

impl BinaryCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_path(&self, artifact: &ArtifactRef) -> PathBuf {
        self.root.join(artifact.relative_path())
    }

    pub fn metadata_path(&self, artifact: &ArtifactRef) -> PathBuf {
        self.root
            .join(artifact.platform.to_string())
            .join(format!("{}{}", artifact.local_file_name(), METADATA_SUFFIX))
    }

    pub fn lock_path(&self, artifact: &ArtifactRef) -> PathBuf {
        self.root
            .join(artifact.platform.to_string())
            .join(format!(".{}.lock", artifact.local_file_name()))
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// A fresh staging path on the same filesystem as the cache, so the
    /// final move is a rename.
    pub fn new_staging_path(&self) -> PathBuf {
        self.staging_dir()
            .join(format!("{}.{}", Uuid::new_v4(), STAGING_SUFFIX))
    }

    /// Create the platform and staging directories for `artifact`.
    pub async fn prepare(&self, artifact: &ArtifactRef) -> LauncherResult<()> {
        for dir in [
            self.root.join(artifact.platform.to_string()),
            self.staging_dir(),
        ] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|source| LauncherError::io(&dir, source))?;
        }
        Ok(())
    }

    /// Return the entry if it exists and still passes a health check.
    ///
    /// Read-only: a corrupt entry is reported absent but left on disk. The
    /// binary may have just been renamed into place by an installer that has
    /// not written its record yet, so only the lock holder may discard it
    /// (see [`lookup_or_discard`](Self::lookup_or_discard)).
    #[instrument(skip(self), fields(artifact = %artifact))]
    pub async fn lookup(&self, artifact: &ArtifactRef) -> Option<CacheEntry> {
        match self.health_check(artifact).await {
            Ok(entry) => entry,
            Err(err @ LauncherError::CacheCorruption { .. }) => {
                debug!("Cached binary is not usable: {}", err);
                None
            }
            Err(err) => {
                warn!("Cache lookup failed, treating as miss: {}", err);
                None
            }
        }
    }

    /// [`lookup`](Self::lookup) for the holder of the artifact's install
    /// lock. A corrupt entry is evicted so the caller can reinstall it.
    pub async fn lookup_or_discard(
        &self,
        artifact: &ArtifactRef,
        lock: &InstallLock,
    ) -> Option<CacheEntry> {
        debug_assert_eq!(lock.path(), self.lock_path(artifact));
        match self.health_check(artifact).await {
            Ok(entry) => entry,
            Err(err @ LauncherError::CacheCorruption { .. }) => {
                warn!("Discarding cached binary: {}", err);
                if let Err(evict_err) = self.evict(artifact).await {
                    warn!("Failed to discard corrupt entry: {}", evict_err);
                }
                None
            }
            Err(err) => {
                warn!("Cache lookup failed, treating as miss: {}", err);
                None
            }
        }
    }

    /// Verify the recorded entry against the file on disk.
    ///
    /// `Ok(None)` means nothing is recorded. Any inconsistency between the
    /// metadata and the binary is a [`LauncherError::CacheCorruption`].
    pub async fn health_check(&self, artifact: &ArtifactRef) -> LauncherResult<Option<CacheEntry>> {
        let metadata_path = self.metadata_path(artifact);
        let bytes = match tokio::fs::read(&metadata_path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("No cache record at {:?}", metadata_path);
                return Ok(None);
            }
            Err(source) => return Err(LauncherError::io(&metadata_path, source)),
        };

        let corrupt = |reason: String| LauncherError::CacheCorruption {
            path: metadata_path.clone(),
            reason,
        };

        let entry: CacheEntry = serde_json::from_slice(&bytes)
            .map_err(|e| corrupt(format!("unreadable metadata: {e}")))?;

        if entry.schema_version != ENTRY_SCHEMA_VERSION {
            return Err(corrupt(format!(
                "schema version {} (expected {ENTRY_SCHEMA_VERSION})",
                entry.schema_version
            )));
        }
        if &entry.artifact != artifact {
            return Err(corrupt(format!("record describes {}", entry.artifact)));
        }

        let expected_path = self.entry_path(artifact);
        if entry.local_path != expected_path {
            return Err(corrupt(format!(
                "record points at {:?} instead of {:?}",
                entry.local_path, expected_path
            )));
        }
        if !expected_path.is_file() {
            return Err(corrupt("binary is missing".to_string()));
        }

        let actual = sha256_file(&expected_path).await?;
        if !actual.matches(&entry.digest) {
            return Err(corrupt(format!(
                "digest {} does not match recorded {}",
                actual, entry.digest
            )));
        }

        if !is_executable(&expected_path) {
            debug!("Repairing executable bit on {:?}", expected_path);
            ensure_executable(&expected_path)
                .map_err(|e| corrupt(format!("cannot mark executable: {e}")))?;
        }

        Ok(Some(entry))
    }

    /// Record `entry`. The binary must already sit at the ref's path and
    /// hash to the recorded digest.
    #[instrument(skip(self, entry), fields(artifact = %entry.artifact))]
    pub async fn insert(&self, entry: &CacheEntry) -> LauncherResult<()> {
        let expected_path = self.entry_path(&entry.artifact);
        if entry.local_path != expected_path {
            return Err(LauncherError::CacheCorruption {
                path: entry.local_path.clone(),
                reason: format!("entry must live at {:?}", expected_path),
            });
        }

        let actual = sha256_file(&expected_path).await?;
        if !actual.matches(&entry.digest) {
            return Err(LauncherError::CacheCorruption {
                path: expected_path,
                reason: format!(
                    "refusing to record digest {} for content hashing to {}",
                    entry.digest, actual
                ),
            });
        }

        let metadata_path = self.metadata_path(&entry.artifact);
        let payload = serde_json::to_vec_pretty(entry)?;
        let tmp_path = metadata_path.with_extension(format!("json.{}.tmp", Uuid::new_v4()));
        tokio::fs::write(&tmp_path, payload)
            .await
            .map_err(|source| LauncherError::io(&tmp_path, source))?;
        if let Err(source) = tokio::fs::rename(&tmp_path, &metadata_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(LauncherError::io(&metadata_path, source));
        }

        info!("Recorded {} at {:?}", entry.artifact, entry.local_path);
        Ok(())
    }

    /// Remove the binary and its record. Returns whether anything existed.
    #[instrument(skip(self), fields(artifact = %artifact))]
    pub async fn evict(&self, artifact: &ArtifactRef) -> LauncherResult<bool> {
        let mut removed = false;
        // Metadata first: a record without a binary would be reported as
        // corrupt, a binary without a record is just a miss.
        for path in [self.metadata_path(artifact), self.entry_path(artifact)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed = true,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(LauncherError::io(&path, source)),
            }
        }
        if removed {
            info!("Evicted {}", artifact);
        }
        Ok(removed)
    }

    /// All recorded entries whose binary is still present.
    ///
    /// Does not re-hash; use [`BinaryCache::health_check`] for that.
    pub async fn list(&self) -> LauncherResult<Vec<CacheEntry>> {
        let mut entries = Vec::new();
        let mut platforms = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(source) => return Err(LauncherError::io(&self.root, source)),
        };

        while let Some(platform_dir) = platforms
            .next_entry()
            .await
            .map_err(|source| LauncherError::io(&self.root, source))?
        {
            let dir = platform_dir.path();
            let is_platform = dir
                .file_name()
                .and_then(|n| n.to_str())
                .map(|name| PlatformId::parse(name).is_ok())
                .unwrap_or(false);
            if !is_platform || !dir.is_dir() {
                continue;
            }

            let mut files = tokio::fs::read_dir(&dir)
                .await
                .map_err(|source| LauncherError::io(&dir, source))?;
            while let Some(file) = files
                .next_entry()
                .await
                .map_err(|source| LauncherError::io(&dir, source))?
            {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Ok(bytes) = tokio::fs::read(&path).await else {
                    continue;
                };
                let Ok(entry) = serde_json::from_slice::<CacheEntry>(&bytes) else {
                    continue;
                };
                if entry.local_path.is_file() {
                    entries.push(entry);
                }
            }
        }

        entries.sort_by(|a, b| {
            a.artifact
                .platform
                .to_string()
                .cmp(&b.artifact.platform.to_string())
                .then_with(|| b.verified_at.cmp(&a.verified_at))
        });
        Ok(entries)
    }

    /// Keep the `keep` most recently verified versions per platform.
    pub async fn prune(&self, keep: usize) -> LauncherResult<Vec<ArtifactRef>> {
        let mut by_platform: BTreeMap<String, Vec<CacheEntry>> = BTreeMap::new();
        for entry in self.list().await? {
            by_platform
                .entry(entry.artifact.platform.to_string())
                .or_default()
                .push(entry);
        }

        let mut evicted = Vec::new();
        for (_, mut entries) in by_platform {
            entries.sort_by(|a, b| b.verified_at.cmp(&a.verified_at));
            for stale in entries.into_iter().skip(keep) {
                if self.evict(&stale.artifact).await? {
                    evicted.push(stale.artifact);
                }
            }
        }
        Ok(evicted)
    }

    /// Remove abandoned staging files older than `older_than`.
    pub async fn clean_staging(&self, older_than: Duration) -> LauncherResult<usize> {
        let staging = self.staging_dir();
        let mut dir = match tokio::fs::read_dir(&staging).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(source) => return Err(LauncherError::io(&staging, source)),
        };

        let mut removed = 0;
        while let Some(file) = dir
            .next_entry()
            .await
            .map_err(|source| LauncherError::io(&staging, source))?
        {
            let path = file.path();
            let old_enough = file
                .metadata()
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|t| t.elapsed().ok())
                .map(|age| age >= older_than)
                .unwrap_or(false);
            if old_enough && tokio::fs::remove_file(&path).await.is_ok() {
                debug!("Removed abandoned staging file {:?}", path);
                removed += 1;
            }
        }
        Ok(removed)
    }
}
