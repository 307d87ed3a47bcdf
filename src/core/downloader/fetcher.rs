use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use crate::core::artifact::{ArtifactDescriptor, ContentDigest};
use crate::core::cache::files::ensure_executable;
use crate::core::cache::lock::{DEFAULT_LOCK_WAIT, LOCK_STALE_SECS};
use crate::core::cache::{BinaryCache, CacheEntry, InstallLock};
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::http::{self, RetryPolicy};
use crate::core::manifest::ReleaseManifest;

const DISK_HEADROOM_BYTES: u64 = 64 * 1024 * 1024;

/// A finished, hashed download sitting in the staging area.
struct StagedDownload {
    file: StagingFile,
    digest: ContentDigest,
    size: u64,
}

/// Staging file that deletes itself unless handed off with [`StagingFile::keep`].
struct StagingFile {
    path: PathBuf,
    keep: bool,
}

impl StagingFile {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    fn keep(mut self) -> PathBuf {
        self.keep = true;
        std::mem::take(&mut self.path)
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if !self.keep && !self.path.as_os_str().is_empty() {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Downloads artifacts into the staging area, verifies them, and renames
/// them into the [`BinaryCache`].
///
/// Ordering is always write-temp → verify → rename; nothing reaches an
/// entry path before its digest is confirmed.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    cache: BinaryCache,
    retry: RetryPolicy,
    offline: bool,
    lock_wait: Duration,
}

impl Fetcher {
    pub fn new(client: Client, cache: BinaryCache) -> Self {
        Self {
            client,
            cache,
            retry: RetryPolicy::default(),
            offline: false,
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    pub fn cache(&self) -> &BinaryCache {
        &self.cache
    }

    /// Ensure the descriptor's artifact is installed and verified.
    ///
    /// A cache hit whose digest agrees with the descriptor (when the
    /// descriptor carries one) is returned without touching the network.
    #[instrument(skip(self, descriptor), fields(artifact = %descriptor.artifact))]
    pub async fn fetch(&self, descriptor: &ArtifactDescriptor) -> LauncherResult<CacheEntry> {
        if let Some(entry) = self.usable_hit(descriptor).await {
            debug!("Cache hit at {:?}", entry.local_path);
            return Ok(entry);
        }

        if self.offline {
            return Err(LauncherError::Offline {
                url: descriptor.url.clone(),
            });
        }

        let descriptor = self.resolve_digest(descriptor).await?;
        let artifact = &descriptor.artifact;
        self.cache.prepare(artifact).await?;

        let lock = InstallLock::acquire(&self.cache.lock_path(artifact), self.lock_wait).await?;

        // Another process may have finished the install while we waited.
        // Holding the lock, a corrupt entry can be evicted safely.
        let current = self.cache.lookup_or_discard(artifact, &lock).await;
        if let Some(entry) = matching_digest(&descriptor, current) {
            debug!("Install completed concurrently at {:?}", entry.local_path);
            return Ok(entry);
        }

        if let Err(err) = self
            .cache
            .clean_staging(Duration::from_secs(LOCK_STALE_SECS as u64))
            .await
        {
            debug!("Staging cleanup skipped: {}", err);
        }
        if let Some(size) = descriptor.size_hint {
            ensure_min_disk_space(self.cache.root(), size.saturating_add(DISK_HEADROOM_BYTES))?;
        }

        self.download_and_install(&descriptor).await
    }

    /// Download, verify, rename into place and record.
    async fn download_and_install(
        &self,
        descriptor: &ArtifactDescriptor,
    ) -> LauncherResult<CacheEntry> {
        let expected = descriptor
            .expected_digest
            .clone()
            .ok_or_else(|| LauncherError::Integrity {
                url: descriptor.url.clone(),
                expected: "a published SHA-256 digest".to_string(),
                actual: "none".to_string(),
            })?;

        let download_start = Instant::now();
        info!("Downloading {} from {}", descriptor.artifact, descriptor.url);
        let staged = self
            .retry
            .run(&descriptor.url, |attempt| self.download_attempt(descriptor, attempt))
            .await?;
        info!(
            "Download of {} bytes finished in {:?}",
            staged.size,
            download_start.elapsed()
        );

        if !staged.digest.matches(&expected) {
            // `staged` drops here and removes the staging file.
            return Err(LauncherError::Integrity {
                url: descriptor.url.clone(),
                expected: expected.to_string(),
                actual: staged.digest.to_string(),
            });
        }

        ensure_executable(&staged.file.path)?;

        let final_path = self.cache.entry_path(&descriptor.artifact);
        let staged_path = staged.file.keep();
        if let Err(source) = tokio::fs::rename(&staged_path, &final_path).await {
            let _ = tokio::fs::remove_file(&staged_path).await;
            return Err(LauncherError::io(&final_path, source));
        }

        let entry = CacheEntry::new(
            descriptor.artifact.clone(),
            final_path,
            staged.digest,
            descriptor.url.clone(),
            staged.size,
        );
        self.cache.insert(&entry).await?;
        info!("Installed {} at {:?}", entry.artifact, entry.local_path);
        Ok(entry)
    }

    /// One full download from byte zero into a fresh staging file,
    /// hashing chunks as they arrive.
    async fn download_attempt(
        &self,
        descriptor: &ArtifactDescriptor,
        attempt: u32,
    ) -> LauncherResult<StagedDownload> {
        let url = descriptor.url.as_str();
        let staging = StagingFile::new(self.cache.new_staging_path());
        debug!("Attempt {} for {} into {:?}", attempt + 1, url, staging.path);

        let response = http::get_checked(&self.client, url).await?;
        let mut file = tokio::fs::File::create(&staging.path)
            .await
            .map_err(|source| LauncherError::io(&staging.path, source))?;

        let mut hasher = Sha256::new();
        let mut size = 0_u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| http::classify_transport_error(url, e))?;
            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|source| LauncherError::io(&staging.path, source))?;
            size = size.saturating_add(chunk.len() as u64);
        }

        file.flush()
            .await
            .map_err(|source| LauncherError::io(&staging.path, source))?;
        file.sync_all()
            .await
            .map_err(|source| LauncherError::io(&staging.path, source))?;
        drop(file);

        if let Some(expected_size) = descriptor.size_hint {
            if expected_size != size {
                warn!(
                    "Size of {} differs from manifest: expected {} got {}",
                    url, expected_size, size
                );
            }
        }

        Ok(StagedDownload {
            file: staging,
            digest: ContentDigest::new(&hex::encode(hasher.finalize())),
            size,
        })
    }

    async fn resolve_digest(
        &self,
        descriptor: &ArtifactDescriptor,
    ) -> LauncherResult<ArtifactDescriptor> {
        if descriptor.expected_digest.is_some() {
            return Ok(descriptor.clone());
        }
        let manifest =
            ReleaseManifest::fetch(&self.client, &self.retry, &descriptor.manifest_url).await?;
        manifest.complete(descriptor.clone())
    }

    async fn usable_hit(&self, descriptor: &ArtifactDescriptor) -> Option<CacheEntry> {
        let entry = self.cache.lookup(&descriptor.artifact).await;
        matching_digest(descriptor, entry)
    }
}

fn matching_digest(
    descriptor: &ArtifactDescriptor,
    entry: Option<CacheEntry>,
) -> Option<CacheEntry> {
    let entry = entry?;
    match &descriptor.expected_digest {
        Some(expected) if !expected.matches(&entry.digest) => {
            warn!(
                "Cached {} has digest {} but {} is expected; reinstalling",
                entry.artifact, entry.digest, expected
            );
            None
        }
        _ => Some(entry),
    }
}

fn ensure_min_disk_space(path: &Path, minimum_bytes: u64) -> LauncherResult<()> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let mut best_len = 0usize;
    let mut available = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if canonical.starts_with(mount) {
            let len = mount.as_os_str().len();
            if len >= best_len {
                best_len = len;
                available = Some(disk.available_space());
            }
        }
    }
    match available {
        Some(bytes) if bytes < minimum_bytes => Err(LauncherError::InsufficientDisk {
            path: path.to_path_buf(),
            available: bytes,
            required: minimum_bytes,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_file_is_removed_unless_kept() {
        let dir = tempfile::tempdir().unwrap();
        let dropped = dir.path().join("a.part");
        let kept = dir.path().join("b.part");
        std::fs::write(&dropped, b"x").unwrap();
        std::fs::write(&kept, b"y").unwrap();

        drop(StagingFile::new(dropped.clone()));
        let path = StagingFile::new(kept.clone()).keep();

        assert!(!dropped.exists());
        assert!(kept.exists());
        assert_eq!(path, kept);
    }

    #[test]
    fn disk_check_passes_for_tiny_requirements() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ensure_min_disk_space(dir.path(), 1).is_ok());
    }
}
