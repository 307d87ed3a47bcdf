use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::error::{LauncherError, LauncherResult};

pub const LOCK_STALE_SECS: i64 = 60 * 10;
/// How long an installer waits for another process's install to finish.
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5 * 60);
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Serialize, Deserialize)]
struct LockPayload {
    pid: u32,
    timestamp: i64,
}

/// Advisory install lock: a `create_new` file holding `{pid, timestamp}`.
///
/// Removed on drop. Locks left behind by dead processes, or older than
/// [`LOCK_STALE_SECS`], are broken by the next waiter.
#[derive(Debug)]
pub struct InstallLock {
    path: PathBuf,
}

impl InstallLock {
    pub async fn acquire(lock_path: &Path, wait_limit: Duration) -> LauncherResult<Self> {
        if let Some(parent) = lock_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| LauncherError::io(parent, source))?;
        }

        let started = Instant::now();
        let mut attempts = 0_u32;
        loop {
            attempts += 1;
            match tokio::fs::OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(lock_path)
                .await
            {
                Ok(mut file) => {
                    let payload = serde_json::to_vec(&LockPayload {
                        pid: std::process::id(),
                        timestamp: Utc::now().timestamp(),
                    })?;
                    file.write_all(&payload)
                        .await
                        .map_err(|source| LauncherError::io(lock_path, source))?;
                    debug!("Acquired install lock {:?}", lock_path);
                    return Ok(Self {
                        path: lock_path.to_path_buf(),
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    if remove_if_stale(lock_path).await {
                        continue;
                    }
                    if started.elapsed() >= wait_limit {
                        return Err(LauncherError::LockTimeout {
                            path: lock_path.to_path_buf(),
                        });
                    }
                    if attempts % 20 == 0 {
                        info!("Waiting for install lock at {:?}", lock_path);
                    }
                    tokio::time::sleep(LOCK_POLL_INTERVAL).await;
                }
                Err(source) => return Err(LauncherError::io(lock_path, source)),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        if let Err(source) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove lock {:?}: {}", self.path, source);
        }
    }
}

/// Returns true when the lock file was stale and has been removed.
async fn remove_if_stale(lock_path: &Path) -> bool {
    let Ok(content) = tokio::fs::read_to_string(lock_path).await else {
        return false;
    };
    let stale = match serde_json::from_str::<LockPayload>(&content) {
        Ok(payload) => {
            let expired =
                Utc::now().timestamp().saturating_sub(payload.timestamp) > LOCK_STALE_SECS;
            expired || !process_alive(payload.pid)
        }
        // A holder may be between create_new and write_all; only treat an
        // unparsable lock as stale once it is old.
        Err(_) => lock_file_age(lock_path)
            .map(|age| age.as_secs() as i64 > LOCK_STALE_SECS)
            .unwrap_or(false),
    };

    if stale {
        warn!("Breaking stale install lock {:?}", lock_path);
        return break_lock(lock_path, &content).await;
    }
    false
}

/// Move the lock aside under a unique name, then delete it.
///
/// Only one waiter's rename can succeed. If the file moved aside is not the
/// one judged stale, a new holder got in between and its lock is put back.
async fn break_lock(lock_path: &Path, judged: &str) -> bool {
    let aside = lock_path.with_extension(format!("lock.{}.stale", Uuid::new_v4()));
    if tokio::fs::rename(lock_path, &aside).await.is_err() {
        return false;
    }

    let taken = tokio::fs::read_to_string(&aside).await.unwrap_or_default();
    if taken != judged {
        debug!("Lock {:?} changed hands before it was broken", lock_path);
        if let Err(source) = tokio::fs::hard_link(&aside, lock_path).await {
            warn!("Could not restore lock {:?}: {}", lock_path, source);
        }
        let _ = tokio::fs::remove_file(&aside).await;
        return false;
    }

    let _ = tokio::fs::remove_file(&aside).await;
    true
}

fn lock_file_age(path: &Path) -> Option<Duration> {
    std::fs::metadata(path).ok()?.modified().ok()?.elapsed().ok()
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs the permission/existence check only.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}
