use std::path::PathBuf;
use thiserror::Error;

/// Central error type for the launcher.
/// Every module returns `Result<T, LauncherError>`.
#[derive(Debug, Error)]
pub enum LauncherError {
    // ── Platform / version ──────────────────────────────
    #[error("unsupported platform: {os}-{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    #[error("invalid version {version:?}: {reason}")]
    InvalidVersion { version: String, reason: String },

    // ── Network ─────────────────────────────────────────
    #[error("network error while requesting {url}: {message}")]
    Network { url: String, message: String },

    #[error("download failed for {url}: HTTP {status}")]
    DownloadFailed { url: String, status: u16 },

    #[error("offline mode is enabled and {url} is not cached")]
    Offline { url: String },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    // ── Integrity ───────────────────────────────────────
    #[error("SHA-256 mismatch for {url}: expected {expected}, got {actual}")]
    Integrity {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("release manifest {manifest_url} has no artifact for {platform}")]
    ManifestMissingArtifact {
        manifest_url: String,
        platform: String,
    },

    // ── Cache ───────────────────────────────────────────
    #[error("cache entry at {path:?} is corrupt: {reason}")]
    CacheCorruption { path: PathBuf, reason: String },

    #[error("timed out waiting for install lock {path:?}")]
    LockTimeout { path: PathBuf },

    #[error("not enough free space in {path:?}: available={available} required={required}")]
    InsufficientDisk {
        path: PathBuf,
        available: u64,
        required: u64,
    },

    // ── Execution ───────────────────────────────────────
    #[error("binary not found at {path:?}")]
    MissingBinary { path: PathBuf },

    #[error("failed to execute {path:?}: {source}")]
    Spawn {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Config ──────────────────────────────────────────
    #[error("invalid configuration: {0}")]
    Config(String),

    // ── IO / JSON ───────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type LauncherResult<T> = Result<T, LauncherError>;

impl LauncherError {
    /// Wrap an IO error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LauncherError::Io {
            path: path.into(),
            source,
        }
    }

    /// Transient failures worth another download attempt.
    ///
    /// 4xx responses, digest mismatches and local disk errors are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            LauncherError::Network { .. } => true,
            LauncherError::DownloadFailed { status, .. } => (500..600).contains(status),
            _ => false,
        }
    }

    /// A concrete next step for the user, printed under the diagnostic.
    pub fn remediation(&self) -> String {
        match self {
            LauncherError::UnsupportedPlatform { .. } => format!(
                "Compass supports: {}. Build from source and set COMPASS_BINARY_PATH to use it.",
                crate::core::platform::supported_platforms_list()
            ),
            LauncherError::InvalidVersion { .. } => {
                "Set COMPASS_VERSION to a semantic version such as 1.4.0.".to_string()
            }
            LauncherError::Network { url, .. }
            | LauncherError::DownloadFailed { url, .. }
            | LauncherError::Integrity { url, .. } => format!(
                "Retry with `compass-launcher reinstall`, or download manually from {url} and set COMPASS_BINARY_PATH."
            ),
            LauncherError::Offline { url } => format!(
                "Unset COMPASS_OFFLINE to allow downloading, or download manually from {url} and set COMPASS_BINARY_PATH."
            ),
            LauncherError::ManifestMissingArtifact { manifest_url, .. } => format!(
                "This release was not published for your platform; check {manifest_url} or pick another COMPASS_VERSION."
            ),
            LauncherError::CacheCorruption { .. } => {
                "Run `compass-launcher reinstall` to discard the cached binary.".to_string()
            }
            LauncherError::LockTimeout { path } => format!(
                "Another install appears stuck; remove {} and try again.",
                path.display()
            ),
            LauncherError::InsufficientDisk { path, .. } => format!(
                "Free some disk space under {} or point COMPASS_CACHE_HOME elsewhere.",
                path.display()
            ),
            LauncherError::MissingBinary { .. } | LauncherError::Spawn { .. } => {
                "Run `compass-launcher reinstall`, or check COMPASS_BINARY_PATH.".to_string()
            }
            LauncherError::Config(_) => {
                "Check the COMPASS_* environment variables and launcher_settings.json.".to_string()
            }
            LauncherError::Io { path, .. } => format!(
                "Check permissions on {} or point COMPASS_CACHE_HOME elsewhere.",
                path.display()
            ),
            LauncherError::Http(_) | LauncherError::Json(_) => {
                "Run `compass-launcher reinstall`; if it keeps failing, check your proxy settings."
                    .to_string()
            }
        }
    }
}

impl From<std::io::Error> for LauncherError {
    fn from(source: std::io::Error) -> Self {
        LauncherError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_retryable() {
        let err = LauncherError::DownloadFailed {
            url: "https://example.com/a".into(),
            status: 503,
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn client_errors_are_final() {
        let err = LauncherError::DownloadFailed {
            url: "https://example.com/a".into(),
            status: 404,
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn integrity_errors_are_final() {
        let err = LauncherError::Integrity {
            url: "https://example.com/a".into(),
            expected: "deadbeef".into(),
            actual: "00".into(),
        };
        assert!(!err.is_retryable());
        assert!(err.remediation().contains("https://example.com/a"));
    }
}
