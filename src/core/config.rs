// ─── Launcher Configuration ───
// defaults → launcher_settings.json → COMPASS_* environment variables.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::artifact::{ContentDigest, Locator, DEFAULT_DOWNLOAD_BASE};
use crate::core::cache::BinaryCache;
use crate::core::downloader::Fetcher;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::http::{build_http_client, RetryPolicy};

const APP_DIR_NAME: &str = "compass";
const SETTINGS_FILE: &str = "launcher_settings.json";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;

pub const ENV_VERSION: &str = "COMPASS_VERSION";
pub const ENV_CACHE_HOME: &str = "COMPASS_CACHE_HOME";
pub const ENV_CONFIG_HOME: &str = "COMPASS_CONFIG_HOME";
pub const ENV_DOWNLOAD_URL: &str = "COMPASS_DOWNLOAD_URL";
pub const ENV_BINARY_PATH: &str = "COMPASS_BINARY_PATH";
pub const ENV_OFFLINE: &str = "COMPASS_OFFLINE";
pub const ENV_PROXY: &str = "COMPASS_PROXY";
pub const ENV_EXPECTED_SHA256: &str = "COMPASS_EXPECTED_SHA256";
pub const ENV_MAX_RETRIES: &str = "COMPASS_MAX_RETRIES";
pub const ENV_HTTP_TIMEOUT_SECS: &str = "COMPASS_HTTP_TIMEOUT_SECS";

/// Optional settings persisted in `launcher_settings.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherSettings {
    pub download_url: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub offline: Option<bool>,
    pub proxy: Option<String>,
    pub max_retries: Option<u32>,
    pub http_timeout_secs: Option<u64>,
}

/// Fully resolved launcher configuration.
#[derive(Debug, Clone)]
pub struct LauncherConfig {
    pub version: String,
    pub cache_root: PathBuf,
    pub config_dir: PathBuf,
    pub download_url: String,
    pub binary_override: Option<PathBuf>,
    pub offline: bool,
    pub proxy: Option<String>,
    pub pinned_digest: Option<ContentDigest>,
    pub retry: RetryPolicy,
    pub http_timeout: Duration,
}

impl LauncherConfig {
    /// Resolve from the process environment.
    pub fn from_env() -> LauncherResult<Self> {
        let vars: HashMap<String, String> = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        Self::from_vars(&vars)
    }

    /// Resolve from an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> LauncherResult<Self> {
        let var = |key: &str| {
            vars.get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let config_dir = var(ENV_CONFIG_HOME)
            .map(PathBuf::from)
            .unwrap_or_else(default_config_dir);
        let settings = load_settings_from_disk(&config_dir).unwrap_or_default();

        let cache_root = var(ENV_CACHE_HOME)
            .map(PathBuf::from)
            .or(settings.cache_dir)
            .unwrap_or_else(default_cache_dir);

        let download_url = var(ENV_DOWNLOAD_URL)
            .or(settings.download_url)
            .unwrap_or_else(|| DEFAULT_DOWNLOAD_BASE.to_string());

        let offline = match var(ENV_OFFLINE) {
            Some(raw) => parse_flag(ENV_OFFLINE, &raw)?,
            None => settings.offline.unwrap_or(false),
        };

        let max_retries = match var(ENV_MAX_RETRIES) {
            Some(raw) => parse_number::<u32>(ENV_MAX_RETRIES, &raw)?,
            None => settings
                .max_retries
                .unwrap_or(RetryPolicy::default().max_retries),
        };

        let http_timeout_secs = match var(ENV_HTTP_TIMEOUT_SECS) {
            Some(raw) => parse_number::<u64>(ENV_HTTP_TIMEOUT_SECS, &raw)?,
            None => settings
                .http_timeout_secs
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
        };

        Ok(Self {
            version: var(ENV_VERSION).unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            cache_root,
            config_dir,
            download_url,
            binary_override: var(ENV_BINARY_PATH).map(PathBuf::from),
            offline,
            proxy: var(ENV_PROXY).or(settings.proxy),
            pinned_digest: var(ENV_EXPECTED_SHA256).map(|d| ContentDigest::new(&d)),
            retry: RetryPolicy {
                max_retries,
                ..RetryPolicy::default()
            },
            http_timeout: Duration::from_secs(http_timeout_secs),
        })
    }

    pub fn locator(&self) -> Locator {
        Locator::new(&self.download_url).with_pinned_digest(self.pinned_digest.clone())
    }

    pub fn cache(&self) -> BinaryCache {
        BinaryCache::new(&self.cache_root)
    }

    pub fn fetcher(&self) -> LauncherResult<Fetcher> {
        let client = build_http_client(self.http_timeout, self.proxy.as_deref())?;
        Ok(Fetcher::new(client, self.cache())
            .with_retry(self.retry)
            .offline(self.offline))
    }

    pub fn settings_path(&self) -> PathBuf {
        self.config_dir.join(SETTINGS_FILE)
    }
}

fn load_settings_from_disk(config_dir: &Path) -> Option<LauncherSettings> {
    let path = config_dir.join(SETTINGS_FILE);
    let raw = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(settings) => {
            debug!("Loaded settings from {:?}", path);
            Some(settings)
        }
        Err(e) => {
            warn!("Ignoring malformed {:?}: {}", path, e);
            None
        }
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

fn parse_flag(key: &str, raw: &str) -> LauncherResult<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(LauncherError::Config(format!(
            "{key} must be a boolean, got {other:?}"
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> LauncherResult<T> {
    raw.parse::<T>()
        .map_err(|_| LauncherError::Config(format!("{key} must be a number, got {raw:?}")))
}
