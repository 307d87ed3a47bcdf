use std::ffi::OsString;
use std::fmt;
use std::path::Path;

use tracing::{debug, error, info, instrument, warn};

use super::state::{LaunchSession, LaunchState};
use super::task::{spawn_child, ExitOutcome};
use crate::core::artifact::ArtifactDescriptor;
use crate::core::cache::files::ensure_executable;
use crate::core::cache::CacheEntry;
use crate::core::config::LauncherConfig;
use crate::core::error::LauncherError;
use crate::core::platform;

/// A launcher-level failure with enough context for a user-facing report.
#[derive(Debug)]
pub struct LaunchFailure {
    pub artifact: Option<String>,
    pub url: Option<String>,
    pub error: LauncherError,
}

impl LaunchFailure {
    fn new(error: LauncherError) -> Self {
        Self {
            artifact: None,
            url: None,
            error,
        }
    }

    fn for_descriptor(descriptor: &ArtifactDescriptor, error: LauncherError) -> Self {
        Self {
            artifact: Some(descriptor.artifact.to_string()),
            url: Some(descriptor.url.clone()),
            error,
        }
    }

    /// Multi-line diagnostic for stderr.
    pub fn render(&self) -> String {
        let mut out = String::from("compass: unable to launch");
        if let Some(artifact) = &self.artifact {
            out.push(' ');
            out.push_str(artifact);
        }
        out.push('\n');
        if let Some(url) = &self.url {
            out.push_str(&format!("  url:   {url}\n"));
        }
        out.push_str(&format!("  error: {}\n", self.error));
        out.push_str(&format!("  fix:   {}", self.error.remediation()));
        out
    }
}

impl From<LauncherError> for LaunchFailure {
    fn from(error: LauncherError) -> Self {
        Self::new(error)
    }
}

impl fmt::Display for LaunchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl std::error::Error for LaunchFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Resolves, installs if needed, and runs the Compass binary.
pub struct Launcher {
    config: LauncherConfig,
}

impl Launcher {
    pub fn new(config: LauncherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    /// Run `version` with `argv` (program name excluded) and exactly `env`.
    ///
    /// Returns how the child terminated; the caller decides how to mirror it.
    #[instrument(skip(self, argv, env))]
    pub async fn run(
        &self,
        version: &str,
        argv: &[OsString],
        env: &[(OsString, OsString)],
    ) -> Result<ExitOutcome, LaunchFailure> {
        let mut session = LaunchSession::new();
        let result = match &self.config.binary_override {
            Some(path) => self.run_override(&mut session, path, argv, env).await,
            None => self.run_managed(&mut session, version, argv, env).await,
        };
        if let Err(failure) = &result {
            enter(&mut session, LaunchState::Failed(failure.error.to_string()));
        }
        result
    }

    async fn run_override(
        &self,
        session: &mut LaunchSession,
        path: &Path,
        argv: &[OsString],
        env: &[(OsString, OsString)],
    ) -> Result<ExitOutcome, LaunchFailure> {
        info!("Using local binary override {:?}", path);
        if !path.is_file() {
            return Err(LaunchFailure::new(LauncherError::MissingBinary {
                path: path.to_path_buf(),
            }));
        }
        if let Err(e) = ensure_executable(path) {
            warn!("Could not mark {:?} executable: {}", path, e);
        }
        enter(session, LaunchState::Spawning);
        self.spawn(session, path, argv, env)
            .await
            .map_err(|e| LaunchFailure {
                artifact: Some(path.display().to_string()),
                url: None,
                error: e,
            })
    }

    async fn run_managed(
        &self,
        session: &mut LaunchSession,
        version: &str,
        argv: &[OsString],
        env: &[(OsString, OsString)],
    ) -> Result<ExitOutcome, LaunchFailure> {
        enter(session, LaunchState::Resolving);
        let platform = platform::resolve().map_err(LaunchFailure::new)?;
        let descriptor = self
            .config
            .locator()
            .locate(version, platform)
            .map_err(LaunchFailure::new)?;

        enter(session, LaunchState::CacheLookup);
        let entry = match self.cached_entry(&descriptor).await {
            Some(entry) => entry,
            None => {
                enter(session, LaunchState::Fetching);
                let fetcher = self
                    .config
                    .fetcher()
                    .map_err(|e| LaunchFailure::for_descriptor(&descriptor, e))?;
                fetcher
                    .fetch(&descriptor)
                    .await
                    .map_err(|e| LaunchFailure::for_descriptor(&descriptor, e))?
            }
        };

        ensure_executable(&entry.local_path)
            .map_err(|e| LaunchFailure::for_descriptor(&descriptor, e))?;

        enter(session, LaunchState::Spawning);
        self.spawn(session, &entry.local_path, argv, env)
            .await
            .map_err(|e| LaunchFailure::for_descriptor(&descriptor, e))
    }

    async fn cached_entry(&self, descriptor: &ArtifactDescriptor) -> Option<CacheEntry> {
        let entry = self.config.cache().lookup(&descriptor.artifact).await?;
        if let Some(expected) = &descriptor.expected_digest {
            if !expected.matches(&entry.digest) {
                debug!("Cached digest {} differs from pinned {}", entry.digest, expected);
                return None;
            }
        }
        debug!("Cache hit for {}", descriptor.artifact);
        Some(entry)
    }

    async fn spawn(
        &self,
        session: &mut LaunchSession,
        binary: &Path,
        argv: &[OsString],
        env: &[(OsString, OsString)],
    ) -> Result<ExitOutcome, LauncherError> {
        let child = spawn_child(binary, argv, env)?;
        enter(session, LaunchState::Running);
        let outcome = child.wait().await?;
        enter(session, LaunchState::Terminated(outcome));
        Ok(outcome)
    }
}

fn enter(session: &mut LaunchSession, next: LaunchState) {
    if let Err(msg) = session.advance(next) {
        error!("{}", msg);
    }
}
