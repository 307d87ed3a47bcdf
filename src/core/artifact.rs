// ─── Artifact Locator ───
// Pure string composition: version + platform → URLs and cache file names.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::platform::PlatformId;

pub const BINARY_NAME: &str = "compass";
pub const DEFAULT_DOWNLOAD_BASE: &str = "https://github.com/compass-cli/compass/releases/download";
pub const MANIFEST_FILE: &str = "manifest.json";

/// A semantic version string, validated on construction.
///
/// A leading `v` (as in release tags) is accepted and stripped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct Version(String);

impl Version {
    pub fn parse(raw: &str) -> LauncherResult<Self> {
        let trimmed = raw.trim();
        let candidate = trimmed.strip_prefix('v').unwrap_or(trimmed);
        semver::Version::parse(candidate).map_err(|e| LauncherError::InvalidVersion {
            version: raw.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self(candidate.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Release tag used in download URLs (`v1.4.0`).
    pub fn tag(&self) -> String {
        format!("v{}", self.0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Version {
    type Error = LauncherError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Version::parse(&value)
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.0
    }
}

/// Lowercase hex SHA-256 digest.
///
/// Not length-checked: a malformed expected digest simply never matches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ContentDigest(String);

impl ContentDigest {
    pub fn new(hex: &str) -> Self {
        Self(hex.trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, other: &ContentDigest) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies exactly one binary build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ArtifactRef {
    pub version: Version,
    pub platform: PlatformId,
}

impl ArtifactRef {
    pub fn new(version: Version, platform: PlatformId) -> Self {
        Self { version, platform }
    }

    /// Name of the published release asset (`compass-linux-x64`).
    pub fn remote_file_name(&self) -> String {
        format!("{}-{}{}", BINARY_NAME, self.platform, self.platform.exe_suffix())
    }

    /// Name of the installed executable (`compass-1.4.0`).
    pub fn local_file_name(&self) -> String {
        format!("{}-{}{}", BINARY_NAME, self.version, self.platform.exe_suffix())
    }

    /// Path relative to the cache root. Fully determined by the ref.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(self.platform.to_string()).join(self.local_file_name())
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", BINARY_NAME, self.version, self.platform)
    }
}

/// Everything needed to fetch one artifact. Never mutated; use
/// [`ArtifactDescriptor::with_digest`] to derive a completed copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    pub artifact: ArtifactRef,
    pub url: String,
    pub manifest_url: String,
    pub expected_digest: Option<ContentDigest>,
    pub size_hint: Option<u64>,
}

impl ArtifactDescriptor {
    pub fn with_digest(self, digest: ContentDigest, size_hint: Option<u64>) -> Self {
        Self {
            expected_digest: Some(digest),
            size_hint: size_hint.or(self.size_hint),
            ..self
        }
    }
}

/// Composes remote locations under a release base URL.
#[derive(Debug, Clone)]
pub struct Locator {
    base_url: String,
    pinned_digest: Option<ContentDigest>,
}

impl Default for Locator {
    fn default() -> Self {
        Self::new(DEFAULT_DOWNLOAD_BASE)
    }
}

impl Locator {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            pinned_digest: None,
        }
    }

    /// Use a locally pinned digest instead of the release manifest.
    pub fn with_pinned_digest(mut self, digest: Option<ContentDigest>) -> Self {
        self.pinned_digest = digest;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the descriptor for `version` on `platform`.
    ///
    /// Template:
    /// `<base>/v<version>/compass-<os>-<arch>[.exe]`
    pub fn locate(&self, version: &str, platform: PlatformId) -> LauncherResult<ArtifactDescriptor> {
        let version = Version::parse(version)?;
        let artifact = ArtifactRef::new(version, platform);
        let url = format!(
            "{}/{}/{}",
            self.base_url,
            artifact.version.tag(),
            artifact.remote_file_name()
        );

        Ok(ArtifactDescriptor {
            manifest_url: self.manifest_url(&artifact.version),
            url,
            expected_digest: self.pinned_digest.clone(),
            size_hint: None,
            artifact,
        })
    }

    pub fn manifest_url(&self, version: &Version) -> String {
        format!("{}/{}/{}", self.base_url, version.tag(), MANIFEST_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::platform::resolve_from;

    #[test]
    fn url_construction() {
        let locator = Locator::new("https://dl.example.com/releases/");
        let platform = resolve_from("linux", "aarch64").unwrap();
        let descriptor = locator.locate("1.4.0", platform).unwrap();
        assert_eq!(
            descriptor.url,
            "https://dl.example.com/releases/v1.4.0/compass-linux-arm64"
        );
        assert_eq!(
            descriptor.manifest_url,
            "https://dl.example.com/releases/v1.4.0/manifest.json"
        );
        assert_eq!(descriptor.expected_digest, None);
    }

    #[test]
    fn windows_assets_carry_exe_suffix() {
        let platform = resolve_from("windows", "x86_64").unwrap();
        let descriptor = Locator::default().locate("v2.0.0-rc.1", platform).unwrap();
        assert!(descriptor.url.ends_with("/v2.0.0-rc.1/compass-windows-x64.exe"));
        assert_eq!(
            descriptor.artifact.relative_path(),
            PathBuf::from("windows-x64").join("compass-2.0.0-rc.1.exe")
        );
    }

    #[test]
    fn rejects_non_semver() {
        let platform = resolve_from("linux", "x86_64").unwrap();
        for bad in ["latest", "1.4", "", "1.4.0.1"] {
            let err = Locator::default().locate(bad, platform).unwrap_err();
            assert!(matches!(err, LauncherError::InvalidVersion { .. }), "{bad}");
        }
    }

    #[test]
    fn pinned_digest_is_carried_into_descriptor() {
        let platform = resolve_from("macos", "aarch64").unwrap();
        let descriptor = Locator::default()
            .with_pinned_digest(Some(ContentDigest::new("ABCDEF")))
            .locate("1.0.0", platform)
            .unwrap();
        assert_eq!(descriptor.expected_digest, Some(ContentDigest::new("abcdef")));
    }

    #[test]
    fn relative_path_is_distinct_per_ref() {
        let platform = resolve_from("linux", "x86_64").unwrap();
        let a = ArtifactRef::new(Version::parse("1.0.0").unwrap(), platform);
        let b = ArtifactRef::new(Version::parse("1.0.1").unwrap(), platform);
        assert_ne!(a.relative_path(), b.relative_path());
    }
}
