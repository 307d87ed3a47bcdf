// ─── Release Manifest ───
// One JSON document per release listing the SHA-256 of every platform asset.

use std::collections::BTreeMap;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::artifact::{ArtifactDescriptor, ContentDigest};
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::http::{self, RetryPolicy};

/// Top-level release manifest (`manifest.json` next to the assets).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseManifest {
    pub version: String,
    pub artifacts: BTreeMap<String, ManifestArtifact>,
}

/// A single platform entry in the manifest, keyed by platform id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestArtifact {
    pub sha256: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub name: Option<String>,
}

impl ReleaseManifest {
    /// Fetch and parse the manifest for the descriptor's release.
    pub async fn fetch(
        client: &Client,
        retry: &RetryPolicy,
        manifest_url: &str,
    ) -> LauncherResult<Self> {
        info!("Fetching release manifest {}", manifest_url);
        let manifest = retry
            .run(manifest_url, |_| async move {
                let response = http::get_checked(client, manifest_url).await?;
                response
                    .json::<ReleaseManifest>()
                    .await
                    .map_err(|e| http::classify_transport_error(manifest_url, e))
            })
            .await?;
        info!("Manifest lists {} artifacts", manifest.artifacts.len());
        Ok(manifest)
    }

    /// Complete `descriptor` with the digest published for its platform.
    pub fn complete(&self, descriptor: ArtifactDescriptor) -> LauncherResult<ArtifactDescriptor> {
        let wanted = &descriptor.artifact.version;
        let listed = self.version.trim_start_matches('v');
        if listed != wanted.as_str() {
            return Err(LauncherError::Integrity {
                url: descriptor.manifest_url.clone(),
                expected: format!("manifest for version {wanted}"),
                actual: format!("manifest for version {listed}"),
            });
        }

        let platform = descriptor.artifact.platform.to_string();
        let Some(entry) = self.artifacts.get(&platform) else {
            return Err(LauncherError::ManifestMissingArtifact {
                manifest_url: descriptor.manifest_url.clone(),
                platform,
            });
        };

        if let Some(name) = &entry.name {
            let expected_name = descriptor.artifact.remote_file_name();
            if name != &expected_name {
                return Err(LauncherError::Integrity {
                    url: descriptor.manifest_url.clone(),
                    expected: expected_name,
                    actual: name.clone(),
                });
            }
        }

        let digest = ContentDigest::new(&entry.sha256);
        Ok(descriptor.with_digest(digest, entry.size))
    }
}
