use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::artifact::{ArtifactRef, ContentDigest};

pub const ENTRY_SCHEMA_VERSION: u32 = 1;

/// Record of one verified binary, persisted next to it as
/// `<platform>/compass-<version>.json`.
///
/// Only created after the binary's digest has been confirmed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub schema_version: u32,
    pub artifact: ArtifactRef,
    pub local_path: PathBuf,
    pub digest: ContentDigest,
    pub verified_at: DateTime<Utc>,
    pub source_url: String,
    pub size: u64,
    pub launcher_version: String,
}

impl CacheEntry {
    pub fn new(
        artifact: ArtifactRef,
        local_path: PathBuf,
        digest: ContentDigest,
        source_url: String,
        size: u64,
    ) -> Self {
        Self {
            schema_version: ENTRY_SCHEMA_VERSION,
            artifact,
            local_path,
            digest,
            verified_at: Utc::now(),
            source_url,
            size,
            launcher_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
