// ─── Compass Launcher Core ───
// Resolves, verifies, caches and runs the platform-specific Compass binary.
//
// Architecture:
//   core/
//     platform    — Host OS/arch detection → PlatformId
//     artifact    — Version, ArtifactRef, URL composition (Locator)
//     manifest    — Per-release digest manifest
//     http        — Client builder + retry policy
//     downloader/ — Streaming fetch with SHA-256 verification
//     cache/      — On-disk binary store, metadata and install lock
//     launch/     — State machine + child process runner
//     config      — Defaults, settings file and COMPASS_* variables

pub mod artifact;
pub mod cache;
pub mod config;
pub mod downloader;
pub mod error;
pub mod http;
pub mod launch;
pub mod manifest;
pub mod platform;
