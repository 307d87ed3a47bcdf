// ─── Platform Resolver ───
// Maps the host OS / CPU pair onto the identifiers used in release names.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::error::{LauncherError, LauncherResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    #[serde(rename = "darwin")]
    Macos,
    Linux,
    Windows,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    X64,
    Arm64,
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Os::Macos => write!(f, "darwin"),
            Os::Linux => write!(f, "linux"),
            Os::Windows => write!(f, "windows"),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::X64 => write!(f, "x64"),
            Arch::Arm64 => write!(f, "arm64"),
        }
    }
}

/// A validated (os, arch) pair. Only values from [`SUPPORTED_PLATFORMS`]
/// can be constructed outside this module.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PlatformId {
    os: Os,
    arch: Arch,
}

pub const SUPPORTED_PLATFORMS: [PlatformId; 5] = [
    PlatformId { os: Os::Macos, arch: Arch::X64 },
    PlatformId { os: Os::Macos, arch: Arch::Arm64 },
    PlatformId { os: Os::Linux, arch: Arch::X64 },
    PlatformId { os: Os::Linux, arch: Arch::Arm64 },
    PlatformId { os: Os::Windows, arch: Arch::X64 },
];

impl PlatformId {
    pub fn os(&self) -> Os {
        self.os
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// Executable suffix for this platform (`.exe` on Windows).
    pub fn exe_suffix(&self) -> &'static str {
        match self.os {
            Os::Windows => ".exe",
            _ => "",
        }
    }

    /// Parse a rendered identifier such as `linux-arm64`.
    pub fn parse(id: &str) -> LauncherResult<Self> {
        let (os, arch) = id.split_once('-').ok_or_else(|| LauncherError::UnsupportedPlatform {
            os: id.to_string(),
            arch: String::new(),
        })?;
        SUPPORTED_PLATFORMS
            .iter()
            .copied()
            .find(|p| p.os.to_string() == os && p.arch.to_string() == arch)
            .ok_or_else(|| LauncherError::UnsupportedPlatform {
                os: os.to_string(),
                arch: arch.to_string(),
            })
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}

/// Resolve the platform of the running process.
pub fn resolve() -> LauncherResult<PlatformId> {
    resolve_from(std::env::consts::OS, std::env::consts::ARCH)
}

/// Resolve a Rust `(target_os, target_arch)` pair against the allow-list.
pub fn resolve_from(os: &str, arch: &str) -> LauncherResult<PlatformId> {
    let unsupported = || LauncherError::UnsupportedPlatform {
        os: os.to_string(),
        arch: arch.to_string(),
    };

    let mapped_os = match os {
        "macos" => Os::Macos,
        "linux" => Os::Linux,
        "windows" => Os::Windows,
        _ => return Err(unsupported()),
    };
    let mapped_arch = match arch {
        "x86_64" => Arch::X64,
        "aarch64" => Arch::Arm64,
        _ => return Err(unsupported()),
    };

    let candidate = PlatformId {
        os: mapped_os,
        arch: mapped_arch,
    };
    if SUPPORTED_PLATFORMS.contains(&candidate) {
        Ok(candidate)
    } else {
        Err(unsupported())
    }
}

/// Human readable allow-list for diagnostics.
pub fn supported_platforms_list() -> String {
    SUPPORTED_PLATFORMS
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
