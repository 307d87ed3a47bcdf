use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::core::artifact::ContentDigest;
use crate::core::error::{LauncherError, LauncherResult};

const HASH_BUFFER_BYTES: usize = 64 * 1024;

/// Stream a file through SHA-256 without loading it into memory.
pub async fn sha256_file(path: &Path) -> LauncherResult<ContentDigest> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|source| LauncherError::io(path, source))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BUFFER_BYTES];

    loop {
        let n = file
            .read(&mut buffer)
            .await
            .map_err(|source| LauncherError::io(path, source))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(ContentDigest::new(&hex::encode(hasher.finalize())))
}

#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Set mode 0755 on Unix; no-op elsewhere.
pub fn ensure_executable(path: &Path) -> LauncherResult<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path)
            .map_err(|source| LauncherError::io(path, source))?
            .permissions();
        if perms.mode() & 0o755 != 0o755 {
            perms.set_mode(0o755);
            std::fs::set_permissions(path, perms)
                .map_err(|source| LauncherError::io(path, source))?;
        }
    }
    #[cfg(not(unix))]
    {
        if !path.is_file() {
            return Err(LauncherError::MissingBinary {
                path: path.to_path_buf(),
            });
        }
    }
    Ok(())
}
