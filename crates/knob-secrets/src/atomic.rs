//! Atomic file replacement
//!
//! Content goes to a temp file in the target's directory and is renamed
//! into place, so readers never see a partial file.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Who may read the written file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// Default permissions
    Public,
    /// Owner read/write only (0600 on Unix), from the moment the file exists
    Private,
}

/// Atomically write `content` to `path`.
///
/// The temp file is removed on every failure.
pub async fn atomic_write(path: &Path, content: &[u8], mode: FileMode) -> Result<()> {
    let tmp_path = temp_path(path);

    // a stale temp file would keep its old permissions
    match tokio::fs::remove_file(&tmp_path).await {
        Ok(()) => tracing::debug!(path = %tmp_path.display(), "removed stale temp file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e).with_context(|| format!("removing stale {}", tmp_path.display())),
    }

    let written = write_new(&tmp_path, content, mode)
        .await
        .with_context(|| format!("writing {}", tmp_path.display()));
    let result = match written {
        Ok(()) => tokio::fs::rename(&tmp_path, path)
            .await
            .with_context(|| format!("replacing {}", path.display())),
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        if let Err(cleanup) = tokio::fs::remove_file(&tmp_path).await {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %tmp_path.display(), error = %cleanup, "temp file left behind");
            }
        }
        return Err(e);
    }

    tracing::debug!(path = %path.display(), bytes = content.len(), "file written");
    Ok(())
}

async fn write_new(tmp_path: &Path, content: &[u8], mode: FileMode) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    apply_mode(&mut options, mode);

    let mut file = options.open(tmp_path).await?;
    file.write_all(content).await?;
    file.sync_all().await
}

#[cfg(unix)]
fn apply_mode(options: &mut tokio::fs::OpenOptions, mode: FileMode) {
    if mode == FileMode::Private {
        options.mode(0o600);
    }
}

#[cfg(not(unix))]
fn apply_mode(_options: &mut tokio::fs::OpenOptions, _mode: FileMode) {}

fn temp_path(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or(Path::new("."));
    parent.join(format!(
        ".{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");

        atomic_write(&path, b"first", FileMode::Public).await.unwrap();
        atomic_write(&path, b"second", FileMode::Public).await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert!(!temp_path(&path).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_private_mode_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.key");
        atomic_write(&path, b"key", FileMode::Private).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stale_temp_file_does_not_widen_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.key");
        let stale = temp_path(&path);
        std::fs::write(&stale, b"old").unwrap();
        std::fs::set_permissions(&stale, std::fs::Permissions::from_mode(0o644)).unwrap();

        atomic_write(&path, b"key", FileMode::Private).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(std::fs::read(&path).unwrap(), b"key");
    }

    #[tokio::test]
    async fn test_failed_rename_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        // a non-empty directory cannot be replaced by a file
        let path = dir.path().join("taken");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("inner"), b"x").unwrap();

        assert!(atomic_write(&path, b"secret", FileMode::Private).await.is_err());
        assert!(!temp_path(&path).exists());
        assert!(path.is_dir());
    }

    #[tokio::test]
    async fn test_missing_parent_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no/such/dir/file");
        assert!(atomic_write(&path, b"x", FileMode::Public).await.is_err());
    }
}
