//! Filesystem helpers with operation + path context on every error.

use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Create a directory and its parents.
pub async fn ensure_dir_all(op: &'static str, path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| Error::io_path(op, path, e))
}

/// Synchronous variant for startup code.
pub fn ensure_dir_all_sync(op: &'static str, path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| Error::io_path(op, path, e))
}

/// Ensure the parent directory of a file path exists.
pub async fn ensure_parent_dir(op: &'static str, path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir_all(op, parent).await,
        _ => Ok(()),
    }
}

/// Size of a file in bytes, `None` when it does not exist (yet).
pub async fn file_size(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path).await.ok().map(|m| m.len())
}

/// Move `source` into `dir`, keeping its file name.
///
/// Falls back to copy + delete when a rename is not possible, e.g. across
/// filesystems.
pub async fn move_into_dir(source: &Path, dir: &Path) -> Result<PathBuf> {
    ensure_dir_all("creating directory", dir).await?;

    let file_name = source
        .file_name()
        .ok_or_else(|| Error::Other(format!("{} has no file name", source.display())))?;
    let target = dir.join(file_name);

    if tokio::fs::rename(source, &target).await.is_ok() {
        return Ok(target);
    }

    tokio::fs::copy(source, &target)
        .await
        .map_err(|e| Error::io_path("copying file to", &target, e))?;
    tokio::fs::remove_file(source)
        .await
        .map_err(|e| Error::io_path("removing file", source, e))?;
    Ok(target)
}

/// Write a file through a temporary sibling and rename it into place, so
/// readers never see a half-written file.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    ensure_parent_dir("creating directory", path).await?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|e| Error::io_path("writing file", &tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::io_path("renaming file to", path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn creates_nested_directories() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("a").join("b");
        ensure_dir_all("creating directory", &nested).await.unwrap();
        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn move_into_dir_keeps_file_name() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("clip.ts");
        tokio::fs::write(&source, b"data").await.unwrap();

        let target = move_into_dir(&source, &temp.path().join("done")).await.unwrap();
        assert_eq!(target, temp.path().join("done").join("clip.ts"));
        assert!(!source.exists());
        assert_eq!(tokio::fs::read(&target).await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn write_atomic_replaces_contents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sub").join("roster.toml");
        write_atomic(&path, b"one").await.unwrap();
        write_atomic(&path, b"two").await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"two");
        assert!(!temp.path().join("sub").join("roster.toml.tmp").exists());
    }

    #[tokio::test]
    async fn file_size_of_missing_file_is_none() {
        let temp = TempDir::new().unwrap();
        assert_eq!(file_size(&temp.path().join("nope")).await, None);
    }
}
