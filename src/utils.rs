use crate::Result;
use anyhow::Context;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::fs::ReadDir;

/// Write a file.
pub(crate) async fn write(path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<()> {
    let path = path.as_ref();
    tokio::fs::write(path, contents)
        .await
        .context(format!("Unable to write to {}", path.to_string_lossy()))
}

/// Writes to a sibling temp file and then renames it over `path` so that readers never see a
/// partially written file.
pub(crate) async fn write_atomic(path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<()> {
    let path = path.as_ref();
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    write(&tmp, contents).await?;
    rename(&tmp, path).await
}

/// Read a file to a `String`.
pub async fn read(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read file at {}", path.display()))
}

/// Read a file to bytes.
pub async fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read file at {}", path.display()))
}

/// Deserialize a JSON file into type `T`.
pub async fn deserialize<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let content = read(path).await?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse JSON file at {}", path.display()))
}

/// Basically move a file. Renames `from` -> `to`.
pub async fn rename(from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<()> {
    tokio::fs::rename(from.as_ref(), to.as_ref())
        .await
        .with_context(|| {
            format!(
                "Unable to move file from '{}' to '{}'",
                from.as_ref().to_string_lossy(),
                to.as_ref().to_string_lossy()
            )
        })
}

/// Copies `from` to `to`, overwriting `to` if it exists.
pub async fn copy(from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<()> {
    tokio::fs::copy(from.as_ref(), to.as_ref())
        .await
        .with_context(|| {
            format!(
                "Unable to copy file from '{}' to '{}'",
                from.as_ref().to_string_lossy(),
                to.as_ref().to_string_lossy()
            )
        })?;
    Ok(())
}

/// Removes a file.
pub async fn remove(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    tokio::fs::remove_file(path)
        .await
        .with_context(|| format!("Unable to remove file {}", path.display()))
}

/// Creates a directory and any missing parents. Does nothing if it already exists.
pub async fn make_dir(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    tokio::fs::create_dir_all(path)
        .await
        .with_context(|| format!("Unable to create directory {}", path.display()))
}

/// Removes everything inside `path` but leaves the directory itself in place.
pub async fn empty_dir(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let mut dir = read_dir(path).await?;
    while let Some(entry) = dir
        .next_entry()
        .await
        .context("Failed to read directory entry")?
    {
        let p = entry.path();
        if p.is_dir() {
            tokio::fs::remove_dir_all(&p)
                .await
                .with_context(|| format!("Unable to remove directory {}", p.display()))?;
        } else {
            remove(&p).await?;
        }
    }
    Ok(())
}

/// Returns the absolute, canonical form of `path`.
pub async fn canonicalize(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    tokio::fs::canonicalize(path)
        .await
        .with_context(|| format!("Unable to resolve the path {}", path.display()))
}

/// Opens a directory for iteration.
pub async fn read_dir(path: impl AsRef<Path>) -> Result<ReadDir> {
    let path = path.as_ref();
    tokio::fs::read_dir(path)
        .await
        .with_context(|| format!("Unable to read directory {}", path.display()))
}

/// Whether `path` names a regular file.
pub async fn is_file(path: impl AsRef<Path>) -> Result<bool> {
    Ok(file_len(path).await?.is_some())
}

/// Returns the size of the file at `path`, or `None` if there is no such file.
pub async fn file_len(path: impl AsRef<Path>) -> Result<Option<u64>> {
    let path = path.as_ref();
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Unable to stat {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_is_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.json");
        assert!(!is_file(&path).await.unwrap());
        write(&path, "{}").await.unwrap();
        assert!(is_file(&path).await.unwrap());
        assert!(!is_file(dir.path()).await.unwrap());
    }

    #[tokio::test]
    async fn test_write_atomic_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.json");
        write_atomic(&path, "first").await.unwrap();
        write_atomic(&path, "second").await.unwrap();
        assert_eq!("second", read(&path).await.unwrap());
        assert!(!dir.path().join("a.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_file_len() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x");
        assert_eq!(None, file_len(&path).await.unwrap());
        write(&path, "").await.unwrap();
        assert_eq!(Some(0), file_len(&path).await.unwrap());
        assert_eq!(None, file_len(dir.path()).await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_dir() {
        let dir = TempDir::new().unwrap();
        write(dir.path().join("a"), "1").await.unwrap();
        make_dir(dir.path().join("sub/deeper")).await.unwrap();
        empty_dir(dir.path()).await.unwrap();
        let mut rd = read_dir(dir.path()).await.unwrap();
        assert!(rd.next_entry().await.unwrap().is_none());
    }
}
