//! Host-disk delegate file system.
//!
//! Maps the delegate contract onto a real directory tree through
//! `tokio::fs`. Paths handed to this delegate are host paths; the cache owns
//! the mapping from record ids to paths.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::delegate::DelegateFileSystem;
use crate::error::{Error, Result};

/// Delegate backed by the process's local file system.
pub struct LocalDisk {
    rank: i32,
}

impl LocalDisk {
    pub fn new() -> Self {
        Self { rank: 1 }
    }

    pub fn with_rank(rank: i32) -> Self {
        Self { rank }
    }
}

impl Default for LocalDisk {
    fn default() -> Self {
        Self::new()
    }
}

fn timestamp_micros(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl DelegateFileSystem for LocalDisk {
    fn protocol(&self) -> &str {
        "file"
    }

    fn rank(&self) -> i32 {
        self.rank
    }

    fn is_case_sensitive(&self) -> bool {
        // Windows and macOS default to case-preserving, case-insensitive
        // volumes; everything else is treated as case-sensitive.
        cfg!(not(any(target_os = "windows", target_os = "macos")))
    }

    async fn list(&self, path: &Path) -> Result<Vec<String>> {
        let mut dir = tokio::fs::read_dir(path).await?;
        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn is_directory(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    async fn is_writable(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|m| !m.permissions().readonly())
            .unwrap_or(false)
    }

    async fn length(&self, path: &Path) -> Result<i64> {
        let metadata = tokio::fs::metadata(path).await?;
        Ok(metadata.len() as i64)
    }

    async fn timestamp(&self, path: &Path) -> Result<i64> {
        let metadata = tokio::fs::metadata(path).await?;
        Ok(timestamp_micros(&metadata))
    }

    async fn crc(&self, path: &Path) -> Result<i64> {
        // Content checksums are not tracked for local files.
        if self.exists(path).await {
            Ok(0)
        } else {
            Err(Error::delegate_not_found(path))
        }
    }

    async fn set_timestamp(&self, path: &Path, timestamp: i64) -> Result<()> {
        let mtime = UNIX_EPOCH + Duration::from_micros(timestamp.max(0) as u64);
        set_modified(path.to_path_buf(), mtime).await?;
        Ok(())
    }

    async fn set_writable(&self, path: &Path, writable: bool) -> Result<()> {
        let metadata = tokio::fs::metadata(path).await?;
        let mut permissions = metadata.permissions();
        permissions.set_readonly(!writable);
        tokio::fs::set_permissions(path, permissions).await?;
        Ok(())
    }

    async fn create_child_file(&self, parent: &Path, name: &str) -> Result<()> {
        let path = parent.join(name);
        let _ = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        Ok(())
    }

    async fn create_child_directory(&self, parent: &Path, name: &str) -> Result<()> {
        tokio::fs::create_dir(parent.join(name)).await?;
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        let metadata = tokio::fs::metadata(path).await?;
        if metadata.is_dir() {
            tokio::fs::remove_dir_all(path).await?;
        } else {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn rename_file(&self, path: &Path, new_name: &str) -> Result<()> {
        let new_path = match path.parent() {
            Some(parent) => parent.join(new_name),
            None => PathBuf::from(new_name),
        };
        tokio::fs::rename(path, new_path).await?;
        Ok(())
    }

    async fn move_file(&self, path: &Path, new_parent: &Path) -> Result<()> {
        let name = path
            .file_name()
            .ok_or_else(|| Error::delegate_not_found(path))?;
        tokio::fs::rename(path, new_parent.join(name)).await?;
        Ok(())
    }

    async fn copy_file(&self, path: &Path, new_parent: &Path, copy_name: &str) -> Result<()> {
        let dest = new_parent.join(copy_name);
        let metadata = tokio::fs::metadata(path).await?;
        if metadata.is_dir() {
            copy_tree(path.to_path_buf(), dest).await?;
        } else {
            let _ = tokio::fs::copy(path, dest).await?;
        }
        Ok(())
    }

    async fn input_stream(&self, path: &Path) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Box::pin(file))
    }

    async fn output_stream(&self, path: &Path) -> Result<Pin<Box<dyn AsyncWrite + Send>>> {
        let file = tokio::fs::File::create(path).await?;
        Ok(Box::pin(file))
    }
}

/// Copy a directory tree breadth-first without recursion.
async fn copy_tree(src: PathBuf, dest: PathBuf) -> std::io::Result<()> {
    let mut pending = vec![(src, dest)];
    while let Some((from, to)) = pending.pop() {
        tokio::fs::create_dir(&to).await?;
        let mut dir = tokio::fs::read_dir(&from).await?;
        while let Some(entry) = dir.next_entry().await? {
            let from_child = entry.path();
            let to_child = to.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push((from_child, to_child));
            } else {
                let _ = tokio::fs::copy(from_child, to_child).await?;
            }
        }
    }
    Ok(())
}

/// `tokio::fs` has no mtime setter; do the blocking call off the runtime.
async fn set_modified(path: PathBuf, mtime: SystemTime) -> std::io::Result<()> {
    tokio::task::spawn_blocking(move || {
        let file = std::fs::OpenOptions::new().write(true).open(path)?;
        file.set_modified(mtime)
    })
    .await
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?
}
