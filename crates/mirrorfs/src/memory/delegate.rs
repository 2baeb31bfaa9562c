use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;

use crate::delegate::DelegateFileSystem;
use crate::error::{Error, Result};
use crate::sink::BufferedSink;

/// Deterministic in-memory delegate file system.
///
/// Timestamps come from a logical clock that ticks once per mutation, and a
/// query counter lets tests assert that a code path performed no delegate
/// access at all. Case sensitivity is configurable to exercise both name
/// equality modes.
pub struct MemoryFs {
    state: Arc<Mutex<MemState>>,
    protocol: String,
    rank: i32,
    case_sensitive: bool,
}

#[derive(Debug, Clone)]
struct MemEntry {
    directory: bool,
    writable: bool,
    content: Vec<u8>,
    timestamp: i64,
}

#[derive(Default)]
struct MemState {
    entries: HashMap<PathBuf, MemEntry>,
    clock: i64,
    accesses: u64,
}

impl MemState {
    fn tick(&mut self) -> i64 {
        self.clock += 1;
        self.clock
    }

    /// Resolve a path to its stored key, folding case when configured.
    fn resolve(&self, path: &Path, case_sensitive: bool) -> Option<PathBuf> {
        if self.entries.contains_key(path) {
            return Some(path.to_path_buf());
        }
        if case_sensitive {
            return None;
        }
        let wanted = path.to_string_lossy().to_lowercase();
        self.entries
            .keys()
            .find(|key| key.to_string_lossy().to_lowercase() == wanted)
            .cloned()
    }
}

/// Checksum a content blob down to the delegate's `i64` CRC field.
fn content_crc(content: &[u8]) -> i64 {
    let digest = Sha256::digest(content);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(head)
}

impl MemoryFs {
    pub fn new(protocol: &str, rank: i32) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemState::default())),
            protocol: protocol.to_string(),
            rank,
            case_sensitive: true,
        }
    }

    pub fn case_insensitive(mut self) -> Self {
        self.case_sensitive = false;
        self
    }

    /// Seed a directory (and any missing ancestors) outside the delegate
    /// contract, for test setup.
    pub async fn seed_dir(&self, path: &str) {
        let mut state = self.state.lock().await;
        let stamp = state.tick();
        let path = PathBuf::from(path);
        for ancestor in path.ancestors() {
            if ancestor.as_os_str().is_empty() {
                continue;
            }
            let _ = state
                .entries
                .entry(ancestor.to_path_buf())
                .or_insert(MemEntry {
                    directory: true,
                    writable: true,
                    content: Vec::new(),
                    timestamp: stamp,
                });
        }
    }

    /// Seed a file with content, creating missing ancestors.
    pub async fn seed_file(&self, path: &str, content: &[u8]) {
        let path = PathBuf::from(path);
        if let Some(parent) = path.parent() {
            self.seed_dir(&parent.to_string_lossy()).await;
        }
        let mut state = self.state.lock().await;
        let stamp = state.tick();
        let _ = state.entries.insert(
            path,
            MemEntry {
                directory: false,
                writable: true,
                content: content.to_vec(),
                timestamp: stamp,
            },
        );
    }

    /// Mutate a seeded file behind the cache's back, simulating an external
    /// change the refresh machinery would discover.
    pub async fn mutate_file(&self, path: &str, content: &[u8]) {
        let mut state = self.state.lock().await;
        let stamp = state.tick();
        if let Some(entry) = state.entries.get_mut(&PathBuf::from(path)) {
            entry.content = content.to_vec();
            entry.timestamp = stamp;
        }
    }

    /// How many delegate queries have been answered so far.
    pub async fn accesses(&self) -> u64 {
        self.state.lock().await.accesses
    }

    async fn lookup(&self, path: &Path) -> Option<(PathBuf, MemEntry)> {
        let mut state = self.state.lock().await;
        state.accesses += 1;
        let key = state.resolve(path, self.case_sensitive)?;
        let entry = state.entries.get(&key).cloned()?;
        Some((key, entry))
    }
}

#[async_trait]
impl DelegateFileSystem for MemoryFs {
    fn protocol(&self) -> &str {
        &self.protocol
    }

    fn rank(&self) -> i32 {
        self.rank
    }

    fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    async fn list(&self, path: &Path) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        state.accesses += 1;
        let key = state
            .resolve(path, self.case_sensitive)
            .ok_or_else(|| Error::delegate_not_found(path))?;
        let entry = state
            .entries
            .get(&key)
            .ok_or_else(|| Error::delegate_not_found(path))?;
        if !entry.directory {
            return Err(Error::not_a_directory(path));
        }
        let mut names: Vec<String> = state
            .entries
            .keys()
            .filter(|candidate| candidate.parent() == Some(key.as_path()))
            .filter_map(|candidate| candidate.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn exists(&self, path: &Path) -> bool {
        self.lookup(path).await.is_some()
    }

    async fn is_directory(&self, path: &Path) -> bool {
        self.lookup(path).await.is_some_and(|(_, e)| e.directory)
    }

    async fn is_writable(&self, path: &Path) -> bool {
        self.lookup(path).await.is_some_and(|(_, e)| e.writable)
    }

    async fn length(&self, path: &Path) -> Result<i64> {
        self.lookup(path)
            .await
            .map(|(_, e)| e.content.len() as i64)
            .ok_or_else(|| Error::delegate_not_found(path))
    }

    async fn timestamp(&self, path: &Path) -> Result<i64> {
        self.lookup(path)
            .await
            .map(|(_, e)| e.timestamp)
            .ok_or_else(|| Error::delegate_not_found(path))
    }

    async fn crc(&self, path: &Path) -> Result<i64> {
        self.lookup(path)
            .await
            .map(|(_, e)| content_crc(&e.content))
            .ok_or_else(|| Error::delegate_not_found(path))
    }

    async fn set_timestamp(&self, path: &Path, timestamp: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        let key = state
            .resolve(path, self.case_sensitive)
            .ok_or_else(|| Error::delegate_not_found(path))?;
        if let Some(entry) = state.entries.get_mut(&key) {
            entry.timestamp = timestamp;
        }
        Ok(())
    }

    async fn set_writable(&self, path: &Path, writable: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        let key = state
            .resolve(path, self.case_sensitive)
            .ok_or_else(|| Error::delegate_not_found(path))?;
        if let Some(entry) = state.entries.get_mut(&key) {
            entry.writable = writable;
        }
        Ok(())
    }

    async fn create_child_file(&self, parent: &Path, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let parent_key = state
            .resolve(parent, self.case_sensitive)
            .ok_or_else(|| Error::delegate_not_found(parent))?;
        let path = parent_key.join(name);
        if state.resolve(&path, self.case_sensitive).is_some() {
            return Err(Error::already_exists(path));
        }
        let stamp = state.tick();
        let _ = state.entries.insert(
            path,
            MemEntry {
                directory: false,
                writable: true,
                content: Vec::new(),
                timestamp: stamp,
            },
        );
        Ok(())
    }

    async fn create_child_directory(&self, parent: &Path, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let parent_key = state
            .resolve(parent, self.case_sensitive)
            .ok_or_else(|| Error::delegate_not_found(parent))?;
        let path = parent_key.join(name);
        if state.resolve(&path, self.case_sensitive).is_some() {
            return Err(Error::already_exists(path));
        }
        let stamp = state.tick();
        let _ = state.entries.insert(
            path,
            MemEntry {
                directory: true,
                writable: true,
                content: Vec::new(),
                timestamp: stamp,
            },
        );
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        let mut state = self.state.lock().await;
        let key = state
            .resolve(path, self.case_sensitive)
            .ok_or_else(|| Error::delegate_not_found(path))?;
        state
            .entries
            .retain(|candidate, _| !candidate.starts_with(&key));
        let _ = state.tick();
        Ok(())
    }

    async fn rename_file(&self, path: &Path, new_name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let key = state
            .resolve(path, self.case_sensitive)
            .ok_or_else(|| Error::delegate_not_found(path))?;
        let new_key = match key.parent() {
            Some(parent) => parent.join(new_name),
            None => PathBuf::from(new_name),
        };
        rekey_subtree(&mut state, &key, &new_key);
        Ok(())
    }

    async fn move_file(&self, path: &Path, new_parent: &Path) -> Result<()> {
        let mut state = self.state.lock().await;
        let key = state
            .resolve(path, self.case_sensitive)
            .ok_or_else(|| Error::delegate_not_found(path))?;
        let parent_key = state
            .resolve(new_parent, self.case_sensitive)
            .ok_or_else(|| Error::delegate_not_found(new_parent))?;
        let name = key
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let new_key = parent_key.join(name);
        rekey_subtree(&mut state, &key, &new_key);
        Ok(())
    }

    async fn copy_file(&self, path: &Path, new_parent: &Path, copy_name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let key = state
            .resolve(path, self.case_sensitive)
            .ok_or_else(|| Error::delegate_not_found(path))?;
        let parent_key = state
            .resolve(new_parent, self.case_sensitive)
            .ok_or_else(|| Error::delegate_not_found(new_parent))?;
        let dest = parent_key.join(copy_name);
        let stamp = state.tick();
        let copies: Vec<(PathBuf, MemEntry)> = state
            .entries
            .iter()
            .filter(|(candidate, _)| candidate.starts_with(&key))
            .map(|(candidate, entry)| {
                let rest = candidate
                    .strip_prefix(&key)
                    .unwrap_or_else(|_| Path::new(""));
                (dest.join(rest), entry.clone())
            })
            .collect();
        for (new_key, mut entry) in copies {
            entry.timestamp = stamp;
            let _ = state.entries.insert(new_key, entry);
        }
        Ok(())
    }

    async fn input_stream(&self, path: &Path) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        let (_, entry) = self
            .lookup(path)
            .await
            .ok_or_else(|| Error::delegate_not_found(path))?;
        Ok(Box::pin(Cursor::new(entry.content)))
    }

    async fn output_stream(&self, path: &Path) -> Result<Pin<Box<dyn AsyncWrite + Send>>> {
        let key = {
            let mut state = self.state.lock().await;
            state.accesses += 1;
            state
                .resolve(path, self.case_sensitive)
                .ok_or_else(|| Error::delegate_not_found(path))?
        };
        let state = self.state.clone();
        Ok(Box::pin(BufferedSink::new(move |bytes| async move {
            let mut state = state.lock().await;
            let stamp = state.tick();
            match state.entries.get_mut(&key) {
                Some(entry) => {
                    entry.content = bytes;
                    entry.timestamp = stamp;
                    Ok(())
                }
                None => Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} vanished before commit", key.display()),
                )),
            }
        })))
    }
}

fn rekey_subtree(state: &mut MemState, old: &Path, new: &Path) {
    let moved: Vec<PathBuf> = state
        .entries
        .keys()
        .filter(|candidate| candidate.starts_with(old))
        .cloned()
        .collect();
    let stamp = state.tick();
    for key in moved {
        if let Some(mut entry) = state.entries.remove(&key) {
            let rest = key.strip_prefix(old).unwrap_or_else(|_| Path::new(""));
            entry.timestamp = stamp;
            let _ = state.entries.insert(new.join(rest), entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_listing_is_sorted_and_shallow() {
        let fs = MemoryFs::new("mem", 0);
        fs.seed_file("/root/b.txt", b"b").await;
        fs.seed_file("/root/a.txt", b"a").await;
        fs.seed_file("/root/sub/deep.txt", b"d").await;

        let names = fs.list(Path::new("/root")).await.unwrap();
        assert_eq!(names, vec!["a.txt", "b.txt", "sub"]);
    }

    #[tokio::test]
    async fn test_case_insensitive_resolution() {
        let fs = MemoryFs::new("mem", 0).case_insensitive();
        fs.seed_file("/root/Foo.txt", b"x").await;
        assert!(fs.exists(Path::new("/root/foo.txt")).await);
        assert!(fs.exists(Path::new("/ROOT/FOO.TXT")).await);

        let strict = MemoryFs::new("mem", 0);
        strict.seed_file("/root/Foo.txt", b"x").await;
        assert!(!strict.exists(Path::new("/root/foo.txt")).await);
    }

    #[tokio::test]
    async fn test_write_stream_commits_on_shutdown() {
        let fs = MemoryFs::new("mem", 0);
        fs.seed_file("/root/a.txt", b"old").await;
        let before = fs.timestamp(Path::new("/root/a.txt")).await.unwrap();

        let mut out = fs.output_stream(Path::new("/root/a.txt")).await.unwrap();
        out.write_all(b"new content").await.unwrap();
        out.shutdown().await.unwrap();

        let mut reader = fs.input_stream(Path::new("/root/a.txt")).await.unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"new content");
        assert!(fs.timestamp(Path::new("/root/a.txt")).await.unwrap() > before);
    }

    #[tokio::test]
    async fn test_rename_carries_subtree() {
        let fs = MemoryFs::new("mem", 0);
        fs.seed_file("/root/dir/inner.txt", b"x").await;
        fs.rename_file(Path::new("/root/dir"), "renamed").await.unwrap();
        assert!(fs.exists(Path::new("/root/renamed/inner.txt")).await);
        assert!(!fs.exists(Path::new("/root/dir/inner.txt")).await);
    }

    #[tokio::test]
    async fn test_crc_follows_content() {
        let fs = MemoryFs::new("mem", 0);
        fs.seed_file("/root/a.txt", b"one").await;
        let first = fs.crc(Path::new("/root/a.txt")).await.unwrap();
        fs.mutate_file("/root/a.txt", b"two").await;
        let second = fs.crc(Path::new("/root/a.txt")).await.unwrap();
        assert_ne!(first, second);
    }
}
