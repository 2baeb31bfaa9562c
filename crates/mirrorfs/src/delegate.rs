//! The delegate file-system contract.
//!
//! A delegate is the real, externally authoritative file system the cache
//! mirrors: local disk, an archive, a network mount. It is addressed by
//! path; the cache owns the mapping from paths to record ids.

use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

#[async_trait]
pub trait DelegateFileSystem: Send + Sync {
    /// Protocol prefix used to key roots, e.g. `"file"` or `"mem"`.
    fn protocol(&self) -> &str;

    /// Enumeration rank; roots are listed in ascending rank order.
    fn rank(&self) -> i32;

    /// Whether names under this delegate compare case-sensitively.
    fn is_case_sensitive(&self) -> bool;

    async fn list(&self, path: &Path) -> Result<Vec<String>>;
    async fn exists(&self, path: &Path) -> bool;
    async fn is_directory(&self, path: &Path) -> bool;
    async fn is_writable(&self, path: &Path) -> bool;
    async fn length(&self, path: &Path) -> Result<i64>;
    async fn timestamp(&self, path: &Path) -> Result<i64>;
    async fn crc(&self, path: &Path) -> Result<i64>;

    async fn set_timestamp(&self, path: &Path, timestamp: i64) -> Result<()>;
    async fn set_writable(&self, path: &Path, writable: bool) -> Result<()>;

    async fn create_child_file(&self, parent: &Path, name: &str) -> Result<()>;
    async fn create_child_directory(&self, parent: &Path, name: &str) -> Result<()>;
    async fn delete_file(&self, path: &Path) -> Result<()>;
    async fn rename_file(&self, path: &Path, new_name: &str) -> Result<()>;
    async fn move_file(&self, path: &Path, new_parent: &Path) -> Result<()>;
    async fn copy_file(&self, path: &Path, new_parent: &Path, copy_name: &str) -> Result<()>;

    async fn input_stream(&self, path: &Path) -> Result<Pin<Box<dyn AsyncRead + Send>>>;
    async fn output_stream(&self, path: &Path) -> Result<Pin<Box<dyn AsyncWrite + Send>>>;
}

/// Name equality under a delegate's declared case sensitivity.
pub fn names_equal(fs: &dyn DelegateFileSystem, a: &str, b: &str) -> bool {
    if fs.is_case_sensitive() {
        a == b
    } else {
        a.to_lowercase() == b.to_lowercase()
    }
}

/// Identity comparison for delegate instances; roots are grouped by the
/// delegate object, not by protocol string.
pub fn same_filesystem(a: &Arc<dyn DelegateFileSystem>, b: &Arc<dyn DelegateFileSystem>) -> bool {
    Arc::ptr_eq(a, b)
}
