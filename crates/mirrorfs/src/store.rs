//! The record-store contract the cache core consumes.
//!
//! A record store keeps fixed-size metadata records keyed by [`FileId`] plus
//! named per-record byte blobs. Individual operations are atomic per record;
//! the core performs no multi-record transactions on top of them.

use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;
use crate::record::{FileId, RecordFlags};

/// Streamed reader over an attribute blob.
pub type AttrReader = Pin<Box<dyn AsyncRead + Send>>;

/// Buffered sink over an attribute blob. The blob is committed when the sink
/// is shut down; a sink dropped without shutdown commits nothing.
pub type AttrWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Persistent storage for file records.
///
/// Implementations serialize access per record id and survive process
/// restarts; the in-memory implementation in [`crate::memory`] stands in for
/// tests. Ids handed out by [`create_record`](RecordStore::create_record)
/// must never coincide with any id previously returned by the same store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn dispose(&self) -> Result<()>;

    async fn create_record(&self) -> Result<FileId>;

    /// Delete a record and every descendant reachable through child lists,
    /// including their attribute blobs.
    async fn delete_record_recursively(&self, id: FileId) -> Result<()>;

    async fn get_name(&self, id: FileId) -> Result<String>;
    async fn set_name(&self, id: FileId, name: &str) -> Result<()>;

    async fn get_parent(&self, id: FileId) -> Result<Option<FileId>>;
    async fn set_parent(&self, id: FileId, parent: Option<FileId>) -> Result<()>;

    async fn get_flags(&self, id: FileId) -> Result<RecordFlags>;
    async fn set_flags(&self, id: FileId, flags: RecordFlags) -> Result<()>;

    async fn get_length(&self, id: FileId) -> Result<i64>;
    async fn set_length(&self, id: FileId, length: i64) -> Result<()>;

    async fn get_timestamp(&self, id: FileId) -> Result<i64>;
    async fn set_timestamp(&self, id: FileId, timestamp: i64) -> Result<()>;

    async fn get_crc(&self, id: FileId) -> Result<i64>;
    async fn set_crc(&self, id: FileId, crc: i64) -> Result<()>;

    /// The ordered child-id list. Only meaningful once the owner's
    /// `CHILDREN_CACHED` flag is set.
    async fn list(&self, id: FileId) -> Result<Vec<FileId>>;
    async fn update_list(&self, id: FileId, children: &[FileId]) -> Result<()>;

    async fn read_attribute(&self, id: FileId, key: &str) -> Result<Option<AttrReader>>;
    async fn write_attribute(&self, id: FileId, key: &str) -> Result<AttrWriter>;

    /// Per-record modification counter.
    async fn mod_count(&self, id: FileId) -> Result<u64>;
    /// Store-wide modification counter; bumps at least once per mutation.
    async fn global_mod_count(&self) -> Result<u64>;

    /// Locate the root record registered under `url`, allocating one when
    /// absent.
    async fn find_root_record(&self, url: &str) -> Result<FileId>;
    async fn delete_root_record(&self, id: FileId) -> Result<()>;
}
