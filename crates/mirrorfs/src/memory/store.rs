use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::record::{FileId, LENGTH_UNKNOWN, RecordFlags};
use crate::sink::BufferedSink;
use crate::store::{AttrReader, AttrWriter, RecordStore};

/// In-memory record store implementing the [`RecordStore`] trait.
///
/// Ids are handed out by a monotonically increasing counter and never
/// reused. Attribute blobs commit atomically when their sink is shut down.
pub struct MemoryRecordStore(Arc<Mutex<State>>);

#[derive(Debug, Clone)]
struct Record {
    name: String,
    /// Raw parent id; 0 for roots.
    parent: u32,
    flags: RecordFlags,
    length: i64,
    timestamp: i64,
    crc: i64,
    mod_count: u64,
    children: Vec<u32>,
}

impl Record {
    fn new(mod_count: u64) -> Self {
        Self {
            name: String::new(),
            parent: 0,
            flags: RecordFlags::empty(),
            length: LENGTH_UNKNOWN,
            timestamp: 0,
            crc: 0,
            mod_count,
            children: Vec::new(),
        }
    }
}

#[derive(Default)]
struct State {
    records: HashMap<u32, Record>,
    attributes: HashMap<(u32, String), Vec<u8>>,
    root_urls: HashMap<String, u32>,
    next_id: u32,
    global_mod_count: u64,
    connected: bool,
}

impl State {
    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(Error::StoreDisconnected)
        }
    }

    /// Bump the global counter and return the new value, which becomes the
    /// record's own mod count.
    fn next_mod_count(&mut self) -> u64 {
        self.global_mod_count += 1;
        self.global_mod_count
    }

    fn record(&self, id: FileId) -> Result<&Record> {
        self.records
            .get(&id.raw())
            .ok_or(Error::RecordNotFound(id))
    }

    fn mutate<F>(&mut self, id: FileId, f: F) -> Result<()>
    where
        F: FnOnce(&mut Record),
    {
        let mod_count = self.next_mod_count();
        let record = self
            .records
            .get_mut(&id.raw())
            .ok_or(Error::RecordNotFound(id))?;
        f(record);
        record.mod_count = mod_count;
        Ok(())
    }

    fn create_record(&mut self) -> FileId {
        self.next_id += 1;
        let id = self.next_id;
        let mod_count = self.next_mod_count();
        let _ = self.records.insert(id, Record::new(mod_count));
        FileId::new(id)
    }

    fn delete_recursively(&mut self, id: FileId) {
        let mut removed = Vec::new();
        let mut stack = vec![id.raw()];
        while let Some(raw) = stack.pop() {
            if let Some(record) = self.records.remove(&raw) {
                stack.extend(record.children);
                removed.push(raw);
            }
        }
        self.attributes
            .retain(|(raw, _), _| !removed.contains(raw));
        self.global_mod_count += 1;
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(State::default())))
    }
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn connect(&self) -> Result<()> {
        self.0.lock().await.connected = true;
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        self.0.lock().await.connected = false;
        Ok(())
    }

    async fn create_record(&self) -> Result<FileId> {
        let mut state = self.0.lock().await;
        state.ensure_connected()?;
        Ok(state.create_record())
    }

    async fn delete_record_recursively(&self, id: FileId) -> Result<()> {
        let mut state = self.0.lock().await;
        state.ensure_connected()?;
        state.delete_recursively(id);
        Ok(())
    }

    async fn get_name(&self, id: FileId) -> Result<String> {
        Ok(self.0.lock().await.record(id)?.name.clone())
    }

    async fn set_name(&self, id: FileId, name: &str) -> Result<()> {
        self.0
            .lock()
            .await
            .mutate(id, |r| r.name = name.to_string())
    }

    async fn get_parent(&self, id: FileId) -> Result<Option<FileId>> {
        Ok(FileId::from_raw(self.0.lock().await.record(id)?.parent))
    }

    async fn set_parent(&self, id: FileId, parent: Option<FileId>) -> Result<()> {
        self.0
            .lock()
            .await
            .mutate(id, |r| r.parent = parent.map_or(0, FileId::raw))
    }

    async fn get_flags(&self, id: FileId) -> Result<RecordFlags> {
        Ok(self.0.lock().await.record(id)?.flags)
    }

    async fn set_flags(&self, id: FileId, flags: RecordFlags) -> Result<()> {
        self.0.lock().await.mutate(id, |r| r.flags = flags)
    }

    async fn get_length(&self, id: FileId) -> Result<i64> {
        Ok(self.0.lock().await.record(id)?.length)
    }

    async fn set_length(&self, id: FileId, length: i64) -> Result<()> {
        self.0.lock().await.mutate(id, |r| r.length = length)
    }

    async fn get_timestamp(&self, id: FileId) -> Result<i64> {
        Ok(self.0.lock().await.record(id)?.timestamp)
    }

    async fn set_timestamp(&self, id: FileId, timestamp: i64) -> Result<()> {
        self.0.lock().await.mutate(id, |r| r.timestamp = timestamp)
    }

    async fn get_crc(&self, id: FileId) -> Result<i64> {
        Ok(self.0.lock().await.record(id)?.crc)
    }

    async fn set_crc(&self, id: FileId, crc: i64) -> Result<()> {
        self.0.lock().await.mutate(id, |r| r.crc = crc)
    }

    async fn list(&self, id: FileId) -> Result<Vec<FileId>> {
        Ok(self
            .0
            .lock()
            .await
            .record(id)?
            .children
            .iter()
            .map(|&raw| FileId::new(raw))
            .collect())
    }

    async fn update_list(&self, id: FileId, children: &[FileId]) -> Result<()> {
        let raw: Vec<u32> = children.iter().map(|c| c.raw()).collect();
        self.0.lock().await.mutate(id, |r| r.children = raw)
    }

    async fn read_attribute(&self, id: FileId, key: &str) -> Result<Option<AttrReader>> {
        let state = self.0.lock().await;
        state.ensure_connected()?;
        Ok(state
            .attributes
            .get(&(id.raw(), key.to_string()))
            .map(|blob| Box::pin(Cursor::new(blob.clone())) as AttrReader))
    }

    async fn write_attribute(&self, id: FileId, key: &str) -> Result<AttrWriter> {
        self.0.lock().await.ensure_connected()?;
        let state = self.0.clone();
        let raw = id.raw();
        let key = key.to_string();
        Ok(Box::pin(BufferedSink::new(move |bytes| async move {
            let mut state = state.lock().await;
            let _ = state.attributes.insert((raw, key), bytes);
            state.global_mod_count += 1;
            Ok(())
        })))
    }

    async fn mod_count(&self, id: FileId) -> Result<u64> {
        Ok(self.0.lock().await.record(id)?.mod_count)
    }

    async fn global_mod_count(&self) -> Result<u64> {
        Ok(self.0.lock().await.global_mod_count)
    }

    async fn find_root_record(&self, url: &str) -> Result<FileId> {
        let mut state = self.0.lock().await;
        state.ensure_connected()?;
        if let Some(&raw) = state.root_urls.get(url) {
            return Ok(FileId::new(raw));
        }
        let id = state.create_record();
        let _ = state.root_urls.insert(url.to_string(), id.raw());
        Ok(id)
    }

    async fn delete_root_record(&self, id: FileId) -> Result<()> {
        let mut state = self.0.lock().await;
        state.ensure_connected()?;
        state.root_urls.retain(|_, raw| *raw != id.raw());
        Ok(())
    }
}
