//! The cache core.
//!
//! `MirrorFs` answers queries from the record store, lazily populating from
//! the delegate, and routes every mutation delegate-first: the physical
//! change happens on the delegate, then a synthesized event updates the
//! store and the in-memory tree under a before/after notification pair.

use std::path::Path;
use std::sync::Arc;

use diagnostics::{log_debug, log_error, log_info};
use tokio::sync::Mutex;

use crate::delegate::DelegateFileSystem;
use crate::error::{Error, Result};
use crate::events::{ChangeListener, Property, RefreshQueue, VfsEvent};
use crate::node::NodeRef;
use crate::record::{FileId, LENGTH_UNKNOWN, RecordFlags};
use crate::roots::RootRegistry;
use crate::store::RecordStore;

/// Tunables for the cache core.
#[derive(Debug, Clone, Copy)]
pub struct MirrorOptions {
    /// Content payloads below this size are fully materialized into memory
    /// instead of handing out a live stream.
    pub load_through_buffer_threshold: usize,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            load_through_buffer_threshold: 1024 * 1024,
        }
    }
}

/// The persistent virtual-file-system cache.
///
/// Cheap to clone; clones share the same store, roots, and listeners.
#[derive(Clone)]
pub struct MirrorFs {
    pub(crate) records: Arc<dyn RecordStore>,
    pub(crate) roots: Arc<RootRegistry>,
    pub(crate) listeners: Arc<Mutex<Vec<Arc<dyn ChangeListener>>>>,
    refresh_queue: Arc<Mutex<Option<Arc<dyn RefreshQueue>>>>,
    pub(crate) options: MirrorOptions,
}

impl MirrorFs {
    /// Connect the store and build a cache over it.
    pub async fn connect(records: Arc<dyn RecordStore>) -> Result<Self> {
        Self::connect_with(records, MirrorOptions::default()).await
    }

    pub async fn connect_with(
        records: Arc<dyn RecordStore>,
        options: MirrorOptions,
    ) -> Result<Self> {
        records.connect().await?;
        Ok(Self {
            records,
            roots: Arc::new(RootRegistry::new()),
            listeners: Arc::new(Mutex::new(Vec::new())),
            refresh_queue: Arc::new(Mutex::new(None)),
            options,
        })
    }

    /// Release the store. Handles created before disposal fail their next
    /// store access.
    pub async fn dispose(&self) -> Result<()> {
        self.records.dispose().await
    }

    /// Register an observer of change batches.
    pub async fn subscribe(&self, listener: Arc<dyn ChangeListener>) {
        self.listeners.lock().await.push(listener);
    }

    /// Install the external refresh collaborator used by [`refresh`](Self::refresh).
    pub async fn set_refresh_queue(&self, queue: Arc<dyn RefreshQueue>) {
        *self.refresh_queue.lock().await = Some(queue);
    }

    // --- metadata queries ---------------------------------------------------

    /// The record id behind a handle. Panics on an invalidated handle.
    pub async fn file_id(&self, file: &NodeRef) -> FileId {
        file.file_id().await
    }

    pub async fn exists(&self, file: &NodeRef) -> bool {
        file.exists().await
    }

    pub async fn name_of(&self, id: FileId) -> Result<String> {
        self.records.get_name(id).await
    }

    pub async fn is_directory(&self, file: &NodeRef) -> Result<bool> {
        let id = file.file_id().await;
        self.check_flag(id, RecordFlags::IS_DIRECTORY).await
    }

    pub async fn is_writable(&self, file: &NodeRef) -> Result<bool> {
        let id = file.file_id().await;
        Ok(!self.check_flag(id, RecordFlags::IS_READ_ONLY).await?)
    }

    pub async fn timestamp(&self, file: &NodeRef) -> Result<i64> {
        let id = file.file_id().await;
        self.records.get_timestamp(id).await
    }

    pub async fn crc(&self, file: &NodeRef) -> Result<i64> {
        let id = file.file_id().await;
        self.records.get_crc(id).await
    }

    /// Cached length, asking the delegate once while the stored value is
    /// still unknown.
    pub async fn length(&self, file: &NodeRef) -> Result<i64> {
        let id = file.file_id().await;
        let mut length = self.records.get_length(id).await?;
        if length == LENGTH_UNKNOWN {
            let path = file.path().await;
            length = file.filesystem().await.length(&path).await?;
            self.records.set_length(id, length).await?;
        }
        Ok(length)
    }

    pub async fn modification_count(&self, file: &NodeRef) -> Result<u64> {
        let id = file.file_id().await;
        self.records.mod_count(id).await
    }

    pub async fn filesystem_modification_count(&self) -> Result<u64> {
        self.records.global_mod_count().await
    }

    /// Stamp both the record and the delegate. No event: the content did
    /// not change.
    pub async fn set_timestamp(&self, file: &NodeRef, timestamp: i64) -> Result<()> {
        let id = file.file_id().await;
        self.records.set_timestamp(id, timestamp).await?;
        let path = file.path().await;
        file.filesystem().await.set_timestamp(&path, timestamp).await
    }

    // --- flag bookkeeping ---------------------------------------------------

    /// Read-modify-write a flag bit, writing back only on change so the
    /// modification counter stays meaningful.
    pub(crate) async fn set_flag(&self, id: FileId, mask: RecordFlags, value: bool) -> Result<()> {
        let old = self.records.get_flags(id).await?;
        let mut flags = old;
        flags.set(mask, value);
        if flags != old {
            self.records.set_flags(id, flags).await?;
        }
        Ok(())
    }

    pub(crate) async fn check_flag(&self, id: FileId, mask: RecordFlags) -> Result<bool> {
        Ok(self.records.get_flags(id).await?.contains(mask))
    }

    // --- mutation entry points ----------------------------------------------

    pub async fn create_child_file(&self, parent: &NodeRef, name: &str) -> Result<NodeRef> {
        let path = parent.path().await;
        parent
            .filesystem()
            .await
            .create_child_file(&path, name)
            .await?;
        self.process_event(VfsEvent::Create {
            parent: parent.clone(),
            name: name.to_string(),
            directory: false,
        })
        .await;
        self.created_child(parent, name, path).await
    }

    pub async fn create_child_directory(&self, parent: &NodeRef, name: &str) -> Result<NodeRef> {
        let path = parent.path().await;
        parent
            .filesystem()
            .await
            .create_child_directory(&path, name)
            .await?;
        self.process_event(VfsEvent::Create {
            parent: parent.clone(),
            name: name.to_string(),
            directory: true,
        })
        .await;
        self.created_child(parent, name, path).await
    }

    async fn created_child(
        &self,
        parent: &NodeRef,
        name: &str,
        path: std::path::PathBuf,
    ) -> Result<NodeRef> {
        match self.find_cached_child(parent, name).await {
            Some(child) => Ok(child),
            None => Err(Error::CreateFailed {
                name: name.to_string(),
                path,
            }),
        }
    }

    pub async fn delete_file(&self, file: &NodeRef) -> Result<()> {
        let path = file.path().await;
        file.filesystem().await.delete_file(&path).await?;
        self.process_event(VfsEvent::Delete { file: file.clone() }).await;
        Ok(())
    }

    pub async fn rename_file(&self, file: &NodeRef, new_name: &str) -> Result<()> {
        let path = file.path().await;
        file.filesystem().await.rename_file(&path, new_name).await?;
        let old = file.name().await;
        self.process_event(VfsEvent::PropertyChange {
            file: file.clone(),
            property: Property::Name {
                old,
                new: new_name.to_string(),
            },
        })
        .await;
        Ok(())
    }

    pub async fn move_file(&self, file: &NodeRef, new_parent: &NodeRef) -> Result<()> {
        let path = file.path().await;
        let parent_path = new_parent.path().await;
        file.filesystem()
            .await
            .move_file(&path, &parent_path)
            .await?;
        self.process_event(VfsEvent::Move {
            file: file.clone(),
            new_parent: new_parent.clone(),
        })
        .await;
        Ok(())
    }

    pub async fn copy_file(
        &self,
        file: &NodeRef,
        new_parent: &NodeRef,
        copy_name: &str,
    ) -> Result<NodeRef> {
        let path = file.path().await;
        let parent_path = new_parent.path().await;
        file.filesystem()
            .await
            .copy_file(&path, &parent_path, copy_name)
            .await?;
        self.process_event(VfsEvent::Copy {
            file: file.clone(),
            new_parent: new_parent.clone(),
            new_name: copy_name.to_string(),
        })
        .await;
        self.created_child(new_parent, copy_name, parent_path).await
    }

    pub async fn set_writable(&self, file: &NodeRef, writable: bool) -> Result<()> {
        let path = file.path().await;
        file.filesystem().await.set_writable(&path, writable).await?;
        let old = self.is_writable(file).await?;
        self.process_event(VfsEvent::PropertyChange {
            file: file.clone(),
            property: Property::Writable { old, new: writable },
        })
        .await;
        Ok(())
    }

    // --- event processing ---------------------------------------------------

    pub(crate) async fn process_event(&self, event: VfsEvent) {
        self.process_events(vec![event]).await;
    }

    /// Apply a batch of confirmed delegate-side changes.
    ///
    /// Stale events (subjects no longer live) are dropped up front. The
    /// surviving batch is announced to listeners, applied in order, and
    /// announced again. A failing apply step is logged and skipped; there is
    /// no rollback, so observers may see `before` for a step that did not
    /// land. Callers serialize batches.
    pub async fn process_events(&self, events: Vec<VfsEvent>) {
        let mut validated = Vec::with_capacity(events.len());
        for event in events {
            if event.is_valid().await {
                validated.push(event);
            } else {
                let detail = format!("{:?}", event);
                log_debug!("dropping stale event: {detail}", detail);
            }
        }

        let listeners = self.listeners.lock().await.clone();
        for listener in &listeners {
            listener.before(&validated).await;
        }
        for event in &validated {
            if let Err(error) = self.apply_event(event).await {
                let error = error.to_string();
                log_error!("event application failed, skipping step: {error}", error);
            }
        }
        for listener in &listeners {
            listener.after(&validated).await;
        }
    }

    async fn apply_event(&self, event: &VfsEvent) -> Result<()> {
        match event {
            VfsEvent::Create { parent, name, .. } => self.execute_create_child(parent, name).await,
            VfsEvent::Delete { file } => self.execute_delete(file).await,
            VfsEvent::ContentChange {
                file,
                new_stamp,
                from_refresh,
                ..
            } => self.execute_touch(file, *from_refresh, *new_stamp).await,
            // A copy is a create of the destination; content fills in lazily
            // through the normal read path.
            VfsEvent::Copy {
                new_parent,
                new_name,
                ..
            } => self.execute_create_child(new_parent, new_name).await,
            VfsEvent::Move { file, new_parent } => self.execute_move(file, new_parent).await,
            VfsEvent::PropertyChange { file, property } => match property {
                Property::Name { new, .. } => self.execute_rename(file, new).await,
                Property::Writable { new, .. } => self.execute_set_writable(file, *new).await,
            },
        }
    }

    async fn execute_create_child(&self, parent: &NodeRef, name: &str) -> Result<()> {
        let fs = parent.filesystem().await;
        let parent_path = parent.path().await;
        let child_path = parent_path.join(name);
        if !fs.exists(&child_path).await {
            let path = child_path.display().to_string();
            log_debug!("created child never materialized on the delegate: {path}", path);
            return Ok(());
        }
        let parent_id = parent.file_id().await;
        let child_id = self.records.create_record().await?;
        self.copy_record_from_delegate(child_id, Some(parent_id), &child_path, name, &fs)
            .await?;
        self.append_to_child_list(parent_id, child_id).await?;
        let child = NodeRef::new_child(name, parent, fs, child_id);
        parent.add_child(name, child).await;
        Ok(())
    }

    async fn execute_delete(&self, file: &NodeRef) -> Result<()> {
        if !file.exists().await {
            let path = file.path().await.display().to_string();
            log_error!("deleting a file which does not exist: {path}", path);
            return Ok(());
        }
        let id = file.file_id().await;
        let parent = file.parent().await;

        self.records.delete_record_recursively(id).await?;

        match parent {
            Some(parent) => {
                let parent_id = parent.file_id().await;
                self.remove_from_child_list(parent_id, id).await?;
                parent.remove_child_ref(file).await;
            }
            None => {
                let fs = file.filesystem().await;
                let url = format!("{}://{}", fs.protocol(), file.name().await);
                let mut roots = self.roots.lock().await;
                let _ = roots.remove(&url);
                self.records.delete_root_record(id).await?;
            }
        }

        // Invalidate the whole in-memory subtree so future use fails fast.
        let mut stack = vec![file.clone()];
        while let Some(node) = stack.pop() {
            stack.extend(node.cached_children().await);
            node.invalidate().await;
        }
        Ok(())
    }

    pub(crate) async fn execute_touch(
        &self,
        file: &NodeRef,
        reload_content_from_delegate: bool,
        new_modification_stamp: i64,
    ) -> Result<()> {
        let id = file.file_id().await;
        if reload_content_from_delegate {
            self.set_flag(id, RecordFlags::MUST_RELOAD_CONTENT, true).await?;
        }
        let fs = file.filesystem().await;
        let path = file.path().await;
        let length = fs.length(&path).await?;
        let timestamp = fs.timestamp(&path).await?;
        self.records.set_length(id, length).await?;
        self.records.set_timestamp(id, timestamp).await?;
        file.set_modification_stamp(new_modification_stamp).await;
        Ok(())
    }

    async fn execute_move(&self, file: &NodeRef, new_parent: &NodeRef) -> Result<()> {
        let id = file.file_id().await;
        let new_parent_id = new_parent.file_id().await;
        let old_parent = file
            .parent()
            .await
            .ok_or_else(|| Error::store("move event for a root"))?;
        let old_parent_id = old_parent.file_id().await;

        self.remove_from_child_list(old_parent_id, id).await?;
        self.append_to_child_list(new_parent_id, id).await?;

        old_parent.remove_child_ref(file).await;
        let name = file.name().await;
        file.set_parent(new_parent).await;
        new_parent.add_child(&name, file.clone()).await;
        Ok(())
    }

    async fn execute_rename(&self, file: &NodeRef, new_name: &str) -> Result<()> {
        let id = file.file_id().await;
        if let Some(parent) = file.parent().await {
            parent.remove_child_ref(file).await;
            parent.add_child(new_name, file.clone()).await;
        }
        file.set_name(new_name).await;
        self.records.set_name(id, new_name).await
    }

    async fn execute_set_writable(&self, file: &NodeRef, writable: bool) -> Result<()> {
        let id = file.file_id().await;
        self.set_flag(id, RecordFlags::IS_READ_ONLY, !writable).await
    }

    pub(crate) async fn append_to_child_list(
        &self,
        parent_id: FileId,
        child_id: FileId,
    ) -> Result<()> {
        let mut children = self.records.list(parent_id).await?;
        children.push(child_id);
        self.records.update_list(parent_id, &children).await
    }

    async fn remove_from_child_list(&self, parent_id: FileId, id: FileId) -> Result<()> {
        let mut children = self.records.list(parent_id).await?;
        children.retain(|child| *child != id);
        self.records.update_list(parent_id, &children).await
    }

    // --- roots --------------------------------------------------------------

    /// Look up or materialize the root anchoring `fs` at `base_path`.
    ///
    /// Returns `None` when the path does not exist on the delegate; the
    /// root record, if one was allocated, is left orphaned rather than
    /// fabricating a root for a missing path.
    pub async fn find_root(
        &self,
        base_path: &str,
        fs: &Arc<dyn DelegateFileSystem>,
    ) -> Result<Option<NodeRef>> {
        let url = format!("{}://{}", fs.protocol(), base_path);
        let mut roots = self.roots.lock().await;
        if let Some(existing) = roots.get(&url) {
            return Ok(Some(existing));
        }

        let root_id = self.records.find_root_record(&url).await?;
        if !fs.exists(Path::new(base_path)).await {
            return Ok(None);
        }
        self.copy_record_from_delegate(root_id, None, Path::new(base_path), base_path, fs)
            .await?;
        let root = NodeRef::new_root(base_path, fs.clone(), root_id);
        roots.insert(&url, root.clone());
        log_info!("materialized root {url}", url);
        Ok(Some(root))
    }

    /// All roots, ordered by ascending delegate rank (insertion order on
    /// ties).
    pub async fn roots(&self) -> Vec<NodeRef> {
        self.roots.snapshot().await
    }

    /// Roots belonging to one delegate instance.
    pub async fn roots_of(&self, fs: &Arc<dyn DelegateFileSystem>) -> Vec<NodeRef> {
        self.roots.snapshot_of(fs).await
    }

    /// Hand the current roots to the configured refresh collaborator, which
    /// scans them and feeds discovered changes back through
    /// [`process_events`](Self::process_events).
    pub async fn refresh(&self, asynchronous: bool) {
        let roots = self.roots.snapshot().await;
        let queue = self.refresh_queue.lock().await.clone();
        if let Some(queue) = queue {
            queue.refresh(asynchronous, true, roots).await;
        }
    }
}
