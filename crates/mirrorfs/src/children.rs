//! Directory listing and child-list reconciliation.
//!
//! The fast path serves the persisted child list without touching the
//! delegate. The slow path reconciles against the delegate's authoritative
//! listing: persisted ids are reused on a name match, new records are minted
//! for unseen names, and entries that vanished from the delegate are left
//! alone — removal happens only through Delete events, so a delegate that is
//! transiently blind cannot destroy cache state.

use std::path::Path;
use std::sync::Arc;

use diagnostics::{log_debug, log_error};

use crate::delegate::{DelegateFileSystem, names_equal};
use crate::error::Result;
use crate::fs::MirrorFs;
use crate::node::NodeRef;
use crate::record::{FileId, LENGTH_UNKNOWN, RecordFlags};

impl MirrorFs {
    /// Whether `dir`'s persisted child list is synchronized with the
    /// delegate.
    pub async fn children_loaded(&self, dir: &NodeRef) -> Result<bool> {
        let id = dir.file_id().await;
        self.check_flag(id, RecordFlags::CHILDREN_CACHED).await
    }

    /// Child names of `dir`, reconciling with the delegate when the cached
    /// list is stale.
    pub async fn list(&self, dir: &NodeRef) -> Result<Vec<String>> {
        let id = dir.file_id().await;
        if self.check_flag(id, RecordFlags::CHILDREN_CACHED).await? {
            self.list_persisted(dir).await
        } else {
            self.persist_all_children(dir).await
        }
    }

    /// Child names from the persisted list only; no delegate access.
    pub async fn list_persisted(&self, dir: &NodeRef) -> Result<Vec<String>> {
        let id = dir.file_id().await;
        let children = self.records.list(id).await?;
        let mut names = Vec::with_capacity(children.len());
        for child in children {
            names.push(self.records.get_name(child).await?);
        }
        Ok(names)
    }

    async fn persist_all_children(&self, dir: &NodeRef) -> Result<Vec<String>> {
        let id = dir.file_id().await;
        let current_ids = self.records.list(id).await?;
        let mut current_names = Vec::with_capacity(current_ids.len());
        for &child in &current_ids {
            current_names.push(self.records.get_name(child).await?);
        }

        let fs = dir.filesystem().await;
        let dir_path = dir.path().await;
        let names = fs.list(&dir_path).await?;

        let mut child_ids = Vec::with_capacity(names.len());
        for name in &names {
            let known = current_names
                .iter()
                .position(|existing| names_equal(fs.as_ref(), existing, name));
            match known {
                Some(index) => child_ids.push(current_ids[index]),
                None => {
                    let child_id = self.records.create_record().await?;
                    self.copy_record_from_delegate(
                        child_id,
                        Some(id),
                        &dir_path.join(name),
                        name,
                        &fs,
                    )
                    .await?;
                    child_ids.push(child_id);
                }
            }
        }

        self.records.update_list(id, &child_ids).await?;
        self.set_flag(id, RecordFlags::CHILDREN_CACHED, true).await?;

        let count = names.len();
        let path = dir_path.display().to_string();
        log_debug!("persisted {count} children of {path}", count, path);
        Ok(names)
    }

    /// Persisted child ids, synchronizing first when stale.
    pub async fn list_ids(&self, dir: &NodeRef) -> Result<Vec<FileId>> {
        let id = dir.file_id().await;
        if !self.check_flag(id, RecordFlags::CHILDREN_CACHED).await? {
            let _ = self.list(dir).await?;
        }
        self.records.list(id).await
    }

    /// Resolve a child name to its record id, minting a record when the
    /// delegate knows the name but the cache does not yet.
    pub async fn child_id(&self, parent: &NodeRef, name: &str) -> Result<Option<FileId>> {
        let parent_id = parent.file_id().await;
        let fs = parent.filesystem().await;

        let children = self.records.list(parent_id).await?;
        for &child in &children {
            let child_name = self.records.get_name(child).await?;
            if names_equal(fs.as_ref(), name, &child_name) {
                return Ok(Some(child));
            }
        }

        let child_path = parent.path().await.join(name);
        if fs.exists(&child_path).await {
            let child = self.records.create_record().await?;
            self.copy_record_from_delegate(child, Some(parent_id), &child_path, name, &fs)
                .await?;
            self.append_to_child_list(parent_id, child).await?;
            Ok(Some(child))
        } else {
            Ok(None)
        }
    }

    /// Resolve a child name to an in-memory handle, materializing one over
    /// the record when needed.
    pub async fn find_child(&self, parent: &NodeRef, name: &str) -> Result<Option<NodeRef>> {
        if let Some(cached) = self.find_cached_child(parent, name).await {
            return Ok(Some(cached));
        }
        match self.child_id(parent, name).await? {
            Some(id) => {
                let fs = parent.filesystem().await;
                let stored_name = self.records.get_name(id).await?;
                let child = NodeRef::new_child(&stored_name, parent, fs, id);
                parent.add_child(&stored_name, child.clone()).await;
                Ok(Some(child))
            }
            None => Ok(None),
        }
    }

    pub(crate) async fn find_cached_child(&self, parent: &NodeRef, name: &str) -> Option<NodeRef> {
        if let Some(child) = parent.cached_child(name).await {
            return Some(child);
        }
        let fs = parent.filesystem().await;
        if fs.is_case_sensitive() {
            return None;
        }
        for child in parent.cached_children().await {
            let child_name = child.name().await;
            if names_equal(fs.as_ref(), &child_name, name) {
                return Some(child);
            }
        }
        None
    }

    /// Populate a freshly minted (or re-found) record from the delegate.
    ///
    /// A record already carrying the same name keeps its persisted
    /// attributes; length is always left unknown so the first length query
    /// consults the delegate.
    pub(crate) async fn copy_record_from_delegate(
        &self,
        id: FileId,
        parent: Option<FileId>,
        path: &Path,
        name: &str,
        fs: &Arc<dyn DelegateFileSystem>,
    ) -> Result<()> {
        if Some(id) == parent {
            let path = path.display().to_string();
            log_error!("cyclic parent-child relation for {path}", path);
            return Ok(());
        }

        let stored_name = self.records.get_name(id).await?;
        if !name.is_empty() && names_equal(fs.as_ref(), name, &stored_name) {
            return Ok(());
        }

        self.records.set_parent(id, parent).await?;
        self.records.set_name(id, name).await?;
        self.records.set_crc(id, fs.crc(path).await?).await?;
        self.records
            .set_timestamp(id, fs.timestamp(path).await?)
            .await?;

        let mut flags = RecordFlags::empty();
        if fs.is_directory(path).await {
            flags |= RecordFlags::IS_DIRECTORY;
        }
        if !fs.is_writable(path).await {
            flags |= RecordFlags::IS_READ_ONLY;
        }
        self.records.set_flags(id, flags).await?;
        self.records.set_length(id, LENGTH_UNKNOWN).await?;
        Ok(())
    }
}
