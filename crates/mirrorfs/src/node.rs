//! In-memory file handles.
//!
//! A handle is data: the record id, the cached name, a parent reference, and
//! the materialized children. Listing, content I/O, and attribute access are
//! operations on [`crate::MirrorFs`], not methods of a handle hierarchy.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::delegate::DelegateFileSystem;
use crate::record::FileId;

pub(crate) struct VNode {
    /// Raw record id; 0 after invalidation.
    id: u32,
    name: String,
    parent: Option<NodeRef>,
    fs: Arc<dyn DelegateFileSystem>,
    mod_stamp: i64,
    bom: Option<Vec<u8>>,
    /// Children materialized in memory so far, keyed by name as listed.
    children: HashMap<String, NodeRef>,
}

/// Shared handle to one in-memory file or directory.
#[derive(Clone)]
pub struct NodeRef(Arc<Mutex<VNode>>);

impl NodeRef {
    pub(crate) fn new_root(base_path: &str, fs: Arc<dyn DelegateFileSystem>, id: FileId) -> Self {
        Self(Arc::new(Mutex::new(VNode {
            id: id.raw(),
            name: base_path.to_string(),
            parent: None,
            fs,
            mod_stamp: 0,
            bom: None,
            children: HashMap::new(),
        })))
    }

    pub(crate) fn new_child(
        name: &str,
        parent: &NodeRef,
        fs: Arc<dyn DelegateFileSystem>,
        id: FileId,
    ) -> Self {
        Self(Arc::new(Mutex::new(VNode {
            id: id.raw(),
            name: name.to_string(),
            parent: Some(parent.clone()),
            fs,
            mod_stamp: 0,
            bom: None,
            children: HashMap::new(),
        })))
    }

    /// The record id behind this handle.
    ///
    /// Panics if the handle has been invalidated; all downstream logic
    /// assumes positive ids for live files, so dereferencing a dead handle
    /// is a programming error, not a recoverable condition.
    pub async fn file_id(&self) -> FileId {
        let raw = self.0.lock().await.id;
        assert!(raw > 0, "handle used after invalidation");
        FileId::new(raw)
    }

    /// Whether the handle still refers to a live record.
    pub async fn exists(&self) -> bool {
        self.0.lock().await.id > 0
    }

    pub async fn name(&self) -> String {
        self.0.lock().await.name.clone()
    }

    pub async fn parent(&self) -> Option<NodeRef> {
        self.0.lock().await.parent.clone()
    }

    pub async fn filesystem(&self) -> Arc<dyn DelegateFileSystem> {
        self.0.lock().await.fs.clone()
    }

    /// Delegate-side path: the root's base path joined with each name down
    /// to this node. Walks the parent chain one lock at a time.
    pub async fn path(&self) -> PathBuf {
        let mut names = Vec::new();
        let mut cursor = self.clone();
        loop {
            let (name, parent) = {
                let guard = cursor.0.lock().await;
                (guard.name.clone(), guard.parent.clone())
            };
            names.push(name);
            match parent {
                Some(p) => cursor = p,
                None => break,
            }
        }
        let mut path = PathBuf::new();
        for name in names.iter().rev() {
            path.push(name);
        }
        path
    }

    pub async fn modification_stamp(&self) -> i64 {
        self.0.lock().await.mod_stamp
    }

    pub(crate) async fn set_modification_stamp(&self, stamp: i64) {
        self.0.lock().await.mod_stamp = stamp;
    }

    /// Byte-order mark the file declares, if any. Written ahead of caller
    /// bytes on every content write.
    pub async fn bom(&self) -> Option<Vec<u8>> {
        self.0.lock().await.bom.clone()
    }

    pub async fn set_bom(&self, bom: Option<Vec<u8>>) {
        self.0.lock().await.bom = bom;
    }

    pub(crate) async fn set_name(&self, name: &str) {
        self.0.lock().await.name = name.to_string();
    }

    pub(crate) async fn set_parent(&self, parent: &NodeRef) {
        self.0.lock().await.parent = Some(parent.clone());
    }

    /// Mark the handle dead. Cached children stay reachable so a recursive
    /// invalidation can still walk them.
    pub(crate) async fn invalidate(&self) {
        self.0.lock().await.id = 0;
    }

    pub(crate) async fn cached_children(&self) -> Vec<NodeRef> {
        self.0.lock().await.children.values().cloned().collect()
    }

    pub(crate) async fn cached_child(&self, name: &str) -> Option<NodeRef> {
        self.0.lock().await.children.get(name).cloned()
    }

    pub(crate) async fn add_child(&self, name: &str, child: NodeRef) {
        let _ = self
            .0
            .lock()
            .await
            .children
            .insert(name.to_string(), child);
    }

    /// Remove a cached child by handle identity, whatever name it is keyed
    /// under (rename may have changed the name since caching).
    pub(crate) async fn remove_child_ref(&self, child: &NodeRef) {
        let mut guard = self.0.lock().await;
        guard.children.retain(|_, c| !Arc::ptr_eq(&c.0, &child.0));
    }
}

impl std::fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.try_lock() {
            Ok(guard) => write!(f, "NodeRef(id={}, name={:?})", guard.id, guard.name),
            Err(_) => write!(f, "NodeRef(<locked>)"),
        }
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
