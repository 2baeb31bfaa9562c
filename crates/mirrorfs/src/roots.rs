//! The root registry.
//!
//! Roots anchor a delegate file system's subtree at a base path. The map is
//! guarded by a single mutex held across materialization; roots are rare and
//! a lookup must not race with deletion of the same root.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::delegate::{DelegateFileSystem, same_filesystem};
use crate::node::NodeRef;

struct RootEntry {
    node: NodeRef,
    /// Insertion order, the stable tie-break when ranks are equal.
    seq: u64,
}

#[derive(Default)]
pub(crate) struct RootsInner {
    by_url: HashMap<String, RootEntry>,
    next_seq: u64,
}

impl RootsInner {
    pub(crate) fn get(&self, url: &str) -> Option<NodeRef> {
        self.by_url.get(url).map(|e| e.node.clone())
    }

    pub(crate) fn insert(&mut self, url: &str, node: NodeRef) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let _ = self.by_url.insert(url.to_string(), RootEntry { node, seq });
    }

    pub(crate) fn remove(&mut self, url: &str) -> Option<NodeRef> {
        self.by_url.remove(url).map(|e| e.node)
    }
}

pub(crate) struct RootRegistry {
    inner: Mutex<RootsInner>,
}

impl RootRegistry {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(RootsInner::default()),
        }
    }

    /// Take the registry lock. Held across root materialization and root
    /// deletion, which are the only mutations.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, RootsInner> {
        self.inner.lock().await
    }

    /// All roots ordered by ascending delegate rank, insertion order on
    /// ties.
    pub(crate) async fn snapshot(&self) -> Vec<NodeRef> {
        let entries: Vec<(u64, NodeRef)> = {
            let guard = self.inner.lock().await;
            guard
                .by_url
                .values()
                .map(|e| (e.seq, e.node.clone()))
                .collect()
        };
        let mut ranked = Vec::with_capacity(entries.len());
        for (seq, node) in entries {
            let rank = node.filesystem().await.rank();
            ranked.push((rank, seq, node));
        }
        ranked.sort_by_key(|(rank, seq, _)| (*rank, *seq));
        ranked.into_iter().map(|(_, _, node)| node).collect()
    }

    /// Roots belonging to one delegate instance, in insertion order.
    pub(crate) async fn snapshot_of(&self, fs: &Arc<dyn DelegateFileSystem>) -> Vec<NodeRef> {
        let entries: Vec<(u64, NodeRef)> = {
            let guard = self.inner.lock().await;
            guard
                .by_url
                .values()
                .map(|e| (e.seq, e.node.clone()))
                .collect()
        };
        let mut matched = Vec::new();
        for (seq, node) in entries {
            if same_filesystem(&node.filesystem().await, fs) {
                matched.push((seq, node));
            }
        }
        matched.sort_by_key(|(seq, _)| *seq);
        matched.into_iter().map(|(_, node)| node).collect()
    }
}
