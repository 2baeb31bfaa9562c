mod events;
mod localdisk;
mod roots;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::delegate::DelegateFileSystem;
use crate::events::{ChangeListener, VfsEvent};
use crate::memory::{MemoryFs, MemoryRecordStore};
use crate::{MirrorFs, NodeRef};

/// A cache over fresh in-memory collaborators with `/root` seeded as a
/// directory on the delegate.
pub(crate) async fn new_cache() -> (MirrorFs, Arc<MemoryFs>, NodeRef) {
    new_cache_with(MemoryFs::new("mem", 0)).await
}

pub(crate) async fn new_cache_with(delegate: MemoryFs) -> (MirrorFs, Arc<MemoryFs>, NodeRef) {
    let delegate = Arc::new(delegate);
    delegate.seed_dir("/root").await;
    let fs = MirrorFs::connect(Arc::new(MemoryRecordStore::new()))
        .await
        .unwrap();
    let dyn_delegate: Arc<dyn DelegateFileSystem> = delegate.clone();
    let root = fs.find_root("/root", &dyn_delegate).await.unwrap().unwrap();
    (fs, delegate, root)
}

/// Listener that records the size of every batch it is shown, in call
/// order.
#[derive(Default)]
pub(crate) struct Recorder {
    pub(crate) calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ChangeListener for Recorder {
    async fn before(&self, events: &[VfsEvent]) {
        self.calls.lock().await.push(format!("before:{}", events.len()));
    }

    async fn after(&self, events: &[VfsEvent]) {
        self.calls.lock().await.push(format!("after:{}", events.len()));
    }
}
