use std::sync::Arc;

use crate::delegate::DelegateFileSystem;
use crate::events::VfsEvent;
use crate::memory::{MemoryFs, MemoryRecordStore};
use crate::{MirrorFs, RecordStore};

async fn delegate_with_root(protocol: &str, rank: i32) -> Arc<dyn DelegateFileSystem> {
    let fs = MemoryFs::new(protocol, rank);
    fs.seed_dir("/root").await;
    Arc::new(fs)
}

#[tokio::test]
async fn test_missing_base_path_yields_no_root() {
    let delegate: Arc<dyn DelegateFileSystem> = Arc::new(MemoryFs::new("mem", 0));
    let fs = MirrorFs::connect(Arc::new(MemoryRecordStore::new()))
        .await
        .unwrap();
    assert!(fs.find_root("/nowhere", &delegate).await.unwrap().is_none());
    assert!(fs.roots().await.is_empty());
}

#[tokio::test]
async fn test_find_root_is_cached_for_process_lifetime() {
    let delegate = delegate_with_root("mem", 0).await;
    let fs = MirrorFs::connect(Arc::new(MemoryRecordStore::new()))
        .await
        .unwrap();

    let first = fs.find_root("/root", &delegate).await.unwrap().unwrap();
    let second = fs.find_root("/root", &delegate).await.unwrap().unwrap();
    assert!(first == second);
    assert_eq!(fs.roots().await.len(), 1);
}

#[tokio::test]
async fn test_roots_order_by_rank_then_insertion() {
    let fs = MirrorFs::connect(Arc::new(MemoryRecordStore::new()))
        .await
        .unwrap();

    let late_rank = delegate_with_root("zfs", 7).await;
    let first_low = delegate_with_root("afs", 2).await;
    let second_low = delegate_with_root("bfs", 2).await;

    let r1 = fs.find_root("/root", &late_rank).await.unwrap().unwrap();
    let r2 = fs.find_root("/root", &first_low).await.unwrap().unwrap();
    let r3 = fs.find_root("/root", &second_low).await.unwrap().unwrap();

    let ordered = fs.roots().await;
    assert_eq!(ordered.len(), 3);
    assert!(ordered[0] == r2);
    assert!(ordered[1] == r3);
    assert!(ordered[2] == r1);
}

#[tokio::test]
async fn test_roots_of_filters_by_delegate_identity() {
    let fs = MirrorFs::connect(Arc::new(MemoryRecordStore::new()))
        .await
        .unwrap();

    let one = delegate_with_root("one", 1).await;
    let two = delegate_with_root("two", 2).await;
    let mine = fs.find_root("/root", &one).await.unwrap().unwrap();
    let _other = fs.find_root("/root", &two).await.unwrap().unwrap();

    let filtered = fs.roots_of(&one).await;
    assert_eq!(filtered.len(), 1);
    assert!(filtered[0] == mine);
}

#[tokio::test]
async fn test_deleting_a_root_unregisters_it() {
    let delegate = delegate_with_root("mem", 0).await;
    let fs = MirrorFs::connect(Arc::new(MemoryRecordStore::new()))
        .await
        .unwrap();
    let root = fs.find_root("/root", &delegate).await.unwrap().unwrap();
    let root_id = root.file_id().await;

    fs.process_events(vec![VfsEvent::Delete { file: root.clone() }])
        .await;

    assert!(!root.exists().await);
    assert!(fs.roots().await.is_empty());
    assert!(fs.name_of(root_id).await.is_err());

    // Materializing again allocates a fresh root record.
    let reborn = fs.find_root("/root", &delegate).await.unwrap().unwrap();
    assert_ne!(reborn.file_id().await, root_id);
}

#[tokio::test]
async fn test_refresh_hands_roots_to_the_queue() {
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct CapturingQueue {
        seen: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl crate::RefreshQueue for CapturingQueue {
        async fn refresh(
            &self,
            _asynchronous: bool,
            _recursive: bool,
            roots: Vec<crate::NodeRef>,
        ) {
            self.seen.lock().await.push(roots.len());
        }
    }

    let delegate = delegate_with_root("mem", 0).await;
    let fs = MirrorFs::connect(Arc::new(MemoryRecordStore::new()))
        .await
        .unwrap();

    // No queue installed: refresh is a no-op.
    fs.refresh(true).await;

    let queue = Arc::new(CapturingQueue::default());
    fs.set_refresh_queue(queue.clone()).await;
    let _ = fs.find_root("/root", &delegate).await.unwrap().unwrap();

    fs.refresh(true).await;
    assert_eq!(*queue.seen.lock().await, vec![1]);
}

#[tokio::test]
async fn test_root_state_survives_reconnect() {
    let store: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());
    let delegate_impl = Arc::new(MemoryFs::new("mem", 0));
    delegate_impl.seed_dir("/root").await;
    delegate_impl.seed_file("/root/a.txt", b"a").await;
    let delegate: Arc<dyn DelegateFileSystem> = delegate_impl.clone();

    let first_id;
    {
        let fs = MirrorFs::connect(store.clone()).await.unwrap();
        let root = fs.find_root("/root", &delegate).await.unwrap().unwrap();
        first_id = root.file_id().await;
        let _ = fs.list(&root).await.unwrap();
        fs.dispose().await.unwrap();
    }

    // A new cache over the same store finds the same root record with its
    // child list already synchronized.
    let fs = MirrorFs::connect(store).await.unwrap();
    let root = fs.find_root("/root", &delegate).await.unwrap().unwrap();
    assert_eq!(root.file_id().await, first_id);
    assert!(fs.children_loaded(&root).await.unwrap());

    let accesses = delegate_impl.accesses().await;
    assert_eq!(fs.list(&root).await.unwrap(), vec!["a.txt"]);
    assert_eq!(delegate_impl.accesses().await, accesses);
}
