use std::sync::Arc;

use tokio::io::AsyncReadExt;

use super::{Recorder, new_cache};
use crate::events::{Property, VfsEvent};
use crate::{DelegateFileSystem, MirrorFs, NodeRef};

async fn read_all(fs: &MirrorFs, file: &NodeRef) -> Vec<u8> {
    let mut reader = fs.read_content(file).await.unwrap();
    let mut content = Vec::new();
    reader.read_to_end(&mut content).await.unwrap();
    content
}

#[tokio::test]
async fn test_create_event_appears_in_listing() {
    // Scenario: the delegate already materialized b.txt; a Create event
    // brings the cache up to date.
    let (fs, delegate, root) = new_cache().await;
    let _ = fs.list(&root).await.unwrap();

    delegate.seed_file("/root/b.txt", b"fresh").await;
    fs.process_events(vec![VfsEvent::Create {
        parent: root.clone(),
        name: "b.txt".to_string(),
        directory: false,
    }])
    .await;

    assert!(fs.list(&root).await.unwrap().contains(&"b.txt".to_string()));

    let file = fs.find_child(&root, "b.txt").await.unwrap().unwrap();
    assert_eq!(fs.length(&file).await.unwrap(), 5);
    let delegate_stamp = delegate
        .timestamp(std::path::Path::new("/root/b.txt"))
        .await
        .unwrap();
    assert_eq!(fs.timestamp(&file).await.unwrap(), delegate_stamp);
}

#[tokio::test]
async fn test_create_for_phantom_child_is_skipped() {
    let (fs, _delegate, root) = new_cache().await;
    let _ = fs.list(&root).await.unwrap();

    // The delegate never materialized the child; the apply step is a no-op.
    fs.process_events(vec![VfsEvent::Create {
        parent: root.clone(),
        name: "phantom.txt".to_string(),
        directory: false,
    }])
    .await;

    assert!(fs.list(&root).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_invalidates_whole_subtree() {
    let (fs, _delegate, root) = new_cache().await;
    let dir = fs.create_child_directory(&root, "dir").await.unwrap();
    let sub = fs.create_child_directory(&dir, "sub").await.unwrap();
    let file = fs.create_child_file(&sub, "f.txt").await.unwrap();
    let file_id = file.file_id().await;

    fs.delete_file(&dir).await.unwrap();

    assert!(!dir.exists().await);
    assert!(!sub.exists().await);
    assert!(!file.exists().await);
    assert!(fs.name_of(file_id).await.is_err());
    assert!(fs.list(&root).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_move_rewires_lists_and_parent() {
    let (fs, _delegate, root) = new_cache().await;
    let a = fs.create_child_directory(&root, "a").await.unwrap();
    let b = fs.create_child_directory(&root, "b").await.unwrap();
    let f = fs.create_child_file(&a, "f.txt").await.unwrap();
    let keeper = fs.create_child_file(&a, "keeper.txt").await.unwrap();
    let keeper_id = keeper.file_id().await;
    let f_id = f.file_id().await;

    fs.move_file(&f, &b).await.unwrap();

    assert_eq!(fs.list_persisted(&a).await.unwrap(), vec!["keeper.txt"]);
    assert_eq!(fs.list_persisted(&b).await.unwrap(), vec!["f.txt"]);
    assert!(f.parent().await.unwrap() == b);
    // Unaffected siblings keep their ids.
    assert_eq!(keeper.file_id().await, keeper_id);
    assert_eq!(f.file_id().await, f_id);
}

#[tokio::test]
async fn test_rename_updates_record_and_handle() {
    let (fs, _delegate, root) = new_cache().await;
    let f = fs.create_child_file(&root, "old.txt").await.unwrap();
    let id = f.file_id().await;

    fs.rename_file(&f, "new.txt").await.unwrap();

    assert_eq!(f.name().await, "new.txt");
    assert_eq!(fs.name_of(id).await.unwrap(), "new.txt");
    assert_eq!(fs.list_persisted(&root).await.unwrap(), vec!["new.txt"]);
    // The handle is still reachable under its new name.
    let again = fs.find_child(&root, "new.txt").await.unwrap().unwrap();
    assert!(again == f);
}

#[tokio::test]
async fn test_set_writable_skips_spurious_flag_writes() {
    let (fs, _delegate, root) = new_cache().await;
    let f = fs.create_child_file(&root, "f.txt").await.unwrap();

    fs.set_writable(&f, false).await.unwrap();
    assert!(!fs.is_writable(&f).await.unwrap());

    // Re-applying the same value must not bump the modification counter.
    let count = fs.modification_count(&f).await.unwrap();
    fs.process_events(vec![VfsEvent::PropertyChange {
        file: f.clone(),
        property: Property::Writable {
            old: false,
            new: false,
        },
    }])
    .await;
    assert_eq!(fs.modification_count(&f).await.unwrap(), count);

    fs.set_writable(&f, true).await.unwrap();
    assert!(fs.is_writable(&f).await.unwrap());
}

#[tokio::test]
async fn test_stale_events_are_dropped_before_notification() {
    let (fs, _delegate, root) = new_cache().await;
    let f = fs.create_child_file(&root, "f.txt").await.unwrap();
    fs.delete_file(&f).await.unwrap();

    let recorder = Arc::new(Recorder::default());
    fs.subscribe(recorder.clone()).await;

    fs.process_events(vec![VfsEvent::ContentChange {
        file: f.clone(),
        old_stamp: 0,
        new_stamp: 1,
        from_refresh: false,
    }])
    .await;

    // The dead-handle event was filtered out; observers saw an empty batch.
    assert_eq!(*recorder.calls.lock().await, vec!["before:0", "after:0"]);
}

#[tokio::test]
async fn test_refresh_content_change_reloads_cache() {
    let (fs, delegate, root) = new_cache().await;
    delegate.seed_file("/root/a.txt", b"first").await;
    let file = fs.find_child(&root, "a.txt").await.unwrap().unwrap();

    assert_eq!(read_all(&fs, &file).await, b"first");

    // The delegate changes behind the cache's back; reads stay stale until
    // a refresh-originated event arrives.
    delegate.mutate_file("/root/a.txt", b"second!").await;
    assert_eq!(read_all(&fs, &file).await, b"first");

    fs.process_events(vec![VfsEvent::ContentChange {
        file: file.clone(),
        old_stamp: file.modification_stamp().await,
        new_stamp: 2,
        from_refresh: true,
    }])
    .await;

    assert_eq!(read_all(&fs, &file).await, b"second!");
    assert_eq!(fs.length(&file).await.unwrap(), 8);
    assert_eq!(file.modification_stamp().await, 2);
}

#[tokio::test]
async fn test_copy_creates_destination_with_lazy_content() {
    let (fs, delegate, root) = new_cache().await;
    delegate.seed_file("/root/a.txt", b"payload").await;
    let original = fs.find_child(&root, "a.txt").await.unwrap().unwrap();

    let copy = fs.copy_file(&original, &root, "copy.txt").await.unwrap();

    assert_ne!(copy.file_id().await, original.file_id().await);
    assert_eq!(copy.name().await, "copy.txt");
    // Content was not duplicated eagerly; the read path populates it.
    assert_eq!(read_all(&fs, &copy).await, b"payload");
}

#[tokio::test]
async fn test_set_timestamp_stamps_store_and_delegate() {
    let (fs, delegate, root) = new_cache().await;
    delegate.seed_file("/root/a.txt", b"a").await;
    let file = fs.find_child(&root, "a.txt").await.unwrap().unwrap();

    fs.set_timestamp(&file, 4242).await.unwrap();

    assert_eq!(fs.timestamp(&file).await.unwrap(), 4242);
    let delegate_stamp = delegate
        .timestamp(std::path::Path::new("/root/a.txt"))
        .await
        .unwrap();
    assert_eq!(delegate_stamp, 4242);
}

#[tokio::test]
async fn test_batch_is_applied_in_order_between_notifications() {
    let (fs, delegate, root) = new_cache().await;
    let _ = fs.list(&root).await.unwrap();

    let recorder = Arc::new(Recorder::default());
    fs.subscribe(recorder.clone()).await;

    delegate.seed_file("/root/one.txt", b"1").await;
    delegate.seed_file("/root/two.txt", b"2").await;
    fs.process_events(vec![
        VfsEvent::Create {
            parent: root.clone(),
            name: "one.txt".to_string(),
            directory: false,
        },
        VfsEvent::Create {
            parent: root.clone(),
            name: "two.txt".to_string(),
            directory: false,
        },
    ])
    .await;

    assert_eq!(*recorder.calls.lock().await, vec!["before:2", "after:2"]);
    let mut names = fs.list_persisted(&root).await.unwrap();
    names.sort();
    assert_eq!(names, vec!["one.txt", "two.txt"]);
}
