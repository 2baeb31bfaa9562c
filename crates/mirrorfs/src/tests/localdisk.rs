use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::delegate::DelegateFileSystem;
use crate::localdisk::LocalDisk;
use crate::memory::MemoryRecordStore;
use crate::{MirrorFs, NodeRef};

async fn disk_cache(dir: &std::path::Path) -> (MirrorFs, NodeRef) {
    let delegate: Arc<dyn DelegateFileSystem> = Arc::new(LocalDisk::new());
    let fs = MirrorFs::connect(Arc::new(MemoryRecordStore::new()))
        .await
        .unwrap();
    let base = dir.to_string_lossy().into_owned();
    let root = fs.find_root(&base, &delegate).await.unwrap().unwrap();
    (fs, root)
}

#[tokio::test]
async fn test_mirrors_a_real_directory() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("hello.txt"), b"hello disk").unwrap();
    std::fs::create_dir(tmp.path().join("sub")).unwrap();

    let (fs, root) = disk_cache(tmp.path()).await;

    let names = fs.list(&root).await.unwrap();
    assert_eq!(names, vec!["hello.txt", "sub"]);

    let file = fs.find_child(&root, "hello.txt").await.unwrap().unwrap();
    assert!(!fs.is_directory(&file).await.unwrap());
    assert_eq!(fs.length(&file).await.unwrap(), 10);

    let sub = fs.find_child(&root, "sub").await.unwrap().unwrap();
    assert!(fs.is_directory(&sub).await.unwrap());

    let mut reader = fs.read_content(&file).await.unwrap();
    let mut content = Vec::new();
    reader.read_to_end(&mut content).await.unwrap();
    assert_eq!(content, b"hello disk");
}

#[tokio::test]
async fn test_write_reaches_the_disk() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("out.txt"), b"").unwrap();

    let (fs, root) = disk_cache(tmp.path()).await;
    let file = fs.find_child(&root, "out.txt").await.unwrap().unwrap();

    let mut writer = fs.write_content(&file, 1, 0).await.unwrap();
    writer.write_all(b"persisted bytes").await.unwrap();
    writer.shutdown().await.unwrap();

    assert_eq!(
        std::fs::read(tmp.path().join("out.txt")).unwrap(),
        b"persisted bytes"
    );
    assert_eq!(fs.length(&file).await.unwrap(), 15);
}

#[tokio::test]
async fn test_create_and_delete_through_the_cache() {
    let tmp = tempfile::tempdir().unwrap();
    let (fs, root) = disk_cache(tmp.path()).await;
    let _ = fs.list(&root).await.unwrap();

    let file = fs.create_child_file(&root, "made.txt").await.unwrap();
    assert!(tmp.path().join("made.txt").is_file());
    assert!(fs.list(&root).await.unwrap().contains(&"made.txt".to_string()));

    let dir = fs.create_child_directory(&root, "made_dir").await.unwrap();
    assert!(tmp.path().join("made_dir").is_dir());

    fs.delete_file(&file).await.unwrap();
    assert!(!tmp.path().join("made.txt").exists());
    assert!(!file.exists().await);

    fs.delete_file(&dir).await.unwrap();
    assert!(!tmp.path().join("made_dir").exists());
}

#[tokio::test]
async fn test_rename_and_move_on_disk() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("a.txt"), b"payload").unwrap();
    std::fs::create_dir(tmp.path().join("dest")).unwrap();

    let (fs, root) = disk_cache(tmp.path()).await;
    let _ = fs.list(&root).await.unwrap();
    let file = fs.find_child(&root, "a.txt").await.unwrap().unwrap();
    let dest = fs.find_child(&root, "dest").await.unwrap().unwrap();

    fs.rename_file(&file, "b.txt").await.unwrap();
    assert!(tmp.path().join("b.txt").is_file());
    assert!(!tmp.path().join("a.txt").exists());

    fs.move_file(&file, &dest).await.unwrap();
    assert!(tmp.path().join("dest").join("b.txt").is_file());
    assert!(file.parent().await.unwrap() == dest);
}
