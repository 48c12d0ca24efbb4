//! The OpenDAL adapter over the memory and fs services.

use bytes::Bytes;
use opendal::Operator;
use sv_core::SvError;
use sv_storage::operator::build_fs_operator;
use sv_storage::{CloudBackend, OpendalBackend, RemoteItem};

fn memory_operator() -> Operator {
    Operator::new(opendal::services::Memory::default())
        .expect("memory operator")
        .finish()
}

async fn authenticated(op: Operator) -> OpendalBackend {
    let backend = OpendalBackend::new("M", "me@example.com", op);
    backend.authenticate_cloud().await.expect("authenticate");
    backend
}

#[tokio::test]
async fn test_unauthenticated_calls_rejected() {
    let backend = OpendalBackend::new("M", "me@example.com", memory_operator());
    assert!(matches!(
        backend.get_session_folder("vault").await,
        Err(SvError::NotAuthenticated(_))
    ));
}

#[tokio::test]
async fn test_upload_list_download() {
    let backend = authenticated(memory_operator()).await;
    let root = backend.get_session_folder("vault").await.unwrap();
    let docs = backend.create_folder("docs", &root).await.unwrap();

    backend
        .upload_file(Bytes::from_static(b"share"), "1#a.txt", &docs)
        .await
        .unwrap();
    backend
        .upload_file(Bytes::from_static(b"{}"), "$META", &root)
        .await
        .unwrap();

    let files = backend.list_files(&docs, "1#").await.unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "1#a.txt");
    assert_eq!(
        backend.download_file(&files[0]).await.unwrap().as_ref(),
        b"share"
    );

    let children = backend.get_children(&root, true).await.unwrap();
    assert_eq!(children.len(), 1);
    assert!(matches!(&children[0], RemoteItem::Folder(f) if f.name == "docs"));
}

#[tokio::test]
async fn test_rename_and_delete_file() {
    let backend = authenticated(memory_operator()).await;
    let root = backend.get_session_folder("vault").await.unwrap();
    let f = backend
        .upload_file(Bytes::from_static(b"x"), "1#a.txt", &root)
        .await
        .unwrap();

    let renamed = backend.rename_file(&f, "1#b.txt").await.unwrap();
    assert!(backend.get_file(&root, "1#a.txt").await.unwrap().is_none());
    assert!(backend.get_file(&root, "1#b.txt").await.unwrap().is_some());

    backend.delete_file(&renamed).await.unwrap();
    assert!(backend.list_files(&root, "").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_fs_soft_delete_keeps_object_in_bin() {
    let tmp = tempfile::TempDir::new().unwrap();
    let op = build_fs_operator(&tmp.path().join("cloud").to_string_lossy()).unwrap();
    let backend = OpendalBackend::new("F", "me@example.com", op).with_hard_delete(false);
    backend.authenticate_cloud().await.unwrap();

    let root = backend.get_session_folder("vault").await.unwrap();
    let f = backend
        .upload_file(Bytes::from_static(b"x"), "1#gone.txt", &root)
        .await
        .unwrap();
    backend.delete_file(&f).await.unwrap();

    assert!(backend.get_file(&root, "1#gone.txt").await.unwrap().is_none());
    assert!(tmp.path().join("cloud/vault/$DELETED/1#gone.txt").exists());
}

#[tokio::test]
async fn test_fs_rename_folder_moves_contents() {
    let tmp = tempfile::TempDir::new().unwrap();
    let op = build_fs_operator(&tmp.path().join("cloud").to_string_lossy()).unwrap();
    let backend = authenticated(op).await;

    let root = backend.get_session_folder("vault").await.unwrap();
    let old = backend.create_folder("old", &root).await.unwrap();
    backend
        .upload_file(Bytes::from_static(b"x"), "1#f", &old)
        .await
        .unwrap();

    let new = backend.rename_folder(&old, "new").await.unwrap();
    assert_eq!(new.id, "vault/new/");
    assert!(backend.get_file(&new, "1#f").await.unwrap().is_some());
    assert!(!tmp.path().join("cloud/vault/old").exists());
}

#[tokio::test]
async fn test_sharing_is_unsupported() {
    let backend = authenticated(memory_operator()).await;
    let root = backend.get_session_folder("vault").await.unwrap();
    assert!(matches!(
        backend.share_folder(&root, &["u@x".into()]).await,
        Err(SvError::Unsupported { .. })
    ));
    assert_eq!(backend.get_members_shared(&root).await.unwrap(), None);
    assert!(backend.list_shared_folders().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_search_recurses() {
    let backend = authenticated(memory_operator()).await;
    let root = backend.get_session_folder("vault").await.unwrap();
    let a = backend.create_folder("a", &root).await.unwrap();
    backend
        .upload_file(Bytes::from_static(b"x"), "1#needle.txt", &a)
        .await
        .unwrap();

    let hits = backend.get_items_by_name("needle", &[root]).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].dirs, vec!["a".to_string()]);
}
