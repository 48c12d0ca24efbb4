//! Path cache reconciliation against what the backends report.

mod common;

use bytes::Bytes;
use common::*;
use sv_core::{ItemKind, SvError};
use sv_crypto::CipherKind;
use sv_session::Session;
use sv_split::Splitter;
use sv_storage::CloudBackend;

fn names_of(items: &[sv_core::ListedItem]) -> Vec<(&str, ItemKind)> {
    items.iter().map(|i| (i.name.as_str(), i.kind)).collect()
}

#[tokio::test]
async fn test_second_session_sees_first_sessions_items() {
    let world = World::new(&["G", "D", "B"]);
    let alice = world.account("alice@x").await;
    let cipher = keyed(CipherKind::Aes);
    let first = open_session("vault", &alice, cipher.copy(), "shamir", scratch()).await;
    first.upload_bytes(b"alpha", "/", "a.txt").await.unwrap();
    first.create_folder("/", "sub").await.unwrap();

    let second = open_session("vault", &alice, cipher, "shamir", scratch()).await;
    let items = second.get_items_in_folder("/").await.unwrap();
    assert_eq!(
        names_of(&items),
        vec![("sub", ItemKind::Folder), ("a.txt", ItemKind::File)]
    );
    assert_eq!(second.download_bytes("/a.txt").await.unwrap(), b"alpha");

    first.delete_file("/a.txt").await.unwrap();
    let items = second.get_items_in_folder("/").await.unwrap();
    assert_eq!(names_of(&items), vec![("sub", ItemKind::Folder)]);
    assert!(matches!(
        second.download_bytes("/a.txt").await,
        Err(SvError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_reserved_and_foreign_objects_hidden() {
    let world = World::new(&["G", "D"]);
    let alice = world.account("alice@x").await;
    let session = open_session("vault", &alice, keyed(CipherKind::Aes), "shamir", scratch()).await;

    let root = alice[0].get_session_folder("vault").await.unwrap();
    alice[0]
        .upload_file(Bytes::from_static(b"stray"), "notes.txt", &root)
        .await
        .unwrap();
    alice[0].create_folder("$DELETED", &root).await.unwrap();
    session.upload_bytes(b"real", "/", "real.txt").await.unwrap();

    let items = session.get_items_in_folder("/").await.unwrap();
    assert_eq!(names_of(&items), vec![("real.txt", ItemKind::File)]);
}

#[tokio::test]
async fn test_folder_wins_name_clash() {
    let world = World::new(&["G", "D"]);
    let alice = world.account("alice@x").await;
    let session = open_session("vault", &alice, keyed(CipherKind::Aes), "shamir", scratch()).await;

    let g_root = alice[0].get_session_folder("vault").await.unwrap();
    alice[0]
        .upload_file(Bytes::from_static(b"x"), "1#clash", &g_root)
        .await
        .unwrap();
    let d_root = alice[1].get_session_folder("vault").await.unwrap();
    alice[1].create_folder("clash", &d_root).await.unwrap();

    let items = session.get_items_in_folder("/").await.unwrap();
    assert_eq!(names_of(&items), vec![("clash", ItemKind::Folder)]);
}

#[tokio::test]
async fn test_unreachable_backend_keeps_known_shares() {
    let world = World::new(&["G", "D", "B", "O"]);
    let alice = world.account("alice@x").await;
    let session = open_session("vault", &alice, keyed(CipherKind::Aes), "shamir", scratch()).await;
    session.upload_bytes(b"kept", "/", "k.txt").await.unwrap();

    alice[0].set_offline(true);
    let items = session.get_items_in_folder("/").await.unwrap();
    assert_eq!(names_of(&items), vec![("k.txt", ItemKind::File)]);
    assert_eq!(session.resolve_file("/k.txt").await.unwrap().share_count(), 4);

    alice[0].set_offline(false);
    alice[1].set_offline(true);
    alice[2].set_offline(true);
    assert!(matches!(
        session.download_bytes("/k.txt").await,
        Err(SvError::NotEnoughShares { .. })
    ));
}

#[tokio::test]
async fn test_stored_order_wins_over_configured_order() {
    let world = World::new(&["G", "D", "B"]);
    let alice = world.account("alice@x").await;
    let cipher = keyed(CipherKind::Aes);
    let writer = open_session("vault", &alice, cipher.copy(), "shamir", scratch()).await;
    assert_eq!(writer.order(), vec!["G", "D", "B"]);
    writer.upload_bytes(b"ordered", "/", "o.txt").await.unwrap();

    let shuffled = vec![alice[2].clone(), alice[0].clone(), alice[1].clone()];
    let reader = open_session("vault", &shuffled, cipher, "shamir", scratch()).await;
    assert_eq!(reader.order(), vec!["G", "D", "B"]);
    assert_eq!(reader.download_bytes("/o.txt").await.unwrap(), b"ordered");
}

#[tokio::test]
async fn test_stored_cipher_and_codec_replace_configured_ones() {
    let world = World::new(&["G", "D"]);
    let alice = world.account("alice@x").await;
    let writer = open_session("vault", &alice, keyed(CipherKind::XChaCha20), "none", scratch()).await;
    let key = writer.cipher().key().cloned().unwrap();
    writer.upload_bytes(b"chacha", "/", "c.txt").await.unwrap();

    let mut aes = sv_crypto::Cipher::new(CipherKind::Aes);
    aes.set_key(key);
    let reader = open_session("vault", &alice, aes, "shamir", scratch()).await;
    assert_eq!(reader.meta().encrypt, "xchacha20");
    assert_eq!(reader.meta().split, "none");
    assert_eq!(reader.download_bytes("/c.txt").await.unwrap(), b"chacha");
}

#[tokio::test]
async fn test_backend_missing_from_order_is_inactive() {
    let world = World::new(&["G", "D", "B"]);
    let alice = world.account("alice@x").await;
    let cipher = keyed(CipherKind::Aes);
    let _writer = open_session("vault", &alice[..2], cipher.copy(), "shamir", scratch()).await;

    let session = Session::new(
        options("vault"),
        refs(&alice),
        cipher,
        Splitter::from_name("shamir").unwrap(),
        scratch(),
    );
    let meta = session.authenticate().await.unwrap();
    assert_eq!(meta.order, vec!["G", "D"]);
    let active: Vec<String> = session.backends().iter().map(|b| b.name().to_string()).collect();
    assert_eq!(active, vec!["G", "D"]);

    session.upload_bytes(b"two only", "/", "t.txt").await.unwrap();
    assert!(raw_object(&alice[2], "vault", "/", "1#t.txt").await.is_none());
}

#[tokio::test]
async fn test_search_finds_nested_items_once() {
    let world = World::new(&["G", "D", "B"]);
    let alice = world.account("alice@x").await;
    let session = open_session("vault", &alice, keyed(CipherKind::Aes), "shamir", scratch()).await;
    session.upload_bytes(b"1", "/docs/reports", "q1-report.txt").await.unwrap();
    session.upload_bytes(b"2", "/docs", "q1-summary.txt").await.unwrap();
    session.upload_bytes(b"3", "/docs", "q2-summary.txt").await.unwrap();
    session.create_folder("/", "q1-archive").await.unwrap();

    let found = session.search_items_by_name("q1", "/").await.unwrap();
    let paths: Vec<&str> = found.iter().map(|i| i.path.as_str()).collect();
    assert_eq!(
        paths,
        vec!["/docs/q1-summary.txt", "/docs/reports/q1-report.txt", "/q1-archive"]
    );
    assert!(session.search_items_by_name("META", "/").await.unwrap().is_empty());

    let scoped = session.search_items_by_name("summary", "/docs").await.unwrap();
    assert_eq!(scoped.len(), 2);
}

#[tokio::test]
async fn test_recycle_bin_stays_hidden() {
    let world = World::new(&["G", "D", "B"]);
    let alice = world.soft_delete_account("alice@x").await;
    let cipher = keyed(CipherKind::Aes);
    let session = open_session("vault", &alice, cipher.copy(), "shamir", scratch()).await;
    session.upload_bytes(b"keep", "/", "keep.txt").await.unwrap();
    session.upload_bytes(b"gone", "/", "gone.txt").await.unwrap();
    session.upload_bytes(b"deep", "/old", "deep.txt").await.unwrap();

    session.delete_file("/gone.txt").await.unwrap();
    session.delete_folder("/old").await.unwrap();
    for b in &alice {
        assert!(raw_object(b, "vault", "/$DELETED", "1#gone.txt").await.is_some());
        assert!(raw_object(b, "vault", "/$DELETED/old", "1#deep.txt").await.is_some());
    }

    let items = session.get_items_in_folder("/").await.unwrap();
    assert_eq!(names_of(&items), vec![("keep.txt", ItemKind::File)]);

    let fresh = open_session("vault", &alice, cipher, "shamir", scratch()).await;
    let items = fresh.get_items_in_folder("/").await.unwrap();
    assert_eq!(names_of(&items), vec![("keep.txt", ItemKind::File)]);
    assert!(matches!(
        fresh.download_bytes("/gone.txt").await,
        Err(SvError::NotFound(_))
    ));
    assert!(fresh.download_bytes("/old/deep.txt").await.is_err());
    assert!(fresh.get_items_in_folder("/$DELETED").await.is_err());

    assert!(fresh.search_items_by_name("gone", "/").await.unwrap().is_empty());
    assert!(fresh.search_items_by_name("deep", "/").await.unwrap().is_empty());
    let hits = fresh.search_items_by_name("keep", "/").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path, "/keep.txt");
}

#[tokio::test]
async fn test_replicated_rewrite_overwrites_in_place() {
    let world = World::new(&["G", "D"]);
    let alice = world.soft_delete_account("alice@x").await;
    let session = open_session("vault", &alice, keyed(CipherKind::Aes), "shamir", scratch()).await;

    for round in 0..5u8 {
        let written = session
            .upload_replicated("$FEK", Bytes::from(vec![round; 8]))
            .await
            .unwrap();
        assert!(written.all_ok);
    }
    assert_eq!(
        session.download_replicated("$FEK").await.unwrap().unwrap().as_ref(),
        &[4u8; 8]
    );
    for b in &alice {
        assert!(raw_object(b, "vault", "/", "$FEK").await.is_some());
        assert!(raw_object(b, "vault", "/$DELETED", "$FEK").await.is_none());
    }
}
