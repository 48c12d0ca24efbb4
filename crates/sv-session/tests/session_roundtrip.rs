//! Upload and download through a session over simulated clouds.

mod common;

use bytes::Bytes;
use common::*;
use sv_core::SvError;
use sv_crypto::CipherKind;
use sv_storage::CloudBackend;

#[tokio::test]
async fn test_four_backends_one_mib_roundtrip() {
    let world = World::new(&["G", "D", "B", "O"]);
    let alice = world.account("alice@x").await;
    let session = open_session("vault", &alice, keyed(CipherKind::Aes), "shamir", scratch()).await;

    let data = pseudo_random(1 << 20, 7);
    let transfer = session.upload_bytes(&data, "/docs", "big.bin").await.unwrap();
    assert!(transfer.all_ok());
    assert_eq!(transfer.shares_written, 4);
    assert_eq!(transfer.path, "/docs/big.bin");

    for b in &alice {
        let share = raw_object(b, "vault", "docs", "1#big.bin").await;
        assert!(share.is_some(), "share missing on {}", b.name());
    }
    assert_eq!(session.download_bytes("/docs/big.bin").await.unwrap(), data);
}

#[tokio::test]
async fn test_download_survives_one_lost_backend() {
    let world = World::new(&["G", "D", "B", "O"]);
    let alice = world.account("alice@x").await;
    let session = open_session("vault", &alice, keyed(CipherKind::Aes), "shamir", scratch()).await;

    let data = pseudo_random(64 * 1024, 11);
    session.upload_bytes(&data, "/", "report.pdf").await.unwrap();

    alice[0].set_offline(true);
    assert_eq!(session.download_bytes("/report.pdf").await.unwrap(), data);

    alice[1].set_offline(true);
    let err = session.download_bytes("/report.pdf").await.unwrap_err();
    assert!(
        matches!(err, SvError::NotEnoughShares { have: 2, need: 3 }),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn test_partial_upload_is_reported_and_readable() {
    let world = World::new(&["G", "D", "B", "O"]);
    let alice = world.account("alice@x").await;
    let session = open_session("vault", &alice, keyed(CipherKind::XChaCha20), "shamir", scratch()).await;
    session.ensure_directory("/inbox").await.unwrap();

    alice[2].set_offline(true);
    let transfer = session.upload_bytes(b"quarterly numbers", "/inbox", "q3.txt").await.unwrap();
    assert!(!transfer.all_ok());
    assert_eq!(transfer.shares_written, 3);
    assert_eq!(transfer.failed.len(), 1);
    assert_eq!(transfer.failed[0].0, "B");

    assert_eq!(session.download_bytes("/inbox/q3.txt").await.unwrap(), b"quarterly numbers");
}

#[tokio::test]
async fn test_upload_fails_when_no_backend_accepts() {
    let world = World::new(&["G", "D"]);
    let alice = world.account("alice@x").await;
    let session = open_session("vault", &alice, keyed(CipherKind::Aes), "shamir", scratch()).await;
    session.ensure_directory("/x").await.unwrap();

    for b in &alice {
        b.set_offline(true);
    }
    let err = session.upload_bytes(b"lost", "/x", "a.txt").await.unwrap_err();
    assert!(err.is_retryable(), "unexpected error: {err}");
    for b in &alice {
        b.set_offline(false);
    }
    assert!(matches!(
        session.download_bytes("/x/a.txt").await,
        Err(SvError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_corrupted_share_is_detected() {
    let world = World::new(&["G", "D", "B", "O"]);
    let alice = world.account("alice@x").await;
    let session = open_session("vault", &alice, keyed(CipherKind::Aes), "shamir", scratch()).await;
    session.upload_bytes(b"do not tamper", "/", "note.txt").await.unwrap();

    let share = raw_object(&alice[1], "vault", "/", "1#note.txt").await.unwrap();
    let mut bytes = alice[1].download_file(&share).await.unwrap().to_vec();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    let root = alice[1].get_session_folder("vault").await.unwrap();
    alice[1]
        .upload_file(Bytes::from(bytes), "1#note.txt", &root)
        .await
        .unwrap();

    let err = session.download_bytes("/note.txt").await.unwrap_err();
    assert!(matches!(err, SvError::Corruption(_)), "unexpected error: {err}");
}

#[tokio::test]
async fn test_null_cipher_replicated_copies_are_plaintext() {
    let world = World::new(&["G", "D", "B"]);
    let alice = world.account("alice@x").await;
    let session = open_session("plain", &alice, keyed(CipherKind::Null), "none", scratch()).await;

    session.upload_bytes(b"hello world", "/", "hello.txt").await.unwrap();
    for b in &alice {
        let copy = raw_object(b, "plain", "/", "1#hello.txt").await.unwrap();
        assert_eq!(b.download_file(&copy).await.unwrap().as_ref(), b"hello world");
    }

    alice[0].set_offline(true);
    alice[1].set_offline(true);
    assert_eq!(session.download_bytes("/hello.txt").await.unwrap(), b"hello world");
}

#[tokio::test]
async fn test_empty_file_roundtrip() {
    let world = World::new(&["G", "D", "B"]);
    let alice = world.account("alice@x").await;
    let session = open_session("vault", &alice, keyed(CipherKind::Aes), "shamir", scratch()).await;

    session.upload_bytes(b"", "/", "empty").await.unwrap();
    assert!(session.download_bytes("/empty").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_and_duplicate_names_rejected() {
    let world = World::new(&["G", "D"]);
    let alice = world.account("alice@x").await;
    let session = open_session("vault", &alice, keyed(CipherKind::Aes), "shamir", scratch()).await;

    for bad in ["$META", "a#b", "", "x/y", ".."] {
        assert!(
            matches!(session.upload_bytes(b"x", "/", bad).await, Err(SvError::InvalidName(_))),
            "{bad:?} accepted"
        );
    }

    session.upload_bytes(b"one", "/", "same.txt").await.unwrap();
    assert!(matches!(
        session.upload_bytes(b"two", "/", "same.txt").await,
        Err(SvError::AlreadyExists(_))
    ));
    assert_eq!(session.download_bytes("/same.txt").await.unwrap(), b"one");
}

#[tokio::test]
async fn test_repair_restores_lost_share() {
    let world = World::new(&["G", "D", "B", "O"]);
    let alice = world.account("alice@x").await;
    let session = open_session("vault", &alice, keyed(CipherKind::Aes), "shamir", scratch()).await;
    session.upload_bytes(b"fragile", "/", "f.txt").await.unwrap();

    let lost = raw_object(&alice[3], "vault", "/", "1#f.txt").await.unwrap();
    alice[3].delete_file(&lost).await.unwrap();

    let report = session.repair_file("/f.txt").await.unwrap();
    assert_eq!(report.present, 3);
    assert_eq!(report.expected, 4);
    assert_eq!(report.rewritten.len(), 4);
    assert!(raw_object(&alice[3], "vault", "/", "1#f.txt").await.is_some());

    // any three of the fresh shares suffice again
    alice[0].set_offline(true);
    assert_eq!(session.download_bytes("/f.txt").await.unwrap(), b"fragile");

    alice[0].set_offline(false);
    let healthy = session.repair_file("/f.txt").await.unwrap();
    assert!(healthy.rewritten.is_empty());
}
