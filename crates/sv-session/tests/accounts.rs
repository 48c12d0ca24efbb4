//! Account creation, password login, replicated-object integrity and the
//! gateway's account flow.

mod common;

use bytes::Bytes;
use common::*;
use secrecy::SecretString;
use sv_core::names::LOGIN_META;
use sv_core::SvError;
use sv_crypto::{Cipher, CipherKind};
use sv_session::{Gateway, Scope, Session};
use sv_split::Splitter;
use sv_storage::CloudBackend;

fn password(p: &str) -> SecretString {
    SecretString::from(p.to_string())
}

fn unkeyed_session(backends: &[std::sync::Arc<sv_storage::MemoryBackend>]) -> Session {
    Session::new(
        options("vault"),
        refs(backends),
        Cipher::new(CipherKind::Aes),
        Splitter::from_name("shamir").unwrap(),
        scratch(),
    )
}

#[tokio::test]
async fn test_login_meta_written_everywhere_and_login_roundtrip() {
    let world = World::new(&["G", "D", "B"]);
    let alice = world.account("alice@x").await;

    let creator = unkeyed_session(&alice);
    creator.connect().await.unwrap();
    assert!(!creator.account_exists().await.unwrap());
    let master = creator
        .create_login_metadata(&password("hunter2"), "aes", "shamir", &fast_kdf())
        .await
        .unwrap();
    creator.load_meta().await.unwrap();
    assert!(creator.account_exists().await.unwrap());
    for b in &alice {
        assert!(raw_object(b, "vault", "/", LOGIN_META).await.is_some(), "missing on {}", b.name());
    }
    creator.upload_bytes(b"diary", "/", "diary.txt").await.unwrap();

    let reader = unkeyed_session(&alice);
    reader.connect().await.unwrap();
    let (record, key) = reader.login(&password("hunter2"), &fast_kdf()).await.unwrap();
    assert_eq!(record.encrypt, "aes");
    assert_eq!(record.split, "shamir");
    assert_eq!(key.as_bytes(), master.as_bytes());
    reader.load_meta().await.unwrap();
    assert_eq!(reader.download_bytes("/diary.txt").await.unwrap(), b"diary");
}

#[tokio::test]
async fn test_wrong_password_and_missing_account() {
    let world = World::new(&["G", "D"]);
    let alice = world.account("alice@x").await;

    let fresh = unkeyed_session(&alice);
    fresh.connect().await.unwrap();
    assert!(matches!(
        fresh.login(&password("anything"), &fast_kdf()).await,
        Err(SvError::NotFound(_))
    ));

    fresh
        .create_login_metadata(&password("right"), "xchacha20", "none", &fast_kdf())
        .await
        .unwrap();
    let other = unkeyed_session(&alice);
    other.connect().await.unwrap();
    assert!(matches!(
        other.login(&password("wrong"), &fast_kdf()).await,
        Err(SvError::BadPassword)
    ));
    assert!(!other.has_key());
}

#[tokio::test]
async fn test_integrity_report_flags_tampered_copy() {
    let world = World::new(&["G", "D", "B"]);
    let alice = world.account("alice@x").await;
    let session = unkeyed_session(&alice);
    session.connect().await.unwrap();
    session
        .create_login_metadata(&password("pw"), "aes", "shamir", &fast_kdf())
        .await
        .unwrap();

    let clean = session.check_replicated_integrity(LOGIN_META).await.unwrap();
    assert!(clean.is_consistent());
    assert_eq!(clean.copies.len(), 3);

    let root = alice[2].get_session_folder("vault").await.unwrap();
    alice[2]
        .upload_file(Bytes::from_static(b"{}"), LOGIN_META, &root)
        .await
        .unwrap();
    let tampered = session.check_replicated_integrity(LOGIN_META).await.unwrap();
    assert!(!tampered.is_consistent());
    assert!(tampered.majority.is_some());
    assert_eq!(tampered.dissenting, vec!["B".to_string()]);

    let lost = raw_object(&alice[0], "vault", "/", LOGIN_META).await.unwrap();
    alice[0].delete_file(&lost).await.unwrap();
    let split_vote = session.check_replicated_integrity(LOGIN_META).await.unwrap();
    assert_eq!(split_vote.missing, vec!["G".to_string()]);
    assert!(split_vote.majority.is_none());
}

#[tokio::test]
async fn test_gateway_account_lifecycle() {
    let world = World::new(&["G", "D", "B"]);
    let alice = world.account("alice@x").await;
    let gw = Gateway::with_backends(memory_config(&world.tags(), "alice@x"), refs(&alice)).unwrap();

    let statuses = gw.authenticate().await;
    assert!(statuses.iter().all(|s| s.authenticated && s.error.is_none()));
    assert!(!gw.account_exists().await.unwrap());
    assert!(matches!(
        gw.get_items_in_folder(&Scope::Main, "/").await,
        Err(SvError::NotAuthenticated(_))
    ));

    gw.create_account(&password("open sesame"), None, None).await.unwrap();
    assert!(gw.account_exists().await.unwrap());
    assert!(matches!(
        gw.create_account(&password("again"), None, None).await,
        Err(SvError::AlreadyExists(_))
    ));

    let local = tempfile::tempdir().unwrap();
    let plan = local.path().join("plan.txt");
    std::fs::write(&plan, b"take over the world").unwrap();
    let transfer = gw.upload_file(&Scope::Main, &plan, "/notes").await.unwrap();
    assert_eq!(transfer.path, "/notes/plan.txt");
    assert!(gw.check_integrity(&Scope::Main, LOGIN_META).await.unwrap().is_consistent());

    gw.logout().await;
    assert!(matches!(
        gw.get_items_in_folder(&Scope::Main, "/").await,
        Err(SvError::NotAuthenticated(_))
    ));
    assert!(matches!(
        gw.app_authenticate(&password("nope")).await,
        Err(SvError::BadPassword)
    ));

    gw.app_authenticate(&password("open sesame")).await.unwrap();
    let dest = tempfile::tempdir().unwrap();
    let saved = gw
        .download_file(&Scope::Main, "/notes/plan.txt", Some(dest.path()))
        .await
        .unwrap();
    assert_eq!(std::fs::read(saved).unwrap(), b"take over the world");

    assert!(gw.get_shared_folders().is_empty());
    assert!(matches!(
        gw.get_items_in_folder(&Scope::from_option(Some("nope")), "/").await,
        Err(SvError::NotFound(_))
    ));
    assert!(matches!(
        gw.add_users_to_share("nope", &["bob@x".to_string()]).await,
        Err(SvError::Unimplemented(_))
    ));
}

#[tokio::test]
async fn test_gateway_rejects_empty_backend_list() {
    let config = memory_config(&[], "alice@x");
    assert!(matches!(
        Gateway::with_backends(config, Vec::new()),
        Err(SvError::Config(_))
    ));
}

#[tokio::test(flavor = "current_thread")]
async fn test_account_creation_leaves_runtime_responsive() {
    use std::sync::atomic::{AtomicU64, Ordering};

    let world = World::new(&["G", "D"]);
    let alice = world.account("alice@x").await;
    let session = unkeyed_session(&alice);
    session.connect().await.unwrap();

    let ticks = std::sync::Arc::new(AtomicU64::new(0));
    let ticker = tokio::spawn({
        let ticks = ticks.clone();
        async move {
            loop {
                ticks.fetch_add(1, Ordering::Relaxed);
                tokio::task::yield_now().await;
            }
        }
    });

    let slow = sv_crypto::KdfParams {
        mem_cost_kib: 16 * 1024,
        time_cost: 2,
        parallelism: 1,
    };
    session
        .create_login_metadata(&password("pw"), "aes", "shamir", &slow)
        .await
        .unwrap();
    ticker.abort();

    // the single runtime thread kept polling other tasks while Argon2 ran
    assert!(ticks.load(Ordering::Relaxed) > 1000);
}
