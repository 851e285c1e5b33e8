// tests/e2e_scenarios.rs
use mailfs::codec;
use mailfs::config::MailFsConfig;
use mailfs::store::local::LocalMailStore;
use mailfs::store::memory::{MemoryStore, StoreCall};
use mailfs::store::{MailStore, RemoteId};
use mailfs::{MailFs, MailFsError};

use std::sync::Once;
use tracing::info;
static INIT: Once = Once::new();

const REG: u32 = libc::S_IFREG as u32 | 0o644;

fn init_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
            .with_test_writer()
            .try_init();
    });
}

async fn mount_local(root: &std::path::Path) -> MailFs<LocalMailStore> {
    MailFs::connect(LocalMailStore::new(root), MailFsConfig::default())
        .await
        .unwrap()
}

async fn live_uids(store: &MemoryStore, container: &str) -> Vec<RemoteId> {
    let handle = store.open_container(container).await.unwrap();
    store
        .list_messages(&handle)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.uid)
        .collect()
}

#[tokio::test]
async fn remount_reads_committed_content() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    {
        let fs = mount_local(tmp.path()).await;
        fs.mkdir("/docs", 0o755).await.unwrap();
        fs.create("/docs/readme.txt", REG).await.unwrap();
        fs.write("/docs/readme.txt", b"hello", 0).await.unwrap();
        fs.fsync("/docs/readme.txt").await.unwrap();
    }
    info!("remounting {}", tmp.path().display());

    let fs = mount_local(tmp.path()).await;
    assert_eq!(fs.read("/docs/readme.txt", 5, 0).await.unwrap(), b"hello");
    let attr = fs.getattr("/docs/readme.txt").await.unwrap();
    assert_eq!(attr.size, 5);
}

#[tokio::test]
async fn remount_without_eager_bootstrap_populates_lazily() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    {
        let fs = mount_local(tmp.path()).await;
        fs.mkdir("/a", 0o755).await.unwrap();
        fs.mkdir("/a/b", 0o755).await.unwrap();
        fs.create("/a/b/c", REG).await.unwrap();
        fs.write("/a/b/c", b"deep", 0).await.unwrap();
        fs.release("/a/b/c").await.unwrap();
    }
    let config = MailFsConfig {
        eager_bootstrap: false,
        ..Default::default()
    };
    let fs = MailFs::connect(LocalMailStore::new(tmp.path()), config)
        .await
        .unwrap();
    assert_eq!(fs.read("/a/b/c", 100, 0).await.unwrap(), b"deep");
}

#[tokio::test]
async fn readdir_twice_yields_same_children() {
    init_logging();
    let store = MemoryStore::new();
    {
        let fs = MailFs::connect(store.clone(), MailFsConfig::default())
            .await
            .unwrap();
        fs.mkdir("/d", 0o755).await.unwrap();
        for name in ["/d/one", "/d/two"] {
            fs.create(name, REG).await.unwrap();
            fs.write(name, name.as_bytes(), 0).await.unwrap();
            fs.release(name).await.unwrap();
        }
    }

    let fs = MailFs::connect(store.clone(), MailFsConfig::default())
        .await
        .unwrap();
    let first = fs.readdir("/d", 0).await.unwrap();
    let lists = store
        .calls()
        .iter()
        .filter(|c| matches!(c, StoreCall::ListMessages(n) if n == "MAILFS|d"))
        .count();
    let second = fs.readdir("/d", 0).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
    let lists_after = store
        .calls()
        .iter()
        .filter(|c| matches!(c, StoreCall::ListMessages(n) if n == "MAILFS|d"))
        .count();
    assert_eq!(lists, lists_after);
}

#[tokio::test]
async fn write_then_read_without_sync() {
    init_logging();
    let store = MemoryStore::new();
    let fs = MailFs::connect(store.clone(), MailFsConfig::default())
        .await
        .unwrap();
    store.clear_calls();
    fs.create("/f", REG).await.unwrap();
    fs.write("/f", b"0123456789", 0).await.unwrap();
    fs.write("/f", b"abc", 4).await.unwrap();
    assert_eq!(fs.read("/f", 3, 4).await.unwrap(), b"abc");
    assert_eq!(fs.read("/f", 100, 0).await.unwrap(), b"0123abc789");
    assert!(
        !store
            .calls()
            .iter()
            .any(|c| matches!(c, StoreCall::AppendMessage(_)))
    );
    assert_eq!(store.live_count("MAILFS"), 1);
}

#[tokio::test]
async fn commit_changes_identity_and_retires_old_object() {
    init_logging();
    let store = MemoryStore::new();
    let fs = MailFs::connect(store.clone(), MailFsConfig::default())
        .await
        .unwrap();
    fs.create("/f", REG).await.unwrap();
    fs.write("/f", b"v1", 0).await.unwrap();
    fs.fsync("/f").await.unwrap();
    let first = live_uids(&store, "MAILFS").await;
    assert_eq!(first.len(), 2);
    let old = first[1];

    fs.write("/f", b"v2", 0).await.unwrap();
    fs.fsync("/f").await.unwrap();
    let second = live_uids(&store, "MAILFS").await;
    assert_eq!(second.len(), 2);
    assert_ne!(second[1], old);
    assert!(!store.contains("MAILFS", old));

    let handle = store.open_container("MAILFS").await.unwrap();
    let message = store.fetch_message(&handle, second[1]).await.unwrap();
    assert_eq!(codec::decode(&message).unwrap(), b"v2");
}

#[tokio::test]
async fn create_reports_missing_parent_and_conflict() {
    init_logging();
    let fs = MailFs::connect(MemoryStore::new(), MailFsConfig::default())
        .await
        .unwrap();
    assert!(matches!(
        fs.create("/a/b", REG).await,
        Err(MailFsError::NotFound(_))
    ));
    fs.mkdir("/a", 0o755).await.unwrap();
    fs.create("/a/b", REG).await.unwrap();
    let err = fs.create("/a/b", REG).await.unwrap_err();
    assert!(matches!(err, MailFsError::AlreadyExists(_)));
    assert_eq!(err.errno(), libc::EEXIST);
}

#[tokio::test]
async fn unlink_of_uncommitted_file_stays_local() {
    init_logging();
    let store = MemoryStore::new();
    let fs = MailFs::connect(store.clone(), MailFsConfig::default())
        .await
        .unwrap();
    fs.create("/scratch", REG).await.unwrap();
    fs.write("/scratch", b"tmp", 0).await.unwrap();
    fs.unlink("/scratch").await.unwrap();
    assert!(
        !store
            .calls()
            .iter()
            .any(|c| matches!(c, StoreCall::DeleteMessage(..) | StoreCall::Expunge(_)))
    );
    assert!(fs.getattr("/scratch").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn failed_sync_keeps_data_dirty_until_retry() {
    init_logging();
    let store = MemoryStore::new();
    let fs = MailFs::connect(store.clone(), MailFsConfig::default())
        .await
        .unwrap();
    fs.create("/f", REG).await.unwrap();
    fs.write("/f", b"keep me", 0).await.unwrap();

    store.set_fail_appends(true);
    let err = fs.fsync("/f").await.unwrap_err();
    assert!(matches!(err, MailFsError::Remote(_)));
    assert!(fs.release("/f").await.is_err());
    assert_eq!(fs.read("/f", 7, 0).await.unwrap(), b"keep me");

    store.set_fail_appends(false);
    fs.fsync("/f").await.unwrap();
    assert_eq!(store.live_count("MAILFS"), 2);
}

#[tokio::test]
async fn container_name_ceiling_is_enforced() {
    init_logging();
    let config = MailFsConfig {
        max_container_name_len: 16,
        ..Default::default()
    };
    let fs = MailFs::connect(MemoryStore::new(), config).await.unwrap();
    fs.mkdir("/short", 0o755).await.unwrap();
    let err = fs.mkdir("/much-too-long-name", 0o755).await.unwrap_err();
    assert!(matches!(err, MailFsError::InvalidRequest(_)));
    assert!(fs.getattr("/much-too-long-name").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn remount_keeps_names_with_edge_whitespace() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    {
        let fs = mount_local(tmp.path()).await;
        fs.mkdir("/dir ", 0o755).await.unwrap();
        fs.create("/ lead.txt", REG).await.unwrap();
        fs.write("/ lead.txt", b"lead", 0).await.unwrap();
        fs.fsync("/ lead.txt").await.unwrap();
        fs.create("/dir /inner", REG).await.unwrap();
        fs.write("/dir /inner", b"inner", 0).await.unwrap();
        fs.release("/dir /inner").await.unwrap();
    }

    let fs = mount_local(tmp.path()).await;
    let names: Vec<_> = fs
        .readdir("/", 0)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec![" lead.txt", "dir "]);
    assert_eq!(fs.read("/ lead.txt", 10, 0).await.unwrap(), b"lead");
    assert_eq!(fs.read("/dir /inner", 10, 0).await.unwrap(), b"inner");
}

#[tokio::test]
async fn corrupt_file_message_does_not_block_connect() {
    init_logging();
    let tmp = tempfile::tempdir().unwrap();
    {
        let fs = mount_local(tmp.path()).await;
        for dir in ["/ok", "/other"] {
            fs.mkdir(dir, 0o755).await.unwrap();
            let file = format!("{dir}/data");
            fs.create(&file, REG).await.unwrap();
            fs.write(&file, dir.as_bytes(), 0).await.unwrap();
            fs.fsync(&file).await.unwrap();
        }
    }
    // message #2 of the container holds /other/data
    std::fs::write(tmp.path().join("MAILFS|other").join("2.eml"), "garbage").unwrap();

    let fs = mount_local(tmp.path()).await;
    let names: Vec<_> = fs
        .readdir("/", 0)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["ok", "other"]);
    assert_eq!(fs.read("/ok/data", 10, 0).await.unwrap(), b"/ok");
    assert!(matches!(
        fs.readdir("/other", 0).await,
        Err(MailFsError::Remote(_))
    ));
}

#[tokio::test]
async fn created_but_unwritten_file_is_not_committed() {
    init_logging();
    let store = MemoryStore::new();
    {
        let fs = MailFs::connect(store.clone(), MailFsConfig::default())
            .await
            .unwrap();
        store.clear_calls();
        fs.create("/empty", REG).await.unwrap();
        fs.fsync("/empty").await.unwrap();
        fs.release("/empty").await.unwrap();
        assert_eq!(fs.getattr("/empty").await.unwrap().size, 0);
    }
    assert!(
        !store
            .calls()
            .iter()
            .any(|c| matches!(c, StoreCall::AppendMessage(_)))
    );

    let fs = MailFs::connect(store.clone(), MailFsConfig::default())
        .await
        .unwrap();
    assert!(fs.getattr("/empty").await.unwrap_err().is_not_found());
}
