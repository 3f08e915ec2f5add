mod common;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{wait_until, MemoryStore};
use tokio::net::TcpListener;
use vodpipe_core::config::HttpTimeouts;
use vodpipe_core::publish::{
    final_sweep, LiveUploader, ObjectStore, S3Credentials, S3ObjectStore, UploadPolicy,
};

const PREFIX: &str = "Drama/Filmes/Test";

fn policy() -> UploadPolicy {
    UploadPolicy {
        concurrency: 15,
        max_retries: 10,
        busy_retry_delay: Duration::from_millis(5),
        network_retry_delay: Duration::from_millis(5),
        stability: Duration::ZERO,
    }
}

fn write(root: &Path, relative: &str, body: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

fn key(relative: &str) -> String {
    format!("{PREFIX}/{relative}")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn burst_never_exceeds_concurrency_limit() {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..100 {
        write(dir.path(), &format!("video/1080p/chunk_{i:05}.m4s"), "segment");
    }
    let store = Arc::new(MemoryStore::with_latency(Duration::from_millis(20)));
    let uploader = LiveUploader::start(
        dir.path(),
        PREFIX,
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        policy(),
    )
    .unwrap();

    assert!(wait_until(Duration::from_secs(10), || uploader.stats().uploaded == 100).await);
    let stats = uploader.shutdown().await;

    assert_eq!(stats.uploaded, 100);
    assert_eq!(stats.bytes, 700);
    let max = store.max_active.load(Ordering::SeqCst);
    assert!(max <= 15, "saw {max} concurrent uploads");
    assert!(max > 1, "uploads never overlapped");
    assert_eq!(store.keys().len(), 100);
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "video/1080p/chunk_00001.m4s", "one");
    write(dir.path(), "video/1080p/chunk_00002.m4s", "two");
    let store = Arc::new(MemoryStore::default());
    store.fail(&key("video/1080p/chunk_00001.m4s"), 9);
    store.fail(&key("video/1080p/chunk_00002.m4s"), 10);

    let uploader = LiveUploader::start(
        dir.path(),
        PREFIX,
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        policy(),
    )
    .unwrap();
    assert!(wait_until(Duration::from_secs(5), || uploader.stats().uploaded == 2).await);
    let stats = uploader.shutdown().await;

    assert_eq!(store.attempts(&key("video/1080p/chunk_00001.m4s")), 10);
    assert_eq!(store.attempts(&key("video/1080p/chunk_00002.m4s")), 11);
    assert_eq!(stats.retries, 19);
    assert!(stats.abandoned.is_empty());
    assert!(!dir.path().join("video/1080p/chunk_00001.m4s").exists());
}

#[tokio::test]
async fn persistent_failure_is_abandoned_after_retry_budget() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "audio-en/chunk_00000.m4s", "audio");
    let store = Arc::new(MemoryStore::default());
    let failing = key("audio-en/chunk_00000.m4s");
    store.fail(&failing, u32::MAX);

    let uploader = LiveUploader::start(
        dir.path(),
        PREFIX,
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        policy(),
    )
    .unwrap();
    assert!(wait_until(Duration::from_secs(5), || !uploader.stats().abandoned.is_empty()).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let stats = uploader.shutdown().await;

    assert_eq!(store.attempts(&failing), 11);
    assert_eq!(stats.abandoned, vec![failing]);
    assert_eq!(stats.uploaded, 0);
    assert!(dir.path().join("audio-en/chunk_00000.m4s").exists());
}

#[tokio::test]
async fn playlists_and_init_segments_stay_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "video/1080p/index.m3u8", "#EXTM3U\n");
    write(dir.path(), "video/1080p/init.mp4", "init");
    write(dir.path(), "video/1080p/chunk_00000.m4s", "seg");
    write(dir.path(), "thumbs/thumb_00001.jpg", "jpeg");
    write(dir.path(), ".partial/chunk_00001.m4s", "hidden");
    write(dir.path(), "video/1080p/.chunk_00002.m4s.tmp", "hidden");

    let store = Arc::new(MemoryStore::default());
    let uploader = LiveUploader::start(
        dir.path(),
        PREFIX,
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        policy(),
    )
    .unwrap();
    assert!(wait_until(Duration::from_secs(5), || uploader.stats().uploaded == 4).await);
    uploader.shutdown().await;

    let root = dir.path();
    assert!(root.join("video/1080p/index.m3u8").exists());
    assert!(root.join("video/1080p/init.mp4").exists());
    assert!(!root.join("video/1080p/chunk_00000.m4s").exists());
    assert!(!root.join("thumbs/thumb_00001.jpg").exists());
    assert!(root.join(".partial/chunk_00001.m4s").exists());
    assert_eq!(
        store.keys(),
        vec![
            key("thumbs/thumb_00001.jpg"),
            key("video/1080p/chunk_00000.m4s"),
            key("video/1080p/index.m3u8"),
            key("video/1080p/init.mp4"),
        ]
    );
    assert_eq!(
        store.content_type(&key("video/1080p/index.m3u8")).as_deref(),
        Some("application/vnd.apple.mpegurl")
    );
    assert_eq!(
        store.content_type(&key("video/1080p/chunk_00000.m4s")).as_deref(),
        Some("video/iso.segment")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn files_written_after_start_are_published() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("video/1080p")).unwrap();
    let store = Arc::new(MemoryStore::default());
    let uploader = LiveUploader::start(
        dir.path(),
        PREFIX,
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        policy(),
    )
    .unwrap();

    write(dir.path(), "video/1080p/chunk_00007.m4s", "late segment");
    let target = key("video/1080p/chunk_00007.m4s");
    assert!(wait_until(Duration::from_secs(5), || store.body(&target).is_some()).await);
    uploader.shutdown().await;

    assert_eq!(store.body(&target).unwrap().as_ref(), b"late segment");
}

#[tokio::test]
async fn young_files_wait_for_stability_without_spending_retries() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "video/1080p/chunk_00003.m4s", "fresh");
    let store = Arc::new(MemoryStore::default());
    let mut policy = policy();
    policy.stability = Duration::from_millis(300);
    policy.busy_retry_delay = Duration::from_millis(20);
    policy.max_retries = 2;

    let uploader = LiveUploader::start(
        dir.path(),
        PREFIX,
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        policy,
    )
    .unwrap();
    let target = key("video/1080p/chunk_00003.m4s");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.attempts(&target), 0);
    assert!(store.body(&target).is_none());
    assert!(uploader.stats().abandoned.is_empty());

    assert!(wait_until(Duration::from_secs(5), || store.body(&target).is_some()).await);
    let stats = uploader.shutdown().await;

    assert_eq!(stats.uploaded, 1);
    assert_eq!(stats.retries, 0);
    assert!(stats.abandoned.is_empty());
    assert_eq!(store.attempts(&target), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stalled_storage_times_out_and_is_retried() {
    // Accepts connections and never answers.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://{}", listener.local_addr().unwrap());
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);
    let server = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            held.push(socket);
        }
    });

    let client = HttpTimeouts::from_millis(200, 200)
        .client("vodpipe-test")
        .unwrap();
    let store = S3ObjectStore::new(
        client,
        &endpoint,
        "media",
        "auto",
        S3Credentials {
            access_key_id: "AKID".into(),
            secret_access_key: "SECRET".into(),
        },
    )
    .unwrap();

    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "video/1080p/chunk_00000.m4s", "segment");
    let mut policy = policy();
    policy.max_retries = 1;
    let uploader = LiveUploader::start(dir.path(), PREFIX, Arc::new(store), policy).unwrap();

    assert!(wait_until(Duration::from_secs(10), || !uploader.stats().abandoned.is_empty()).await);
    let stats = tokio::time::timeout(Duration::from_secs(5), uploader.shutdown())
        .await
        .expect("shutdown should not wait on a stalled request");
    server.abort();

    assert_eq!(stats.abandoned, vec![key("video/1080p/chunk_00000.m4s")]);
    assert_eq!(stats.retries, 1);
    assert!(accepted.load(Ordering::SeqCst) >= 2);
    assert!(dir.path().join("video/1080p/chunk_00000.m4s").exists());
}

#[tokio::test]
async fn start_rejects_missing_root() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::default());
    let result = LiveUploader::start(dir.path().join("absent"), PREFIX, store, policy());
    assert!(result.is_err());
}

#[tokio::test]
async fn final_sweep_uploads_everything_left() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "master.m3u8", "#EXTM3U\n");
    write(dir.path(), "video/1080p/index.m3u8", "#EXTM3U\n");
    write(dir.path(), "video/1080p/init.mp4", "init");
    write(dir.path(), "subs/en.vtt", "WEBVTT\n");
    write(dir.path(), ".hidden", "skip");
    let store = Arc::new(MemoryStore::default());
    store.fail(&key("video/1080p/init.mp4"), 2);

    let report = final_sweep(
        dir.path(),
        PREFIX,
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        &policy(),
    )
    .await
    .unwrap();

    assert_eq!(report.files, 4);
    assert!(report.failed.is_empty());
    assert_eq!(store.attempts(&key("video/1080p/init.mp4")), 3);
    assert_eq!(store.keys().len(), 4);
    assert!(dir.path().join("video/1080p/init.mp4").exists());
}

#[tokio::test]
async fn final_sweep_reports_files_it_could_not_publish() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "master.m3u8", "#EXTM3U\n");
    write(dir.path(), "master-hd.m3u8", "#EXTM3U\n");
    let store = Arc::new(MemoryStore::default());
    store.fail(&key("master-hd.m3u8"), u32::MAX);
    let mut policy = policy();
    policy.max_retries = 2;

    let report = final_sweep(
        dir.path(),
        PREFIX,
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        &policy,
    )
    .await
    .unwrap();

    assert_eq!(report.files, 1);
    assert_eq!(report.failed, vec![key("master-hd.m3u8")]);
    assert_eq!(store.attempts(&key("master-hd.m3u8")), 3);
}
