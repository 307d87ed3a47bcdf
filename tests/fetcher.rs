//! Fetcher and cache behaviour against a local mock release server.

use std::path::Path;
use std::time::Duration;

use sha2::{Digest, Sha256};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use compass_launcher::core::artifact::{ArtifactDescriptor, ContentDigest, Locator};
use compass_launcher::core::cache::BinaryCache;
use compass_launcher::core::downloader::Fetcher;
use compass_launcher::core::error::LauncherError;
use compass_launcher::core::http::{build_http_client, RetryPolicy};
use compass_launcher::core::platform::PlatformId;

const VERSION: &str = "1.2.0";
const ASSET_PATH: &str = "/v1.2.0/compass-linux-x64";
const MANIFEST_PATH: &str = "/v1.2.0/manifest.json";

fn payload() -> Vec<u8> {
    b"#!/bin/sh\necho compass 1.2.0\n".repeat(512)
}

fn digest_of(bytes: &[u8]) -> ContentDigest {
    ContentDigest::new(&hex::encode(Sha256::digest(bytes)))
}

fn linux_x64() -> PlatformId {
    PlatformId::parse("linux-x64").unwrap()
}

fn fetcher(root: &Path) -> Fetcher {
    let client = build_http_client(Duration::from_secs(10), None).unwrap();
    Fetcher::new(client, BinaryCache::new(root)).with_retry(RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(1),
    })
}

fn descriptor(server: &MockServer, pinned: Option<ContentDigest>) -> ArtifactDescriptor {
    Locator::new(&server.uri())
        .with_pinned_digest(pinned)
        .locate(VERSION, linux_x64())
        .unwrap()
}

async fn serve_asset(server: &MockServer, body: Vec<u8>, times: u64) {
    Mock::given(method("GET"))
        .and(path(ASSET_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .expect(times)
        .mount(server)
        .await;
}

fn staging_is_empty(root: &Path) -> bool {
    match std::fs::read_dir(root.join(".staging")) {
        Ok(dir) => dir.count() == 0,
        Err(_) => true,
    }
}

#[tokio::test]
async fn fetch_then_lookup_round_trips_the_digest() {
    let server = MockServer::start().await;
    let body = payload();
    serve_asset(&server, body.clone(), 1).await;

    let dir = tempfile::tempdir().unwrap();
    let fetcher = fetcher(dir.path());
    let descriptor = descriptor(&server, Some(digest_of(&body)));

    let entry = fetcher.fetch(&descriptor).await.unwrap();
    assert_eq!(entry.digest, digest_of(&body));
    assert_eq!(std::fs::read(&entry.local_path).unwrap(), body);

    let cached = fetcher.cache().lookup(&descriptor.artifact).await.unwrap();
    assert_eq!(cached.digest, digest_of(&body));
    assert_eq!(cached.local_path, entry.local_path);
    assert!(staging_is_empty(dir.path()));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&entry.local_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}

#[tokio::test]
async fn second_fetch_is_served_from_cache() {
    let server = MockServer::start().await;
    let body = payload();
    serve_asset(&server, body.clone(), 1).await;

    let dir = tempfile::tempdir().unwrap();
    let fetcher = fetcher(dir.path());
    let descriptor = descriptor(&server, Some(digest_of(&body)));

    let first = fetcher.fetch(&descriptor).await.unwrap();
    let second = fetcher.fetch(&descriptor).await.unwrap();

    assert_eq!(first.local_path, second.local_path);
    assert_eq!(first.digest, second.digest);
}

#[tokio::test]
async fn digest_mismatch_installs_nothing() {
    let server = MockServer::start().await;
    serve_asset(&server, payload(), 1).await;

    let dir = tempfile::tempdir().unwrap();
    let fetcher = fetcher(dir.path());
    let descriptor = descriptor(&server, Some(ContentDigest::new("deadbeef")));

    let err = fetcher.fetch(&descriptor).await.unwrap_err();
    assert!(matches!(err, LauncherError::Integrity { .. }), "{err:?}");
    assert!(!err.is_retryable());

    let local_path = fetcher.cache().entry_path(&descriptor.artifact);
    assert!(!local_path.exists());
    assert!(!fetcher.cache().metadata_path(&descriptor.artifact).exists());
    assert!(staging_is_empty(dir.path()));
}

#[tokio::test]
async fn digest_comes_from_release_manifest() {
    let server = MockServer::start().await;
    let body = payload();
    serve_asset(&server, body.clone(), 1).await;
    Mock::given(method("GET"))
        .and(path(MANIFEST_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "version": VERSION,
            "artifacts": {
                "linux-x64": {
                    "sha256": digest_of(&body).to_string(),
                    "size": body.len(),
                    "name": "compass-linux-x64"
                }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let entry = fetcher(dir.path())
        .fetch(&descriptor(&server, None))
        .await
        .unwrap();

    assert_eq!(entry.digest, digest_of(&body));
    assert_eq!(entry.size, body.len() as u64);
}

#[tokio::test]
async fn manifest_without_platform_is_fatal() {
    let server = MockServer::start().await;
    serve_asset(&server, payload(), 0).await;
    Mock::given(method("GET"))
        .and(path(MANIFEST_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "version": VERSION,
            "artifacts": { "darwin-arm64": { "sha256": "00" } }
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let err = fetcher(dir.path())
        .fetch(&descriptor(&server, None))
        .await
        .unwrap_err();
    assert!(matches!(err, LauncherError::ManifestMissingArtifact { .. }), "{err:?}");
}

#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;
    let body = payload();
    Mock::given(method("GET"))
        .and(path(ASSET_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    serve_asset(&server, body.clone(), 1).await;

    let dir = tempfile::tempdir().unwrap();
    let entry = fetcher(dir.path())
        .fetch(&descriptor(&server, Some(digest_of(&body))))
        .await
        .unwrap();
    assert_eq!(std::fs::read(&entry.local_path).unwrap(), body);
}

#[tokio::test]
async fn retries_are_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ASSET_PATH))
        .respond_with(ResponseTemplate::new(502))
        .expect(4)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let err = fetcher(dir.path())
        .fetch(&descriptor(&server, Some(digest_of(b"x"))))
        .await
        .unwrap_err();
    assert!(matches!(err, LauncherError::DownloadFailed { status: 502, .. }), "{err:?}");
}

#[tokio::test]
async fn not_found_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ASSET_PATH))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let descriptor = descriptor(&server, Some(digest_of(b"x")));
    let err = fetcher(dir.path()).fetch(&descriptor).await.unwrap_err();

    assert!(matches!(err, LauncherError::DownloadFailed { status: 404, .. }), "{err:?}");
    assert!(err.remediation().contains(&descriptor.url));
}

#[tokio::test]
async fn offline_miss_makes_no_request() {
    let server = MockServer::start().await;
    serve_asset(&server, payload(), 0).await;

    let dir = tempfile::tempdir().unwrap();
    let err = fetcher(dir.path())
        .offline(true)
        .fetch(&descriptor(&server, Some(digest_of(b"x"))))
        .await
        .unwrap_err();
    assert!(matches!(err, LauncherError::Offline { .. }), "{err:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_fetches_share_one_install() {
    let server = MockServer::start().await;
    let body = payload();
    serve_asset(&server, body.clone(), 1).await;

    let dir = tempfile::tempdir().unwrap();
    let first = fetcher(dir.path());
    let second = fetcher(dir.path());
    let descriptor = descriptor(&server, Some(digest_of(&body)));

    let (a, b) = tokio::join!(first.fetch(&descriptor), second.fetch(&descriptor));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.local_path, b.local_path);
    assert_eq!(std::fs::read(&a.local_path).unwrap(), body);
    assert!(!first.cache().lock_path(&descriptor.artifact).exists());
}

#[tokio::test]
async fn tampered_binary_is_refetched() {
    let server = MockServer::start().await;
    let body = payload();
    serve_asset(&server, body.clone(), 2).await;

    let dir = tempfile::tempdir().unwrap();
    let fetcher = fetcher(dir.path());
    let descriptor = descriptor(&server, Some(digest_of(&body)));

    let entry = fetcher.fetch(&descriptor).await.unwrap();
    std::fs::write(&entry.local_path, b"#!/bin/sh\necho tampered\n").unwrap();

    assert!(fetcher.cache().lookup(&descriptor.artifact).await.is_none());

    let refetched = fetcher.fetch(&descriptor).await.unwrap();
    assert_eq!(refetched.local_path, entry.local_path);
    assert_eq!(std::fs::read(&refetched.local_path).unwrap(), body);
}

#[tokio::test]
async fn unreadable_metadata_counts_as_a_miss() {
    let server = MockServer::start().await;
    let body = payload();
    serve_asset(&server, body.clone(), 2).await;

    let dir = tempfile::tempdir().unwrap();
    let fetcher = fetcher(dir.path());
    let descriptor = descriptor(&server, Some(digest_of(&body)));

    fetcher.fetch(&descriptor).await.unwrap();
    std::fs::write(fetcher.cache().metadata_path(&descriptor.artifact), "{ not json").unwrap();

    let entry = fetcher.fetch(&descriptor).await.unwrap();
    assert_eq!(entry.digest, digest_of(&body));
}
