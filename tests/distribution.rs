//! End-to-end scenarios against the assembled HTTP surface (spec.md §8).
//!
//! Grounded on the teacher's own `lib.rs` integration tests (`mk_test_app`,
//! `chunked_upload`, `image_download`), rebuilt here against the full
//! `root/registry/image` route shape. Each request clones the `Router` (cheap,
//! `Arc`-backed internally) and drives it with `tower::ServiceExt::oneshot`,
//! so concurrent requests in the same test don't fight over one service's
//! readiness state.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{
        header::{CONTENT_LENGTH, CONTENT_RANGE, LOCATION},
        Request, StatusCode,
    },
    response::Response,
    Router,
};
use http_body_util::BodyExt;
use oci_registry_core::{
    config::Config,
    digest::Digest,
    model::{PackageType, Registry as RegistryRecord, RegistryType},
    store::{filesystem::FilesystemContentStore, memory::InMemoryMetadataStore},
    Registry,
};
use tempdir::TempDir;
use tower::ServiceExt;

struct Harness {
    _tmp: TempDir,
    router: Router,
}

fn mk_app(registries: &[(&str, RegistryType, &[String], &[String])]) -> Harness {
    let tmp = TempDir::new("oci-registry-core-distribution-test").expect("tmp dir");

    let store = InMemoryMetadataStore::new();
    let root = store.insert_space("tests", None);
    for (name, registry_type, allowed, blocked) in registries {
        store.insert_registry(RegistryRecord {
            id: uuid::Uuid::new_v4(),
            parent_id: root,
            root_parent_id: root,
            name: (*name).to_owned(),
            registry_type: *registry_type,
            package_type: PackageType::Docker,
            allowed_patterns: allowed.to_vec(),
            blocked_patterns: blocked.to_vec(),
            upstream_config_id: None,
        });
    }

    let metadata: Arc<dyn oci_registry_core::store::MetadataStore> = Arc::new(store);
    let content: Arc<dyn oci_registry_core::store::ContentStore> =
        Arc::new(FilesystemContentStore::new(tmp.path()).expect("content store"));

    let registry = Registry::new(Config::default(), metadata, content, Arc::new(()), Arc::new(true));
    let router = registry.router();

    Harness { _tmp: tmp, router }
}

async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.expect("infallible router")
}

async fn push_blob(router: &Router, path_prefix: &str, bytes: &[u8]) -> Digest {
    let response = send(
        router,
        Request::builder()
            .method("POST")
            .uri(format!("{path_prefix}/blobs/uploads/"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let upload_location = response
        .headers()
        .get(LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned();

    let response = send(
        router,
        Request::builder()
            .method("PATCH")
            .header(CONTENT_LENGTH, bytes.len())
            .header(CONTENT_RANGE, format!("0-{}", bytes.len() - 1))
            .uri(&upload_location)
            .body(Body::from(bytes.to_vec()))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let digest = Digest::of(bytes);
    let response = send(
        router,
        Request::builder()
            .method("PUT")
            .uri(format!("{upload_location}?digest={digest}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    digest
}

fn oci_manifest_single(config_digest: Digest, config_size: usize) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "config": {
            "mediaType": "application/vnd.oci.image.config.v1+json",
            "digest": config_digest.to_string(),
            "size": config_size,
        },
        "layers": [],
    }))
    .unwrap()
}

/// A config-less single manifest: closure verification has nothing to check
/// a referenced blob against, so this needs no prior blob push. `marker`
/// only needs to make the two platform variants hash to different digests.
fn oci_manifest_no_config(marker: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "layers": [],
        "annotations": {"marker": marker},
    }))
    .unwrap()
}

async fn put_manifest(router: &Router, path_prefix: &str, reference: &str, bytes: Vec<u8>) -> Response {
    send(
        router,
        Request::builder()
            .method("PUT")
            .uri(format!("{path_prefix}/manifests/{reference}"))
            .header(
                axum::http::header::CONTENT_TYPE,
                "application/vnd.oci.image.manifest.v1+json",
            )
            .body(Body::from(bytes))
            .unwrap(),
    )
    .await
}

/// Scenario 1: simple push/pull by tag and by digest, `Docker-Content-Digest`
/// matches the manifest's own digest.
#[tokio::test]
async fn scenario_simple_push_pull() {
    let harness = mk_app(&[("sample", RegistryType::Virtual, &[], &[])]);
    let prefix = "/v2/tests/sample/app";

    const LAYER: &[u8] = b"a layer worth keeping intact end to end";
    let config_digest = push_blob(&harness.router, prefix, LAYER).await;
    let manifest_bytes = oci_manifest_single(config_digest, LAYER.len());
    let manifest_digest = Digest::of(&manifest_bytes);

    let response = put_manifest(&harness.router, prefix, "v1", manifest_bytes.clone()).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        response.headers().get("Docker-Content-Digest").unwrap(),
        &manifest_digest.to_string(),
    );

    for reference in ["v1".to_owned(), manifest_digest.to_string()] {
        let response = send(
            &harness.router,
            Request::builder()
                .method("GET")
                .uri(format!("{prefix}/manifests/{reference}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), manifest_bytes.as_slice());
    }
}

/// Scenario 2: cross-mount a blob already present under another repository
/// reuses it without opening a new upload session.
#[tokio::test]
async fn scenario_cross_mount_reuses_existing_blob() {
    let harness = mk_app(&[("sample", RegistryType::Virtual, &[], &[])]);
    let prefix = "/v2/tests/sample";

    const LAYER: &[u8] = b"shared layer content";
    let digest = push_blob(&harness.router, &format!("{prefix}/other-repo"), LAYER).await;

    let response = send(
        &harness.router,
        Request::builder()
            .method("POST")
            .uri(format!("{prefix}/app/blobs/uploads/?mount={digest}&from=other-repo"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(response
        .headers()
        .get(LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .contains(&digest.to_string()));
}

/// Scenario 4: a manifest-list GET without platform hints returns the index
/// as-is; with explicit `os`/`arch` query params it resolves to the matching
/// child (the substitute for "User-Agent implying arm64", see DESIGN.md).
#[tokio::test]
async fn scenario_manifest_list_platform_selection() {
    // UPSTREAM tolerates an index whose children aren't independently
    // blob-registered (spec.md §9 open question on missing children,
    // see DESIGN.md); platform selection itself is orthogonal to that.
    let harness = mk_app(&[("sample", RegistryType::Upstream, &[], &[])]);
    let prefix = "/v2/tests/sample/app";

    let amd64_bytes = oci_manifest_no_config("amd64");
    let arm64_bytes = oci_manifest_no_config("arm64");
    let amd64_digest = Digest::of(&amd64_bytes);
    let arm64_digest = Digest::of(&arm64_bytes);

    for bytes in [&amd64_bytes, &arm64_bytes] {
        let response = put_manifest(&harness.router, prefix, &Digest::of(bytes).to_string(), bytes.clone()).await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let index_bytes = serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.index.v1+json",
        "manifests": [
            {"mediaType": "application/vnd.oci.image.manifest.v1+json", "digest": amd64_digest.to_string(), "size": amd64_bytes.len(), "platform": {"os": "linux", "architecture": "amd64"}},
            {"mediaType": "application/vnd.oci.image.manifest.v1+json", "digest": arm64_digest.to_string(), "size": arm64_bytes.len(), "platform": {"os": "linux", "architecture": "arm64"}},
        ],
    }))
    .unwrap();

    let response = send(
        &harness.router,
        Request::builder()
            .method("PUT")
            .uri(format!("{prefix}/manifests/multi"))
            .header(axum::http::header::CONTENT_TYPE, "application/vnd.oci.image.index.v1+json")
            .body(Body::from(index_bytes.clone()))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    // No platform hint, `Accept` names the index: returns the index.
    let response = send(
        &harness.router,
        Request::builder()
            .method("GET")
            .uri(format!("{prefix}/manifests/multi"))
            .header(axum::http::header::ACCEPT, "application/vnd.oci.image.index.v1+json")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.as_ref(), index_bytes.as_slice());

    // Accept names a single-manifest media type and the arch query param
    // selects the arm64 child.
    let response = send(
        &harness.router,
        Request::builder()
            .method("GET")
            .uri(format!("{prefix}/manifests/multi?os=linux&arch=arm64"))
            .header(axum::http::header::ACCEPT, "application/vnd.oci.image.manifest.v1+json")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.as_ref(), arm64_bytes.as_slice());
}

/// Scenario 3 (local-cache half): once a blob has been committed locally, a
/// VIRTUAL registry serves it byte-identical on every subsequent GET.
/// `dispatcher.rs::get_blob`/`get_manifest` both fall back to
/// `UpstreamClient` on a miss against an UPSTREAM registry, but exercising
/// that fallback end-to-end needs a mock HTTP server standing in for the
/// remote, which isn't in this crate's dependency stack (see DESIGN.md);
/// `upstream::tests` covers the URL construction and retry policy the
/// fallback relies on, and `blob.rs`/`manifest/mod.rs`'s own unit tests cover
/// the commit/closure-tolerance logic the fetched bytes are run through once
/// they arrive.
#[tokio::test]
async fn scenario_cached_blob_served_byte_identical() {
    let harness = mk_app(&[("sample", RegistryType::Virtual, &[], &[])]);
    let prefix = "/v2/tests/sample/app";
    const LAYER: &[u8] = b"bytes that must come back unchanged";
    let digest = push_blob(&harness.router, prefix, LAYER).await;

    let response = send(
        &harness.router,
        Request::builder()
            .method("GET")
            .uri(format!("{prefix}/blobs/{digest}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.as_ref(), LAYER);
}

/// Scenario 5: a blocked `image:tag` glob denies the matching reference but
/// leaves other tags on the same image untouched.
#[tokio::test]
async fn scenario_policy_deny_blocks_matching_tag_but_not_others() {
    let harness = mk_app(&[(
        "sample",
        RegistryType::Virtual,
        &[],
        &["foo:latest".to_owned()],
    )]);
    let prefix = "/v2/tests/sample/foo";

    let response = send(
        &harness.router,
        Request::builder()
            .method("GET")
            .uri(format!("{prefix}/manifests/latest"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // A different tag on the same image is unaffected by the block glob —
    // it 404s because it doesn't exist, not because policy denied it.
    let response = send(
        &harness.router,
        Request::builder()
            .method("GET")
            .uri(format!("{prefix}/manifests/1.0"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// Scenario 6: two concurrent `PUT manifest` calls under the same tag leave
/// exactly one winner visible, and both manifest rows survive the race.
#[tokio::test]
async fn scenario_concurrent_tag_race_has_single_consistent_winner() {
    let harness = mk_app(&[("sample", RegistryType::Virtual, &[], &[])]);
    let prefix = "/v2/tests/sample/app";

    let m1 = oci_manifest_no_config("race-1");
    let m2 = oci_manifest_no_config("race-2");
    let d1 = Digest::of(&m1);
    let d2 = Digest::of(&m2);

    let (r1, r2) = tokio::join!(
        put_manifest(&harness.router, prefix, "v2", m1),
        put_manifest(&harness.router, prefix, "v2", m2),
    );
    assert_eq!(r1.status(), StatusCode::CREATED);
    assert_eq!(r2.status(), StatusCode::CREATED);

    let response = send(
        &harness.router,
        Request::builder()
            .method("GET")
            .uri(format!("{prefix}/manifests/v2"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let winner_digest: Digest = response
        .headers()
        .get("Docker-Content-Digest")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(winner_digest == d1 || winner_digest == d2);

    for digest in [d1, d2] {
        let response = send(
            &harness.router,
            Request::builder()
                .method("GET")
                .uri(format!("{prefix}/manifests/{digest}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK, "both manifest rows must survive the race");
    }
}
