//! An OCI Distribution v2 registry engine: content-addressed blob/manifest
//! storage, resumable chunked uploads, a multi-tenant space/registry
//! hierarchy with glob-based access policy, and transparent upstream
//! proxying with a local cache.
//!
//! ## Use as a library
//!
//! Supply a [`store::MetadataStore`], a [`store::ContentStore`], an
//! [`auth::AuthProvider`], and optionally [`hooks::RegistryHooks`], then
//! mount the resulting router:
//!
//! ```no_run
//! use std::sync::Arc;
//! use oci_registry_core::{config::Config, store::{memory::InMemoryMetadataStore, filesystem::FilesystemContentStore}, Registry};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let metadata = Arc::new(InMemoryMetadataStore::new());
//! let content = Arc::new(FilesystemContentStore::new("./data")?);
//! let registry = Registry::new(Config::default(), metadata, content, Arc::new(()), Arc::new(true));
//! let app = registry.router();
//! # let _ = app;
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod auth;
pub mod blob;
pub mod config;
pub mod digest;
pub mod dispatcher;
pub mod error;
pub mod hints;
pub mod hooks;
pub mod manifest;
pub mod model;
pub mod policy;
pub mod route;
pub mod store;
pub mod upstream;
mod www_authenticate;

use std::sync::Arc;

use axum::Router;

pub use error::RegistryError;

use crate::{
    access::AccessResolver,
    auth::AuthProvider,
    blob::BlobEngine,
    config::Config,
    hooks::RegistryHooks,
    manifest::ManifestEngine,
    store::{ContentStore, MetadataStore},
    upstream::UpstreamClient,
};

/// The assembled registry engine: every component (spec.md §2's C1-C8)
/// wired together behind the fields [`dispatcher`] reads off `State`.
pub struct Registry {
    pub config: Config,
    pub access: AccessResolver,
    pub blob: BlobEngine,
    pub manifest: ManifestEngine,
    pub upstream: UpstreamClient,
    pub metadata: Arc<dyn MetadataStore>,
    pub content: Arc<dyn ContentStore>,
    pub hooks: Arc<dyn RegistryHooks>,
    pub auth_provider: Arc<dyn AuthProvider>,
}

impl Registry {
    /// Wires a metadata store, content store, auth provider, and hooks
    /// implementation into the engine layer, per `config`. `hooks` is an
    /// `Arc` (not a `Box`) so it can be cloned into the detached task that
    /// finishes an upstream blob's tee-commit after the response has already
    /// started streaming (spec.md §4.5).
    pub fn new(
        config: Config,
        metadata: Arc<dyn MetadataStore>,
        content: Arc<dyn ContentStore>,
        hooks: Arc<dyn RegistryHooks>,
        auth_provider: Arc<dyn AuthProvider>,
    ) -> Arc<Self> {
        let access = AccessResolver::new(
            metadata.clone(),
            auth_provider.clone(),
            config.relative_urls,
            config.external_base_url.clone(),
        );
        let blob = BlobEngine::new(metadata.clone(), content.clone());
        let manifest = ManifestEngine::new(metadata.clone(), config.manifest_limits());
        let upstream = UpstreamClient::new();

        Arc::new(Self {
            config,
            access,
            blob,
            manifest,
            upstream,
            metadata,
            content,
            hooks,
            auth_provider,
        })
    }

    /// Builds the `axum` router mounting every `/v2/...` endpoint this
    /// registry serves (spec.md §6 "Wire protocol").
    pub fn router(self: Arc<Self>) -> Router {
        dispatcher::router(self)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{
            header::{CONTENT_LENGTH, CONTENT_RANGE, LOCATION},
            Request, StatusCode,
        },
        routing::RouterIntoService,
    };
    use http_body_util::BodyExt;
    use tempdir::TempDir;
    use tower::{util::ServiceExt, Service};
    use tower_http::trace::TraceLayer;

    use crate::{
        config::Config,
        model::{PackageType, RegistryType},
        store::{filesystem::FilesystemContentStore, memory::InMemoryMetadataStore},
        Registry,
    };

    #[allow(dead_code)]
    struct Context {
        _tmp: TempDir,
        registry: Arc<Registry>,
    }

    fn mk_test_app() -> (Context, RouterIntoService<Body>) {
        let tmp = TempDir::new("oci-registry-core-test").expect("could not create temp dir");

        let store = InMemoryMetadataStore::new();
        let root_id = store.insert_space("tests", None);
        store.insert_registry(crate::model::Registry {
            id: uuid::Uuid::new_v4(),
            parent_id: root_id,
            root_parent_id: root_id,
            name: "sample".to_owned(),
            registry_type: RegistryType::Virtual,
            package_type: PackageType::Docker,
            allowed_patterns: vec![],
            blocked_patterns: vec![],
            upstream_config_id: None,
        });

        let metadata: Arc<dyn crate::store::MetadataStore> = Arc::new(store);
        let content: Arc<dyn crate::store::ContentStore> =
            Arc::new(FilesystemContentStore::new(tmp.path()).expect("could not init content store"));

        let registry = Registry::new(Config::default(), metadata, content, Arc::new(()), Arc::new(true));
        let router = registry.clone().router().layer(TraceLayer::new_for_http());
        let service = router.into_service::<Body>();

        (Context { _tmp: tmp, registry }, service)
    }

    #[tokio::test]
    async fn probe_without_credentials_is_rejected_unless_anonymous_view_allowed() {
        let (_ctx, mut service) = mk_test_app();
        let app = service.ready().await.expect("could not launch service");

        // `Arc::new(true)` as the auth provider allows anonymous access to
        // everything, so the probe succeeds even with no credentials.
        let response = app
            .call(
                Request::builder()
                    .method("GET")
                    .uri("/v2/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn chunked_upload_then_manifest_round_trip() {
        let (_ctx, mut service) = mk_test_app();
        let app = service.ready().await.expect("could not launch service");

        const IMAGE: &[u8] = b"hello world blob contents";

        let response = app
            .call(
                Request::builder()
                    .method("POST")
                    .uri("/v2/tests/sample/myapp/blobs/uploads/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let upload_location = response
            .headers()
            .get(LOCATION)
            .expect("missing Location header")
            .to_str()
            .unwrap()
            .to_owned();

        let response = app
            .call(
                Request::builder()
                    .method("PATCH")
                    .header(CONTENT_LENGTH, IMAGE.len())
                    .header(CONTENT_RANGE, format!("0-{}", IMAGE.len() - 1))
                    .uri(&upload_location)
                    .body(Body::from(IMAGE))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let digest = crate::digest::Digest::of(IMAGE);
        let finalize_uri = format!("{upload_location}?digest={digest}");

        let response = app
            .call(
                Request::builder()
                    .method("PUT")
                    .uri(finalize_uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .call(
                Request::builder()
                    .method("HEAD")
                    .uri(format!("/v2/tests/sample/myapp/blobs/{digest}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let manifest = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "config": {"mediaType": "application/vnd.oci.image.config.v1+json", "digest": digest.to_string(), "size": IMAGE.len()},
            "layers": [],
        });
        let manifest_bytes = serde_json::to_vec(&manifest).unwrap();

        let response = app
            .call(
                Request::builder()
                    .method("PUT")
                    .uri("/v2/tests/sample/myapp/manifests/latest")
                    .header(
                        axum::http::header::CONTENT_TYPE,
                        "application/vnd.oci.image.manifest.v1+json",
                    )
                    .body(Body::from(manifest_bytes.clone()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .call(
                Request::builder()
                    .method("GET")
                    .uri("/v2/tests/sample/myapp/manifests/latest")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), manifest_bytes.as_slice());
    }

    #[tokio::test]
    async fn missing_manifest_returns_manifest_unknown() {
        let (_ctx, mut service) = mk_test_app();
        let app = service.ready().await.expect("could not launch service");

        let response = app
            .call(
                Request::builder()
                    .method("GET")
                    .uri("/v2/tests/sample/myapp/manifests/missing-tag")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_registry_name_returns_404() {
        let (_ctx, mut service) = mk_test_app();
        let app = service.ready().await.expect("could not launch service");

        let response = app
            .call(
                Request::builder()
                    .method("GET")
                    .uri("/v2/tests/doesnotexist/myapp/manifests/latest")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
