//! C1 content store + C2 metadata store traits.
//!
//! Grounded on the teacher's `storage::{RegistryStorage, FilesystemStorage}`
//! (blob staging, content-addressed path, atomic rename-on-commit), split
//! into the spec's two-store shape because spec.md explicitly separates
//! "content-addressed blob I/O over a pluggable backend" (C1) from
//! "transactional records ... for registries, blobs, manifests, tags,
//! upstreams, download stats" (C2) where the teacher fuses both into one
//! `RegistryStorage` trait.

pub mod filesystem;
pub mod memory;

use axum::{async_trait, http::StatusCode, response::IntoResponse};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

use crate::{
    digest::Digest,
    error::{ErrorCode, OciError},
    model::{
        Image, ImageId, Manifest, ManifestId, Referrer, Registry, RegistryId, Space, SpaceId,
        Tag, UploadSession, UploadSessionId, UpstreamConfig, UpstreamConfigId,
    },
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found")]
    NotFound,
    #[error("upload session does not exist")]
    UploadDoesNotExist,
    #[error("concurrent modification detected, retry")]
    VersionConflict,
    #[error("digest did not match its content")]
    DigestMismatch,
    #[error("io error")]
    Io(#[from] std::io::Error),
    #[error("background task panicked")]
    BackgroundTaskPanicked(#[from] tokio::task::JoinError),
}

impl Error {
    pub fn oci_error(&self) -> OciError {
        match self {
            Error::NotFound => OciError::new(ErrorCode::BlobUnknown, "missing item"),
            Error::UploadDoesNotExist => {
                OciError::new(ErrorCode::BlobUploadUnknown, "unknown upload session")
            }
            Error::VersionConflict => {
                OciError::new(ErrorCode::BlobUploadInvalid, "concurrent modification")
            }
            Error::DigestMismatch => OciError::new(ErrorCode::DigestInvalid, "digest mismatch"),
            Error::Io(_) | Error::BackgroundTaskPanicked(_) => {
                OciError::new(ErrorCode::Unknown, "storage error")
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let status = match self {
            Error::NotFound | Error::UploadDoesNotExist => StatusCode::NOT_FOUND,
            Error::DigestMismatch => StatusCode::BAD_REQUEST,
            Error::VersionConflict => StatusCode::CONFLICT,
            Error::Io(_) | Error::BackgroundTaskPanicked(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// C1 — content-addressed storage. `stage()` opens a writer at a temporary
/// path; `commit()` performs an atomic rename (or multipart complete, for an
/// object-store backend) keyed by the digest computed while staging.
/// Concurrent commits of the same digest are idempotent (spec.md §4.6).
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn stage(&self) -> Result<(Uuid, Box<dyn AsyncWrite + Send + Unpin>), Error>;

    /// Finalizes a staged write, computing its digest from the bytes
    /// actually written and moving it into content-addressed storage.
    /// Returns the digest and size.
    async fn commit(&self, staging_id: Uuid) -> Result<(Digest, u64), Error>;

    async fn open(&self, digest: Digest) -> Result<Option<Box<dyn AsyncRead + Send + Unpin>>, Error>;

    async fn stat(&self, digest: Digest) -> Result<Option<u64>, Error>;

    async fn delete(&self, digest: Digest) -> Result<(), Error>;

    /// Resumes writing to an existing staged object at `start_at`, used by
    /// the blob engine's PATCH handler (spec.md §4.3).
    async fn resume_stage(
        &self,
        staging_id: Uuid,
        start_at: u64,
    ) -> Result<Box<dyn AsyncWrite + Send + Unpin>, Error>;
}

/// C2 — transactional metadata records. Each method is expected to execute
/// as its own transaction against the backing store (spec.md §5); the
/// cross-process CAS operations (`cas_upload_offset`, `cas_upsert_tag`) are
/// how linearization is achieved without a global lock (spec.md §4.3-4.4).
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn find_root_space_ci(&self, name: &str) -> Result<Option<Space>, Error>;
    async fn find_registry_by_name(
        &self,
        parent_id: SpaceId,
        name: &str,
    ) -> Result<Option<Registry>, Error>;
    async fn get_registry(&self, id: RegistryId) -> Result<Option<Registry>, Error>;

    async fn ensure_image(&self, registry_id: RegistryId, name: &str) -> Result<Image, Error>;

    async fn put_blob(&self, registry_root: SpaceId, digest: Digest, size: u64) -> Result<(), Error>;
    async fn has_blob(&self, registry_root: SpaceId, digest: Digest) -> Result<bool, Error>;
    async fn get_blob(&self, registry_root: SpaceId, digest: Digest) -> Result<Option<u64>, Error>;
    /// Removes the registry-root-scoped blob reference. The underlying CAS
    /// object is untouched (garbage collection of orphans is a Non-goal,
    /// spec.md §1).
    async fn remove_blob(&self, registry_root: SpaceId, digest: Digest) -> Result<(), Error>;

    async fn put_manifest(&self, manifest: Manifest) -> Result<ManifestId, Error>;
    async fn get_manifest_by_digest(
        &self,
        registry_id: RegistryId,
        image_id: ImageId,
        digest: Digest,
    ) -> Result<Option<Manifest>, Error>;
    async fn get_manifest_by_id(&self, id: ManifestId) -> Result<Option<Manifest>, Error>;

    /// Upserts a tag to point at `manifest_id`, linearized by a per-`(registry,
    /// image, tag)` lock plus a row-version CAS (spec.md §4.4, §5).
    async fn cas_upsert_tag(
        &self,
        registry_id: RegistryId,
        image_id: ImageId,
        tag: &str,
        manifest_id: ManifestId,
    ) -> Result<Tag, Error>;
    async fn get_tag(
        &self,
        registry_id: RegistryId,
        image_id: ImageId,
        tag: &str,
    ) -> Result<Option<Tag>, Error>;
    async fn list_tags(
        &self,
        registry_id: RegistryId,
        image_id: ImageId,
        last: Option<&str>,
        n: Option<usize>,
    ) -> Result<(Vec<String>, bool), Error>;

    async fn put_referrer(&self, registry_id: RegistryId, referrer: Referrer) -> Result<(), Error>;
    async fn list_referrers(
        &self,
        registry_id: RegistryId,
        subject_digest: Digest,
        artifact_type: Option<&str>,
    ) -> Result<Vec<Referrer>, Error>;

    async fn begin_upload(&self, registry_id: RegistryId, image_id: ImageId) -> Result<UploadSession, Error>;
    async fn get_upload(&self, id: UploadSessionId) -> Result<Option<UploadSession>, Error>;
    /// Compare-and-swap the persisted offset; fails with
    /// [`Error::VersionConflict`] on a losing race (I4, spec.md §4.3).
    async fn cas_upload_offset(
        &self,
        id: UploadSessionId,
        expected_version: u64,
        new_offset: u64,
    ) -> Result<UploadSession, Error>;
    async fn complete_upload(&self, id: UploadSessionId) -> Result<(), Error>;
    async fn cancel_upload(&self, id: UploadSessionId) -> Result<(), Error>;

    async fn get_upstream_config(
        &self,
        id: UpstreamConfigId,
    ) -> Result<Option<UpstreamConfig>, Error>;

    async fn delete_registry_cascade(&self, registry_id: RegistryId) -> Result<(), Error>;

    /// Untags a single `(registry, image, tag)` reference. `DELETE
    /// manifests/{tag}` (spec.md §4.4).
    async fn delete_tag(&self, registry_id: RegistryId, image_id: ImageId, tag: &str) -> Result<(), Error>;

    /// Removes a manifest row by digest and any tags that pointed at it.
    /// `DELETE manifests/{digest}` (spec.md §4.4).
    async fn delete_manifest(
        &self,
        registry_id: RegistryId,
        image_id: ImageId,
        digest: Digest,
    ) -> Result<(), Error>;
}
