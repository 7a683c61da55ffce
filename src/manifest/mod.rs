//! C5 — manifest engine: identification, closure verification, commit, and
//! the read-path platform selection over manifest-lists (spec.md §4.4).
//!
//! Grounded on `other_examples/a8d0ac55_PThorpe92-Floundr__src-manifests.rs.rs`'s
//! `push_manifest`/`get_manifest` (digest-vs-tag reference resolution,
//! `Docker-Content-Digest` header) and
//! `other_examples/498a8fb9_rk8s-dev-rk8s__project-distribution-src-service-manifest.rs.rs`
//! for the commit-order/idempotence shape, generalized onto this crate's
//! `MetadataStore` rather than direct `sqlx` queries.

pub mod media_type;

use std::sync::Arc;

use thiserror::Error;

use crate::{
    digest::Digest,
    error::{ErrorCode, OciError},
    model::{ImageId, Manifest, ManifestId, Referrer, RegistryId, SpaceId},
    store::{Error as StoreError, MetadataStore},
};

use self::media_type::{identify, ListManifest, ManifestKind, SingleManifest};

#[derive(Debug, Error)]
pub enum Error {
    #[error("manifest media type could not be identified")]
    Invalid,
    #[error("a referenced blob is missing from the tenant root")]
    BlobUnknown,
    #[error("manifest references more children/layers than the configured limit")]
    ReferencesExceedLimit,
    #[error("manifest payload exceeds the configured size limit")]
    PayloadExceedsLimit,
    #[error("manifest references itself, which would create a cycle")]
    SelfReference,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    pub fn oci_error(&self) -> OciError {
        match self {
            Error::Invalid | Error::SelfReference => {
                OciError::new(ErrorCode::ManifestInvalid, self.to_string())
            }
            Error::BlobUnknown => {
                OciError::new(ErrorCode::ManifestBlobUnknown, "referenced blob is unknown")
            }
            Error::ReferencesExceedLimit => {
                OciError::new(ErrorCode::ManifestReferencesExceedLimit, self.to_string())
            }
            Error::PayloadExceedsLimit => {
                OciError::new(ErrorCode::ManifestPayloadExceedsLimit, self.to_string())
            }
            Error::Store(err) => err.oci_error(),
        }
    }
}

/// Caps enforced on every singleton manifest commit (spec.md §4.4, §6
/// configuration: `maxManifestPayloadBytes`/`maxManifestReferences`).
#[derive(Copy, Clone, Debug)]
pub struct ManifestLimits {
    pub max_references: usize,
    pub max_payload_bytes: u64,
}

impl Default for ManifestLimits {
    fn default() -> Self {
        Self {
            max_references: 1000,
            max_payload_bytes: 32 * 1024 * 1024,
        }
    }
}

pub struct PutOutcome {
    pub manifest_id: ManifestId,
    pub digest: Digest,
}

pub enum GetOutcome {
    /// A concrete singleton manifest.
    Single(Manifest),
    /// A list/index manifest returned as-is (client asked for a list, or no
    /// platform match was found).
    List(Manifest),
    /// A list manifest resolved down to one child by platform match.
    SelectedChild(Manifest),
}

pub struct ManifestEngine {
    metadata: Arc<dyn MetadataStore>,
    limits: ManifestLimits,
}

impl ManifestEngine {
    pub fn new(metadata: Arc<dyn MetadataStore>, limits: ManifestLimits) -> Self {
        Self { metadata, limits }
    }

    /// `PUT manifests/{reference}` — spec.md §4.4. `is_upstream` relaxes
    /// closure checking for list/index children (tolerate-and-skip, per the
    /// explicitly preserved open question in spec.md §9).
    pub async fn put(
        &self,
        registry_id: RegistryId,
        registry_root: SpaceId,
        image_id: ImageId,
        content_type: Option<&str>,
        payload: Vec<u8>,
        tag: Option<&str>,
        is_upstream: bool,
    ) -> Result<PutOutcome, Error> {
        if payload.len() as u64 > self.limits.max_payload_bytes {
            return Err(Error::PayloadExceedsLimit);
        }

        let kind = identify(content_type, &payload).ok_or(Error::Invalid)?;
        let digest = Digest::of(&payload);

        if kind.is_list_like() {
            let list: ListManifest = serde_json::from_slice(&payload).map_err(|_| Error::Invalid)?;
            self.verify_list_closure(registry_id, image_id, registry_root, digest, &list, is_upstream)
                .await?;
        } else {
            let single: SingleManifest =
                serde_json::from_slice(&payload).map_err(|_| Error::Invalid)?;
            self.verify_single_closure(registry_root, digest, &single, is_upstream)
                .await?;

            if let Some(subject) = &single.subject {
                let subject_digest: Digest = subject.digest.parse().map_err(|_| Error::Invalid)?;
                self.metadata
                    .put_referrer(
                        registry_id,
                        Referrer {
                            subject_digest,
                            manifest_digest: digest,
                            artifact_type: single.artifact_type.clone(),
                        },
                    )
                    .await?;
            }
        }

        let manifest = Manifest {
            id: uuid::Uuid::new_v4(),
            registry_id,
            image_id,
            digest,
            media_type: kind.canonical_media_type().to_owned(),
            config_digest: None,
            total_size: payload.len() as u64,
            payload_bytes: payload,
            created_at: chrono::Utc::now(),
        };

        // P2: idempotent on digest — `put_manifest` returns the existing row
        // for a repeat PUT instead of inserting a second one.
        let manifest_id = self.metadata.put_manifest(manifest).await?;

        if let Some(tag) = tag {
            self.metadata
                .cas_upsert_tag(registry_id, image_id, tag, manifest_id)
                .await?;
        }

        Ok(PutOutcome { manifest_id, digest })
    }

    async fn verify_single_closure(
        &self,
        registry_root: SpaceId,
        manifest_digest: Digest,
        manifest: &SingleManifest,
        is_upstream: bool,
    ) -> Result<(), Error> {
        let descriptor_count = manifest.layers.len() + manifest.config.is_some() as usize;
        if descriptor_count > self.limits.max_references {
            return Err(Error::ReferencesExceedLimit);
        }

        let mut descriptors = manifest.layers.iter().collect::<Vec<_>>();
        if let Some(config) = &manifest.config {
            descriptors.push(config);
        }

        for descriptor in descriptors {
            let blob_digest: Digest = descriptor.digest.parse().map_err(|_| Error::Invalid)?;
            if blob_digest == manifest_digest {
                return Err(Error::SelfReference);
            }
            let size = self.metadata.get_blob(registry_root, blob_digest).await?;
            match size {
                Some(size) if size == descriptor.size => {}
                Some(_) => return Err(Error::BlobUnknown),
                // UPSTREAM: a referenced layer/config not yet cached locally
                // is tolerated here and fetched lazily on pull, same as a
                // list manifest's children (spec.md §9 open question).
                None if is_upstream => {}
                None => return Err(Error::BlobUnknown),
            }
        }
        Ok(())
    }

    async fn verify_list_closure(
        &self,
        registry_id: RegistryId,
        image_id: ImageId,
        registry_root: SpaceId,
        manifest_digest: Digest,
        list: &ListManifest,
        is_upstream: bool,
    ) -> Result<(), Error> {
        if list.manifests.len() > self.limits.max_references {
            return Err(Error::ReferencesExceedLimit);
        }

        let mut seen = std::collections::HashSet::new();
        for child in &list.manifests {
            let child_digest: Digest = child.digest.parse().map_err(|_| Error::Invalid)?;
            if child_digest == manifest_digest {
                return Err(Error::SelfReference);
            }
            if !seen.insert(child_digest) {
                continue; // duplicate child digests are deduplicated, spec.md §4.4
            }

            // A list's children are either standalone blobs (rare, but the
            // descriptor format doesn't forbid it) or manifests already
            // committed under the same image — check both before deciding
            // the closure is unsatisfied.
            let exists = self.metadata.has_blob(registry_root, child_digest).await?
                || self
                    .find_child_manifest(registry_id, image_id, child_digest)
                    .await?
                    .is_some();

            if !exists && !is_upstream {
                return Err(Error::BlobUnknown);
            }
            // UPSTREAM: missing children are tolerated and fetched lazily on
            // pull (spec.md §9 open question — intentional, left unresolved
            // stricter than this).
        }
        Ok(())
    }

    async fn find_child_manifest(
        &self,
        registry_id: RegistryId,
        image_id: ImageId,
        digest: Digest,
    ) -> Result<Option<Manifest>, Error> {
        Ok(self
            .metadata
            .get_manifest_by_digest(registry_id, image_id, digest)
            .await?)
    }

    /// `GET manifests/{reference}` read path, including manifest-list
    /// platform selection (spec.md §4.4 "Manifest-list walk").
    pub async fn get(
        &self,
        registry_id: RegistryId,
        image_id: ImageId,
        digest: Option<Digest>,
        tag: Option<&str>,
        accept_list: bool,
        platform: Option<(&str, &str)>,
    ) -> Result<GetOutcome, Error> {
        let manifest = match (digest, tag) {
            (Some(digest), _) => self
                .metadata
                .get_manifest_by_digest(registry_id, image_id, digest)
                .await?
                .ok_or(Error::Invalid)?,
            (None, Some(tag)) => {
                let tag = self
                    .metadata
                    .get_tag(registry_id, image_id, tag)
                    .await?
                    .ok_or(Error::Invalid)?;
                self.metadata
                    .get_manifest_by_id(tag.manifest_id)
                    .await?
                    .ok_or(Error::Invalid)?
            }
            (None, None) => return Err(Error::Invalid),
        };

        let kind = identify(Some(&manifest.media_type), &manifest.payload_bytes)
            .ok_or(Error::Invalid)?;
        if !kind.is_list_like() {
            return Ok(GetOutcome::Single(manifest));
        }
        if accept_list {
            return Ok(GetOutcome::List(manifest));
        }

        let list: ListManifest =
            serde_json::from_slice(&manifest.payload_bytes).map_err(|_| Error::Invalid)?;
        let Some((os, arch)) = platform else {
            return Ok(GetOutcome::List(manifest));
        };

        // Tie-break: first in declaration order (spec.md "State machine —
        // manifest list resolution").
        let matched = list.manifests.iter().find(|child| {
            child
                .platform
                .as_ref()
                .map(|p| p.os == os && p.architecture == arch)
                .unwrap_or(false)
        });

        match matched {
            Some(child) => {
                let child_digest: Digest = child.digest.parse().map_err(|_| Error::Invalid)?;
                let resolved = self
                    .metadata
                    .get_manifest_by_digest(registry_id, image_id, child_digest)
                    .await?
                    .ok_or(Error::Invalid)?;
                Ok(GetOutcome::SelectedChild(resolved))
            }
            None => Ok(GetOutcome::List(manifest)),
        }
    }

    pub async fn referrers(
        &self,
        registry_id: RegistryId,
        subject_digest: Digest,
        artifact_type: Option<&str>,
    ) -> Result<Vec<Referrer>, Error> {
        Ok(self
            .metadata
            .list_referrers(registry_id, subject_digest, artifact_type)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{PackageType, Registry, RegistryType},
        store::memory::InMemoryMetadataStore,
    };

    async fn setup() -> (ManifestEngine, RegistryId, ImageId, SpaceId) {
        let store = InMemoryMetadataStore::new();
        let root = store.insert_space("acme", None);
        let registry_id = uuid::Uuid::new_v4();
        store.insert_registry(Registry {
            id: registry_id,
            parent_id: root,
            root_parent_id: root,
            name: "docker".to_owned(),
            registry_type: RegistryType::Virtual,
            package_type: PackageType::Docker,
            allowed_patterns: vec![],
            blocked_patterns: vec![],
            upstream_config_id: None,
        });
        let image = store.ensure_image(registry_id, "app").await.unwrap();
        let metadata: Arc<dyn MetadataStore> = Arc::new(store);
        (
            ManifestEngine::new(metadata, ManifestLimits::default()),
            registry_id,
            image.id,
            root,
        )
    }

    fn single_manifest_json(config_digest: &str, layer_digest: &str, layer_size: u64) -> Vec<u8> {
        format!(
            r#"{{"mediaType":"{}","config":{{"mediaType":"application/vnd.oci.image.config.v1+json","digest":"{config_digest}","size":4}},"layers":[{{"mediaType":"application/vnd.oci.image.layer.v1.tar","digest":"{layer_digest}","size":{layer_size}}}]}}"#,
            media_type::OCI_MANIFEST_V1
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn rejects_put_when_referenced_blob_missing() {
        let (engine, registry_id, image_id, root) = setup().await;
        let config_digest = Digest::of(b"cfg!");
        let layer_digest = Digest::of(b"layer");
        let payload = single_manifest_json(&config_digest.to_string(), &layer_digest.to_string(), 5);

        let result = engine
            .put(registry_id, root, image_id, None, payload, Some("v1"), false)
            .await;
        assert!(matches!(result, Err(Error::BlobUnknown)));
    }

    #[tokio::test]
    async fn put_succeeds_when_closure_satisfied_and_is_idempotent() {
        let (engine, registry_id, image_id, root) = setup().await;
        let config_bytes = b"cfg!";
        let layer_bytes = b"layer";
        let config_digest = Digest::of(config_bytes);
        let layer_digest = Digest::of(layer_bytes);

        engine
            .metadata
            .put_blob(root, config_digest, config_bytes.len() as u64)
            .await
            .unwrap();
        engine
            .metadata
            .put_blob(root, layer_digest, layer_bytes.len() as u64)
            .await
            .unwrap();

        let payload = single_manifest_json(
            &config_digest.to_string(),
            &layer_digest.to_string(),
            layer_bytes.len() as u64,
        );

        let first = engine
            .put(
                registry_id,
                root,
                image_id,
                None,
                payload.clone(),
                Some("v1"),
                false,
            )
            .await
            .unwrap();
        let second = engine
            .put(registry_id, root, image_id, None, payload, Some("v1"), false)
            .await
            .unwrap();

        assert_eq!(first.manifest_id, second.manifest_id);
    }

    #[tokio::test]
    async fn get_selects_platform_child_from_index() {
        let (engine, registry_id, image_id, root) = setup().await;

        let amd64_bytes = br#"{"mediaType":"application/vnd.oci.image.manifest.v1+json","layers":[]}"#.to_vec();
        let arm64_bytes = br#"{"mediaType":"application/vnd.oci.image.manifest.v1+json","layers":[],"config":null}"#.to_vec();
        let amd64_digest = Digest::of(&amd64_bytes);
        let arm64_digest = Digest::of(&arm64_bytes);

        engine
            .put(registry_id, root, image_id, None, amd64_bytes, None, false)
            .await
            .unwrap();
        engine
            .put(registry_id, root, image_id, None, arm64_bytes, None, false)
            .await
            .unwrap();

        let index = format!(
            r#"{{"mediaType":"{}","manifests":[
                {{"mediaType":"application/vnd.oci.image.manifest.v1+json","digest":"{amd64_digest}","size":1,"platform":{{"os":"linux","architecture":"amd64"}}}},
                {{"mediaType":"application/vnd.oci.image.manifest.v1+json","digest":"{arm64_digest}","size":1,"platform":{{"os":"linux","architecture":"arm64"}}}}
            ]}}"#,
            media_type::OCI_INDEX_V1,
        )
        .into_bytes();

        engine
            .put(registry_id, root, image_id, None, index, Some("multi"), false)
            .await
            .unwrap();

        let outcome = engine
            .get(
                registry_id,
                image_id,
                None,
                Some("multi"),
                false,
                Some(("linux", "arm64")),
            )
            .await
            .unwrap();

        match outcome {
            GetOutcome::SelectedChild(manifest) => assert_eq!(manifest.digest, arm64_digest),
            _ => panic!("expected a selected child"),
        }
    }

    #[tokio::test]
    async fn get_returns_list_itself_when_client_accepts_lists() {
        let (engine, registry_id, image_id, root) = setup().await;
        let index = format!(r#"{{"mediaType":"{}","manifests":[]}}"#, media_type::OCI_INDEX_V1)
            .into_bytes();
        engine
            .put(registry_id, root, image_id, None, index, Some("empty"), false)
            .await
            .unwrap();

        let outcome = engine
            .get(registry_id, image_id, None, Some("empty"), true, None)
            .await
            .unwrap();
        assert!(matches!(outcome, GetOutcome::List(_)));
    }
}
