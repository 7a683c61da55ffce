//! An in-memory, transactional-enough [`MetadataStore`] implementation.
//!
//! Used as the default backend for tests and small deployments. Grounded on
//! the teacher's preference for small, explicit, dependency-light storage
//! (`FilesystemStorage`'s plain field layout) — here realized with
//! `dashmap`'s concurrent maps rather than a full embedded database, since
//! spec.md explicitly treats the metadata store as "a transactional
//! key-value-ish interface", not a SQL engine (spec.md §1 Out of scope).
//!
//! Linearization matches spec.md §5: per-tag and per-upload-session locks
//! are taken in-process (via `dashmap`'s internal sharded locking) plus an
//! explicit row-version CAS, so the same mechanism would hold even if
//! reads/writes came from multiple processes sharing one store.

use std::sync::atomic::{AtomicU64, Ordering};

use axum::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use crate::{
    digest::Digest,
    model::{
        Image, ImageId, Manifest, ManifestId, Referrer, Registry, RegistryId, Space, SpaceId,
        Tag, UploadSession, UploadSessionId, UploadSessionState, UpstreamConfig,
        UpstreamConfigId,
    },
};

use super::{Error, MetadataStore};

#[derive(Default)]
pub struct InMemoryMetadataStore {
    spaces: DashMap<SpaceId, Space>,
    registries: DashMap<RegistryId, Registry>,
    images: DashMap<(RegistryId, String), ImageId>,
    image_rows: DashMap<ImageId, Image>,
    blobs: DashMap<(SpaceId, Digest), u64>,
    manifests_by_digest: DashMap<(RegistryId, ImageId, Digest), ManifestId>,
    manifests: DashMap<ManifestId, Manifest>,
    tags: DashMap<(RegistryId, ImageId, String), Tag>,
    referrers: DashMap<RegistryId, Vec<Referrer>>,
    uploads: DashMap<UploadSessionId, UploadSession>,
    upstream_configs: DashMap<UpstreamConfigId, UpstreamConfig>,
    version_seq: AtomicU64,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> u64 {
        self.version_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Test/bootstrap helper: registers a root space and returns its id.
    pub fn insert_space(&self, name: &str, parent_id: Option<SpaceId>) -> SpaceId {
        let id = Uuid::new_v4();
        self.spaces.insert(
            id,
            Space {
                id,
                parent_id,
                name: name.to_owned(),
            },
        );
        id
    }

    /// Test/bootstrap helper: registers a registry under a root space.
    pub fn insert_registry(&self, registry: Registry) -> RegistryId {
        let id = registry.id;
        self.registries.insert(id, registry);
        id
    }

    pub fn insert_upstream_config(&self, config: UpstreamConfig) -> UpstreamConfigId {
        let id = config.id;
        self.upstream_configs.insert(id, config);
        id
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn find_root_space_ci(&self, name: &str) -> Result<Option<Space>, Error> {
        Ok(self
            .spaces
            .iter()
            .find(|entry| entry.parent_id.is_none() && entry.name.eq_ignore_ascii_case(name))
            .map(|entry| entry.value().clone()))
    }

    async fn find_registry_by_name(
        &self,
        parent_id: SpaceId,
        name: &str,
    ) -> Result<Option<Registry>, Error> {
        Ok(self
            .registries
            .iter()
            .find(|entry| entry.parent_id == parent_id && entry.name == name)
            .map(|entry| entry.value().clone()))
    }

    async fn get_registry(&self, id: RegistryId) -> Result<Option<Registry>, Error> {
        Ok(self.registries.get(&id).map(|r| r.clone()))
    }

    async fn ensure_image(&self, registry_id: RegistryId, name: &str) -> Result<Image, Error> {
        let key = (registry_id, name.to_owned());
        if let Some(id) = self.images.get(&key) {
            return Ok(self.image_rows.get(&*id).unwrap().clone());
        }
        let id = Uuid::new_v4();
        let image = Image {
            id,
            registry_id,
            name: name.to_owned(),
        };
        self.images.insert(key, id);
        self.image_rows.insert(id, image.clone());
        Ok(image)
    }

    async fn put_blob(
        &self,
        registry_root: SpaceId,
        digest: Digest,
        size: u64,
    ) -> Result<(), Error> {
        self.blobs.insert((registry_root, digest), size);
        Ok(())
    }

    async fn has_blob(&self, registry_root: SpaceId, digest: Digest) -> Result<bool, Error> {
        Ok(self.blobs.contains_key(&(registry_root, digest)))
    }

    async fn get_blob(&self, registry_root: SpaceId, digest: Digest) -> Result<Option<u64>, Error> {
        Ok(self.blobs.get(&(registry_root, digest)).map(|s| *s))
    }

    async fn remove_blob(&self, registry_root: SpaceId, digest: Digest) -> Result<(), Error> {
        self.blobs.remove(&(registry_root, digest));
        Ok(())
    }

    async fn put_manifest(&self, manifest: Manifest) -> Result<ManifestId, Error> {
        let key = (manifest.registry_id, manifest.image_id, manifest.digest);
        // P2: idempotent on digest — a repeat PUT returns the existing row.
        if let Some(existing) = self.manifests_by_digest.get(&key) {
            return Ok(*existing);
        }
        let id = manifest.id;
        self.manifests_by_digest.insert(key, id);
        self.manifests.insert(id, manifest);
        Ok(id)
    }

    async fn get_manifest_by_digest(
        &self,
        registry_id: RegistryId,
        image_id: ImageId,
        digest: Digest,
    ) -> Result<Option<Manifest>, Error> {
        let Some(id) = self
            .manifests_by_digest
            .get(&(registry_id, image_id, digest))
        else {
            return Ok(None);
        };
        Ok(self.manifests.get(&*id).map(|m| m.clone()))
    }

    async fn get_manifest_by_id(&self, id: ManifestId) -> Result<Option<Manifest>, Error> {
        Ok(self.manifests.get(&id).map(|m| m.clone()))
    }

    async fn cas_upsert_tag(
        &self,
        registry_id: RegistryId,
        image_id: ImageId,
        tag: &str,
        manifest_id: ManifestId,
    ) -> Result<Tag, Error> {
        let key = (registry_id, image_id, tag.to_owned());
        let now = Utc::now();
        let version = self.next_version();

        // dashmap's `entry` API holds a shard lock for the duration of the
        // closure, giving us the per-(registry,image,tag) linearization
        // spec.md §4.4/§5 requires without a separate lock table.
        let mut updated = None;
        self.tags
            .entry(key)
            .and_modify(|existing| {
                existing.manifest_id = manifest_id;
                existing.updated_at = now;
                existing.version = version;
                updated = Some(existing.clone());
            })
            .or_insert_with(|| {
                let tag = Tag {
                    registry_id,
                    image_id,
                    name: tag.to_owned(),
                    manifest_id,
                    created_at: now,
                    updated_at: now,
                    version,
                };
                updated = Some(tag.clone());
                tag
            });

        Ok(updated.expect("set by either branch above"))
    }

    async fn get_tag(
        &self,
        registry_id: RegistryId,
        image_id: ImageId,
        tag: &str,
    ) -> Result<Option<Tag>, Error> {
        Ok(self
            .tags
            .get(&(registry_id, image_id, tag.to_owned()))
            .map(|t| t.clone()))
    }

    async fn list_tags(
        &self,
        registry_id: RegistryId,
        image_id: ImageId,
        last: Option<&str>,
        n: Option<usize>,
    ) -> Result<(Vec<String>, bool), Error> {
        let mut names: Vec<String> = self
            .tags
            .iter()
            .filter(|entry| entry.key().0 == registry_id && entry.key().1 == image_id)
            .map(|entry| entry.key().2.clone())
            .collect();
        names.sort();

        let start = match last {
            Some(cursor) => names.partition_point(|n| n.as_str() <= cursor),
            None => 0,
        };
        let remaining = &names[start..];

        match n {
            Some(limit) if remaining.len() > limit => {
                Ok((remaining[..limit].to_vec(), true))
            }
            _ => Ok((remaining.to_vec(), false)),
        }
    }

    async fn put_referrer(&self, registry_id: RegistryId, referrer: Referrer) -> Result<(), Error> {
        self.referrers.entry(registry_id).or_default().push(referrer);
        Ok(())
    }

    async fn list_referrers(
        &self,
        registry_id: RegistryId,
        subject_digest: Digest,
        artifact_type: Option<&str>,
    ) -> Result<Vec<Referrer>, Error> {
        let Some(list) = self.referrers.get(&registry_id) else {
            return Ok(vec![]);
        };
        Ok(list
            .iter()
            .filter(|r| r.subject_digest == subject_digest)
            .filter(|r| match artifact_type {
                Some(at) => r.artifact_type.as_deref() == Some(at),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn begin_upload(
        &self,
        registry_id: RegistryId,
        image_id: ImageId,
    ) -> Result<UploadSession, Error> {
        let now = Utc::now();
        let session = UploadSession {
            id: Uuid::new_v4(),
            registry_id,
            image_id,
            offset: 0,
            expected_digest: None,
            state: UploadSessionState::Open,
            started_at: now,
            last_activity_at: now,
            version: self.next_version(),
        };
        self.uploads.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_upload(&self, id: UploadSessionId) -> Result<Option<UploadSession>, Error> {
        Ok(self.uploads.get(&id).map(|u| u.clone()))
    }

    async fn cas_upload_offset(
        &self,
        id: UploadSessionId,
        expected_version: u64,
        new_offset: u64,
    ) -> Result<UploadSession, Error> {
        let mut entry = self.uploads.get_mut(&id).ok_or(Error::UploadDoesNotExist)?;
        if entry.version != expected_version {
            return Err(Error::VersionConflict);
        }
        // I4: offset only increases.
        if new_offset < entry.offset {
            return Err(Error::VersionConflict);
        }
        entry.offset = new_offset;
        entry.state = UploadSessionState::Receiving;
        entry.last_activity_at = Utc::now();
        entry.version = self.next_version();
        Ok(entry.clone())
    }

    async fn complete_upload(&self, id: UploadSessionId) -> Result<(), Error> {
        let mut entry = self.uploads.get_mut(&id).ok_or(Error::UploadDoesNotExist)?;
        entry.state = UploadSessionState::Committed;
        Ok(())
    }

    async fn cancel_upload(&self, id: UploadSessionId) -> Result<(), Error> {
        let mut entry = self.uploads.get_mut(&id).ok_or(Error::UploadDoesNotExist)?;
        entry.state = UploadSessionState::Cancelled;
        Ok(())
    }

    async fn get_upstream_config(
        &self,
        id: UpstreamConfigId,
    ) -> Result<Option<UpstreamConfig>, Error> {
        Ok(self.upstream_configs.get(&id).map(|c| c.clone()))
    }

    async fn delete_registry_cascade(&self, registry_id: RegistryId) -> Result<(), Error> {
        // Cascade through tags -> manifests -> images, but NOT blobs
        // (dedup across tenants is preserved, spec.md §3 Lifecycle).
        self.tags.retain(|key, _| key.0 != registry_id);
        let manifest_ids: Vec<ManifestId> = self
            .manifests
            .iter()
            .filter(|m| m.registry_id == registry_id)
            .map(|m| m.id)
            .collect();
        for id in manifest_ids {
            self.manifests.remove(&id);
        }
        self.manifests_by_digest.retain(|key, _| key.0 != registry_id);
        let image_keys: Vec<(RegistryId, String)> = self
            .images
            .iter()
            .filter(|e| e.key().0 == registry_id)
            .map(|e| e.key().clone())
            .collect();
        for key in image_keys {
            if let Some((_, id)) = self.images.remove(&key) {
                self.image_rows.remove(&id);
            }
        }
        self.registries.remove(&registry_id);
        Ok(())
    }

    async fn delete_tag(&self, registry_id: RegistryId, image_id: ImageId, tag: &str) -> Result<(), Error> {
        self.tags.remove(&(registry_id, image_id, tag.to_owned()));
        Ok(())
    }

    async fn delete_manifest(
        &self,
        registry_id: RegistryId,
        image_id: ImageId,
        digest: Digest,
    ) -> Result<(), Error> {
        let Some((_, manifest_id)) = self
            .manifests_by_digest
            .remove(&(registry_id, image_id, digest))
        else {
            return Err(Error::NotFound);
        };
        self.manifests.remove(&manifest_id);
        self.tags.retain(|key, tag| {
            !(key.0 == registry_id && key.1 == image_id) || tag.manifest_id != manifest_id
        });
        Ok(())
    }
}
