//! Hook extension point, generalized from the teacher's
//! `hooks::RegistryHooks` (invoked from `lib.rs`'s `manifest_put`).

use axum::async_trait;

use crate::model::{ManifestId, RegistryId};

#[async_trait]
pub trait RegistryHooks: Send + Sync {
    async fn on_manifest_uploaded(&self, _registry_id: RegistryId, _manifest_id: ManifestId) {}

    async fn on_blob_uploaded(&self, _registry_id: RegistryId, _digest: crate::digest::Digest) {}

    async fn on_tag_updated(&self, _registry_id: RegistryId, _image: &str, _tag: &str) {}
}

#[async_trait]
impl RegistryHooks for () {}
