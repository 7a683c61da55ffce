//! The data model of spec.md §3: spaces, registries, images, blobs,
//! manifests, tags, upload sessions and upstream configs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::digest::Digest;

/// A hierarchical path `root/.../leaf`. The first segment is the tenant
/// root; later segments compose a parent scope (spec.md §3 "Space").
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct SpacePath {
    segments: Vec<String>,
}

impl SpacePath {
    pub fn new(segments: Vec<String>) -> Option<Self> {
        if segments.is_empty() || segments.iter().any(|s| s.is_empty()) {
            return None;
        }
        Some(Self { segments })
    }

    /// The first segment: the tenant root.
    pub fn root(&self) -> &str {
        &self.segments[0]
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn leaf(&self) -> &str {
        self.segments.last().expect("non-empty by construction")
    }
}

impl std::fmt::Display for SpacePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

/// A persisted space record (spec.md §3 "Space"), external to the registry
/// core (spec.md §1 Out of scope: "generic space/repo/user management") but
/// referenced by id/name for registry ownership and root lookup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Space {
    pub id: SpaceId,
    pub parent_id: Option<SpaceId>,
    pub name: String,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RegistryType {
    /// Stores content locally.
    Virtual,
    /// A proxy facade that may delegate to one configured remote.
    Upstream,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PackageType {
    Docker,
    Helm,
    Generic,
}

pub type SpaceId = Uuid;
pub type RegistryId = Uuid;
pub type ImageId = Uuid;
pub type ManifestId = Uuid;
pub type UploadSessionId = Uuid;
pub type UpstreamConfigId = Uuid;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Registry {
    pub id: RegistryId,
    pub parent_id: SpaceId,
    pub root_parent_id: SpaceId,
    pub name: String,
    pub registry_type: RegistryType,
    pub package_type: PackageType,
    pub allowed_patterns: Vec<String>,
    pub blocked_patterns: Vec<String>,
    pub upstream_config_id: Option<UpstreamConfigId>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Image {
    pub id: ImageId,
    pub registry_id: RegistryId,
    pub name: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Blob {
    pub digest: Digest,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Manifest {
    pub id: ManifestId,
    pub registry_id: RegistryId,
    pub image_id: ImageId,
    pub digest: Digest,
    pub media_type: String,
    pub config_digest: Option<Digest>,
    pub total_size: u64,
    #[serde(skip)]
    pub payload_bytes: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tag {
    pub registry_id: RegistryId,
    pub image_id: ImageId,
    pub name: String,
    pub manifest_id: ManifestId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Row version used for the last-write-wins CAS described in spec.md §4.4.
    pub version: u64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum UploadSessionState {
    Open,
    Receiving,
    Committed,
    Cancelled,
    Expired,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadSession {
    pub id: UploadSessionId,
    pub registry_id: RegistryId,
    pub image_id: ImageId,
    pub offset: u64,
    pub expected_digest: Option<Digest>,
    pub state: UploadSessionState,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// Row version used for the cross-process offset CAS (spec.md §4.3).
    pub version: u64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthMode {
    Anonymous,
    Basic,
    Token,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub id: UpstreamConfigId,
    pub url: String,
    pub auth_mode: AuthMode,
    pub credential_ref: Option<String>,
    pub insecure_tls: bool,
}

/// A referrer record: `subjectDigest -> manifestDigest` with its artifact
/// type, per spec.md §4.4.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Referrer {
    pub subject_digest: Digest,
    pub manifest_digest: Digest,
    pub artifact_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn space_path_rejects_empty_segments() {
        assert!(SpacePath::new(vec![]).is_none());
        assert!(SpacePath::new(vec!["".to_owned()]).is_none());
        assert!(SpacePath::new(vec!["root".to_owned(), "".to_owned()]).is_none());
    }

    #[test]
    fn space_path_root_and_leaf() {
        let path = SpacePath::new(vec!["acme".into(), "team".into(), "proj".into()]).unwrap();
        assert_eq!(path.root(), "acme");
        assert_eq!(path.leaf(), "proj");
        assert_eq!(path.to_string(), "acme/team/proj");
    }
}
