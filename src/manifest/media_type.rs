//! Manifest media-type identification (spec.md §4.4, step 1).
//!
//! Grounded on `other_examples/a8d0ac55_PThorpe92-Floundr__src-manifests.rs.rs`'s
//! `ImageManifest`/`Descriptor` shapes, generalized to the four manifest
//! kinds the spec requires instead of one fixed OCI struct.

use serde::Deserialize;
use serde_json::Value;

pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const OCI_MANIFEST_V1: &str = "application/vnd.oci.image.manifest.v1+json";
pub const DOCKER_MANIFEST_LIST_V2: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const OCI_INDEX_V1: &str = "application/vnd.oci.image.index.v1+json";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ManifestKind {
    Schema2,
    Oci,
    List,
    Index,
}

impl ManifestKind {
    pub fn is_list_like(self) -> bool {
        matches!(self, ManifestKind::List | ManifestKind::Index)
    }

    pub fn canonical_media_type(self) -> &'static str {
        match self {
            ManifestKind::Schema2 => DOCKER_MANIFEST_V2,
            ManifestKind::Oci => OCI_MANIFEST_V1,
            ManifestKind::List => DOCKER_MANIFEST_LIST_V2,
            ManifestKind::Index => OCI_INDEX_V1,
        }
    }
}

/// Identifies a manifest's kind from its declared `Content-Type` header,
/// falling back to sniffing the JSON `mediaType` field (spec.md §4.4).
pub fn identify(content_type: Option<&str>, body: &[u8]) -> Option<ManifestKind> {
    if let Some(kind) = content_type.and_then(from_media_type) {
        return Some(kind);
    }
    let value: Value = serde_json::from_slice(body).ok()?;
    let sniffed = value.get("mediaType")?.as_str()?;
    from_media_type(sniffed)
}

fn from_media_type(media_type: &str) -> Option<ManifestKind> {
    match media_type {
        DOCKER_MANIFEST_V2 => Some(ManifestKind::Schema2),
        OCI_MANIFEST_V1 => Some(ManifestKind::Oci),
        DOCKER_MANIFEST_LIST_V2 => Some(ManifestKind::List),
        OCI_INDEX_V1 => Some(ManifestKind::Index),
        _ => None,
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default)]
    pub platform: Option<Platform>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(default)]
    pub variant: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SingleManifest {
    #[serde(default)]
    pub config: Option<Descriptor>,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    /// Present on referrers/attestation manifests (spec.md §4.4 Referrers).
    #[serde(default)]
    pub subject: Option<Descriptor>,
    #[serde(rename = "artifactType", default)]
    pub artifact_type: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ListManifest {
    pub manifests: Vec<Descriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifies_by_content_type_header() {
        assert_eq!(identify(Some(OCI_MANIFEST_V1), b"{}"), Some(ManifestKind::Oci));
    }

    #[test]
    fn sniffs_media_type_field_when_header_absent() {
        let body = format!(r#"{{"mediaType":"{DOCKER_MANIFEST_LIST_V2}"}}"#);
        assert_eq!(identify(None, body.as_bytes()), Some(ManifestKind::List));
    }

    #[test]
    fn unknown_media_type_returns_none() {
        assert_eq!(identify(Some("text/plain"), b"{}"), None);
    }

    #[test]
    fn parses_single_manifest_with_subject() {
        let body = br#"{
            "config": {"mediaType": "application/vnd.oci.image.config.v1+json", "digest": "sha256:aa", "size": 10},
            "layers": [],
            "subject": {"mediaType": "application/vnd.oci.image.manifest.v1+json", "digest": "sha256:bb", "size": 20},
            "artifactType": "application/vnd.example.sbom"
        }"#;
        let parsed: SingleManifest = serde_json::from_slice(body).unwrap();
        assert!(parsed.subject.is_some());
        assert_eq!(parsed.artifact_type.as_deref(), Some("application/vnd.example.sbom"));
    }
}
