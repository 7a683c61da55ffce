//! C3 — route parser. Decomposes a `/v2/...` path into a
//! `(root, registry, image, reference)` tuple, per spec.md §4.1.
//!
//! Pure function, no I/O: given a path and query string it either produces
//! a [`ParsedRoute`] or a [`RouteError`] (which always renders as
//! `NAME_UNKNOWN` without touching storage, per invariant I7).
//!
//! Grounded on the teacher's route table (`lib.rs::make_router`), which
//! fixes two segments (`:repository/:image`) ahead of the verb; this parser
//! generalizes that to an arbitrary-length, slash-containing `image`
//! sitting between a root/registry pair and the verb segment.

use std::collections::HashMap;

use thiserror::Error;

use crate::digest::Digest;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RouteType {
    Manifests,
    Blobs,
    BlobUpload,
    Tags,
    Referrers,
}

#[derive(Clone, Debug)]
pub struct ParsedRoute {
    pub root_identifier: String,
    pub registry_identifier: String,
    pub image: String,
    pub route_type: RouteType,
    /// Set for `manifests` when the final segment parses as a digest.
    pub digest: Option<Digest>,
    /// Set for `manifests` when the final segment is not a digest, and for
    /// `blobs` (its digest parameter doubles as the "reference").
    pub tag: Option<String>,
    /// Set for `uploads` when a session id follows `uploads/`.
    pub upload_session: Option<String>,
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("path does not match any known registry v2 route")]
    Invalid,
}

const VERBS: &[&str] = &["manifests", "blobs", "uploads", "tags", "referrers"];

/// Parses a `/v2/{root}/{registry}/{image...}/{verb}/{ref}` path plus its
/// query parameters.
///
/// The penultimate segment selects the verb. `uploads` is special: it is
/// itself the verb segment and may be followed directly by a session id
/// (`blobs/uploads/{session}`), so for that case the verb position is the
/// segment right after `blobs`.
pub fn parse_route(path: &str, query: &HashMap<String, String>) -> Result<ParsedRoute, RouteError> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let segments: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();

    if segments.first() != Some(&"v2") {
        return Err(RouteError::Invalid);
    }
    let segments = &segments[1..];

    if segments.len() < 4 {
        return Err(RouteError::Invalid);
    }

    let root_identifier = segments[0].to_owned();
    let registry_identifier = segments[1].to_owned();
    let rest = &segments[2..];

    // `?digest=` on a PUT close takes precedence over whatever the path
    // itself carries, for every route type including blob uploads.
    let digest_override = query.get("digest").and_then(|d| d.parse::<Digest>().ok());

    // Find the verb: for blobs/uploads, `uploads` directly follows `blobs`
    // and may itself be the last segment (new upload) or be followed by a
    // session id. For everything else the verb is the penultimate segment.
    if let Some(blobs_pos) = rest.iter().position(|s| *s == "blobs") {
        if rest.get(blobs_pos + 1) == Some(&"uploads") {
            let image = rest[..blobs_pos].join("/");
            if image.is_empty() {
                return Err(RouteError::Invalid);
            }
            // Path parsing ambiguity preserved verbatim (spec.md §9): if the
            // last path segment is literally "uploads", this is a new
            // upload; otherwise the final segment is the session id.
            let after = &rest[blobs_pos + 2..];
            let upload_session = match after {
                [] => None,
                [only] if *only == "uploads" => None,
                [session] => Some((*session).to_owned()),
                _ => return Err(RouteError::Invalid),
            };
            return Ok(ParsedRoute {
                root_identifier,
                registry_identifier,
                image,
                route_type: RouteType::BlobUpload,
                digest: digest_override,
                tag: None,
                upload_session,
            });
        }
    }

    if rest.len() < 2 {
        return Err(RouteError::Invalid);
    }
    let verb_pos = rest.len() - 2;
    let verb = rest[verb_pos];
    let reference = rest[verb_pos + 1];
    let image = rest[..verb_pos].join("/");
    if image.is_empty() || !VERBS.contains(&verb) {
        return Err(RouteError::Invalid);
    }

    let route_type = match verb {
        "manifests" => RouteType::Manifests,
        "blobs" => RouteType::Blobs,
        "tags" => RouteType::Tags,
        "referrers" => RouteType::Referrers,
        _ => return Err(RouteError::Invalid),
    };

    let (digest, tag) = match route_type {
        RouteType::Manifests => match reference.parse::<Digest>() {
            Ok(d) => (Some(d), None),
            Err(_) => (None, Some(reference.to_owned())),
        },
        RouteType::Blobs => match reference.parse::<Digest>() {
            Ok(d) => (Some(d), None),
            Err(_) => return Err(RouteError::Invalid),
        },
        RouteType::Referrers => match reference.parse::<Digest>() {
            Ok(d) => (Some(d), None),
            Err(_) => return Err(RouteError::Invalid),
        },
        RouteType::Tags => (None, None),
        RouteType::BlobUpload => unreachable!("handled above"),
    };

    let digest = digest_override.or(digest);

    Ok(ParsedRoute {
        root_identifier,
        registry_identifier,
        image,
        route_type,
        digest,
        tag,
        upload_session: None,
    })
}
