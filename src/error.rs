//! The OCI wire error envelope (spec.md §6) and the top-level
//! [`RegistryError`] that translates every component error into it.
//!
//! Grounded on the teacher's `types::{OciError, OciErrors, ErrorCode}` and
//! `RegistryError`/`IntoResponse` (`lib.rs`), generalized to aggregate the
//! additional component error enums this crate introduces.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{access::AccessError, blob, manifest, route::RouteError, store, upstream};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BlobUnknown,
    BlobUploadInvalid,
    BlobUploadUnknown,
    DigestInvalid,
    ManifestBlobUnknown,
    ManifestInvalid,
    ManifestReferencesExceedLimit,
    ManifestPayloadExceedsLimit,
    ManifestUnknown,
    NameInvalid,
    NameUnknown,
    SizeInvalid,
    Unauthorized,
    Denied,
    Unsupported,
    Toomanyrequests,
    Unknown,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OciError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl OciError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OciErrors {
    pub errors: Vec<OciError>,
}

impl OciErrors {
    pub fn single(error: OciError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

/// Maps an [`ErrorCode`] to the HTTP status spec.md §7 assigns it.
fn status_for(code: ErrorCode) -> StatusCode {
    use ErrorCode::*;
    match code {
        NameInvalid | ManifestInvalid | DigestInvalid | BlobUploadInvalid => {
            StatusCode::BAD_REQUEST
        }
        Unauthorized => StatusCode::UNAUTHORIZED,
        Denied => StatusCode::FORBIDDEN,
        NameUnknown | ManifestUnknown | BlobUnknown | BlobUploadUnknown | ManifestBlobUnknown => {
            StatusCode::NOT_FOUND
        }
        SizeInvalid | ManifestReferencesExceedLimit | ManifestPayloadExceedsLimit => {
            StatusCode::PAYLOAD_TOO_LARGE
        }
        Toomanyrequests => StatusCode::TOO_MANY_REQUESTS,
        Unsupported => StatusCode::NOT_IMPLEMENTED,
        Unknown => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for OciErrors {
    fn into_response(self) -> Response {
        let status = self
            .errors
            .first()
            .map(|e| status_for(e.code))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// Top-level error aggregating every component's error type. Its
/// [`IntoResponse`] impl is the single place that builds the OCI JSON
/// envelope and strips anything that could leak internal paths, upstream
/// URLs with credentials, or stack traces (spec.md §7 surfacing policy).
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("access denied")]
    Access(#[from] AccessError),
    #[error("invalid route")]
    Route(#[from] RouteError),
    #[error(transparent)]
    Store(#[from] store::Error),
    #[error(transparent)]
    Manifest(#[from] manifest::Error),
    #[error(transparent)]
    Blob(#[from] blob::Error),
    #[error(transparent)]
    Upstream(#[from] upstream::Error),
    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl RegistryError {
    fn oci(&self) -> OciError {
        match self {
            RegistryError::Access(err) => err.oci_error(),
            RegistryError::Route(_) => {
                OciError::new(ErrorCode::NameUnknown, "could not parse route")
            }
            RegistryError::Store(err) => err.oci_error(),
            RegistryError::Manifest(err) => err.oci_error(),
            RegistryError::Blob(err) => err.oci_error(),
            RegistryError::Upstream(err) => err.oci_error(),
            RegistryError::Internal(_) => {
                OciError::new(ErrorCode::Unknown, "an internal error occurred")
            }
        }
    }
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        if let RegistryError::Internal(err) = &self {
            tracing::error!(error = %err, "internal registry error");
        }
        OciErrors::single(self.oci()).into_response()
    }
}

impl From<anyhow::Error> for RegistryError {
    fn from(err: anyhow::Error) -> Self {
        RegistryError::Internal(err)
    }
}

impl From<axum::http::Error> for RegistryError {
    fn from(err: axum::http::Error) -> Self {
        // Matches the teacher's `AxumHttp` variant: this should never occur
        // in practice, building a well-formed response is infallible for
        // every response this crate constructs.
        RegistryError::Internal(err.into())
    }
}
