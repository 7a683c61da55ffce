//! Authentication/authorization extension points.
//!
//! Grounded on the teacher's `auth` module surface (`AuthProvider`,
//! `UnverifiedCredentials`, `ValidUser`, referenced from `lib.rs` but not
//! itself present in the retrieved pack), extended with the [`Action`]
//! parameter the access resolver (C4) needs to run a permission check
//! scoped by operation (spec.md §4.2).

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
};
use base64::Engine;

/// The operation an access-resolved request intends to perform, used by the
/// permission check in [`crate::access::AccessResolver::resolve`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Action {
    View,
    Upload,
    Delete,
}

/// Credentials extracted from the request without having verified them yet.
#[derive(Clone, Debug)]
pub struct UnverifiedCredentials {
    pub username: String,
    pub password: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for UnverifiedCredentials
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or(StatusCode::UNAUTHORIZED)?
            .to_str()
            .map_err(|_| StatusCode::UNAUTHORIZED)?;

        let encoded = header
            .strip_prefix("Basic ")
            .ok_or(StatusCode::UNAUTHORIZED)?;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| StatusCode::UNAUTHORIZED)?;
        let decoded = String::from_utf8(decoded).map_err(|_| StatusCode::UNAUTHORIZED)?;

        let (username, password) = decoded.split_once(':').ok_or(StatusCode::UNAUTHORIZED)?;

        Ok(UnverifiedCredentials {
            username: username.to_owned(),
            password: password.to_owned(),
        })
    }
}

/// A verified, authenticated caller. Carries the principal's identity so the
/// access resolver can run its permission check.
#[derive(Clone, Debug)]
pub struct Session {
    pub principal: String,
}

/// Implemented by the host application; the registry core treats
/// authentication as an external collaborator (spec.md §1 Out of scope:
/// "authentication providers").
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn check_credentials(&self, creds: &UnverifiedCredentials) -> Option<Session>;

    /// Whether an anonymous (unauthenticated) caller may perform `action`.
    /// Most deployments only allow anonymous `View`.
    fn allows_anonymous(&self, action: Action) -> bool {
        matches!(action, Action::View)
    }
}

#[async_trait]
impl AuthProvider for bool {
    async fn check_credentials(&self, _creds: &UnverifiedCredentials) -> Option<Session> {
        self.then(|| Session {
            principal: "anonymous".to_owned(),
        })
    }
}

#[async_trait]
impl AuthProvider for () {
    async fn check_credentials(&self, _creds: &UnverifiedCredentials) -> Option<Session> {
        None
    }

    fn allows_anonymous(&self, _action: Action) -> bool {
        true
    }
}
