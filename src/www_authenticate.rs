//! `WWW-Authenticate` challenge building and parsing.
//!
//! Grounded on the teacher's `www_authenticate` module (referenced, not
//! retrieved, from `lib.rs`). The parsing half is new within this module:
//! spec.md §4.5 requires the upstream proxy to parse a remote's
//! `Www-Authenticate: Bearer realm=..., service=..., scope=...` challenge
//! to drive its OAuth2 token exchange.

use std::collections::HashMap;

/// A challenge this registry issues to unauthenticated clients (C8's `/v2/`
/// probe, spec.md §4.7) or that an upstream issues to us (C7, spec.md §4.5).
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Challenge {
    Basic {
        realm: String,
    },
    Bearer {
        realm: String,
        service: Option<String>,
        scope: Option<String>,
    },
}

impl Challenge {
    pub fn to_header_value(&self) -> String {
        match self {
            Challenge::Basic { realm } => format!("Basic realm=\"{realm}\""),
            Challenge::Bearer {
                realm,
                service,
                scope,
            } => {
                let mut parts = vec![format!("realm=\"{realm}\"")];
                if let Some(service) = service {
                    parts.push(format!("service=\"{service}\""));
                }
                if let Some(scope) = scope {
                    parts.push(format!("scope=\"{scope}\""));
                }
                format!("Bearer {}", parts.join(","))
            }
        }
    }

    /// Parses a `WWW-Authenticate` header value as sent by an upstream
    /// registry in response to a 401, e.g.
    /// `Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/alpine:pull"`.
    pub fn parse(header: &str) -> Option<Challenge> {
        let header = header.trim();
        if let Some(rest) = header.strip_prefix("Bearer ") {
            let params = parse_params(rest);
            let realm = params.get("realm")?.clone();
            return Some(Challenge::Bearer {
                realm,
                service: params.get("service").cloned(),
                scope: params.get("scope").cloned(),
            });
        }
        if let Some(rest) = header.strip_prefix("Basic ") {
            let params = parse_params(rest);
            let realm = params.get("realm").cloned().unwrap_or_default();
            return Some(Challenge::Basic { realm });
        }
        None
    }
}

/// Parses comma-separated `key="value"` pairs.
fn parse_params(rest: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for part in rest.split(',') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            let value = value.trim().trim_matches('"');
            out.insert(key.trim().to_owned(), value.to_owned());
        }
    }
    out
}
