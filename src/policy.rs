//! Allow/block glob policy over `image:tag` strings (spec.md §4.2, I5).
//!
//! Grounded on `globset` (the only glob-matching crate used anywhere in the
//! example pack, see `examples/cuenv-cuenv/crates/core/Cargo.toml`); the
//! teacher has no policy layer of its own to generalize from.

use globset::{Glob, GlobSet, GlobSetBuilder};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("invalid glob pattern: {0}")]
    InvalidGlob(String),
}

/// A compiled allow/block filter for one registry.
pub struct Policy {
    allow: Option<GlobSet>,
    block: GlobSet,
}

impl Policy {
    pub fn compile(allowed: &[String], blocked: &[String]) -> Result<Self, PolicyError> {
        let allow = if allowed.is_empty() {
            None
        } else {
            Some(build_set(allowed)?)
        };
        let block = build_set(blocked)?;
        Ok(Self { allow, block })
    }

    /// I5: a request for `image:tag` is denied unless it matches the allow
    /// globs (empty ⇒ match all) and does not match any block glob.
    pub fn permits(&self, image: &str, tag: Option<&str>) -> bool {
        let subject = match tag {
            Some(tag) => format!("{image}:{tag}"),
            None => image.to_owned(),
        };

        if self.block.is_match(&subject) {
            return false;
        }

        match &self.allow {
            None => true,
            Some(allow) => allow.is_match(&subject),
        }
    }
}

fn build_set(patterns: &[String]) -> Result<GlobSet, PolicyError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|_| PolicyError::InvalidGlob(pattern.clone()))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|_| PolicyError::InvalidGlob("<set>".to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allow_matches_everything() {
        let policy = Policy::compile(&[], &[]).unwrap();
        assert!(policy.permits("foo", Some("latest")));
    }

    #[test]
    fn block_overrides_allow() {
        let policy = Policy::compile(
            &["*".to_owned()],
            &["*:latest".to_owned()],
        )
        .unwrap();
        assert!(!policy.permits("foo", Some("latest")));
        assert!(policy.permits("foo", Some("1.0")));
    }

    #[test]
    fn allow_list_restricts_to_matches() {
        let policy = Policy::compile(&["library/*".to_owned()], &[]).unwrap();
        assert!(policy.permits("library/alpine", Some("3.19")));
        assert!(!policy.permits("other/alpine", Some("3.19")));
    }
}
