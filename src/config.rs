//! Process configuration (spec.md §6 "Configuration").
//!
//! Grounded on `examples/cuenv-cuenv/crates/remote/src/config.rs`'s
//! `#[serde(default = "...")]`-per-field shape and `Default` impl; this
//! crate has no CLI surface of its own (it's a library mounted by a host
//! app, per the teacher's `lib.rs`), so there's no `clap` layer — just the
//! serde-deserializable struct a host loads from TOML/env and passes in.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Fs,
    S3,
    Gcs,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_retry_factor")]
    pub factor: f64,
    #[serde(default = "default_retry_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            base_ms: default_retry_base_ms(),
            factor: default_retry_factor(),
            jitter: default_retry_jitter(),
        }
    }
}

impl RetryConfig {
    pub fn as_upstream_policy(&self) -> crate::upstream::RetryPolicy {
        crate::upstream::RetryPolicy {
            max_attempts: self.attempts,
            base_delay: Duration::from_millis(self.base_ms),
            factor: self.factor,
            jitter: self.jitter,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CircuitConfig {
    #[serde(default = "default_circuit_failures")]
    pub failures: usize,
    #[serde(default = "default_circuit_open_ms")]
    pub open_ms: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failures: default_circuit_failures(),
            open_ms: default_circuit_open_ms(),
        }
    }
}

/// Process-wide configuration (spec.md §6 enumerated keys).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub tls: bool,
    #[serde(default = "default_storage_backend")]
    pub storage_backend: StorageBackend,
    #[serde(default = "default_storage_root")]
    pub storage_root: String,
    #[serde(rename = "oci.relativeURLs", default)]
    pub relative_urls: bool,
    #[serde(default = "default_max_manifest_payload_bytes")]
    pub max_manifest_payload_bytes: u64,
    #[serde(default = "default_max_manifest_references")]
    pub max_manifest_references: usize,
    #[serde(default = "default_upload_idle_ttl_secs")]
    pub upload_idle_ttl_secs: u64,
    #[serde(default)]
    pub upstream_retry: RetryConfig,
    #[serde(default)]
    pub upstream_circuit: CircuitConfig,
    #[serde(default = "default_token_cache_ttl_secs")]
    pub token_cache_ttl_secs: u64,
    #[serde(default = "default_tag_freshness_secs")]
    pub tag_freshness_secs: u64,
    /// External base URL used when `relative_urls` is false, e.g.
    /// `https://registry.example.com`.
    #[serde(default)]
    pub external_base_url: String,
    /// Realm advertised in the `/v2/` probe's `Www-Authenticate: Bearer`
    /// challenge (spec.md §4.7); the token-issuing endpoint itself is the
    /// host application's concern (spec.md §1 Out of scope).
    #[serde(default = "default_token_realm")]
    pub token_realm: String,
    #[serde(default = "default_token_service")]
    pub token_service: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            tls: false,
            storage_backend: default_storage_backend(),
            storage_root: default_storage_root(),
            relative_urls: false,
            max_manifest_payload_bytes: default_max_manifest_payload_bytes(),
            max_manifest_references: default_max_manifest_references(),
            upload_idle_ttl_secs: default_upload_idle_ttl_secs(),
            upstream_retry: RetryConfig::default(),
            upstream_circuit: CircuitConfig::default(),
            token_cache_ttl_secs: default_token_cache_ttl_secs(),
            tag_freshness_secs: default_tag_freshness_secs(),
            external_base_url: String::new(),
            token_realm: default_token_realm(),
            token_service: default_token_service(),
        }
    }
}

impl Config {
    pub fn manifest_limits(&self) -> crate::manifest::ManifestLimits {
        crate::manifest::ManifestLimits {
            max_references: self.max_manifest_references,
            max_payload_bytes: self.max_manifest_payload_bytes,
        }
    }

    pub fn upload_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.upload_idle_ttl_secs)
    }

    pub fn tag_freshness(&self) -> Duration {
        Duration::from_secs(self.tag_freshness_secs)
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:5000".to_owned()
}
fn default_storage_backend() -> StorageBackend {
    StorageBackend::Fs
}
fn default_storage_root() -> String {
    "./data".to_owned()
}
fn default_max_manifest_payload_bytes() -> u64 {
    32 * 1024 * 1024
}
fn default_max_manifest_references() -> usize {
    1000
}
fn default_upload_idle_ttl_secs() -> u64 {
    24 * 60 * 60
}
fn default_token_cache_ttl_secs() -> u64 {
    300
}
fn default_tag_freshness_secs() -> u64 {
    300
}
fn default_retry_attempts() -> u32 {
    5
}
fn default_retry_base_ms() -> u64 {
    250
}
fn default_retry_factor() -> f64 {
    2.0
}
fn default_retry_jitter() -> f64 {
    0.25
}
fn default_circuit_failures() -> usize {
    10
}
fn default_circuit_open_ms() -> u64 {
    60_000
}
fn default_token_realm() -> String {
    "/v2/token".to_owned()
}
fn default_token_service() -> String {
    "registry".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_documented_defaults() {
        let config = Config::default();
        assert_eq!(config.listen_addr, "0.0.0.0:5000");
        assert_eq!(config.storage_backend, StorageBackend::Fs);
        assert_eq!(config.upstream_retry.attempts, 5);
        assert_eq!(config.upstream_circuit.failures, 10);
    }

    #[test]
    fn deserializes_partial_toml_with_defaults_filled_in() {
        let toml = r#"
            listen_addr = "127.0.0.1:8080"
            storage_backend = "s3"
            storage_root = "/var/lib/registry"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.storage_backend, StorageBackend::S3);
        assert_eq!(config.upload_idle_ttl_secs, default_upload_idle_ttl_secs());
    }
}
