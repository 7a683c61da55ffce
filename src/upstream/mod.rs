//! C7 — upstream proxy: remote fetch, credential resolution, local caching
//! (spec.md §4.5).
//!
//! Grounded on monocore's `DockerRegistry` (`oci/distribution/docker.rs`)
//! for the `reqwest_middleware::ClientWithMiddleware` +
//! `reqwest_retry::{ExponentialBackoff, RetryTransientMiddleware}` client
//! shape, generalized from one hardcoded Docker Hub remote to an arbitrary
//! configured `UpstreamConfig`, and extended with the bearer-challenge
//! exchange ([`token`]) and circuit breaker ([`circuit`]) the spec requires
//! that monocore's single-shot CLI tool never needed.

pub mod circuit;
pub mod token;

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use dashmap::DashMap;
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use thiserror::Error;
use tokio::{io::AsyncWriteExt, sync::mpsc};

use crate::{
    digest::Digest,
    error::{ErrorCode, OciError},
    model::{AuthMode, UpstreamConfig, UpstreamConfigId},
    store::ContentStore,
    www_authenticate::Challenge,
};

use self::{circuit::CircuitBreaker, token::TokenCache};

const GRACE_PERIOD: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum Error {
    #[error("remote reported the manifest does not exist")]
    ManifestUnknown,
    #[error("remote reported the blob does not exist")]
    BlobUnknown,
    #[error("upstream circuit is open, request rejected without attempting the network")]
    CircuitOpen,
    #[error("token exchange with the upstream's auth realm failed: HTTP {0}")]
    TokenExchangeFailed(u16),
    #[error("transport error talking to upstream: {0}")]
    Transport(String),
    #[error("remote response exceeded the configured payload size limit")]
    PayloadTooLarge,
    #[error(transparent)]
    Store(#[from] crate::store::Error),
}

impl Error {
    pub fn oci_error(&self) -> OciError {
        match self {
            Error::ManifestUnknown => OciError::new(ErrorCode::ManifestUnknown, "manifest unknown"),
            Error::BlobUnknown => OciError::new(ErrorCode::BlobUnknown, "blob unknown"),
            Error::CircuitOpen | Error::TokenExchangeFailed(_) | Error::Transport(_) => {
                OciError::new(ErrorCode::Unknown, self.to_string())
            }
            Error::PayloadTooLarge => OciError::new(ErrorCode::SizeInvalid, self.to_string()),
            Error::Store(err) => err.oci_error(),
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: f64,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(250),
            factor: 2.0,
            jitter: 0.25,
        }
    }
}

pub struct UpstreamClient {
    client: ClientWithMiddleware,
    token_cache: Arc<TokenCache>,
    circuits: DashMap<UpstreamConfigId, Arc<CircuitBreaker>>,
}

impl UpstreamClient {
    pub fn new() -> Self {
        // Transient-error retries are handled by `reqwest-retry`'s own
        // middleware (matching monocore's client construction); the
        // explicit backoff/jitter loop below additionally covers remote
        // 5xx responses that `reqwest-retry` treats as successful HTTP
        // exchanges.
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(2);
        let client = ClientBuilder::new(reqwest::Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Self {
            client,
            token_cache: Arc::new(TokenCache::new()),
            circuits: DashMap::new(),
        }
    }

    fn circuit_for(&self, upstream_id: UpstreamConfigId) -> Arc<CircuitBreaker> {
        self.circuits
            .entry(upstream_id)
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    10,
                    Duration::from_secs(30),
                    Duration::from_secs(60),
                ))
            })
            .clone()
    }

    fn remote_url(upstream: &UpstreamConfig, image: &str, verb: &str, reference: &str) -> String {
        format!(
            "{}/v2/{image}/{verb}/{reference}",
            upstream.url.trim_end_matches('/')
        )
    }

    /// Runs `request_fn` under the upstream's circuit breaker and the
    /// exponential-backoff retry policy for 5xx/transport failures (spec.md
    /// §4.5). `request_fn` is called fresh on every attempt since a
    /// `reqwest::RequestBuilder` cannot be cloned after a body is attached.
    async fn with_retry<F, Fut>(
        &self,
        upstream_id: UpstreamConfigId,
        policy: RetryPolicy,
        mut request_fn: F,
    ) -> Result<reqwest::Response, Error>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<reqwest::Response, reqwest_middleware::Error>>,
    {
        let circuit = self.circuit_for(upstream_id);
        if !circuit.allow_request() {
            return Err(Error::CircuitOpen);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = request_fn().await;
            match result {
                Ok(response) if response.status().is_server_error() => {
                    circuit.record_failure();
                    if attempt >= policy.max_attempts {
                        return Err(Error::Transport(format!(
                            "upstream returned {}",
                            response.status()
                        )));
                    }
                }
                Ok(response) => {
                    circuit.record_success();
                    return Ok(response);
                }
                Err(err) => {
                    circuit.record_failure();
                    if attempt >= policy.max_attempts {
                        return Err(Error::Transport(err.to_string()));
                    }
                }
            }

            let backoff = policy.base_delay.mul_f64(policy.factor.powi(attempt as i32 - 1));
            let jitter_span = backoff.mul_f64(policy.jitter);
            let jitter = jitter_span.mul_f64(rand::random::<f64>() * 2.0 - 1.0);
            let delay = backoff.saturating_add(jitter).max(Duration::from_millis(1));
            tokio::time::sleep(delay).await;
        }
    }

    /// Attaches `Authorization` per `upstream.auth_mode`, performing the
    /// bearer challenge exchange on a 401 when needed.
    async fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        upstream: &UpstreamConfig,
        upstream_id: UpstreamConfigId,
        scope: &str,
    ) -> reqwest::RequestBuilder {
        match upstream.auth_mode {
            AuthMode::Anonymous => request,
            AuthMode::Basic => {
                if let Some(credential) = &upstream.credential_ref {
                    if let Some((user, pass)) = credential.split_once(':') {
                        return request.basic_auth(user, Some(pass));
                    }
                }
                request
            }
            AuthMode::Token => {
                if let Some(token) = self.token_cache.get(upstream_id, scope) {
                    request.bearer_auth(token)
                } else {
                    request
                }
            }
        }
    }

    /// Completes a bearer challenge after a 401, then retries once with the
    /// acquired token.
    async fn reauthorize_after_challenge(
        &self,
        response: &reqwest::Response,
        upstream: &UpstreamConfig,
        upstream_id: UpstreamConfigId,
        scope: &str,
    ) -> Result<Option<String>, Error> {
        if upstream.auth_mode != AuthMode::Token {
            return Ok(None);
        }
        let Some(header) = response
            .headers()
            .get(reqwest::header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
        else {
            return Ok(None);
        };
        let Some(Challenge::Bearer { realm, service, .. }) = Challenge::parse(header) else {
            return Ok(None);
        };

        let basic = upstream
            .credential_ref
            .as_deref()
            .and_then(|c| c.split_once(':'));
        let token = self
            .token_cache
            .exchange(
                &self.client,
                upstream_id,
                &realm,
                service.as_deref(),
                Some(scope),
                basic,
            )
            .await?;
        Ok(Some(token))
    }

    /// Fetches and fully buffers a manifest (bounded by `max_payload_bytes`),
    /// returning its bytes and declared content type (spec.md §4.5).
    pub async fn fetch_manifest(
        &self,
        upstream: &UpstreamConfig,
        upstream_id: UpstreamConfigId,
        image: &str,
        reference: &str,
        max_payload_bytes: u64,
        policy: RetryPolicy,
    ) -> Result<(Vec<u8>, Option<String>), Error> {
        let url = Self::remote_url(upstream, image, "manifests", reference);
        let scope = format!("repository:{image}:pull");

        let response = self
            .with_retry(upstream_id, policy, || {
                let url = url.clone();
                let scope = scope.clone();
                async move {
                    let request = self.client.get(&url);
                    let request = self.authorize(request, upstream, upstream_id, &scope).await;
                    request.send().await
                }
            })
            .await?;

        let response = self.follow_challenge(response, upstream, upstream_id, &scope, &url).await?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(Error::ManifestUnknown),
            status if !status.is_success() => {
                return Err(Error::Transport(format!("unexpected status {status}")))
            }
            _ => {}
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        if let Some(len) = response.content_length() {
            if len > max_payload_bytes {
                return Err(Error::PayloadTooLarge);
            }
        }
        let bytes = response.bytes().await.map_err(|e| Error::Transport(e.to_string()))?;
        if bytes.len() as u64 > max_payload_bytes {
            return Err(Error::PayloadTooLarge);
        }

        Ok((bytes.to_vec(), content_type))
    }

    /// Fetches a blob, tee-streaming it through a hashing writer into a
    /// staged [`ContentStore`] object while handing each chunk to the caller
    /// over the returned channel, so a client response can start streaming
    /// before the upload to disk finishes. The disk write and final commit
    /// keep running in the returned `JoinHandle` even if the caller drops
    /// its receiver (client disconnect), through the grace period (spec.md
    /// §4.5).
    pub async fn fetch_blob_tee(
        &self,
        upstream: &UpstreamConfig,
        upstream_id: UpstreamConfigId,
        image: &str,
        digest: Digest,
        content: Arc<dyn ContentStore>,
        policy: RetryPolicy,
    ) -> Result<
        (
            mpsc::Receiver<Result<Bytes, std::io::Error>>,
            tokio::task::JoinHandle<Result<(Digest, u64), Error>>,
        ),
        Error,
    > {
        let url = Self::remote_url(upstream, image, "blobs", &digest.to_string());
        let scope = format!("repository:{image}:pull");

        let response = self
            .with_retry(upstream_id, policy, || {
                let url = url.clone();
                let scope = scope.clone();
                async move {
                    let request = self.client.get(&url);
                    let request = self.authorize(request, upstream, upstream_id, &scope).await;
                    request.send().await
                }
            })
            .await?;

        let response = self.follow_challenge(response, upstream, upstream_id, &scope, &url).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::BlobUnknown);
        }
        if !response.status().is_success() {
            return Err(Error::Transport(format!("unexpected status {}", response.status())));
        }

        let (staging_id, mut writer) = content.stage().await?;
        let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(32);

        // Spawned so the grace period (§4.5) survives the HTTP handler's own
        // cancellation when the client disconnects mid-stream; the tee to
        // `tx` is best-effort (a dropped receiver just stops the client side
        // of the stream, the disk write keeps going regardless).
        let handle = tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            use futures::StreamExt;
            let deadline = tokio::time::Instant::now() + GRACE_PERIOD;
            loop {
                let next = tokio::time::timeout_at(deadline, stream.next()).await;
                match next {
                    Ok(Some(Ok(chunk))) => {
                        writer
                            .write_all(&chunk)
                            .await
                            .map_err(crate::store::Error::Io)?;
                        let _ = tx.send(Ok(chunk)).await;
                    }
                    Ok(Some(Err(e))) => {
                        let _ = tx
                            .send(Err(std::io::Error::other(e.to_string())))
                            .await;
                        return Err(Error::Transport(e.to_string()));
                    }
                    Ok(None) => break,
                    Err(_) => return Err(Error::Transport("grace period elapsed".to_owned())),
                }
            }
            writer.flush().await.map_err(crate::store::Error::Io)?;
            drop(writer);
            let (committed_digest, size) = content.commit(staging_id).await?;
            Ok((committed_digest, size))
        });

        Ok((rx, handle))
    }

    async fn follow_challenge(
        &self,
        response: reqwest::Response,
        upstream: &UpstreamConfig,
        upstream_id: UpstreamConfigId,
        scope: &str,
        url: &str,
    ) -> Result<reqwest::Response, Error> {
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        let Some(token) = self
            .reauthorize_after_challenge(&response, upstream, upstream_id, scope)
            .await?
        else {
            return Ok(response);
        };
        self.client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new()
    }
}
