use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use gateway_cache::{OriginResponse, RpcCache};
use gateway_config::UpstreamConfig;
use gateway_jsonrpc::{DecodeError, RequestBody, ResponseBody};

/// Timeout for outbound client requests.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The outbound transport failed or the upstream answered with garbage at
/// the HTTP level.
#[derive(Debug, thiserror::Error)]
#[error("origin request to {upstream_id} failed: {message}")]
pub struct OriginError {
    /// The upstream the request went to.
    pub upstream_id: String,
    /// HTTP status, when a response line arrived at all.
    pub status: Option<u16>,
    /// Transport error detail.
    pub message: String,
}

/// The upstream's answer, undecoded.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// HTTP status the upstream answered with (200 for cache hits).
    pub status: u16,
    /// Raw body bytes.
    pub body: Bytes,
}

/// A decoded response together with its raw transport form.
#[derive(Debug)]
pub struct ExecutionResult {
    /// The decoded single-or-batch body.
    pub response: ResponseBody,
    /// The undecoded transport response.
    pub raw: RawResponse,
}

/// Errors the executor can produce.
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    /// The request never got a usable HTTP response.
    #[error(transparent)]
    Origin(#[from] OriginError),
    /// The upstream responded but the body did not decode; the raw bytes are
    /// passed through to the client unchanged.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Forwards JSON-RPC bodies to upstreams.
///
/// A single executor serves a whole chain; per-upstream auth and headers come
/// from the [`UpstreamConfig`] at call time.
pub struct RequestExecutor {
    client: reqwest::Client,
    cache: Option<Arc<RpcCache>>,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("cache", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

// === impl RequestExecutor ===

impl RequestExecutor {
    /// Creates an executor, optionally cache-integrated.
    pub fn new(cache: Option<Arc<RpcCache>>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("default reqwest client builds");
        Self { client, cache }
    }

    /// Forwards `body` to `upstream` and decodes the answer.
    ///
    /// Cacheable single requests go through the cache; everything else is a
    /// direct origin call.
    pub async fn execute(
        &self,
        upstream: &UpstreamConfig,
        body: &RequestBody,
    ) -> Result<ExecutionResult, ExecuteError> {
        let encoded = body.encode().map_err(|err| OriginError {
            upstream_id: upstream.id.clone(),
            status: None,
            message: format!("failed to encode request: {err}"),
        })?;

        if let (Some(cache), RequestBody::Single(single)) = (&self.cache, body) {
            if cache.is_cacheable(&single.method) {
                return self
                    .execute_cached(Arc::clone(cache), upstream, single, encoded)
                    .await;
            }
        }

        let raw = self.call_origin(upstream, encoded).await?;
        let response = ResponseBody::decode(raw.body.clone())?;
        Ok(ExecutionResult { response, raw })
    }

    /// The cache path for a cacheable single request.
    ///
    /// The cache shares origin failures between coalesced callers as
    /// strings; the caller that actually ran the origin call keeps its typed
    /// error through the side slot.
    async fn execute_cached(
        &self,
        cache: Arc<RpcCache>,
        upstream: &UpstreamConfig,
        single: &gateway_jsonrpc::SingleRequestBody,
        encoded: Bytes,
    ) -> Result<ExecutionResult, ExecuteError> {
        let own_error: Arc<Mutex<Option<ExecuteError>>> = Arc::new(Mutex::new(None));

        let build = || {
            let own_error = Arc::clone(&own_error);
            // The body buffer is cloned so the request stays replayable.
            let encoded = encoded.clone();
            async move {
                match self.call_origin(upstream, encoded).await {
                    Ok(raw) => match ResponseBody::decode(raw.body.clone()) {
                        Ok(response) => Ok(OriginResponse {
                            body: raw.body,
                            // JSON-RPC level errors are surfaced, never stored.
                            cacheable: !response.has_error(),
                        }),
                        Err(err) => {
                            let message = err.to_string();
                            *own_error.lock() = Some(err.into());
                            Err(message)
                        }
                    },
                    Err(err) => {
                        let message = err.to_string();
                        *own_error.lock() = Some(err.into());
                        Err(message)
                    }
                }
            }
        };

        match cache.handle_request(&single.method, single.params.as_ref(), build).await {
            Ok(bytes) => {
                let body = rewrite_response_id(bytes, single.id);
                let response = ResponseBody::decode(body.clone())?;
                Ok(ExecutionResult { response, raw: RawResponse { status: 200, body } })
            }
            Err(err) => {
                if let Some(own) = own_error.lock().take() {
                    return Err(own);
                }
                // A coalesced waiter sharing the builder's failure.
                Err(OriginError {
                    upstream_id: upstream.id.clone(),
                    status: None,
                    message: err.to_string(),
                }
                .into())
            }
        }
    }

    async fn call_origin(
        &self,
        upstream: &UpstreamConfig,
        encoded: Bytes,
    ) -> Result<RawResponse, OriginError> {
        let mut request = self
            .client
            .post(&upstream.http_url)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(encoded);

        if let Some(auth) = &upstream.basic_auth {
            if !auth.username.is_empty() && !auth.password.is_empty() {
                request = request.basic_auth(&auth.username, Some(&auth.password));
            }
        }
        for header in &upstream.request_headers {
            request = request.header(header.key.as_str(), header.value.as_str());
        }

        let response = request.send().await.map_err(|err| OriginError {
            upstream_id: upstream.id.clone(),
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        })?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|err| OriginError {
            upstream_id: upstream.id.clone(),
            status: Some(status),
            message: format!("failed to read response body: {err}"),
        })?;

        debug!(target: "executor", upstream = %upstream.id, status, "origin responded");
        Ok(RawResponse { status, body })
    }
}

/// Replaces the response id with the requester's own.
///
/// Cached bodies carry the id of whoever populated the cache; handing that
/// back verbatim would desynchronize client-side request tracking. A body
/// that does not parse is returned untouched.
fn rewrite_response_id(body: Bytes, id: Option<Option<i64>>) -> Bytes {
    let Ok(ResponseBody::Single(mut single)) = ResponseBody::decode(body.clone()) else {
        return body;
    };
    if single.id == id {
        return body;
    }
    single.id = id;
    match ResponseBody::Single(single).encode() {
        Ok(rewritten) => rewritten,
        Err(err) => {
            warn!(target: "executor", %err, "failed to re-encode cached response");
            body
        }
    }
}
