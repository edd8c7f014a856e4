//! Single-request execution: auth header, timeout, bounded retry.
//!
//! This is the only place that interprets status codes. The query cache and
//! the mutation dispatcher only ever see `Ok(json)` or a classified
//! [`RequestError`].

use std::sync::Arc;

use rand::Rng;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::Value;
use tracing::{debug, warn};

use super::auth::{AuthGate, Credential, TokenProvider};
use super::config::ExecutorConfig;
use super::endpoint::HttpRequest;
use super::error::RequestError;
use super::transport::{ReqwestTransport, Transport, TransportRequest};

/// Issues requests against the API root with retry and token refresh.
///
/// Cloning is cheap; clones share the transport and the refresh gate, so
/// concurrent 401s across clones still collapse into one refresh.
#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    auth: Arc<AuthGate>,
    config: Arc<ExecutorConfig>,
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RequestExecutor {
    /// Creates an executor using the default reqwest transport.
    pub fn new(config: ExecutorConfig, tokens: Arc<dyn TokenProvider>) -> Self {
        Self::with_transport(config, tokens, Arc::new(ReqwestTransport::default()))
    }

    pub fn with_transport(
        config: ExecutorConfig,
        tokens: Arc<dyn TokenProvider>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            transport,
            auth: Arc::new(AuthGate::new(tokens)),
            config: Arc::new(config),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Executes `request` and returns the decoded JSON body.
    ///
    /// Idempotent reads are retried on transient failures. A 401 triggers one
    /// token refresh and one retry, for reads and writes alike.
    pub async fn execute(&self, request: &HttpRequest) -> Result<Value, RequestError> {
        let retry = &self.config.retry;
        let mut credential = self.auth.current().await;
        let mut refreshed = false;
        let mut retries = 0;

        loop {
            let result = self.execute_once(request, &credential).await;

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_unauthorized() && !refreshed => {
                    refreshed = true;
                    debug!(method = %request.method, path = %request.path, "unauthorized, refreshing token");
                    credential = match self.auth.refresh(&credential).await {
                        Ok(credential) => credential,
                        Err(e) => {
                            warn!(error = %e, "token refresh failed");
                            return Err(RequestError::auth(e.to_string()));
                        }
                    };
                }
                Err(e) if e.is_unauthorized() => {
                    warn!(method = %request.method, path = %request.path, "still unauthorized after token refresh");
                    return Err(RequestError::auth("invalid or expired token"));
                }
                Err(e) if e.is_transient() && request.is_idempotent_read() && retries < retry.max_retries => {
                    retries += 1;

                    let ceiling = retry.delay_for(retries);
                    let backoff_ms =
                        rand::thread_rng().gen_range(0..=ceiling.as_millis() as u64);
                    let backoff = std::time::Duration::from_millis(backoff_ms);

                    warn!(
                        error = %e,
                        retry = retries,
                        max_retries = retry.max_retries,
                        backoff_ms,
                        "retrying request"
                    );

                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn execute_once(
        &self,
        request: &HttpRequest,
        credential: &Credential,
    ) -> Result<Value, RequestError> {
        let outgoing = self.prepare(request, credential)?;

        let response = tokio::time::timeout(self.config.timeout, self.transport.send(outgoing))
            .await
            .map_err(|_| RequestError::Timeout)??;

        if !response.status.is_success() {
            return Err(RequestError::Http {
                status: response.status.as_u16(),
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }

        if response.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&response.body).map_err(RequestError::decode)
    }

    fn prepare(
        &self,
        request: &HttpRequest,
        credential: &Credential,
    ) -> Result<TransportRequest, RequestError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(token) = &credential.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| RequestError::auth(format!("token is not a valid header value: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let body = match &request.body {
            Some(body) => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                Some(serde_json::to_vec(body).map_err(|e| RequestError::InvalidArguments {
                    message: e.to_string(),
                })?)
            }
            None => None,
        };

        Ok(TransportRequest {
            method: request.method.clone(),
            url: join_url(&self.config.base_url, &request.path),
            query: request.query.clone(),
            headers,
            body,
        })
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
