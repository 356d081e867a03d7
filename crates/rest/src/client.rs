//! REST client: one outbound call through the bucket manager, response
//! classification, and retry policy.
//!
//! Retry rules, in order of precedence:
//! * 429 — wait exactly what the server asked for and go again, without
//!   consuming a retry. The client already promised to honor the limit;
//!   giving up here would break that contract.
//! * timeouts / connect errors / 5xx / malformed-JSON-where-JSON-expected —
//!   transient upstream faults, retried with linear backoff up to
//!   `max_retries`.
//! * any other 4xx — permanent, surfaced immediately (401/403 additionally
//!   feed ban-risk accounting).

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

use crate::bucket::{RateLimitBody, RateLimitInfo, RateLimitScope};
use crate::error::{RestError, Result};
use crate::manager::{BucketManager, DEFAULT_INVALID_WINDOW, DEFAULT_SWEEP_INTERVAL};
use crate::routes::Route;

const DEFAULT_BASE_URL: &str = "https://api.accord.gg/v10";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_MAX_RETRIES: u32 = 3;

/// A successful response plus the rate-limit snapshot observed on it.
#[derive(Debug)]
pub struct ApiResponse<T> {
    pub value: T,
    pub rate_limit: RateLimitInfo,
}

/// Discovery payload used to size the shard fleet.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayBot {
    pub url: String,
    pub shards: u32,
    pub session_start_limit: SessionStartLimit,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,
    /// Milliseconds until the start quota resets.
    pub reset_after: u64,
    /// How many shards may identify concurrently.
    pub max_concurrency: u32,
}

/// REST client for the Accord HTTP API.
///
/// Created once and reused; the underlying `reqwest::Client` keeps a
/// connection pool, and the [`BucketManager`] is shared by every call.
#[derive(Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    buckets: Arc<BucketManager>,
    max_retries: u32,
}

impl RestClient {
    pub fn builder(token: impl Into<String>) -> RestClientBuilder {
        RestClientBuilder::new(token)
    }

    pub fn buckets(&self) -> &Arc<BucketManager> {
        &self.buckets
    }

    /// Fetch the recommended shard count and identify-concurrency budget.
    pub async fn get_gateway_bot(&self) -> Result<GatewayBot> {
        Ok(self
            .request(Method::GET, "/gateway/bot", None)
            .await?
            .value)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Value,
    ) -> Result<ApiResponse<T>> {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>> {
        self.request(Method::DELETE, path, None).await
    }

    /// Send one framed request through the rate-limit pipeline.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<ApiResponse<T>> {
        let key = Route::new(method.clone(), path).key();
        let url = format!("{}{}", self.base_url, path);
        let mut attempt: u32 = 0;

        loop {
            self.buckets.admit(&key).await;

            let mut rb = self
                .http
                .request(method.clone(), &url)
                .header(AUTHORIZATION, format!("Bot {}", self.token))
                .header("X-Trace-Id", Uuid::new_v4().to_string());
            if let Some(ref b) = body {
                rb = rb.json(b);
            }

            let resp = match rb.send().await {
                Ok(resp) => resp,
                Err(e) if e.is_timeout() || e.is_connect() => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        return Err(RestError::Timeout {
                            attempts: attempt,
                            message: e.to_string(),
                        });
                    }
                    tracing::warn!(route = %key, attempt, error = %e, "transport fault, retrying");
                    tokio::time::sleep(linear_backoff(attempt)).await;
                    continue;
                }
                Err(e) => return Err(RestError::Http(e.to_string())),
            };

            let status = resp.status();
            let info = RateLimitInfo::from_headers(resp.headers());
            // The server's view always feeds back, whatever the status.
            self.buckets.observe(&key, &info);

            if status == StatusCode::TOO_MANY_REQUESTS {
                self.handle_rate_limited(&key, &info, resp).await;
                continue; // never counted against max_retries
            }

            if status.is_server_error() {
                attempt += 1;
                let message = resp.text().await.unwrap_or_default();
                if attempt > self.max_retries {
                    return Err(RestError::Upstream {
                        attempts: attempt,
                        status: status.as_u16(),
                        message,
                    });
                }
                tracing::warn!(route = %key, status = status.as_u16(), attempt, "server fault, retrying");
                tokio::time::sleep(linear_backoff(attempt)).await;
                continue;
            }

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                self.buckets.record_invalid_request();
                let message = resp.text().await.unwrap_or_default();
                return Err(RestError::Auth {
                    status: status.as_u16(),
                    message,
                });
            }

            if status.is_client_error() {
                let message = resp.text().await.unwrap_or_default();
                return Err(RestError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let text = resp.text().await.unwrap_or_default();
            let text = if text.is_empty() { "null" } else { text.as_str() };
            match serde_json::from_str::<T>(text) {
                Ok(value) => {
                    return Ok(ApiResponse {
                        value,
                        rate_limit: info,
                    })
                }
                Err(e) => {
                    // A non-JSON body on a JSON endpoint is an edge-proxy
                    // block, not a real API response: transient.
                    attempt += 1;
                    if attempt > self.max_retries {
                        return Err(RestError::Upstream {
                            attempts: attempt,
                            status: status.as_u16(),
                            message: format!("malformed JSON body: {e}"),
                        });
                    }
                    tracing::warn!(route = %key, attempt, error = %e, "malformed body, retrying");
                    tokio::time::sleep(linear_backoff(attempt)).await;
                }
            }
        }
    }

    /// Wait out a 429 and update global/ban-risk state.
    async fn handle_rate_limited(&self, key: &str, info: &RateLimitInfo, resp: reqwest::Response) {
        let text = resp.text().await.unwrap_or_default();
        // A transparent proxy may block with a non-JSON 429: fall back to
        // the headers.
        let (retry_secs, global) = match serde_json::from_str::<RateLimitBody>(&text) {
            Ok(body) => (body.retry_after, body.global || info.global),
            Err(_) => (
                info.retry_after.or(info.reset_after).unwrap_or(1.0),
                info.global,
            ),
        };
        let delay = Duration::from_secs_f64(retry_secs.max(0.0));

        if global {
            self.buckets.set_global_reset(Instant::now() + delay);
        }
        if info.scope != Some(RateLimitScope::Shared) {
            self.buckets.record_invalid_request();
        }

        tracing::warn!(
            route = %key,
            retry_after_secs = retry_secs,
            global,
            scope = ?info.scope,
            "rate limited"
        );
        tokio::time::sleep(delay).await;
    }
}

fn linear_backoff(attempt: u32) -> Duration {
    Duration::from_millis(1000 * u64::from(attempt))
}

/// Fluent builder for [`RestClient`].
pub struct RestClientBuilder {
    token: String,
    base_url: String,
    timeout: Duration,
    max_retries: u32,
    sweep_interval: Duration,
    invalid_window: Duration,
}

impl RestClientBuilder {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            invalid_window: DEFAULT_INVALID_WINDOW,
        }
    }

    /// Override the API base URL (tests, proxies).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn invalid_request_window(mut self, window: Duration) -> Self {
        self.invalid_window = window;
        self
    }

    /// Build the client and start the bucket manager's background tasks.
    /// Must be called within a Tokio runtime.
    pub fn build(self) -> Result<RestClient> {
        if self.token.is_empty() {
            return Err(RestError::Config("token is required".into()));
        }

        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| RestError::Http(e.to_string()))?;

        let buckets = Arc::new(BucketManager::new());
        buckets.start_background(self.sweep_interval, self.invalid_window);

        Ok(RestClient {
            http,
            base_url: self.base_url.trim_end_matches('/').to_owned(),
            token: self.token,
            buckets,
            max_retries: self.max_retries,
        })
    }
}
