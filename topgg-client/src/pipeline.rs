use crate::bucket::BucketKey;
use crate::metrics::{Attempt, AttemptOutcome, ClientMetrics, MetricsCollector};
use crate::rate_limiter::{deadline_after, RateLimitConfig, RateLimiter, MAX_WAIT};
use crate::retry::{RetryConfig, RetryStrategy};
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use topgg_core::{ApiError, CoreError, DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS};
use tracing::{debug, error, warn};
use uuid::Uuid;

pub const USER_AGENT: &str = concat!("topgg-rs/", env!("CARGO_PKG_VERSION"));

/// Used when a 429 carries neither a header nor a body hint.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(3600);

const HEADER_REMAINING: &str = "x-ratelimit-remaining";
const HEADER_RESET_AFTER: &str = "x-ratelimit-reset-after";
const HEADER_RESET: &str = "x-ratelimit-reset";
const HEADER_GLOBAL: &str = "x-ratelimit-global";
const HEADER_RETRY_AFTER: &str = "retry-after";

/// One logical API operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn post<B: Serialize>(path: impl Into<String>, body: &B) -> Result<Self, CoreError> {
        Ok(Self {
            method: Method::POST,
            path: path.into(),
            query: Vec::new(),
            body: Some(serde_json::to_value(body)?),
        })
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn query_pairs(mut self, pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        self.query.extend(pairs);
        self
    }

    pub fn bucket(&self) -> BucketKey {
        BucketKey::route(&self.method, &self.path)
    }
}

/// Rate-limit metadata carried by a response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    pub remaining: Option<u32>,
    pub reset_after: Option<Duration>,
    pub retry_after: Option<Duration>,
    pub global: bool,
}

impl RateLimitHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let value = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        let reset_after = value(HEADER_RESET_AFTER).and_then(parse_seconds).or_else(|| {
            let reset = value(HEADER_RESET)?.trim().parse::<f64>().ok()?;
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs_f64();
            Duration::try_from_secs_f64(reset - now).ok().map(cap_wait)
        });

        Self {
            remaining: value(HEADER_REMAINING).and_then(|v| v.trim().parse().ok()),
            reset_after,
            retry_after: value(HEADER_RETRY_AFTER).and_then(parse_seconds),
            global: value(HEADER_GLOBAL)
                .map(|v| v.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }

    /// Resolves the penalty for a 429 from headers first, then the body.
    pub fn penalty(&self, body: &[u8]) -> Penalty {
        let hint: RatelimitBody = serde_json::from_slice(body).unwrap_or_default();

        let retry_after = self
            .retry_after
            .or_else(|| {
                hint.retry_after
                    .and_then(|s| Duration::try_from_secs_f64(s).ok())
                    .map(cap_wait)
            })
            .unwrap_or(DEFAULT_RETRY_AFTER);

        Penalty {
            retry_after,
            global: self.global || hint.global,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Penalty {
    pub retry_after: Duration,
    pub global: bool,
}

#[derive(Debug, Default, Deserialize)]
struct RatelimitBody {
    #[serde(default)]
    retry_after: Option<f64>,
    #[serde(default)]
    global: bool,
}

fn parse_seconds(value: &str) -> Option<Duration> {
    let secs = value.trim().parse::<f64>().ok()?;
    Duration::try_from_secs_f64(secs).ok().map(cap_wait)
}

/// Server-provided waits beyond this are treated as the ceiling.
fn cap_wait(wait: Duration) -> Duration {
    wait.min(MAX_WAIT)
}

/// Maps a non-2xx, non-429 status onto the error taxonomy.
pub fn status_error(status: StatusCode, path: &str, details: String) -> ApiError {
    match status {
        StatusCode::BAD_REQUEST => ApiError::BadRequest { details },
        StatusCode::UNAUTHORIZED => ApiError::Unauthorized {
            reason: if details.is_empty() {
                "invalid API token".to_string()
            } else {
                details
            },
        },
        StatusCode::FORBIDDEN => ApiError::Forbidden {
            resource: path.to_string(),
        },
        StatusCode::NOT_FOUND => ApiError::NotFound {
            resource: path.to_string(),
        },
        s if s.is_server_error() => ApiError::ServerError {
            status_code: s.as_u16(),
        },
        s => ApiError::UnexpectedStatus {
            status_code: s.as_u16(),
        },
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub rate_limits: RateLimitConfig,
    pub retry: RetryConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            rate_limits: RateLimitConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Executes API operations through the rate limiter with one automatic
/// retry on 429.
pub struct RequestPipeline {
    http_client: Client,
    base_url: String,
    token: String,
    rate_limiter: Arc<RateLimiter>,
    retry: RetryConfig,
    metrics: Arc<MetricsCollector>,
}

impl fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .field("retry", &self.retry)
            .finish()
    }
}

impl RequestPipeline {
    pub fn new(token: impl Into<String>, config: PipelineConfig) -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: token.into(),
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limits)),
            retry: config.retry,
            metrics: Arc::new(MetricsCollector::new()),
        })
    }

    pub async fn execute<T: DeserializeOwned>(
        &self,
        bucket: &BucketKey,
        request: &ApiRequest,
    ) -> Result<T, CoreError> {
        self.execute_until(bucket, request, &CancellationToken::new())
            .await
    }

    /// Like [`execute`](Self::execute), but gives up with
    /// [`CoreError::Cancelled`] if `cancel` fires while waiting for the
    /// rate limiter. An in-flight HTTP call is never interrupted.
    pub async fn execute_until<T: DeserializeOwned>(
        &self,
        bucket: &BucketKey,
        request: &ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<T, CoreError> {
        if self.token.is_empty() {
            return Err(ApiError::Unauthorized {
                reason: "no API token configured".to_string(),
            }
            .into());
        }

        let request_id = Uuid::new_v4();
        let mut retried = false;

        loop {
            let permit = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Request {} cancelled while waiting on {}", request_id, bucket);
                    return Err(CoreError::Cancelled);
                }
                permit = self.rate_limiter.acquire(bucket) => permit,
            };

            if !permit.queue_wait_time.is_zero() {
                debug!(
                    "Request {} waited {:?} for bucket {}",
                    request_id, permit.queue_wait_time, bucket
                );
            }

            debug!(
                "Request {}: {} {}{}",
                request_id,
                request.method,
                request.path,
                if retried { " (retry)" } else { "" }
            );

            let start_time = Instant::now();
            let response = match self.send(request).await {
                Ok(response) => response,
                Err(e) => {
                    error!(
                        "Network error for {} {}: {}",
                        request.method, request.path, e
                    );
                    self.record(bucket, None, start_time, AttemptOutcome::Transport, retried)
                        .await;
                    return Err(if e.is_timeout() {
                        ApiError::RequestTimeout.into()
                    } else {
                        CoreError::Network(e)
                    });
                }
            };

            let status = response.status();
            let limits = RateLimitHeaders::from_headers(response.headers());
            if let Some(remaining) = limits.remaining {
                let reset_at = limits.reset_after.map(deadline_after);
                self.rate_limiter.update(bucket, remaining, reset_at).await;
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let body = response.bytes().await.unwrap_or_default();
                let penalty = limits.penalty(&body);
                self.rate_limiter
                    .penalize(bucket, penalty.retry_after, penalty.global)
                    .await;
                self.record(
                    bucket,
                    Some(status.as_u16()),
                    start_time,
                    AttemptOutcome::RateLimited,
                    retried,
                )
                .await;

                let error = CoreError::Api(ApiError::Ratelimited {
                    retry_after: penalty.retry_after,
                });

                if retried {
                    warn!(
                        "Request {} rate limited again on {}, giving up",
                        request_id, bucket
                    );
                    return Err(error);
                }

                match self.retry.strategy_for(&error) {
                    RetryStrategy::RetryAfter(wait) => {
                        warn!(
                            "Request {} rate limited on {}, retrying in {:?}",
                            request_id, bucket, wait
                        );
                        retried = true;
                        continue;
                    }
                    RetryStrategy::NoRetry => {
                        warn!(
                            "Request {} rate limited on {} for {:?}, not retrying",
                            request_id, bucket, penalty.retry_after
                        );
                        return Err(error);
                    }
                }
            }

            let result = self.read_response(request, response).await;
            let outcome = if result.is_ok() {
                AttemptOutcome::Success
            } else {
                AttemptOutcome::Failed
            };
            self.record(bucket, Some(status.as_u16()), start_time, outcome, retried)
                .await;
            return result;
        }
    }

    async fn send(&self, request: &ApiRequest) -> Result<Response, reqwest::Error> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self
            .http_client
            .request(request.method.clone(), &url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(CONTENT_TYPE, "application/json");

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        builder.send().await
    }

    async fn read_response<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        response: Response,
    ) -> Result<T, CoreError> {
        let status = response.status();

        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            let error = status_error(status, &request.path, details);
            warn!(
                "Request failed with status {} for {} {}",
                status, request.method, request.path
            );
            return Err(error.into());
        }

        let bytes = response.bytes().await?;
        let parsed = if bytes.iter().all(u8::is_ascii_whitespace) {
            serde_json::from_value(serde_json::Value::Null)
        } else {
            serde_json::from_slice(&bytes)
        };

        parsed.map_err(|e| {
            error!(
                "Failed to parse response for {} {}: {}",
                request.method, request.path, e
            );
            CoreError::Api(ApiError::InvalidResponse {
                details: format!("{} {}: {}", request.method, request.path, e),
            })
        })
    }

    async fn record(
        &self,
        bucket: &BucketKey,
        status: Option<u16>,
        start_time: Instant,
        outcome: AttemptOutcome,
        retry: bool,
    ) {
        self.metrics
            .record(Attempt {
                bucket: bucket.to_string(),
                status,
                latency: start_time.elapsed(),
                outcome,
                retry,
            })
            .await;
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn metrics_collector(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub async fn metrics(&self) -> ClientMetrics {
        self.metrics.snapshot().await
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_request_bucket() {
        let request = ApiRequest::get("/bots/42/votes").query("page", 2);
        assert_eq!(request.bucket().to_string(), "GET /bots/:id/votes");
        assert_eq!(request.query, vec![("page".to_string(), "2".to_string())]);
    }

    #[test]
    fn test_parse_rate_limit_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_REMAINING, HeaderValue::from_static("3"));
        headers.insert(HEADER_RESET_AFTER, HeaderValue::from_static("1.5"));
        headers.insert(HEADER_RETRY_AFTER, HeaderValue::from_static("2"));
        headers.insert(HEADER_GLOBAL, HeaderValue::from_static("true"));

        let limits = RateLimitHeaders::from_headers(&headers);
        assert_eq!(limits.remaining, Some(3));
        assert_eq!(limits.reset_after, Some(Duration::from_millis(1500)));
        assert_eq!(limits.retry_after, Some(Duration::from_secs(2)));
        assert!(limits.global);
    }

    #[test]
    fn test_reset_epoch_in_the_past_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_REMAINING, HeaderValue::from_static("0"));
        headers.insert(HEADER_RESET, HeaderValue::from_static("1000"));

        let limits = RateLimitHeaders::from_headers(&headers);
        assert_eq!(limits.remaining, Some(0));
        assert_eq!(limits.reset_after, None);
    }

    #[test]
    fn test_penalty_falls_back_to_body_then_default() {
        let limits = RateLimitHeaders::default();

        let from_body = limits.penalty(br#"{"retry_after": 12, "global": true}"#);
        assert_eq!(from_body.retry_after, Duration::from_secs(12));
        assert!(from_body.global);

        let fallback = limits.penalty(b"not json");
        assert_eq!(fallback.retry_after, DEFAULT_RETRY_AFTER);
        assert!(!fallback.global);
    }

    #[test]
    fn test_oversized_waits_are_capped() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_REMAINING, HeaderValue::from_static("0"));
        headers.insert(HEADER_RESET_AFTER, HeaderValue::from_static("1.5e19"));
        headers.insert(HEADER_RETRY_AFTER, HeaderValue::from_static("1.5e19"));

        let limits = RateLimitHeaders::from_headers(&headers);
        assert_eq!(limits.reset_after, Some(MAX_WAIT));
        assert_eq!(limits.retry_after, Some(MAX_WAIT));

        let from_body = RateLimitHeaders::default().penalty(br#"{"retry_after": 1e300}"#);
        assert_eq!(from_body.retry_after, MAX_WAIT);
    }

    #[test]
    fn test_header_wins_over_body() {
        let limits = RateLimitHeaders {
            retry_after: Some(Duration::from_secs(1)),
            ..Default::default()
        };
        let penalty = limits.penalty(br#"{"retry_after": 60}"#);
        assert_eq!(penalty.retry_after, Duration::from_secs(1));
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, "/bots/1", String::new()),
            ApiError::Unauthorized { .. }
        ));
        assert_eq!(
            status_error(StatusCode::FORBIDDEN, "/bots/1", String::new()),
            ApiError::Forbidden {
                resource: "/bots/1".to_string()
            }
        );
        assert_eq!(
            status_error(StatusCode::NOT_FOUND, "/users/9", String::new()),
            ApiError::NotFound {
                resource: "/users/9".to_string()
            }
        );
        assert_eq!(
            status_error(StatusCode::BAD_GATEWAY, "/bots", String::new()),
            ApiError::ServerError { status_code: 502 }
        );
        assert_eq!(
            status_error(StatusCode::IM_A_TEAPOT, "/bots", String::new()),
            ApiError::UnexpectedStatus { status_code: 418 }
        );
    }
}
