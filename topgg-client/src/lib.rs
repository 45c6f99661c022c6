//! Rate-limit aware client for the Top.gg API.
//!
//! Every call goes through a [`RequestPipeline`], which waits on the shared
//! [`RateLimiter`] before sending, feeds response headers back into it, and
//! retries exactly once when the server answers 429.

pub mod api;
pub mod bucket;
pub mod metrics;
pub mod pipeline;
pub mod rate_limiter;
pub mod retry;

#[cfg(test)]
mod tests;

pub use api::{decode_bot_id, TopggClient};
pub use bucket::BucketKey;
pub use metrics::{Attempt, AttemptOutcome, BucketCounters, ClientMetrics, MetricsCollector};
pub use pipeline::{ApiRequest, PipelineConfig, RateLimitHeaders, RequestPipeline};
pub use rate_limiter::{
    deadline_after, BucketStatus, RateLimitConfig, RateLimitPermit, RateLimiter, WindowQuota,
    MAX_WAIT,
};
pub use retry::{RetryConfig, RetryStrategy};
