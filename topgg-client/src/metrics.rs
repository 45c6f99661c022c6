use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    /// Non-429 error status or unreadable body.
    Failed,
    RateLimited,
    /// No response was received.
    Transport,
}

/// One HTTP attempt as seen by the pipeline.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub bucket: String,
    pub status: Option<u16>,
    pub latency: Duration,
    pub outcome: AttemptOutcome,
    /// Set on the second attempt of a logical call.
    pub retry: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BucketCounters {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub rate_limited: u64,
    pub retries: u64,
    pub statuses: BTreeMap<u16, u64>,
    pub total_latency: Duration,
    pub fastest: Option<Duration>,
    pub slowest: Option<Duration>,
}

impl BucketCounters {
    fn absorb(&mut self, attempt: &Attempt) {
        self.attempts += 1;
        match attempt.outcome {
            AttemptOutcome::Success => self.successes += 1,
            AttemptOutcome::RateLimited => self.rate_limited += 1,
            AttemptOutcome::Failed | AttemptOutcome::Transport => self.failures += 1,
        }
        if attempt.retry {
            self.retries += 1;
        }
        if let Some(status) = attempt.status {
            *self.statuses.entry(status).or_default() += 1;
        }

        self.total_latency += attempt.latency;
        self.fastest = Some(self.fastest.map_or(attempt.latency, |d| d.min(attempt.latency)));
        self.slowest = Some(self.slowest.map_or(attempt.latency, |d| d.max(attempt.latency)));
    }

    pub fn mean_latency(&self) -> Duration {
        match u32::try_from(self.attempts) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => self.total_latency / n,
        }
    }

    /// Fraction of attempts that succeeded; rate-limited attempts count
    /// against it.
    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            return 0.0;
        }
        self.successes as f64 / self.attempts as f64
    }
}

/// Client-wide totals plus a per-bucket breakdown keyed by the bucket's
/// display form, e.g. `GET /bots/:id`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientMetrics {
    pub totals: BucketCounters,
    pub last_attempt_at: Option<SystemTime>,
    pub buckets: BTreeMap<String, BucketCounters>,
}

#[derive(Debug, Default)]
pub struct MetricsCollector {
    inner: RwLock<ClientMetrics>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, attempt: Attempt) {
        let mut metrics = self.inner.write().await;
        metrics.totals.absorb(&attempt);
        metrics.last_attempt_at = Some(SystemTime::now());
        metrics
            .buckets
            .entry(attempt.bucket.clone())
            .or_default()
            .absorb(&attempt);
    }

    pub async fn snapshot(&self) -> ClientMetrics {
        self.inner.read().await.clone()
    }

    pub async fn bucket(&self, bucket: &str) -> Option<BucketCounters> {
        self.inner.read().await.buckets.get(bucket).cloned()
    }

    pub async fn reset(&self) {
        *self.inner.write().await = ClientMetrics::default();
    }

    pub async fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&*self.inner.read().await)
    }
}
