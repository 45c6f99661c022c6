use crate::bucket::BucketKey;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Longest reset or penalty the limiter will hold a bucket closed for.
pub const MAX_WAIT: Duration = Duration::from_secs(3600);

/// `now + after`, with `after` capped at [`MAX_WAIT`].
pub fn deadline_after(after: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(after.min(MAX_WAIT)).unwrap_or(now)
}

/// A local sliding-window quota: at most `max_calls` admissions in any
/// `period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowQuota {
    pub max_calls: u32,
    pub period: Duration,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub global: WindowQuota,
    /// Shared by every route under `/bots`.
    pub bots: WindowQuota,
    pub max_in_flight: usize,
}

impl RateLimitConfig {
    /// The published Top.gg limits, each kept one call below the hard cap.
    pub fn topgg() -> Self {
        Self {
            global: WindowQuota {
                max_calls: 99,
                period: Duration::from_secs(1),
            },
            bots: WindowQuota {
                max_calls: 59,
                period: Duration::from_secs(60),
            },
            max_in_flight: 10,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::topgg()
    }
}

#[derive(Debug)]
pub struct WindowTracker {
    quota: WindowQuota,
    calls: VecDeque<Instant>,
}

impl WindowTracker {
    pub fn new(quota: WindowQuota) -> Self {
        Self {
            quota,
            calls: VecDeque::with_capacity(quota.max_calls as usize),
        }
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&oldest) = self.calls.front() {
            if now.duration_since(oldest) >= self.quota.period {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }

    /// Time until one more call fits in the window.
    pub fn wait_time(&mut self, now: Instant) -> Duration {
        self.evict(now);
        if (self.calls.len() as u32) < self.quota.max_calls {
            return Duration::ZERO;
        }
        match self.calls.front() {
            Some(&oldest) => (oldest + self.quota.period).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    pub fn record(&mut self, now: Instant) {
        self.calls.push_back(now);
    }

    pub fn len(&mut self, now: Instant) -> usize {
        self.evict(now);
        self.calls.len()
    }

    pub fn is_empty(&mut self, now: Instant) -> bool {
        self.len(now) == 0
    }
}

#[derive(Debug, Default)]
struct BucketState {
    remaining: Option<u32>,
    reset_at: Option<Instant>,
    blocked_until: Option<Instant>,
}

impl BucketState {
    fn wait_time(&mut self, now: Instant) -> Duration {
        if let Some(until) = self.blocked_until {
            if until > now {
                return until - now;
            }
            self.blocked_until = None;
        }

        if let Some(reset_at) = self.reset_at {
            if reset_at <= now {
                // Window rolled over; limits are unknown until the next response.
                self.remaining = None;
                self.reset_at = None;
            } else if self.remaining == Some(0) {
                return reset_at - now;
            }
        }

        Duration::ZERO
    }

    fn consume(&mut self) {
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
    }
}

#[derive(Debug)]
struct LimiterState {
    global: BucketState,
    global_window: WindowTracker,
    bots_window: WindowTracker,
    buckets: HashMap<BucketKey, BucketState>,
}

impl LimiterState {
    fn bucket_mut(&mut self, key: &BucketKey) -> &mut BucketState {
        if key.is_global() {
            return &mut self.global;
        }
        self.buckets.entry(key.clone()).or_default()
    }

    fn wait_time(&mut self, key: &BucketKey, now: Instant) -> Duration {
        let mut wait = self.global.wait_time(now).max(self.global_window.wait_time(now));
        if !key.is_global() {
            wait = wait.max(self.bucket_mut(key).wait_time(now));
        }
        if key.is_bots_route() {
            wait = wait.max(self.bots_window.wait_time(now));
        }
        wait
    }

    fn admit(&mut self, key: &BucketKey, now: Instant) {
        self.global.consume();
        self.global_window.record(now);
        if !key.is_global() {
            self.bucket_mut(key).consume();
        }
        if key.is_bots_route() {
            self.bots_window.record(now);
        }
    }
}

/// Gates outbound calls on the global bucket, the per-route bucket and the
/// local quotas. Admission decisions happen under a single lock so two
/// callers never both see the same free slot.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<LimiterState>,
    semaphore: Arc<Semaphore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let state = LimiterState {
            global: BucketState::default(),
            global_window: WindowTracker::new(config.global),
            bots_window: WindowTracker::new(config.bots),
            buckets: HashMap::new(),
        };

        Self {
            state: Mutex::new(state),
            semaphore: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            config,
        }
    }

    /// Suspends until both the global bucket and `bucket` have room. Never
    /// fails; dropping the future abandons the wait.
    pub async fn acquire(&self, bucket: &BucketKey) -> RateLimitPermit {
        let start_time = Instant::now();

        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let wait = state.wait_time(bucket, now);
                if wait.is_zero() {
                    state.admit(bucket, now);
                }
                wait
            };

            if wait.is_zero() {
                break;
            }

            debug!("Bucket {} exhausted, waiting {:?}", bucket, wait);
            sleep(wait).await;
        }

        // The semaphore is never closed, so this only fails if that changes.
        let slot = self.semaphore.clone().acquire_owned().await.ok();

        RateLimitPermit {
            bucket: bucket.clone(),
            _slot: slot,
            queue_wait_time: start_time.elapsed(),
        }
    }

    /// Applies limits reported by the server. `remaining == 0` holds the
    /// bucket closed until `reset_at`.
    pub async fn update(&self, bucket: &BucketKey, remaining: u32, reset_at: Option<Instant>) {
        let mut state = self.state.lock().await;
        let entry = state.bucket_mut(bucket);
        entry.remaining = Some(remaining);
        entry.reset_at = reset_at;

        if remaining == 0 {
            debug!(
                "Bucket {} exhausted until {:?}",
                bucket,
                reset_at.map(|at| at.saturating_duration_since(Instant::now()))
            );
        }
    }

    /// Forces `bucket` (and the global bucket when `global` is set) to wait
    /// `retry_after`, replacing whatever reset time was known.
    pub async fn penalize(&self, bucket: &BucketKey, retry_after: Duration, global: bool) {
        let retry_after = retry_after.min(MAX_WAIT);
        let until = deadline_after(retry_after);
        let mut state = self.state.lock().await;

        let entry = state.bucket_mut(bucket);
        entry.blocked_until = Some(until);
        entry.remaining = None;
        entry.reset_at = None;

        if global && !bucket.is_global() {
            let entry = state.bucket_mut(&BucketKey::Global);
            entry.blocked_until = Some(until);
            entry.remaining = None;
            entry.reset_at = None;
        }

        warn!(
            "Bucket {} penalized for {:?}{}",
            bucket,
            retry_after,
            if global { " (global)" } else { "" }
        );
    }

    pub async fn status(&self, bucket: &BucketKey) -> BucketStatus {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let wait_time = state.wait_time(bucket, now);
        let window_calls = if bucket.is_bots_route() {
            state.bots_window.len(now)
        } else {
            state.global_window.len(now)
        };
        let window_limit = if bucket.is_bots_route() {
            self.config.bots.max_calls
        } else {
            self.config.global.max_calls
        };

        let entry = state.bucket_mut(bucket);
        BucketStatus {
            bucket: bucket.to_string(),
            remaining: entry.remaining,
            reset_in: entry.reset_at.map(|at| at.saturating_duration_since(now)),
            penalized_for: entry.blocked_until.map(|at| at.saturating_duration_since(now)),
            window_calls,
            window_limit,
            available_permits: self.semaphore.available_permits(),
            wait_time,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

/// Held for the duration of one HTTP attempt.
#[derive(Debug)]
pub struct RateLimitPermit {
    pub bucket: BucketKey,
    _slot: Option<OwnedSemaphorePermit>,
    pub queue_wait_time: Duration,
}

/// Read-only snapshot of one bucket, for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketStatus {
    pub bucket: String,
    pub remaining: Option<u32>,
    pub reset_in: Option<Duration>,
    pub penalized_for: Option<Duration>,
    pub window_calls: usize,
    pub window_limit: u32,
    pub available_permits: usize,
    /// How long an `acquire` issued now would wait.
    pub wait_time: Duration,
}

impl BucketStatus {
    pub fn is_blocked(&self) -> bool {
        !self.wait_time.is_zero()
    }
}
