//! Background loop that periodically posts bot statistics to Top.gg.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use topgg_client::TopggClient;
use topgg_core::{ConfigError, CoreError, ErrorExt, Stats, MIN_AUTOPOST_INTERVAL_SECS};
use tracing::{debug, error, info, warn};

pub type StatsCallback =
    Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<Stats>> + Send + Sync>;
pub type SuccessCallback = Arc<dyn Fn(&Stats) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&AutopostError) + Send + Sync>;

/// Why a single autopost cycle did not complete.
#[derive(Debug, Error)]
pub enum AutopostError {
    #[error("Failed to retrieve stats: {0}")]
    Retrieval(anyhow::Error),

    #[error("Failed to post stats: {0}")]
    Post(#[from] CoreError),
}

#[derive(Clone)]
pub struct AutopostConfig {
    interval: Duration,
    stats: Option<StatsCallback>,
    on_success: Option<SuccessCallback>,
    on_error: Option<ErrorCallback>,
}

impl AutopostConfig {
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for AutopostConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(MIN_AUTOPOST_INTERVAL_SECS),
            stats: None,
            on_success: None,
            on_error: None,
        }
    }
}

impl fmt::Debug for AutopostConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutopostConfig")
            .field("interval", &self.interval)
            .field("stats", &self.stats.is_some())
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

struct LoopHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Posts the value returned by the stats callback every interval, starting
/// immediately. A failed cycle is reported to the error callback and never
/// ends the loop.
pub struct Autoposter {
    client: Arc<TopggClient>,
    config: AutopostConfig,
    running: AtomicBool,
    handle: Mutex<Option<LoopHandle>>,
}

impl Autoposter {
    pub fn new(client: Arc<TopggClient>) -> Self {
        Self {
            client,
            config: AutopostConfig::default(),
            running: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    pub fn with_stats<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Stats>> + Send + 'static,
    {
        self.config.stats = Some(Arc::new(move || callback().boxed()));
        self
    }

    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Stats) + Send + Sync + 'static,
    {
        self.config.on_success = Some(Arc::new(callback));
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&AutopostError) + Send + Sync + 'static,
    {
        self.config.on_error = Some(Arc::new(callback));
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Result<Self, CoreError> {
        self.set_interval(interval)?;
        Ok(self)
    }

    /// Top.gg rejects posts more frequent than every 15 minutes.
    pub fn set_interval(&mut self, interval: Duration) -> Result<(), CoreError> {
        if interval < Duration::from_secs(MIN_AUTOPOST_INTERVAL_SECS) {
            return Err(ConfigError::InvalidValue {
                field: "autopost.interval".to_string(),
                value: format!("{:?}", interval),
            }
            .into());
        }
        self.config.interval = interval;
        Ok(())
    }

    pub fn config(&self) -> &AutopostConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawns the posting loop. A no-op while already running. After a
    /// `stop()`, waits for the previous loop to finish its in-flight post so
    /// cycles never overlap.
    pub async fn start(&self) -> Result<(), CoreError> {
        let stats = self.config.stats.clone().ok_or_else(|| CoreError::InvalidInput {
            message: "a stats callback is required to start autoposting".to_string(),
        })?;

        let mut handle = self.handle.lock().await;
        if self.is_running() {
            debug!("Autoposter already running");
            return Ok(());
        }

        if let Some(previous) = handle.take() {
            if previous.task.await.is_err() {
                warn!("Previous autopost loop ended abnormally");
            }
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_loop(
            self.client.clone(),
            self.config.clone(),
            stats,
            cancel.clone(),
        ));

        self.running.store(true, Ordering::SeqCst);
        *handle = Some(LoopHandle { cancel, task });

        info!(
            "Autoposter started, posting every {:?}",
            self.config.interval
        );
        Ok(())
    }

    /// Asks the loop to exit at its next suspension point. A post already on
    /// the wire completes; a pending sleep or rate-limit wait is cut short.
    /// Idempotent.
    pub async fn stop(&self) {
        let handle = self.handle.lock().await;
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = handle.as_ref() {
            handle.cancel.cancel();
        }
        info!("Autoposter stopped");
    }

    /// Aborts the loop task immediately, including any in-flight request.
    pub async fn cancel(&self) {
        let mut handle = self.handle.lock().await;
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = handle.take() {
            handle.cancel.cancel();
            handle.task.abort();
            info!("Autoposter cancelled");
        }
    }
}

impl Drop for Autoposter {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().as_ref() {
            handle.cancel.cancel();
        }
    }
}

impl fmt::Debug for Autoposter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Autoposter")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish()
    }
}

async fn run_loop(
    client: Arc<TopggClient>,
    config: AutopostConfig,
    stats: StatsCallback,
    cancel: CancellationToken,
) {
    loop {
        // Covers the success and error callbacks; retrieval panics are
        // reported from inside the cycle.
        let cycle = AssertUnwindSafe(run_cycle(&client, &config, &stats, &cancel));
        if cycle.catch_unwind().await.is_err() {
            error!("Autopost cycle panicked; continuing with the next cycle");
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = sleep(config.interval) => {}
        }
    }

    debug!("Autopost loop exited");
}

async fn run_cycle(
    client: &TopggClient,
    config: &AutopostConfig,
    stats: &StatsCallback,
    cancel: &CancellationToken,
) {
    debug!("Running autopost cycle");

    let retrieved = match AssertUnwindSafe(async { stats().await })
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!("stats callback panicked")),
    };

    let stats = match retrieved {
        Ok(stats) => stats,
        Err(e) => {
            warn!("Autopost stats retrieval failed: {:#}", e);
            report(config, &AutopostError::Retrieval(e));
            return;
        }
    };

    if cancel.is_cancelled() {
        return;
    }

    match client.post_stats_until(stats, cancel).await {
        Ok(()) => {
            if let Some(on_success) = &config.on_success {
                on_success(&stats);
            }
        }
        Err(CoreError::Cancelled) => {
            debug!("Autopost cancelled while waiting for the rate limiter");
        }
        Err(e) => {
            e.log_warn();
            report(config, &AutopostError::Post(e));
        }
    }
}

fn report(config: &AutopostConfig, error: &AutopostError) {
    match &config.on_error {
        Some(on_error) => on_error(error),
        None => error!("Unhandled autopost error: {}", error),
    }
}
