//! Per-endpoint request throttling and 429 retry
//!
//! Every logical endpoint key gets its own minimum spacing between calls and
//! its own rolling request window. Throttling is invisible to callers apart
//! from added latency; only an exhausted backoff schedule surfaces as an
//! error.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RateLimitSettings;
use crate::error::ClientError;
use crate::Result;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub min_interval: Duration,
    pub max_requests_per_window: u32,
    pub window_size: Duration,
    pub backoff_schedule: Vec<Duration>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(2),
            max_requests_per_window: 10,
            window_size: Duration::from_secs(60),
            backoff_schedule: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(5),
                Duration::from_secs(10),
            ],
        }
    }
}

impl From<&RateLimitSettings> for RateLimitConfig {
    fn from(settings: &RateLimitSettings) -> Self {
        Self {
            min_interval: Duration::from_millis(settings.min_interval_ms),
            max_requests_per_window: settings.max_requests_per_window.max(1),
            window_size: Duration::from_secs(settings.window_secs),
            backoff_schedule: settings
                .backoff_schedule_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
        }
    }
}

/// Timing state for one endpoint key.
///
/// `request_count_in_window` only counts dispatches inside
/// `[window_start, window_start + window_size)`.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitRecord {
    pub last_request_at: Instant,
    pub window_start: Instant,
    pub request_count_in_window: u32,
}

impl RateLimitRecord {
    fn first(now: Instant) -> Self {
        Self {
            last_request_at: now,
            window_start: now,
            request_count_in_window: 1,
        }
    }

    /// How long a dispatch at `now` has to wait, or `None` if it may go.
    fn wait_before_dispatch(
        &self,
        now: Instant,
        config: &RateLimitConfig,
        gate: Gate,
    ) -> Option<Duration> {
        let mut wait = match gate {
            Gate::Spaced => (self.last_request_at + config.min_interval).saturating_duration_since(now),
            Gate::WindowOnly => Duration::ZERO,
        };

        let window_end = self.window_start + config.window_size;
        if now < window_end && self.request_count_in_window >= config.max_requests_per_window {
            wait = wait.max(window_end - now);
        }

        (!wait.is_zero()).then_some(wait)
    }

    fn record_dispatch(&mut self, now: Instant, window_size: Duration) {
        if now >= self.window_start + window_size {
            self.window_start = now;
            self.request_count_in_window = 1;
        } else {
            self.request_count_in_window += 1;
        }
        self.last_request_at = now;
    }
}

type Slot = Arc<Mutex<Option<RateLimitRecord>>>;

/// Which limits a dispatch has to respect. A retry after a 429 backoff
/// replaces the interval wait with the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Spaced,
    WindowOnly,
}

pub struct RateLimiter {
    records: RwLock<HashMap<String, Slot>>,
    config: RateLimitConfig,
    cancel: CancellationToken,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, cancel: CancellationToken) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            config,
            cancel,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Runs `operation` once the endpoint's throttle allows it, retrying only
    /// on server-signalled overload along the configured backoff schedule.
    ///
    /// The endpoint's slot stays locked for the whole call, retries included,
    /// so concurrent callers for one key are dispatched one after another and
    /// each starts at least `min_interval` after the previous dispatch.
    pub async fn execute<T, F, Fut>(&self, endpoint_key: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let slot = self.slot(endpoint_key).await;
        let mut record = slot.lock().await;
        self.acquire(endpoint_key, &mut record, Gate::Spaced).await?;

        let mut attempt = 0usize;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_rate_limit_signal() => {
                    let Some(delay) = self.config.backoff_schedule.get(attempt).copied() else {
                        warn!(
                            endpoint = %endpoint_key,
                            attempts = attempt + 1,
                            "Backoff schedule exhausted"
                        );
                        return Err(ClientError::RateLimitExceeded {
                            attempts: attempt + 1,
                        });
                    };

                    attempt += 1;
                    debug!(
                        endpoint = %endpoint_key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Server rate limited request, backing off"
                    );
                    self.sleep(delay).await?;
                    self.acquire(endpoint_key, &mut record, Gate::WindowOnly).await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Current timing record for an endpoint, if it has been used.
    pub async fn record(&self, endpoint_key: &str) -> Option<RateLimitRecord> {
        let slot = self.records.read().await.get(endpoint_key).cloned()?;
        let record = *slot.lock().await;
        record
    }

    /// Drops records whose window has long elapsed.
    pub async fn cleanup(&self) {
        let horizon = self.config.window_size.max(self.config.min_interval);
        let now = Instant::now();
        let mut records = self.records.write().await;

        records.retain(|_, slot| match slot.try_lock() {
            Ok(record) => record.is_some_and(|r| now.duration_since(r.last_request_at) < horizon),
            // In use right now
            Err(_) => true,
        });
    }

    async fn slot(&self, endpoint_key: &str) -> Slot {
        if let Some(slot) = self.records.read().await.get(endpoint_key) {
            return slot.clone();
        }
        self.records
            .write()
            .await
            .entry(endpoint_key.to_string())
            .or_default()
            .clone()
    }

    /// Waits for the endpoint's interval and window to allow a dispatch and
    /// records it. Retries after a backoff only answer to the window ceiling.
    async fn acquire(
        &self,
        endpoint_key: &str,
        record: &mut Option<RateLimitRecord>,
        gate: Gate,
    ) -> Result<()> {
        loop {
            let now = Instant::now();
            let wait = record
                .as_ref()
                .and_then(|r| r.wait_before_dispatch(now, &self.config, gate));

            match wait {
                None => {
                    match record.as_mut() {
                        Some(r) => r.record_dispatch(now, self.config.window_size),
                        None => *record = Some(RateLimitRecord::first(now)),
                    }
                    return Ok(());
                }
                Some(delay) => {
                    debug!(
                        endpoint = %endpoint_key,
                        delay_ms = delay.as_millis() as u64,
                        ?gate,
                        "Throttling request"
                    );
                    self.sleep(delay).await?;
                }
            }
        }
    }

    async fn sleep(&self, duration: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ClientError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
