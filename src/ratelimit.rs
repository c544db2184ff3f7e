// Rate limit tracking.
// Holds the latest quota state, emits warning/exhaustion notices, and gates
// fetching until the window resets.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::AbortHandle;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::Result;
use crate::fetch::SingleFlight;
use crate::github::{GitHubClient, RateLimit};
use crate::store::{AnalyticsEvent, AnalyticsRecord, Store};

/// Remaining-request count below which a warning is emitted.
const LOW_REMAINING_WARNING: u64 = 10;

/// Budget for an explicit quota query.
const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Notices pushed to the display layer. Warnings are transient; `Exhausted`
/// persists until `Cleared` arrives at the scheduled reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitNotice {
    Warning(String),
    Exhausted(String),
    Cleared,
}

/// State shared with the scheduled re-enable task.
struct Shared {
    state: Mutex<RateLimit>,
    disabled: AtomicBool,
    notices: UnboundedSender<RateLimitNotice>,
}

/// Sole owner of the process-wide quota state.
pub struct RateLimitTracker {
    shared: Arc<Shared>,
    client: Arc<GitHubClient>,
    store: Arc<dyn Store>,
    check_flight: SingleFlight<RateLimit>,
    check_threshold: Duration,
    last_check: Mutex<Option<Instant>>,
    reenable: Mutex<Option<AbortHandle>>,
}

impl Drop for RateLimitTracker {
    fn drop(&mut self) {
        // A pending re-enable must not outlive the tracker.
        if let Ok(mut slot) = self.reenable.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

impl RateLimitTracker {
    /// Build a tracker plus the receiving end of its notice channel.
    pub fn new(
        client: Arc<GitHubClient>,
        store: Arc<dyn Store>,
        config: &Config,
    ) -> (Self, UnboundedReceiver<RateLimitNotice>) {
        let (notices, rx) = mpsc::unbounded_channel();
        let tracker = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(RateLimit::default()),
                disabled: AtomicBool::new(false),
                notices,
            }),
            client,
            store,
            check_flight: SingleFlight::new(),
            check_threshold: config.rate_check_threshold,
            last_check: Mutex::new(None),
            reenable: Mutex::new(None),
        };
        (tracker, rx)
    }

    /// Latest known quota state.
    pub fn state(&self) -> RateLimit {
        self.shared
            .state
            .lock()
            .expect("rate limit lock poisoned")
            .clone()
    }

    /// Whether fetching is currently disabled by an exhausted quota.
    pub fn is_disabled(&self) -> bool {
        self.shared.disabled.load(Ordering::SeqCst)
    }

    /// Human-readable reset time of the current window.
    pub fn reset_at_display(&self) -> String {
        reset_time(self.state().reset)
    }

    /// Update quota state from response headers.
    ///
    /// Returns false and leaves the state untouched when any of the three
    /// headers is absent or unparsable.
    pub fn update_from_headers(&self, headers: &HeaderMap) -> bool {
        let Some(rate) = parse_rate_limit_headers(headers) else {
            return false;
        };

        self.observe(rate, AnalyticsRecordKind::Update);
        true
    }

    /// Explicit quota check.
    ///
    /// Single-flight: concurrent callers join the query already in progress.
    /// A check younger than the freshness threshold is answered from held
    /// state. Failures and timeouts degrade to the last known state; the
    /// check never blocks or fails primary functionality.
    pub async fn check(&self) -> RateLimit {
        if let Some(at) = *self.last_check.lock().expect("rate limit lock poisoned") {
            if at.elapsed() < self.check_threshold {
                debug!("rate limit check answered from recent state");
                return self.state();
            }
        }

        self.check_flight
            .run("rate_limit", || self.execute_check())
            .await
            .unwrap_or_else(|_| self.state())
    }

    async fn execute_check(&self) -> Result<RateLimit> {
        match time::timeout(CHECK_TIMEOUT, self.client.fetch_rate_limit()).await {
            Err(_) => {
                warn!("rate limit check timed out");
                Ok(self.state())
            }
            Ok(Err(err)) => {
                warn!(%err, "rate limit check failed");
                Ok(self.state())
            }
            Ok(Ok(rate)) => {
                *self.last_check.lock().expect("rate limit lock poisoned") =
                    Some(Instant::now());
                self.observe(rate.clone(), AnalyticsRecordKind::Check);
                Ok(rate)
            }
        }
    }

    /// Store a fresh observation and evaluate the warning and exhaustion
    /// thresholds.
    fn observe(&self, rate: RateLimit, kind: AnalyticsRecordKind) {
        *self.shared.state.lock().expect("rate limit lock poisoned") = rate.clone();

        let event = match kind {
            AnalyticsRecordKind::Update => AnalyticsEvent::rate_limit_update(&rate),
            AnalyticsRecordKind::Check => AnalyticsEvent::rate_limit_check(&rate),
        };
        if let Err(err) = self.store.append_analytics(&AnalyticsRecord::now(event)) {
            warn!(%err, "failed to append analytics record");
        }

        if rate.remaining < LOW_REMAINING_WARNING {
            let _ = self.shared.notices.send(RateLimitNotice::Warning(format!(
                "Rate limit low: {} requests remaining. Resets at {}",
                rate.remaining,
                reset_time(rate.reset)
            )));
        }

        if rate.remaining == 0 {
            self.trip_exhausted(rate.reset);
        }
    }

    /// Disable fetching and schedule the automatic re-enable at reset time.
    fn trip_exhausted(&self, reset: u64) {
        self.shared.disabled.store(true, Ordering::SeqCst);

        let now = Utc::now().timestamp().max(0) as u64;
        let wait = reset.saturating_sub(now);
        let minutes = wait.div_ceil(60);
        let _ = self.shared.notices.send(RateLimitNotice::Exhausted(format!(
            "Rate limit exceeded. Wait {} minutes until {}",
            minutes,
            reset_time(reset)
        )));
        warn!(reset, wait_secs = wait, "rate limit exhausted, fetching disabled");

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            time::sleep(Duration::from_secs(wait)).await;
            shared.disabled.store(false, Ordering::SeqCst);
            let _ = shared.notices.send(RateLimitNotice::Cleared);
            debug!("rate limit window reset, fetching re-enabled");
        });

        let mut slot = self.reenable.lock().expect("rate limit lock poisoned");
        if let Some(previous) = slot.replace(handle.abort_handle()) {
            previous.abort();
        }
    }
}

enum AnalyticsRecordKind {
    Update,
    Check,
}

/// Parse the three quota headers; any absent or invalid value yields `None`.
fn parse_rate_limit_headers(headers: &HeaderMap) -> Option<RateLimit> {
    Some(RateLimit {
        limit: header_value(headers, "x-ratelimit-limit")?,
        remaining: header_value(headers, "x-ratelimit-remaining")?,
        reset: header_value(headers, "x-ratelimit-reset")?,
    })
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// Human-readable rendering of a reset timestamp.
fn reset_time(reset: u64) -> String {
    DateTime::from_timestamp(reset as i64, 0)
        .map(|dt| dt.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
