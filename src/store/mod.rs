// Persistent store module.
// Narrow key-value interface over the repositories and analytics tables.

pub mod fs;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::CacheEntry;
use crate::error::Result;
use crate::github::RateLimit;

pub use fs::FsStore;

/// Durable key-value store backing the cache and the telemetry sink.
///
/// The repositories table is keyed by language; the analytics table is
/// append-only. Each call is its own transaction: it either commits fully or
/// returns a storage error.
pub trait Store: Send + Sync {
    /// Read one repositories row.
    fn get_repository(&self, language: &str) -> Result<Option<CacheEntry>>;

    /// Write one repositories row, replacing any previous row for the language.
    fn put_repository(&self, entry: &CacheEntry) -> Result<()>;

    /// Enumerate every repositories row.
    fn all_repositories(&self) -> Result<Vec<CacheEntry>>;

    /// Delete one repositories row. Deleting a missing row is not an error.
    fn delete_repository(&self, language: &str) -> Result<()>;

    /// Append one analytics row. Never read back by the application.
    fn append_analytics(&self, record: &AnalyticsRecord) -> Result<()>;
}

/// One telemetry row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AnalyticsEvent,
}

impl AnalyticsRecord {
    pub fn now(event: AnalyticsEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Action-specific payload of an analytics row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AnalyticsEvent {
    RateLimitUpdate {
        limit: u64,
        remaining: u64,
        reset: u64,
    },
    RateLimitCheck {
        limit: u64,
        remaining: u64,
        reset: u64,
    },
    CacheUpdate {
        language: String,
        cache_size: usize,
    },
    CacheCleanup {
        expired_entries: usize,
        languages: Vec<String>,
    },
}

impl AnalyticsEvent {
    /// Quota observation, used for both header updates and explicit checks.
    pub fn rate_limit_update(rate: &RateLimit) -> Self {
        AnalyticsEvent::RateLimitUpdate {
            limit: rate.limit,
            remaining: rate.remaining,
            reset: rate.reset,
        }
    }

    pub fn rate_limit_check(rate: &RateLimit) -> Self {
        AnalyticsEvent::RateLimitCheck {
            limit: rate.limit,
            remaining: rate.remaining,
            reset: rate.reset,
        }
    }
}
