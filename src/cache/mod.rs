// Cache module.
// Memory tier, persistence coordination, and cache path helpers.

pub mod manager;
pub mod paths;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::github::SearchResponse;

pub use manager::CacheManager;

/// One cached search response, keyed by language in both tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub language: String,
    pub data: SearchResponse,
    /// Validation token for conditional revalidation, when the server sent one.
    pub etag: Option<String>,
    /// When the data was fetched.
    pub timestamp: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(language: impl Into<String>, data: SearchResponse, etag: Option<String>) -> Self {
        Self {
            language: language.into(),
            data,
            etag,
            timestamp: Utc::now(),
        }
    }
}
