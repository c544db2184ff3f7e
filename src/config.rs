// Application configuration.
// All tunables for the fetch pipeline, cache, and rate-limit tracking.

use std::time::Duration;

/// Configuration injected into every component at construction.
#[derive(Debug, Clone)]
pub struct Config {
    /// Repository search endpoint.
    pub api_base_url: String,
    /// Quota query endpoint.
    pub rate_limit_url: String,
    /// Minimum star count for the search query and item filtering.
    pub min_stars: u32,
    /// Results requested per search (single page only).
    pub page_size: u32,
    /// Budget for a single fetch attempt.
    pub fetch_timeout: Duration,
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub retry_delay: Duration,
    /// Time-to-live for cached search responses.
    pub cache_duration: Duration,
    /// Maximum number of languages held in the memory cache.
    pub max_cache_size: usize,
    /// How long an explicit rate-limit check stays fresh.
    pub rate_check_threshold: Duration,
    /// Languages offered in the selector.
    pub languages: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.github.com/search/repositories".to_string(),
            rate_limit_url: "https://api.github.com/rate_limit".to_string(),
            min_stars: 100,
            page_size: 30,
            fetch_timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            cache_duration: Duration::from_secs(60 * 60),
            max_cache_size: 10,
            rate_check_threshold: Duration::from_secs(60),
            languages: [
                "C",
                "C++",
                "C#",
                "Go",
                "HTML",
                "Java",
                "JavaScript",
                "Kotlin",
                "PHP",
                "Python",
                "Ruby",
                "Rust",
                "Shell",
                "Swift",
                "TypeScript",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}
