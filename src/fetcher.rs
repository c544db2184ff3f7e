// Fetch orchestration.
// Composes cache, deduplication, retries, and rate-limit tracking to answer
// "give me a repository for language L".

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::Rng;
use reqwest::StatusCode;
use reqwest::header::ETAG;
use tracing::{debug, warn};

use crate::cache::{CacheEntry, CacheManager};
use crate::config::Config;
use crate::error::{Result, StarhopError};
use crate::fetch::{RetryPolicy, SingleFlight};
use crate::github::{GitHubClient, RateLimit, RawSearchResponse, Repository, SearchResponse};
use crate::ratelimit::RateLimitTracker;

/// Top-level fetch coordinator consulted by the display layer.
pub struct RepositoryFetcher {
    client: Arc<GitHubClient>,
    cache: Arc<CacheManager>,
    rate_limit: Arc<RateLimitTracker>,
    inflight: SingleFlight<SearchResponse>,
    retry: RetryPolicy,
    min_stars: u32,
    in_progress: AtomicBool,
}

impl RepositoryFetcher {
    pub fn new(
        client: Arc<GitHubClient>,
        cache: Arc<CacheManager>,
        rate_limit: Arc<RateLimitTracker>,
        config: &Config,
    ) -> Self {
        Self {
            client,
            cache,
            rate_limit,
            inflight: SingleFlight::new(),
            retry: RetryPolicy::from_config(config),
            min_stars: config.min_stars,
            in_progress: AtomicBool::new(false),
        }
    }

    /// Fetch a random repository for a language.
    ///
    /// Returns `Ok(None)` when a fetch is already in progress (the call is a
    /// no-op). A failure never clobbers a previously cached valid entry.
    pub async fn fetch_random_repository(&self, language: &str) -> Result<Option<Repository>> {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            debug!(language, "fetch already in progress");
            return Ok(None);
        }
        let _busy = ClearOnExit(&self.in_progress);

        if self.rate_limit.is_disabled() {
            return Err(StarhopError::RateLimited {
                reset_at: self.rate_limit.reset_at_display(),
            });
        }

        let data = self.resolve(language).await?;
        let repo = pick_random(&data.items).ok_or(StarhopError::InvalidData)?;
        Ok(Some(repo.clone()))
    }

    /// Warm the cache for a language without surfacing failures.
    pub async fn prefetch_repositories(&self, language: &str) {
        if self.rate_limit.is_disabled() {
            debug!(language, "prefetch skipped, rate limit exhausted");
            return;
        }
        if let Err(err) = self.fetch_repositories(language).await {
            warn!(language, %err, "prefetch failed");
        }
    }

    /// On language switch: prefetch unless the persistent tier already holds a
    /// fresh entry.
    pub async fn warm_language(&self, language: &str) {
        let fresh = match self.cache.load_persistent(language) {
            Ok(Some(entry)) => !self.cache.is_expired(entry.timestamp),
            Ok(None) => false,
            Err(err) => {
                warn!(language, %err, "persistent lookup failed during warm-up");
                false
            }
        };
        if !fresh {
            self.prefetch_repositories(language).await;
        }
    }

    /// Drop expired cache entries; refresh the selected language if it was
    /// among them.
    pub async fn sweep_expired(&self, current_language: Option<&str>) -> Vec<String> {
        let expired = self.cache.sweep_expired();
        if let Some(language) = current_language {
            if expired.iter().any(|l| l == language) {
                debug!(language, "selected language expired, refreshing");
                self.prefetch_repositories(language).await;
            }
        }
        expired
    }

    /// Explicit quota check, delegated to the tracker.
    pub async fn check_rate_limit(&self) -> RateLimit {
        self.rate_limit.check().await
    }

    /// Latest known quota state, for the status display.
    pub fn rate_limit_state(&self) -> RateLimit {
        self.rate_limit.state()
    }

    /// Number of languages in the memory cache, for the status display.
    pub fn cached_languages(&self) -> usize {
        self.cache.len()
    }

    /// Serve from a fresh memory entry or run the full fetch pipeline.
    async fn resolve(&self, language: &str) -> Result<SearchResponse> {
        if let Some(entry) = self.cache.get(language) {
            if !self.cache.is_expired(entry.timestamp) {
                debug!(language, "memory cache hit");
                return Ok(entry.data);
            }
            debug!(language, "memory cache entry expired");
        }
        self.fetch_repositories(language).await
    }

    /// Deduplicated, retried fetch for one language.
    async fn fetch_repositories(&self, language: &str) -> Result<SearchResponse> {
        let key = format!("{}-{}", language, self.min_stars);
        self.inflight
            .run(&key, || self.retry.execute(|| self.fetch_once(language)))
            .await
    }

    /// One conditional search attempt.
    async fn fetch_once(&self, language: &str) -> Result<SearchResponse> {
        // Persistent lookup supplies the revalidation token. A failed read
        // only costs the token, so it degrades instead of failing the fetch.
        let cached = match self.cache.load_persistent(language) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(language, %err, "persistent lookup failed, fetching without etag");
                None
            }
        };
        let etag = cached.as_ref().and_then(|entry| entry.etag.clone());

        let response = self
            .client
            .search_repositories(language, etag.as_deref())
            .await?;

        if response.status() == StatusCode::NOT_MODIFIED {
            if let Some(entry) = cached {
                debug!(language, "not modified, revalidated cached payload");
                self.rate_limit.update_from_headers(response.headers());
                // The payload is confirmed current; re-cache it with a fresh
                // timestamp so the TTL restarts.
                self.cache
                    .put(CacheEntry::new(language, entry.data.clone(), entry.etag))?;
                return Ok(entry.data);
            }
        }

        let status = response.status();
        if !status.is_success() {
            return Err(StarhopError::Http(status.as_u16()));
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let headers = response.headers().clone();

        let raw: RawSearchResponse = response.json().await?;
        let data = validate_and_filter(raw, self.min_stars)?;

        self.rate_limit.update_from_headers(&headers);
        self.cache
            .put(CacheEntry::new(language, data.clone(), etag))?;

        Ok(data)
    }
}

/// Clears the in-progress flag on every exit path.
struct ClearOnExit<'a>(&'a AtomicBool);

impl Drop for ClearOnExit<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Drop malformed, under-starred, archived, and disabled items; fail when
/// nothing usable remains.
fn validate_and_filter(raw: RawSearchResponse, min_stars: u32) -> Result<SearchResponse> {
    if raw.items.is_empty() {
        return Err(StarhopError::InvalidData);
    }

    let items: Vec<Repository> = raw
        .items
        .into_iter()
        .filter_map(|value| serde_json::from_value::<Repository>(value).ok())
        .filter(|repo| {
            !repo.full_name.is_empty()
                && repo.stargazers_count >= u64::from(min_stars)
                && !repo.archived
                && !repo.disabled
        })
        .collect();

    if items.is_empty() {
        return Err(StarhopError::InvalidData);
    }

    Ok(SearchResponse {
        total_count: raw.total_count,
        incomplete_results: raw.incomplete_results,
        items,
    })
}

/// Uniform random pick, `None` only for an empty list.
fn pick_random<T>(items: &[T]) -> Option<&T> {
    if items.is_empty() {
        return None;
    }
    let index = rand::rng().random_range(0..items.len());
    items.get(index)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use crate::store::FsStore;

    use super::*;

    fn raw(items: Vec<serde_json::Value>) -> RawSearchResponse {
        RawSearchResponse {
            total_count: items.len() as u64,
            incomplete_results: false,
            items,
        }
    }

    fn item(full_name: &str, stars: u64, archived: bool) -> serde_json::Value {
        json!({
            "full_name": full_name,
            "description": "a repo",
            "html_url": format!("https://github.com/{full_name}"),
            "stargazers_count": stars,
            "forks_count": 1,
            "open_issues_count": 2,
            "watchers_count": 3,
            "language": "Rust",
            "archived": archived,
            "disabled": false,
            "created_at": "2020-01-01T00:00:00Z",
            "updated_at": "2024-06-01T00:00:00Z",
        })
    }

    #[test]
    fn test_filter_drops_invalid_items() {
        let raw = raw(vec![
            item("a/b", 50, false),
            item("c/d", 5, false),
            item("", 100, false),
        ]);

        let data = validate_and_filter(raw, 10).unwrap();

        assert_eq!(data.items.len(), 1);
        assert_eq!(data.items[0].full_name, "a/b");
    }

    #[test]
    fn test_filter_drops_archived_and_disabled() {
        let mut disabled = item("e/f", 500, false);
        disabled["disabled"] = json!(true);
        let raw = raw(vec![
            item("a/b", 500, true),
            disabled,
            item("g/h", 500, false),
        ]);

        let data = validate_and_filter(raw, 10).unwrap();

        assert_eq!(data.items.len(), 1);
        assert_eq!(data.items[0].full_name, "g/h");
    }

    #[test]
    fn test_filter_drops_malformed_items() {
        let raw = raw(vec![
            json!({"full_name": "x/y", "stargazers_count": "fifty"}),
            item("a/b", 50, false),
        ]);

        let data = validate_and_filter(raw, 10).unwrap();

        assert_eq!(data.items.len(), 1);
        assert_eq!(data.items[0].full_name, "a/b");
    }

    #[test]
    fn test_empty_item_list_is_invalid() {
        assert_eq!(
            validate_and_filter(raw(vec![]), 10),
            Err(StarhopError::InvalidData)
        );
    }

    #[test]
    fn test_nothing_left_after_filtering_is_invalid() {
        let raw = raw(vec![item("a/b", 1, false)]);
        assert_eq!(validate_and_filter(raw, 10), Err(StarhopError::InvalidData));
    }

    #[test]
    fn test_pick_random() {
        assert_eq!(pick_random::<u32>(&[]), None);
        assert_eq!(pick_random(&[7]), Some(&7));

        let items = [1, 2, 3];
        let picked = pick_random(&items).unwrap();
        assert!(items.contains(picked));
    }

    #[tokio::test]
    async fn test_fetch_fails_fast_when_rate_limited() {
        let dir = TempDir::new().unwrap();
        let config = Config::default();
        let (_cache, tracker, fetcher) = components(&config, &dir);

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("x-ratelimit-limit", "60".parse().unwrap());
        headers.insert("x-ratelimit-remaining", "0".parse().unwrap());
        headers.insert("x-ratelimit-reset", "4102444800".parse().unwrap());
        tracker.update_from_headers(&headers);

        let result = fetcher.fetch_random_repository("Rust").await;
        assert!(matches!(result, Err(StarhopError::RateLimited { .. })));
    }

    /// Serve one canned HTTP response on a loopback socket; returns the URL
    /// to point the search endpoint at.
    async fn serve_once(response: String) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{}/search", addr)
    }

    fn components(
        config: &Config,
        dir: &TempDir,
    ) -> (Arc<CacheManager>, Arc<RateLimitTracker>, RepositoryFetcher) {
        let client = Arc::new(GitHubClient::new(config).unwrap());
        let store = Arc::new(FsStore::new(dir.path()));
        let (tracker, _rx) =
            RateLimitTracker::new(Arc::clone(&client), store.clone(), config);
        let tracker = Arc::new(tracker);
        let cache = Arc::new(CacheManager::new(store, config));
        let fetcher = RepositoryFetcher::new(
            client,
            Arc::clone(&cache),
            Arc::clone(&tracker),
            config,
        );
        (cache, tracker, fetcher)
    }

    #[tokio::test]
    async fn test_fetch_writes_through_and_tracks_rate_limit() {
        let body = json!({
            "total_count": 1,
            "incomplete_results": false,
            "items": [item("a/b", 500, false)],
        })
        .to_string();
        let response = format!(
            "HTTP/1.1 200 OK\r\n\
             content-type: application/json\r\n\
             content-length: {}\r\n\
             etag: \"tag123\"\r\n\
             x-ratelimit-limit: 60\r\n\
             x-ratelimit-remaining: 41\r\n\
             x-ratelimit-reset: 1700000000\r\n\
             \r\n{}",
            body.len(),
            body
        );

        let dir = TempDir::new().unwrap();
        let config = Config {
            api_base_url: serve_once(response).await,
            ..Config::default()
        };
        let (cache, tracker, fetcher) = components(&config, &dir);

        let repo = fetcher.fetch_random_repository("Rust").await.unwrap();
        assert_eq!(repo.unwrap().full_name, "a/b");

        // Write-through reached both tiers, etag included.
        assert!(cache.get("Rust").is_some());
        let persisted = cache.load_persistent("Rust").unwrap().unwrap();
        assert_eq!(persisted.etag.as_deref(), Some("\"tag123\""));

        // Quota state came from the response headers.
        assert_eq!(tracker.state().remaining, 41);
    }

    #[tokio::test]
    async fn test_not_modified_serves_cached_payload() {
        let response = "HTTP/1.1 304 Not Modified\r\n\
                        x-ratelimit-limit: 60\r\n\
                        x-ratelimit-remaining: 7\r\n\
                        x-ratelimit-reset: 1700000000\r\n\
                        \r\n"
            .to_string();

        let dir = TempDir::new().unwrap();
        let config = Config {
            api_base_url: serve_once(response).await,
            ..Config::default()
        };
        let (cache, tracker, fetcher) = components(&config, &dir);

        // Seed the persistent tier only; the memory tier starts cold, so the
        // fetch must run the conditional pipeline.
        let data = validate_and_filter(raw(vec![item("a/b", 500, false)]), 10).unwrap();
        let store = FsStore::new(dir.path());
        crate::store::Store::put_repository(
            &store,
            &CacheEntry::new("Rust", data, Some("\"tag123\"".into())),
        )
        .unwrap();

        let repo = fetcher.fetch_random_repository("Rust").await.unwrap();
        assert_eq!(repo.unwrap().full_name, "a/b");

        // The revalidated payload is back in memory and the quota state was
        // taken from the 304's headers.
        assert!(cache.get("Rust").is_some());
        assert_eq!(tracker.state().remaining, 7);
    }

    #[tokio::test]
    async fn test_overlapping_fetch_is_a_noop() {
        let body = json!({
            "total_count": 1,
            "incomplete_results": false,
            "items": [item("a/b", 500, false)],
        })
        .to_string();
        let response = format!(
            "HTTP/1.1 200 OK\r\n\
             content-type: application/json\r\n\
             content-length: {}\r\n\
             \r\n{}",
            body.len(),
            body
        );

        let dir = TempDir::new().unwrap();
        let config = Config {
            api_base_url: serve_once(response).await,
            ..Config::default()
        };
        let (_cache, _tracker, fetcher) = components(&config, &dir);

        // The first future claims the in-progress flag on its first poll; the
        // second observes it and backs off.
        let (first, second) = tokio::join!(
            fetcher.fetch_random_repository("Rust"),
            fetcher.fetch_random_repository("Rust"),
        );

        assert_eq!(first.unwrap().unwrap().full_name, "a/b");
        assert!(second.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fresh_memory_entry_avoids_network() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            // Nothing listens here; any network attempt would fail.
            api_base_url: "http://127.0.0.1:9/search".to_string(),
            ..Config::default()
        };
        let (cache, _tracker, fetcher) = components(&config, &dir);

        let data = validate_and_filter(raw(vec![item("a/b", 500, false)]), 10).unwrap();
        cache
            .put(CacheEntry::new("Rust", data, Some("\"tag\"".into())))
            .unwrap();

        let repo = fetcher.fetch_random_repository("Rust").await.unwrap();
        assert_eq!(repo.unwrap().full_name, "a/b");
    }
}
