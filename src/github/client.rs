// GitHub API HTTP client.
// Builds the shared reqwest client and issues search and quota requests.

use reqwest::{
    Client, Response, StatusCode,
    header::{ACCEPT, HeaderMap, HeaderValue, IF_NONE_MATCH, USER_AGENT},
};

use crate::config::Config;
use crate::error::{Result, StarhopError};

use super::types::{RateLimit, RateLimitResponse};

/// GitHub API client for repository search and quota queries.
pub struct GitHubClient {
    client: Client,
    search_url: String,
    rate_limit_url: String,
    min_stars: u32,
    page_size: u32,
}

impl GitHubClient {
    /// Create a new client with the standard default headers.
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github.v3+json"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("starhop-tui"));

        let client = Client::builder().default_headers(headers).build()?;

        Ok(Self {
            client,
            search_url: config.api_base_url.clone(),
            rate_limit_url: config.rate_limit_url.clone(),
            min_stars: config.min_stars,
            page_size: config.page_size,
        })
    }

    /// Issue a single conditional search request for a language.
    ///
    /// The response is returned unconsumed so the caller can inspect the
    /// status (`304 Not Modified` short-circuits to cached data) and the
    /// rate-limit headers before reading the body.
    pub async fn search_repositories(
        &self,
        language: &str,
        etag: Option<&str>,
    ) -> Result<Response> {
        let query = format!("language:{} stars:>={}", language, self.min_stars);
        let response = self
            .client
            .get(&self.search_url)
            .query(&[
                ("q", query.as_str()),
                ("sort", "stars"),
                ("order", "desc"),
                ("per_page", &self.page_size.to_string()),
            ])
            .header(IF_NONE_MATCH, etag.unwrap_or(""))
            .send()
            .await?;
        Ok(response)
    }

    /// Query the quota endpoint directly.
    pub async fn fetch_rate_limit(&self) -> Result<RateLimit> {
        let response = self.client.get(&self.rate_limit_url).send().await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(StarhopError::Http(status.as_u16()));
        }

        let body: RateLimitResponse = response.json().await?;
        Ok(body.rate)
    }
}
