// starhop entry point.
// Wires the store, cache, rate-limit tracker, and fetcher together, then
// hands the terminal to the event loop.

mod app;
mod cache;
mod config;
mod error;
mod fetch;
mod fetcher;
mod github;
mod ratelimit;
mod store;
mod ui;

use std::fs;
use std::io;
use std::sync::Arc;

use crossterm::event::{DisableFocusChange, EnableFocusChange};
use crossterm::execute;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::cache::CacheManager;
use crate::config::Config;
use crate::fetcher::RepositoryFetcher;
use crate::github::GitHubClient;
use crate::ratelimit::RateLimitTracker;
use crate::store::FsStore;

#[tokio::main]
async fn main() -> io::Result<()> {
    let config = Config::default();

    let data_root = cache::paths::cache_dir()
        .ok_or_else(|| io::Error::other("could not determine cache directory"))?;
    fs::create_dir_all(&data_root)?;

    init_logging(&data_root)?;
    info!("starting starhop");

    let client = Arc::new(
        GitHubClient::new(&config).map_err(|err| io::Error::other(err.to_string()))?,
    );
    let store = Arc::new(FsStore::new(&data_root));
    let (rate_limit, notices) =
        RateLimitTracker::new(Arc::clone(&client), store.clone(), &config);
    let rate_limit = Arc::new(rate_limit);
    let cache = Arc::new(CacheManager::new(store, &config));
    let fetcher = Arc::new(RepositoryFetcher::new(
        client,
        cache,
        rate_limit,
        &config,
    ));

    let mut terminal = ratatui::init();
    // Focus events drive the cache sweep and quota refresh.
    execute!(io::stdout(), EnableFocusChange)?;

    let result = App::new(fetcher, notices, &config).run(&mut terminal).await;

    execute!(io::stdout(), DisableFocusChange)?;
    ratatui::restore();
    result
}

/// Route tracing output to a file; the terminal belongs to the TUI.
fn init_logging(data_root: &std::path::Path) -> io::Result<()> {
    let log_file = fs::File::create(data_root.join("starhop.log"))?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("starhop=debug")),
        )
        .with_writer(Arc::new(log_file))
        .with_ansi(false)
        .init();
    Ok(())
}
