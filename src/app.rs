// App state and main event loop.
// Owns the language selector, the fetched repository, and keyboard handling;
// all fetch work runs on background tasks reporting through a channel.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use ratatui::prelude::*;
use ratatui::widgets::ListState;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::config::Config;
use crate::error::Result as StarhopResult;
use crate::fetcher::RepositoryFetcher;
use crate::github::Repository;
use crate::ratelimit::RateLimitNotice;
use crate::ui;

/// Warnings disappear on their own after this long.
const WARNING_DISMISS: Duration = Duration::from_secs(5);

/// Outcome of a background task, delivered to the event loop.
enum TaskResult {
    Fetch(StarhopResult<Option<Repository>>),
    PrefetchDone,
}

/// Main application state.
pub struct App {
    fetcher: Arc<RepositoryFetcher>,
    notices: UnboundedReceiver<RateLimitNotice>,
    results_tx: UnboundedSender<TaskResult>,
    results_rx: UnboundedReceiver<TaskResult>,
    /// Languages offered in the selector.
    pub languages: Vec<String>,
    /// Selector list state.
    pub list_state: ListState,
    /// Language of the last selection, target of refreshes.
    pub current_language: Option<String>,
    /// Repository currently on display.
    pub current_repo: Option<Repository>,
    /// Persistent error message, cleared by the next success or reset.
    pub error: Option<String>,
    /// Transient warning with its dismissal deadline.
    warning: Option<(String, Instant)>,
    /// Background tasks still running.
    pending: usize,
    /// Whether the app should exit.
    pub should_quit: bool,
}

impl App {
    pub fn new(
        fetcher: Arc<RepositoryFetcher>,
        notices: UnboundedReceiver<RateLimitNotice>,
        config: &Config,
    ) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            fetcher,
            notices,
            results_tx,
            results_rx,
            languages: config.languages.clone(),
            list_state: ListState::default(),
            current_language: None,
            current_repo: None,
            error: None,
            warning: None,
            pending: 0,
            should_quit: false,
        }
    }

    /// Main event loop.
    pub async fn run(mut self, terminal: &mut Terminal<impl Backend>) -> io::Result<()> {
        while !self.should_quit {
            self.drain_messages();
            self.dismiss_stale_warning();
            terminal.draw(|frame| ui::draw(frame, &mut self))?;
            self.handle_events()?;
        }
        Ok(())
    }

    /// Whether a fetch or prefetch is running.
    pub fn is_loading(&self) -> bool {
        self.pending > 0
    }

    /// Warning text, if one is still on display.
    pub fn warning_text(&self) -> Option<&str> {
        self.warning.as_ref().map(|(text, _)| text.as_str())
    }

    /// Latest quota state for the status bar.
    pub fn rate_limit(&self) -> crate::github::RateLimit {
        self.fetcher.rate_limit_state()
    }

    /// Cached language count for the status bar.
    pub fn cached_languages(&self) -> usize {
        self.fetcher.cached_languages()
    }

    /// Poll terminal events with a short timeout so background results keep
    /// flowing into the UI.
    fn handle_events(&mut self) -> io::Result<()> {
        if event::poll(Duration::from_millis(100))? {
            match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => self.handle_key(key),
                Event::FocusGained => self.on_focus_gained(),
                _ => {}
            }
        }
        Ok(())
    }

    fn handle_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Up | KeyCode::Char('k') => self.select_previous(),
            KeyCode::Down | KeyCode::Char('j') => self.select_next(),
            // Fetch keys are inert while a fetch is running.
            KeyCode::Char('f') | KeyCode::Enter if !self.is_loading() => self.fetch_selected(),
            KeyCode::Char('r') if !self.is_loading() => self.refresh_current(),
            _ => {}
        }
    }

    fn select_previous(&mut self) {
        if self.languages.is_empty() {
            return;
        }
        let index = match self.list_state.selected() {
            Some(0) | None => 0,
            Some(i) => i - 1,
        };
        self.list_state.select(Some(index));
        self.on_language_changed();
    }

    fn select_next(&mut self) {
        if self.languages.is_empty() {
            return;
        }
        let index = match self.list_state.selected() {
            Some(i) => (i + 1).min(self.languages.len() - 1),
            None => 0,
        };
        self.list_state.select(Some(index));
        self.on_language_changed();
    }

    /// A new selection hides the previous repository and warms the cache for
    /// the newly selected language.
    fn on_language_changed(&mut self) {
        let Some(language) = self.selected_language() else {
            return;
        };
        if self.current_language.as_deref() == Some(language.as_str()) {
            return;
        }

        self.current_repo = None;
        self.current_language = Some(language.clone());

        self.pending += 1;
        let fetcher = Arc::clone(&self.fetcher);
        let tx = self.results_tx.clone();
        tokio::spawn(async move {
            fetcher.warm_language(&language).await;
            let _ = tx.send(TaskResult::PrefetchDone);
        });
    }

    fn selected_language(&self) -> Option<String> {
        self.list_state
            .selected()
            .and_then(|i| self.languages.get(i))
            .cloned()
    }

    fn fetch_selected(&mut self) {
        match self.selected_language() {
            Some(language) => self.spawn_fetch(language),
            None => self.error = Some("Please select a programming language.".to_string()),
        }
    }

    fn refresh_current(&mut self) {
        if let Some(language) = self.current_language.clone() {
            self.spawn_fetch(language);
        }
    }

    fn spawn_fetch(&mut self, language: String) {
        self.error = None;
        self.pending += 1;

        let fetcher = Arc::clone(&self.fetcher);
        let tx = self.results_tx.clone();
        tokio::spawn(async move {
            let outcome = fetcher.fetch_random_repository(&language).await;
            let _ = tx.send(TaskResult::Fetch(outcome));
        });
    }

    /// Returning to the foreground sweeps expired cache entries and refreshes
    /// the quota state.
    fn on_focus_gained(&mut self) {
        let fetcher = Arc::clone(&self.fetcher);
        let language = self.current_language.clone();
        tokio::spawn(async move {
            fetcher.sweep_expired(language.as_deref()).await;
            fetcher.check_rate_limit().await;
        });
    }

    /// Apply finished background work and rate-limit notices.
    fn drain_messages(&mut self) {
        while let Ok(result) = self.results_rx.try_recv() {
            match result {
                TaskResult::Fetch(outcome) => {
                    self.pending = self.pending.saturating_sub(1);
                    match outcome {
                        Ok(Some(repo)) => {
                            self.error = None;
                            self.current_repo = Some(repo);
                        }
                        // Another fetch was already running; nothing to show.
                        Ok(None) => {}
                        Err(err) => self.error = Some(err.to_string()),
                    }
                }
                TaskResult::PrefetchDone => {
                    self.pending = self.pending.saturating_sub(1);
                }
            }
        }

        while let Ok(notice) = self.notices.try_recv() {
            match notice {
                RateLimitNotice::Warning(message) => {
                    self.warning = Some((message, Instant::now() + WARNING_DISMISS));
                }
                RateLimitNotice::Exhausted(message) => self.error = Some(message),
                RateLimitNotice::Cleared => self.error = None,
            }
        }
    }

    fn dismiss_stale_warning(&mut self) {
        let expired = self
            .warning
            .as_ref()
            .is_some_and(|(_, deadline)| Instant::now() >= *deadline);
        if expired {
            self.warning = None;
        }
    }
}
