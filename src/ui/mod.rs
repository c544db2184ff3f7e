// UI module for rendering the TUI.
// Language selector, repository card, message line, and status bar.

use ratatui::{prelude::*, widgets::*};

use crate::app::App;
use crate::github::Repository;

/// Main draw function that renders the entire UI.
pub fn draw(frame: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(1),    // Main content
            Constraint::Length(1), // Warning / error line
            Constraint::Length(1), // Status bar
        ])
        .split(frame.area());

    draw_main(frame, app, chunks[0]);
    draw_message_line(frame, app, chunks[1]);
    draw_status_bar(frame, app, chunks[2]);
}

fn draw_main(frame: &mut Frame, app: &mut App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(22), Constraint::Min(1)])
        .split(area);

    draw_language_list(frame, app, chunks[0]);
    draw_repository_panel(frame, app, chunks[1]);
}

fn draw_language_list(frame: &mut Frame, app: &mut App, area: Rect) {
    let items: Vec<ListItem> = app
        .languages
        .iter()
        .map(|language| ListItem::new(language.as_str()))
        .collect();

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(" Language "))
        .highlight_style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, area, &mut app.list_state);
}

fn draw_repository_panel(frame: &mut Frame, app: &App, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title(" Repository ");

    if app.is_loading() {
        let text = Paragraph::new("⏳ Fetching repository...")
            .alignment(Alignment::Center)
            .style(Style::default().fg(Color::Yellow))
            .block(block);
        frame.render_widget(text, area);
        return;
    }

    match &app.current_repo {
        Some(repo) => {
            let card = Paragraph::new(repository_lines(repo))
                .wrap(Wrap { trim: true })
                .block(block);
            frame.render_widget(card, area);
        }
        None => {
            let text = Paragraph::new("Select a language, then press f to fetch")
                .alignment(Alignment::Center)
                .style(Style::default().fg(Color::DarkGray))
                .block(block);
            frame.render_widget(text, area);
        }
    }
}

fn repository_lines(repo: &Repository) -> Vec<Line<'_>> {
    let description = repo
        .description
        .as_deref()
        .unwrap_or("No description available");
    let language = repo.language.as_deref().unwrap_or("-");

    vec![
        Line::from(Span::styled(
            repo.full_name.as_str(),
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(
            repo.html_url.as_str(),
            Style::default().fg(Color::DarkGray),
        )),
        Line::default(),
        Line::from(description),
        Line::default(),
        Line::from(vec![
            Span::styled("⭐ ", Style::default().fg(Color::Yellow)),
            Span::raw(format_number(repo.stargazers_count)),
            Span::raw("   forks "),
            Span::raw(format_number(repo.forks_count)),
            Span::raw("   issues "),
            Span::raw(format_number(repo.open_issues_count)),
            Span::raw("   watchers "),
            Span::raw(format_number(repo.watchers_count)),
        ]),
        Line::default(),
        Line::from(format!("Language: {}", language)),
        Line::from(format!(
            "Created {}   Updated {}",
            repo.created_at.format("%Y-%m-%d"),
            repo.updated_at.format("%Y-%m-%d"),
        )),
    ]
}

fn draw_message_line(frame: &mut Frame, app: &App, area: Rect) {
    let line = if let Some(error) = &app.error {
        Line::from(Span::styled(
            error.as_str(),
            Style::default().fg(Color::Red),
        ))
    } else if let Some(warning) = app.warning_text() {
        Line::from(Span::styled(warning, Style::default().fg(Color::Yellow)))
    } else {
        Line::default()
    };
    frame.render_widget(Paragraph::new(line), area);
}

fn draw_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    let rate = app.rate_limit();
    let remaining = if rate.remaining == u64::MAX {
        "-".to_string()
    } else {
        format!("{}/{}", rate.remaining, rate.limit)
    };

    let status = Line::from(vec![
        Span::styled("API ", Style::default().fg(Color::DarkGray)),
        Span::raw(remaining),
        Span::styled("  cached ", Style::default().fg(Color::DarkGray)),
        Span::raw(app.cached_languages().to_string()),
        Span::styled(
            "  f fetch · r refresh · ↑↓ language · q quit",
            Style::default().fg(Color::DarkGray),
        ),
    ]);
    frame.render_widget(Paragraph::new(status), area);
}

/// Compact star/fork count formatting (1234 -> "1.2k").
fn format_number(value: u64) -> String {
    if value >= 1_000_000 {
        format!("{:.1}M", value as f64 / 1_000_000.0)
    } else if value >= 1_000 {
        format!("{:.1}k", value as f64 / 1_000.0)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_234), "1.2k");
        assert_eq!(format_number(54_321), "54.3k");
        assert_eq!(format_number(2_500_000), "2.5M");
    }
}
