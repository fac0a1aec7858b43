//! Frame composition: tab header, focused component body, and the two-line
//! status footer.

use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::text::{Line, Span};
use ratatui::widgets::Paragraph;
use ratatui::Frame;

use crate::app::{App, TABS};
use crate::theme::Theme;

const FOOTER_ROWS: u16 = 2;
const MIN_WIDTH: u16 = 40;
const MIN_HEIGHT: u16 = 6;

pub fn render(frame: &mut Frame, app: &App, theme: &Theme) {
    if app.width < MIN_WIDTH || app.height < MIN_HEIGHT {
        frame.render_widget(
            Paragraph::new("terminal too small").style(theme.muted_text()),
            frame.size(),
        );
        return;
    }

    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(FOOTER_ROWS),
        ])
        .split(frame.size());

    frame.render_widget(header(app, theme), layout[0]);

    match app.focus {
        0 => app.runners.render(frame, layout[1], theme),
        1 => app.queues.render(frame, layout[1], theme),
        _ => app.keys.render(frame, layout[1], theme),
    }

    frame.render_widget(footer(app, theme), layout[2]);
}

fn header(app: &App, theme: &Theme) -> Paragraph<'static> {
    let mut spans = Vec::with_capacity(TABS.len());
    for (index, name) in TABS.iter().enumerate() {
        let style = if index == app.focus {
            theme.tab_selected()
        } else {
            theme.tab_unselected()
        };
        spans.push(Span::styled(format!("  {name}  "), style));
    }
    Paragraph::new(Line::from(spans)).style(theme.tab_unselected())
}

fn footer(app: &App, theme: &Theme) -> Paragraph<'static> {
    let endpoint = Line::from(Span::raw(format!(
        "Redis {} | {}",
        app.config.endpoint(),
        app.connection_label()
    )));
    let status = Line::from(Span::raw(app.focused_status_line())).alignment(Alignment::Right);
    Paragraph::new(vec![endpoint, status]).style(theme.footer())
}
