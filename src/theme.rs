//! Dashboard look and feel. The `Theme` is built once at startup and passed
//! by reference into every render call; nothing mutates it afterwards.

use ratatui::style::{Color, Modifier, Style};

#[derive(Clone, Copy, Debug)]
pub struct Theme {
    pub text: Color,
    pub muted: Color,
    pub ok: Color,
    pub warn: Color,
    pub critical: Color,
    pub panel: Color,
    pub panel_accent: Color,
    pub badge_fg: Color,
}

impl Theme {
    pub fn dark() -> Self {
        Self {
            text: Color::Rgb(226, 232, 240),
            muted: Color::Rgb(148, 163, 184),
            ok: Color::Rgb(138, 201, 38),
            warn: Color::Rgb(255, 202, 58),
            critical: Color::Rgb(255, 89, 94),
            panel: Color::Rgb(2, 48, 71),
            panel_accent: Color::Rgb(33, 158, 188),
            badge_fg: Color::Rgb(0, 0, 0),
        }
    }

    pub fn tab_selected(&self) -> Style {
        Style::default()
            .bg(self.panel_accent)
            .fg(self.badge_fg)
            .add_modifier(Modifier::BOLD)
    }

    pub fn tab_unselected(&self) -> Style {
        Style::default().bg(self.panel).fg(self.text)
    }

    pub fn footer(&self) -> Style {
        Style::default().bg(self.panel).fg(self.text)
    }

    pub fn alive_badge(&self) -> Style {
        Style::default().bg(self.ok).fg(self.badge_fg)
    }

    pub fn dead_badge(&self) -> Style {
        Style::default().bg(self.critical).fg(self.badge_fg)
    }

    pub fn busy_badge(&self) -> Style {
        Style::default().bg(self.warn).fg(self.badge_fg)
    }

    pub fn idle_badge(&self) -> Style {
        Style::default().bg(self.ok).fg(self.badge_fg)
    }

    pub fn error_text(&self) -> Style {
        Style::default().fg(self.critical)
    }

    pub fn muted_text(&self) -> Style {
        Style::default().fg(self.muted)
    }
}
