//! Free-text key browser: a single-line input drives a debounced key scan.
//! A query goes out only when the derived wildcard pattern differs from the
//! last-issued one, so cursor-only edits and repeated values stay quiet.

use crossterm::event::{KeyCode, KeyEvent};
use ratatui::layout::Rect;
use ratatui::style::Modifier;
use ratatui::text::{Line, Span};
use ratatui::widgets::Paragraph;
use ratatui::Frame;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::msgs::Msg;
use crate::store::Store;
use crate::theme::Theme;

/// Rows taken by the input line above the result list.
const INPUT_ROWS: u16 = 1;

pub struct KeyBrowser {
    input: String,
    last_pattern: Option<String>,
    results: Vec<String>,
    error: Option<String>,
    cursor: usize,
    connected: bool,
}

impl Default for KeyBrowser {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyBrowser {
    pub fn new() -> Self {
        Self {
            input: String::new(),
            last_pattern: None,
            results: Vec::new(),
            error: None,
            cursor: 0,
            connected: false,
        }
    }

    pub fn on_store_up(&mut self) {
        self.connected = true;
    }

    pub fn on_store_down(&mut self) {
        self.connected = false;
    }

    pub fn apply(&mut self, msg: &Msg) {
        if let Msg::KeyResults { result, .. } = msg {
            match result {
                Ok(keys) => {
                    self.results = keys.clone();
                    self.error = None;
                }
                Err(err) => {
                    self.results.clear();
                    self.error = Some(err.clone());
                }
            }
        }
    }

    /// Handles one keystroke and returns the search pattern to issue, if any.
    pub fn on_key(&mut self, key: KeyEvent) -> Option<String> {
        match key.code {
            KeyCode::Up => {
                self.cursor = self.cursor.saturating_sub(1);
                None
            }
            KeyCode::Down => {
                let last = self.results.len().saturating_sub(1);
                if self.cursor < last {
                    self.cursor += 1;
                }
                None
            }
            KeyCode::Enter => {
                // Forced re-query of the raw value, bypassing the debounce.
                if self.input.is_empty() {
                    None
                } else {
                    Some(self.input.clone())
                }
            }
            KeyCode::Char(c) => {
                self.input.push(c);
                self.on_input_changed()
            }
            KeyCode::Backspace => {
                if self.input.pop().is_some() {
                    self.on_input_changed()
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Debounce: empty input clears immediately and resets the last-issued
    /// pattern; otherwise a query goes out only when the derived pattern is
    /// new.
    fn on_input_changed(&mut self) -> Option<String> {
        if self.input.is_empty() {
            self.results.clear();
            self.error = None;
            self.cursor = 0;
            self.last_pattern = None;
            return None;
        }
        let pattern = derive_pattern(&self.input);
        if self.last_pattern.as_deref() == Some(pattern.as_str()) {
            return None;
        }
        self.last_pattern = Some(pattern.clone());
        Some(pattern)
    }

    pub fn result_count(&self) -> usize {
        self.results.len()
    }

    pub fn render(&self, frame: &mut Frame, area: Rect, theme: &Theme) {
        let mut lines = vec![Line::from(vec![
            Span::styled("> ", theme.muted_text()),
            Span::raw(self.input.clone()),
            Span::styled(" ", ratatui::style::Style::default().add_modifier(Modifier::REVERSED)),
        ])];

        if !self.connected {
            lines.push(Line::from(Span::styled(
                "store disconnected.",
                theme.muted_text(),
            )));
        } else if let Some(err) = &self.error {
            lines.push(Line::from(Span::styled(err.clone(), theme.error_text())));
        } else if self.results.is_empty() {
            lines.push(Line::from(Span::styled("No keys.", theme.muted_text())));
        } else {
            let page = area.height.saturating_sub(INPUT_ROWS) as usize;
            let start = self.cursor.min(self.results.len());
            let end = (start + page).min(self.results.len());
            for key in &self.results[start..end] {
                lines.push(Line::from(Span::raw(key.clone())));
            }
        }

        frame.render_widget(Paragraph::new(lines), area);
    }
}

/// One-shot search task. In-flight queries are never cancelled; a stale
/// result simply arrives later and is replaced by the next one.
pub fn spawn_key_query(store: Store, tx: mpsc::Sender<Msg>, pattern: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = store.keys(&pattern).await.map_err(|err| err.to_string());
        if let Err(err) = &result {
            warn!(event = "key_query_error", pattern = %pattern, error = %err);
        }
        let _ = tx.send(Msg::KeyResults { pattern, result }).await;
    })
}

/// Bare `*` scans everything as-is; any other value is substring-matched.
fn derive_pattern(input: &str) -> String {
    if input == "*" {
        "*".to_string()
    } else {
        format!("*{input}*")
    }
}
