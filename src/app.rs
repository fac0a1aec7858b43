//! The shell: owns the connection lifecycle, terminal size, and tab focus,
//! and routes every message. Connection and resize events broadcast to all
//! components; poll results broadcast too, with each component matching on
//! identity; keystrokes go only to the focused component, apart from the
//! global quit and tab-cycling keys.

use crossterm::event::{KeyCode, KeyEvent};
use tokio::sync::mpsc;

use crate::keys::{spawn_key_query, KeyBrowser};
use crate::msgs::Msg;
use crate::queues::QueuePanel;
use crate::runners::RunnerBoard;
use crate::store::{Store, StoreConfig};

pub const TABS: [&str; 3] = ["runners", "queues", "raw keys"];

/// Optional status-bar summary a component may expose; the footer asks the
/// focused component once per render and gets an empty string by default.
pub trait StatusLine {
    fn status_line(&self) -> String {
        String::new()
    }
}

impl StatusLine for RunnerBoard {}

impl StatusLine for QueuePanel {}

impl StatusLine for KeyBrowser {
    fn status_line(&self) -> String {
        format!("{} results", self.result_count())
    }
}

pub struct App {
    pub config: StoreConfig,
    tx: mpsc::Sender<Msg>,
    store: Option<Store>,
    connect_error: Option<String>,
    pub focus: usize,
    pub width: u16,
    pub height: u16,
    pub runners: RunnerBoard,
    pub queues: QueuePanel,
    pub keys: KeyBrowser,
}

impl App {
    pub fn new(config: StoreConfig, tx: mpsc::Sender<Msg>) -> Self {
        Self {
            config,
            tx,
            store: None,
            connect_error: None,
            focus: 0,
            width: 0,
            height: 0,
            runners: RunnerBoard::new(),
            queues: QueuePanel::new(),
            keys: KeyBrowser::new(),
        }
    }

    /// Consumes one message from the shared channel. Exactly one message is
    /// processed per loop turn, so components never observe partial state.
    pub fn apply(&mut self, msg: Msg) {
        match msg {
            Msg::StoreConnected(store) => {
                self.store = Some(store);
                self.connect_error = None;
                self.runners.on_store_up(self.store.as_ref(), &self.tx);
                self.queues.on_store_up(self.store.as_ref(), &self.tx);
                self.keys.on_store_up();
            }
            Msg::StoreUnreachable(err) => {
                self.connect_error = Some(err);
                self.runners.on_store_down();
                self.queues.on_store_down();
                self.keys.on_store_down();
            }
            other => {
                self.runners.apply(&other, self.store.as_ref(), &self.tx);
                self.queues.apply(&other);
                self.keys.apply(&other);
            }
        }
    }

    /// Routes one key press. Returns true when the dashboard should quit.
    pub fn on_key(&mut self, key: KeyEvent) -> bool {
        match key.code {
            KeyCode::Esc | KeyCode::Char('q') => return true,
            KeyCode::Tab => {
                self.focus = next_tab(self.focus, TABS.len());
                return false;
            }
            KeyCode::BackTab => {
                self.focus = prev_tab(self.focus, TABS.len());
                return false;
            }
            _ => {}
        }

        match self.focus {
            0 => self.runners.on_key(key),
            2 => {
                if let Some(pattern) = self.keys.on_key(key) {
                    if let Some(store) = &self.store {
                        spawn_key_query(store.clone(), self.tx.clone(), pattern);
                    }
                }
            }
            _ => {}
        }
        false
    }

    pub fn set_size(&mut self, width: u16, height: u16) {
        self.width = width;
        self.height = height;
    }

    /// Connection label for the footer: connecting until the startup task
    /// reports either way.
    pub fn connection_label(&self) -> String {
        if self.store.is_some() {
            "connected".to_string()
        } else if let Some(err) = &self.connect_error {
            format!("unreachable: {err}")
        } else {
            "connecting...".to_string()
        }
    }

    pub fn focused_status_line(&self) -> String {
        let focused: &dyn StatusLine = match self.focus {
            0 => &self.runners,
            1 => &self.queues,
            _ => &self.keys,
        };
        focused.status_line()
    }
}

fn next_tab(focus: usize, tabs: usize) -> usize {
    (focus + 1) % tabs
}

fn prev_tab(focus: usize, tabs: usize) -> usize {
    if focus == 0 {
        tabs - 1
    } else {
        focus - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_app() -> App {
        let (tx, _rx) = mpsc::channel(4);
        App::new(
            StoreConfig {
                host: "127.0.0.1".to_string(),
                port: 6379,
                password: String::new(),
                db: 0,
            },
            tx,
        )
    }

    #[test]
    fn two_tab_focus_cycles_with_wraparound() {
        // shift+tab from the first tab wraps to the last; tab wraps back.
        assert_eq!(prev_tab(0, 2), 1);
        assert_eq!(next_tab(1, 2), 0);
    }

    #[test]
    fn tab_keys_cycle_all_tabs() {
        let mut app = test_app();
        assert!(!app.on_key(KeyEvent::from(KeyCode::Tab)));
        assert_eq!(app.focus, 1);
        app.on_key(KeyEvent::from(KeyCode::Tab));
        app.on_key(KeyEvent::from(KeyCode::Tab));
        assert_eq!(app.focus, 0);
        app.on_key(KeyEvent::from(KeyCode::BackTab));
        assert_eq!(app.focus, TABS.len() - 1);
    }

    #[test]
    fn quit_keys_are_global() {
        let mut app = test_app();
        app.focus = 2;
        assert!(app.on_key(KeyEvent::from(KeyCode::Char('q'))));
        assert!(app.on_key(KeyEvent::from(KeyCode::Esc)));
    }

    #[test]
    fn text_keys_route_to_the_focused_component_only() {
        let mut app = test_app();
        app.focus = 2;
        app.on_key(KeyEvent::from(KeyCode::Char('x')));
        assert_eq!(app.focused_status_line(), "0 results");

        // With the runner board focused the same key changes nothing there.
        app.focus = 0;
        assert!(!app.on_key(KeyEvent::from(KeyCode::Char('x'))));
    }

    #[test]
    fn resize_broadcast_is_idempotent() {
        let mut app = test_app();
        app.set_size(120, 40);
        let first = (app.width, app.height);
        app.set_size(120, 40);
        assert_eq!((app.width, app.height), first);
    }

    #[test]
    fn connection_label_tracks_lifecycle() {
        let mut app = test_app();
        assert_eq!(app.connection_label(), "connecting...");
        app.apply(Msg::StoreUnreachable("refused".to_string()));
        assert_eq!(app.connection_label(), "unreachable: refused");
    }

    #[test]
    fn status_line_defaults_to_empty_for_components_without_one() {
        let app = test_app();
        assert_eq!(app.runners.status_line(), "");
        assert_eq!(app.queues.status_line(), "");
    }
}
