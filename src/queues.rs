//! Backlog view over the fixed pipeline streams. One repeating timer task
//! inspects every stream's consumer group and posts the whole status set as
//! a single message; the panel swaps its state wholesale, so a failing
//! stream only ever poisons its own slot.

use std::time::Duration;

use ratatui::layout::Rect;
use ratatui::text::{Line, Span};
use ratatui::widgets::Paragraph;
use ratatui::Frame;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::msgs::{Msg, QueueSlot};
use crate::store::Store;
use crate::theme::Theme;

const CHECK_PERIOD: Duration = Duration::from_secs(1);

/// The monitored queues, in display order.
const QUEUES: [(&str, &str); 3] = [
    ("Task Create", "task_create::stream::gw"),
    ("Infer Down", "inference_complete::stream::gw"),
    ("Postprocess Down", "postprocess_complete::stream::gw"),
];

pub struct QueuePanel {
    slots: Vec<QueueSlot>,
    connected: bool,
    poll_task: Option<JoinHandle<()>>,
}

impl Default for QueuePanel {
    fn default() -> Self {
        Self::new()
    }
}

impl QueuePanel {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            connected: false,
            poll_task: None,
        }
    }

    pub fn on_store_up(&mut self, store: Option<&Store>, tx: &mpsc::Sender<Msg>) {
        self.connected = true;
        if self.poll_task.is_none() {
            if let Some(store) = store {
                self.poll_task = Some(spawn_queue_poll(store.clone(), tx.clone()));
            }
        }
    }

    pub fn on_store_down(&mut self) {
        self.connected = false;
    }

    pub fn apply(&mut self, msg: &Msg) {
        if let Msg::QueueStatus(slots) = msg {
            self.slots = slots.clone();
        }
    }

    pub fn render(&self, frame: &mut Frame, area: Rect, theme: &Theme) {
        if !self.connected {
            frame.render_widget(
                Paragraph::new("store disconnected.").style(theme.muted_text()),
                area,
            );
            return;
        }

        let mut lines = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            let label = Span::raw(format!("{:<18}", format!("{}:", slot.name)));
            let detail = match &slot.status {
                Ok(status) => Span::raw(format!(
                    "{} waiting, {} processing (last delivered {})",
                    status.lag, status.pending, status.last_delivered_id
                )),
                Err(err) => Span::styled(err.clone(), theme.error_text()),
            };
            lines.push(Line::from(vec![label, detail]));
        }
        if lines.is_empty() {
            lines.push(Line::from(Span::styled(
                "waiting for first queue poll.",
                theme.muted_text(),
            )));
        }

        frame.render_widget(Paragraph::new(lines), area);
    }
}

fn spawn_queue_poll(store: Store, tx: mpsc::Sender<Msg>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CHECK_PERIOD);
        loop {
            ticker.tick().await;
            let mut slots = Vec::with_capacity(QUEUES.len());
            for (name, stream) in QUEUES {
                let status = store
                    .group_info(stream)
                    .await
                    .map_err(|err| err.to_string());
                if let Err(err) = &status {
                    warn!(event = "queue_poll_error", stream, error = %err);
                }
                slots.push(QueueSlot { name, status });
            }
            if tx.send(Msg::QueueStatus(slots)).await.is_err() {
                return;
            }
        }
    })
}
