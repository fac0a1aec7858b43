//! Runner health view: one self-refreshing cell per discovered runner plus
//! the board that discovers identities, reconciles cells, and paginates rows.
//!
//! Each cell is refreshed by its own repeating timer task that posts a
//! combined reading (state hash + heartbeat + pending count) onto the shared
//! event channel. Discovery runs on an independent timer, so the two cadences
//! drift freely. When an identity disappears from the listing, the board
//! aborts that cell's task and drops the cell.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::layout::Rect;
use ratatui::style::Style;
use ratatui::text::{Line, Span};
use ratatui::widgets::Paragraph;
use ratatui::Frame;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::msgs::{Msg, RunnerReadings};
use crate::store::{Store, StoreError};
use crate::theme::Theme;

const REFRESH_PERIOD: Duration = Duration::from_secs(1);
const DISCOVERY_PERIOD: Duration = Duration::from_secs(1);

/// Lexical timestamp format runners write into ctime/utime/heartbeat.
const TIME_PARSE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const TIME_PRINT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Chrome above the rows: the counter line and the column header.
const BOARD_HEADER_ROWS: u16 = 2;

/// Renders an age in human units: bare seconds under a minute, `MM:SS` under
/// an hour, `HH:MM:SS` under a day, otherwise the absolute timestamp.
pub fn human_age(t: NaiveDateTime, now: NaiveDateTime) -> String {
    let secs = (now - t).num_seconds().max(0);
    if secs < 60 {
        return format!("{secs:02}s before");
    }
    if secs < 3600 {
        return format!("{:02}:{:02} before", secs / 60, secs % 60);
    }
    if secs < 86_400 {
        return format!(
            "{:02}:{:02}:{:02} before",
            secs / 3600,
            secs % 3600 / 60,
            secs % 60
        );
    }
    t.format(TIME_PRINT_FORMAT).to_string()
}

fn parse_timestamp(field: &str, value: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(value, TIME_PARSE_FORMAT)
        .map_err(|err| format!("bad {field} {value:?}: {err}"))
}

/// Health snapshot for one runner. Owned exclusively by the board; the flags
/// are only as fresh as the last successful poll.
pub struct RunnerCell {
    pub name: String,
    pub model: String,
    pub ctime: Option<NaiveDateTime>,
    pub utime: Option<NaiveDateTime>,
    pub busy: bool,
    pub alive: bool,
    pub heartbeat: Option<NaiveDateTime>,
    pub pending: i64,
    /// Transient poll/parse error, cleared on the next event regardless of
    /// outcome.
    pub last_error: Option<String>,
    poll_task: Option<JoinHandle<()>>,
}

impl RunnerCell {
    pub fn new(name: String) -> Self {
        Self {
            name,
            model: String::new(),
            ctime: None,
            utime: None,
            busy: false,
            alive: false,
            heartbeat: None,
            pending: 0,
            last_error: None,
            poll_task: None,
        }
    }

    /// Folds one combined reading into the snapshot. Field order matters: a
    /// timestamp parse failure aborts the rest of the update for this cycle,
    /// keeping the previous values of everything not yet assigned.
    pub fn apply_readings(&mut self, result: Result<RunnerReadings, String>) {
        self.last_error = None;

        let readings = match result {
            Ok(readings) => readings,
            Err(err) => {
                self.last_error = Some(err);
                return;
            }
        };

        self.model = readings
            .fields
            .get("model_id")
            .cloned()
            .unwrap_or_default();

        let ctime = readings.fields.get("ctime").map(String::as_str).unwrap_or("");
        match parse_timestamp("ctime", ctime) {
            Ok(t) => self.ctime = Some(t),
            Err(err) => {
                self.last_error = Some(err);
                return;
            }
        }
        let utime = readings.fields.get("utime").map(String::as_str).unwrap_or("");
        match parse_timestamp("utime", utime) {
            Ok(t) => self.utime = Some(t),
            Err(err) => {
                self.last_error = Some(err);
                return;
            }
        }

        self.busy = readings.fields.get("busy").map(String::as_str) != Some("0");
        self.alive = readings.fields.get("is_alive").map(String::as_str) != Some("0");
        self.pending = readings.pending;
        self.heartbeat = readings
            .heartbeat
            .as_deref()
            .and_then(|raw| NaiveDateTime::parse_from_str(raw, TIME_PARSE_FORMAT).ok());
    }

    /// Alive for counting purposes means the flag is set and a heartbeat has
    /// actually been observed.
    fn counted_alive(&self) -> bool {
        self.alive && self.heartbeat.is_some()
    }

    /// One fixed-width table row. A hard poll error replaces the whole row.
    pub fn row(&self, now: NaiveDateTime, theme: &Theme) -> Line<'static> {
        if let Some(err) = &self.last_error {
            return Line::from(Span::styled(
                format!("{} update error last time: {err}", self.name),
                theme.error_text(),
            ));
        }

        let heartbeat_badge = match (self.alive, self.heartbeat) {
            (true, Some(hb)) => {
                let secs = (now - hb).num_seconds().max(0);
                Span::styled(badge(&format!("ALIVE - hb {secs}s"), 22), theme.alive_badge())
            }
            (true, None) => Span::styled(badge("ALIVE - no hb", 22), theme.dead_badge()),
            (false, Some(hb)) => {
                let secs = (now - hb).num_seconds().max(0);
                Span::styled(badge(&format!("DEAD - hb {secs}s"), 22), theme.dead_badge())
            }
            (false, None) => Span::styled(badge("DEAD - no hb", 22), theme.dead_badge()),
        };

        let busy_badge = if self.busy {
            Span::styled(badge("BUSY", 6), theme.busy_badge())
        } else {
            Span::styled(badge("IDLE", 6), theme.idle_badge())
        };

        let pending_style = if self.pending > 0 {
            theme.error_text()
        } else {
            Style::default()
        };

        Line::from(vec![
            Span::raw(format!("{:<6.6} ", self.name)),
            Span::raw(format!("{:<22.22} ", self.model)),
            heartbeat_badge,
            Span::raw(" "),
            busy_badge,
            Span::styled(format!(" {:>5} ", self.pending), pending_style),
            Span::raw(format!("{:<22.22} ", age_or_dash(self.ctime, now))),
            Span::raw(format!("{:<22.22}", age_or_dash(self.utime, now))),
        ])
    }
}

fn badge(text: &str, width: usize) -> String {
    format!("{text:^width$.width$}")
}

fn age_or_dash(t: Option<NaiveDateTime>, now: NaiveDateTime) -> String {
    t.map(|t| human_age(t, now)).unwrap_or_else(|| "-".to_string())
}

/// Aggregate counters, recomputed from current snapshots on every render.
#[derive(Debug, PartialEq, Eq)]
pub struct Counts {
    pub total: usize,
    pub alive: usize,
    pub dead: usize,
    pub idle: usize,
    pub busy: usize,
}

pub struct RunnerBoard {
    cells: HashMap<String, RunnerCell>,
    cursor: usize,
    connected: bool,
    last_error: Option<String>,
    discovery_task: Option<JoinHandle<()>>,
}

impl Default for RunnerBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl RunnerBoard {
    pub fn new() -> Self {
        Self {
            cells: HashMap::new(),
            cursor: 0,
            connected: false,
            last_error: None,
            discovery_task: None,
        }
    }

    /// Connection established (or re-established). Existing snapshots are
    /// kept untouched; only future polls are affected.
    pub fn on_store_up(&mut self, store: Option<&Store>, tx: &mpsc::Sender<Msg>) {
        self.connected = true;
        if self.discovery_task.is_none() {
            if let Some(store) = store {
                self.discovery_task = Some(spawn_discovery(store.clone(), tx.clone()));
            }
        }
    }

    pub fn on_store_down(&mut self) {
        self.connected = false;
    }

    pub fn apply(&mut self, msg: &Msg, store: Option<&Store>, tx: &mpsc::Sender<Msg>) {
        self.last_error = None;

        match msg {
            Msg::RunnerNames(Ok(names)) => self.reconcile(names, store, tx),
            Msg::RunnerNames(Err(err)) => self.last_error = Some(err.clone()),
            Msg::RunnerPoll { name, result } => {
                if let Some(cell) = self.cells.get_mut(name) {
                    cell.apply_readings(result.clone());
                }
            }
            _ => {}
        }
    }

    /// Diffs the fresh identity listing against current cells: new names get
    /// a cell and a poll task, known names keep their accumulated state, and
    /// vanished names have their task aborted and the cell dropped.
    fn reconcile(&mut self, names: &[String], store: Option<&Store>, tx: &mpsc::Sender<Msg>) {
        let mut next = HashMap::with_capacity(names.len());
        for name in names {
            match self.cells.remove(name) {
                Some(cell) => {
                    next.insert(name.clone(), cell);
                }
                None => {
                    let mut cell = RunnerCell::new(name.clone());
                    if let Some(store) = store {
                        cell.poll_task =
                            Some(spawn_cell_poll(name.clone(), store.clone(), tx.clone()));
                    }
                    next.insert(name.clone(), cell);
                }
            }
        }
        for (name, cell) in self.cells.drain() {
            warn!(event = "runner_vanished", runner = %name);
            if let Some(task) = cell.poll_task {
                task.abort();
            }
        }
        self.cells = next;
    }

    pub fn on_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Up => self.cursor = self.cursor.saturating_sub(1),
            KeyCode::Down => {
                let last = self.cells.len().saturating_sub(1);
                if self.cursor < last {
                    self.cursor += 1;
                }
            }
            _ => {}
        }
    }

    pub fn counts(&self) -> Counts {
        // Counted over an owned snapshot list so no cell storage is aliased
        // across the predicate passes.
        let flags: Vec<(bool, bool)> = self
            .cells
            .values()
            .map(|cell| (cell.counted_alive(), cell.busy))
            .collect();
        Counts {
            total: flags.len(),
            alive: flags.iter().filter(|(alive, _)| *alive).count(),
            dead: flags.iter().filter(|(alive, _)| !alive).count(),
            idle: flags.iter().filter(|(_, busy)| !busy).count(),
            busy: flags.iter().filter(|(_, busy)| *busy).count(),
        }
    }

    /// Display order: alive-and-busy first, then alive-and-idle, then dead,
    /// newest creation time first within each class.
    fn ordered(&self) -> Vec<&RunnerCell> {
        let mut cells: Vec<&RunnerCell> = self.cells.values().collect();
        cells.sort_by(|a, b| {
            sort_class(a)
                .cmp(&sort_class(b))
                .then(b.ctime.cmp(&a.ctime))
                .then(a.name.cmp(&b.name))
        });
        cells
    }

    pub fn render(&self, frame: &mut Frame, area: Rect, theme: &Theme) {
        if !self.connected {
            frame.render_widget(
                Paragraph::new("store disconnected.").style(theme.muted_text()),
                area,
            );
            return;
        }

        let counts = self.counts();
        let mut lines = vec![
            Line::from(Span::styled(
                format!(
                    "total {} alive {} dead {} idle {} busy {}",
                    counts.total, counts.alive, counts.dead, counts.idle, counts.busy
                ),
                theme.muted_text(),
            )),
            header_line(theme),
        ];
        if let Some(err) = &self.last_error {
            lines[0] = Line::from(Span::styled(
                format!("discovery error: {err}"),
                theme.error_text(),
            ));
        }

        let ordered = self.ordered();
        let page = area.height.saturating_sub(BOARD_HEADER_ROWS) as usize;
        let now = Local::now().naive_local();
        for cell in page_slice(&ordered, self.cursor, page) {
            lines.push(cell.row(now, theme));
        }

        frame.render_widget(Paragraph::new(lines), area);
    }
}

fn sort_class(cell: &RunnerCell) -> u8 {
    match (cell.alive, cell.busy) {
        (true, true) => 0,
        (true, false) => 1,
        (false, _) => 2,
    }
}

fn header_line(theme: &Theme) -> Line<'static> {
    Line::from(Span::styled(
        format!(
            "{:<6} {:<22} {:^22} {:^6} {:>6} {:<22} {:<22}",
            "name", "model", "heartbeat", "state", "pend", "created", "updated"
        ),
        theme.muted_text(),
    ))
}

/// Visible window of `page` rows starting at `cursor`. The cursor is clamped
/// by navigation, never here, so a short trailing page near the end is legal.
fn page_slice<'a, T>(rows: &'a [T], cursor: usize, page: usize) -> &'a [T] {
    let start = cursor.min(rows.len());
    let end = (start + page).min(rows.len());
    &rows[start..end]
}

fn spawn_discovery(store: Store, tx: mpsc::Sender<Msg>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(DISCOVERY_PERIOD);
        loop {
            ticker.tick().await;
            let result = store.runner_names().await.map_err(|err| err.to_string());
            if let Err(err) = &result {
                warn!(event = "runner_discovery_error", error = %err);
            }
            if tx.send(Msg::RunnerNames(result)).await.is_err() {
                return;
            }
        }
    })
}

/// Repeating poll task for one runner. Aborted by the board when the runner
/// vanishes from discovery.
fn spawn_cell_poll(name: String, store: Store, tx: mpsc::Sender<Msg>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(REFRESH_PERIOD);
        loop {
            ticker.tick().await;
            let result = read_runner(&store, &name).await;
            if let Err(err) = &result {
                warn!(event = "runner_poll_error", runner = %name, error = %err);
            }
            let msg = Msg::RunnerPoll {
                name: name.clone(),
                result,
            };
            if tx.send(msg).await.is_err() {
                return;
            }
        }
    })
}

/// The three reads of one refresh cycle, combined into a single message so
/// the snapshot updates atomically.
async fn read_runner(store: &Store, name: &str) -> Result<RunnerReadings, String> {
    let fields = store
        .runner_fields(name)
        .await
        .map_err(|err| err.to_string())?;
    let heartbeat = match store.heartbeat(name).await {
        Ok(raw) => Some(raw),
        Err(StoreError::NotFound) => None,
        Err(err) => return Err(err.to_string()),
    };
    let pending = store
        .pending_count(name)
        .await
        .map_err(|err| err.to_string())?;
    Ok(RunnerReadings {
        fields,
        heartbeat,
        pending,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn readings(pairs: &[(&str, &str)], heartbeat: Option<&str>, pending: i64) -> RunnerReadings {
        RunnerReadings {
            fields: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            heartbeat: heartbeat.map(str::to_owned),
            pending,
        }
    }

    fn line_text(line: &Line) -> String {
        line.spans.iter().map(|span| span.content.as_ref()).collect()
    }

    fn test_channel() -> mpsc::Sender<Msg> {
        let (tx, _rx) = mpsc::channel(4);
        tx
    }

    #[test]
    fn age_buckets_follow_human_units() {
        let now = at(12, 0, 0);
        assert_eq!(human_age(at(11, 59, 55), now), "05s before");
        assert_eq!(human_age(at(11, 57, 30), now), "02:30 before");
        assert_eq!(human_age(at(9, 30, 15), now), "02:29:45 before");
        assert_eq!(
            human_age(at(12, 0, 0) - chrono::Duration::days(2), now),
            "2023-12-31 12:00:00"
        );
    }

    #[test]
    fn busy_runner_without_heartbeat_renders_badges() {
        let mut cell = RunnerCell::new("gpu1".to_string());
        cell.apply_readings(Ok(readings(
            &[
                ("model_id", "m1"),
                ("ctime", "2024-01-01T00:00:00"),
                ("utime", "2024-01-01T00:00:01"),
                ("busy", "1"),
                ("is_alive", "1"),
            ],
            None,
            3,
        )));

        assert!(cell.last_error.is_none());
        let text = line_text(&cell.row(at(0, 0, 30), &Theme::dark()));
        assert!(text.contains("m1"));
        assert!(text.contains("BUSY"));
        assert!(text.contains("ALIVE - no hb"));
        assert!(text.contains("    3"));
    }

    #[test]
    fn heartbeat_absence_is_not_an_error() {
        let mut cell = RunnerCell::new("gpu1".to_string());
        cell.apply_readings(Ok(readings(
            &[
                ("ctime", "2024-01-01T00:00:00"),
                ("utime", "2024-01-01T00:00:00"),
                ("is_alive", "1"),
            ],
            None,
            0,
        )));

        assert!(cell.last_error.is_none());
        let text = line_text(&cell.row(at(0, 0, 1), &Theme::dark()));
        assert!(text.contains("no hb"));
        assert!(!text.contains("error"));
    }

    #[test]
    fn timestamp_parse_failure_keeps_previous_values() {
        let mut cell = RunnerCell::new("gpu1".to_string());
        cell.apply_readings(Ok(readings(
            &[
                ("ctime", "2024-01-01T00:00:00"),
                ("utime", "2024-01-01T00:00:05.25"),
                ("busy", "1"),
                ("is_alive", "1"),
            ],
            None,
            2,
        )));
        let good_utime = cell.utime;

        cell.apply_readings(Ok(readings(
            &[("ctime", "2024-01-01T00:00:10"), ("utime", "not-a-time"), ("busy", "0")],
            None,
            9,
        )));

        assert!(cell.last_error.as_deref().unwrap_or("").contains("utime"));
        assert_eq!(cell.utime, good_utime);
        // Fields after the failing parse keep their previous cycle's values.
        assert!(cell.busy);
        assert_eq!(cell.pending, 2);
    }

    #[test]
    fn transient_error_clears_on_next_event() {
        let mut cell = RunnerCell::new("gpu1".to_string());
        cell.apply_readings(Err("connection reset".to_string()));
        assert!(cell.last_error.is_some());

        cell.apply_readings(Err("connection reset".to_string()));
        // Cleared at the start of the event, then re-set by this failure.
        assert_eq!(cell.last_error.as_deref(), Some("connection reset"));

        cell.apply_readings(Ok(readings(
            &[("ctime", "2024-01-01T00:00:00"), ("utime", "2024-01-01T00:00:00")],
            None,
            0,
        )));
        assert!(cell.last_error.is_none());
    }

    #[test]
    fn reconcile_creates_keeps_and_evicts() {
        let tx = test_channel();
        let mut board = RunnerBoard::new();
        board.apply(
            &Msg::RunnerNames(Ok(vec!["a".to_string(), "b".to_string()])),
            None,
            &tx,
        );
        assert_eq!(board.cells.len(), 2);

        board.apply(
            &Msg::RunnerPoll {
                name: "a".to_string(),
                result: Ok(readings(
                    &[("model_id", "m1"), ("ctime", "2024-01-01T00:00:00"), ("utime", "2024-01-01T00:00:00")],
                    None,
                    0,
                )),
            },
            None,
            &tx,
        );

        board.apply(
            &Msg::RunnerNames(Ok(vec!["a".to_string(), "c".to_string()])),
            None,
            &tx,
        );
        assert_eq!(board.cells.len(), 2);
        // "a" kept its accumulated snapshot, "b" is gone, "c" is fresh.
        assert_eq!(board.cells.get("a").unwrap().model, "m1");
        assert!(!board.cells.contains_key("b"));
        assert!(board.cells.get("c").unwrap().model.is_empty());
    }

    #[test]
    fn poll_for_unknown_runner_is_ignored() {
        let tx = test_channel();
        let mut board = RunnerBoard::new();
        board.apply(
            &Msg::RunnerPoll {
                name: "ghost".to_string(),
                result: Err("boom".to_string()),
            },
            None,
            &tx,
        );
        assert!(board.cells.is_empty());
    }

    #[tokio::test]
    async fn connection_loss_and_regain_keeps_snapshots() {
        let tx = test_channel();
        let mut board = RunnerBoard::new();
        board.apply(&Msg::RunnerNames(Ok(vec!["a".to_string()])), None, &tx);
        board.apply(
            &Msg::RunnerPoll {
                name: "a".to_string(),
                result: Ok(readings(
                    &[("model_id", "m9"), ("ctime", "2024-01-01T00:00:00"), ("utime", "2024-01-01T00:00:00")],
                    Some("2024-01-01T00:00:01"),
                    1,
                )),
            },
            None,
            &tx,
        );

        board.on_store_down();
        board.on_store_up(None, &tx);

        let cell = board.cells.get("a").unwrap();
        assert_eq!(cell.model, "m9");
        assert_eq!(cell.pending, 1);
        assert!(cell.heartbeat.is_some());
    }

    #[test]
    fn counts_recompute_from_snapshots() {
        let tx = test_channel();
        let mut board = RunnerBoard::new();
        board.apply(
            &Msg::RunnerNames(Ok(vec!["a".to_string(), "b".to_string(), "c".to_string()])),
            None,
            &tx,
        );
        let alive_busy = readings(
            &[("ctime", "2024-01-01T00:00:00"), ("utime", "2024-01-01T00:00:00"), ("busy", "1"), ("is_alive", "1")],
            Some("2024-01-01T00:00:01"),
            0,
        );
        let dead_idle = readings(
            &[("ctime", "2024-01-01T00:00:00"), ("utime", "2024-01-01T00:00:00"), ("busy", "0"), ("is_alive", "0")],
            None,
            0,
        );
        board.apply(
            &Msg::RunnerPoll { name: "a".to_string(), result: Ok(alive_busy) },
            None,
            &tx,
        );
        board.apply(
            &Msg::RunnerPoll { name: "b".to_string(), result: Ok(dead_idle) },
            None,
            &tx,
        );

        assert_eq!(
            board.counts(),
            Counts {
                total: 3,
                alive: 1,
                dead: 2,
                idle: 2,
                busy: 1,
            }
        );
    }

    #[test]
    fn display_order_ranks_liveness_then_creation_time() {
        let tx = test_channel();
        let mut board = RunnerBoard::new();
        let names: Vec<String> = ["old-busy", "new-busy", "idle", "dead"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        board.apply(&Msg::RunnerNames(Ok(names)), None, &tx);

        let mut poll = |name: &str, ctime: &str, busy: &str, alive: &str| {
            board.apply(
                &Msg::RunnerPoll {
                    name: name.to_string(),
                    result: Ok(readings(
                        &[("ctime", ctime), ("utime", ctime), ("busy", busy), ("is_alive", alive)],
                        None,
                        0,
                    )),
                },
                None,
                &tx,
            );
        };
        poll("old-busy", "2024-01-01T00:00:00", "1", "1");
        poll("new-busy", "2024-01-02T00:00:00", "1", "1");
        poll("idle", "2024-01-03T00:00:00", "0", "1");
        poll("dead", "2024-01-04T00:00:00", "0", "0");

        let order: Vec<&str> = board.ordered().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(order, vec!["new-busy", "old-busy", "idle", "dead"]);
    }

    #[test]
    fn cursor_clamps_to_entry_range() {
        let tx = test_channel();
        let mut board = RunnerBoard::new();
        board.apply(
            &Msg::RunnerNames(Ok(vec!["a".to_string(), "b".to_string(), "c".to_string()])),
            None,
            &tx,
        );

        board.on_key(KeyEvent::from(KeyCode::Up));
        assert_eq!(board.cursor, 0);
        for _ in 0..10 {
            board.on_key(KeyEvent::from(KeyCode::Down));
        }
        assert_eq!(board.cursor, 2);
    }

    #[test]
    fn page_slice_is_bounded_by_remaining_rows() {
        let rows: Vec<u32> = (0..10).collect();
        for cursor in 0..rows.len() {
            for page in 0..12 {
                let visible = page_slice(&rows, cursor, page);
                assert_eq!(visible.len(), page.min(rows.len() - cursor));
            }
        }
        assert!(page_slice(&rows, 0, 0).is_empty());
    }
}
