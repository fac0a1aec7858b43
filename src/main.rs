mod app;
mod keys;
mod msgs;
mod queues;
mod runners;
mod store;
mod theme;
mod ui;

use anyhow::Result;
use clap::Parser;
use crossterm::{
    event::{Event, EventStream, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;
use tokio::sync::mpsc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::app::App;
use crate::msgs::Msg;
use crate::store::{Store, StoreConfig};
use crate::theme::Theme;

/// Terminal dashboard for a Redis-backed job-dispatch pipeline: runner
/// health, queue backlogs, and raw key browsing.
#[derive(Parser)]
#[command(name = "dispatchtop", version)]
struct Cli {
    /// Redis host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    /// Redis port
    #[arg(long, default_value_t = 6379)]
    port: u16,
    /// Redis password
    #[arg(long, default_value = "")]
    password: String,
    /// Redis database index
    #[arg(long, default_value_t = 0)]
    db: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = StoreConfig {
        host: cli.host,
        port: cli.port,
        password: cli.password,
        db: cli.db,
    };

    let (tx, rx) = mpsc::channel::<Msg>(256);
    let mut app = App::new(config.clone(), tx.clone());
    spawn_connect(config, tx);

    let theme = Theme::dark();
    let mut terminal = setup_terminal()?;
    let size = terminal.size()?;
    app.set_size(size.width, size.height);

    let result = run_loop(&mut terminal, &mut app, rx, &theme).await;
    restore_terminal(&mut terminal)?;
    // Dropping the app releases the store handle and the poller channel.
    drop(app);
    result
}

/// The event loop: one message or input event consumed and fully processed
/// per turn, a redraw after every turn. All store I/O happens in spawned
/// tasks that post results back through the channel.
async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    mut rx: mpsc::Receiver<Msg>,
    theme: &Theme,
) -> Result<()> {
    let mut events = EventStream::new();

    loop {
        terminal.draw(|frame| ui::render(frame, app, theme))?;

        tokio::select! {
            Some(msg) = rx.recv() => {
                app.apply(msg);
            }
            maybe_event = events.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        if app.on_key(key) {
                            return Ok(());
                        }
                    }
                    Some(Ok(Event::Resize(width, height))) => {
                        app.set_size(width, height);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(event = "terminal_event_error", error = %err);
                    }
                    None => return Ok(()),
                }
            }
        }
    }
}

/// Builds the store handle off the loop; the result arrives as a
/// connection-lifecycle message broadcast to every component.
fn spawn_connect(config: StoreConfig, tx: mpsc::Sender<Msg>) {
    tokio::spawn(async move {
        let msg = match Store::connect(&config).await {
            Ok(store) => Msg::StoreConnected(store),
            Err(err) => {
                warn!(event = "store_connect_error", error = %err);
                Msg::StoreUnreachable(err.to_string())
            }
        };
        let _ = tx.send(msg).await;
    });
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Ok(Terminal::new(backend)?)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

/// Tracing goes to a sink by default so the alternate screen stays clean;
/// set DISPATCHTOP_LOG_STDOUT=1 to see it when running outside a terminal.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_enabled = matches!(
        std::env::var("DISPATCHTOP_LOG_STDOUT").ok().as_deref(),
        Some("1") | Some("true") | Some("yes")
    );
    if stdout_enabled {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::sink)
            .try_init();
    }
}
