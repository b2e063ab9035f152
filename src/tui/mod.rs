// src/tui/mod.rs
//
// Terminal front-end (`cli` feature): command-line parsing, terminal setup
// and the event loop that drives a `Monitor`.

mod app;
mod theme;
mod view;

use std::io::{self, Stdout};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use crossterm::{
    event::{Event, EventStream},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::sync::broadcast::error::RecvError;

use crate::display_log::{DisplayTimezone, IdFormat};
use crate::io::FrameFormat;
use crate::logging::{init_file_logging, set_stderr_echo, stop_file_logging};
use crate::session::Monitor;
use crate::settings::{load_settings, save_settings, settings_path, AppSettings};
use app::App;

type Term = Terminal<CrosstermBackend<Stdout>>;

/// Redraw interval when nothing else happens.
const TICK: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "canterm")]
#[command(about = "Live CAN bus monitor and transmitter")]
struct Args {
    /// Settings file (default: <config dir>/canterm/settings.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// CAN interface, or "virtual" for the built-in demo bus
    #[arg(short, long)]
    interface: Option<String>,

    /// Reconfigure the interface with this bitrate before opening (uses pkexec)
    #[arg(short, long)]
    bitrate: Option<u32>,

    /// Send 29-bit identifiers
    #[arg(long)]
    extended: bool,

    /// Show identifiers and data in decimal
    #[arg(long)]
    decimal: bool,

    /// Show arrival times in UTC
    #[arg(long)]
    utc: bool,

    /// Write a log file into this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Save the effective settings to the settings file and exit
    #[arg(long)]
    write_config: bool,
}

impl Args {
    /// Command-line flags override file values.
    fn apply(&self, settings: &mut AppSettings) {
        if let Some(ref interface) = self.interface {
            settings.interface = interface.clone();
        }
        if self.bitrate.is_some() {
            settings.bitrate = self.bitrate;
        }
        if self.extended {
            settings.frame_format = FrameFormat::Extended;
        }
        if self.decimal {
            settings.display_frame_id_format = IdFormat::Decimal;
        }
        if self.utc {
            settings.display_timezone = DisplayTimezone::Utc;
        }
        if self.log_dir.is_some() {
            settings.log_dir = self.log_dir.clone();
        }
    }
}

/// Binary entry point.
pub fn run() {
    let args = Args::parse();
    if let Err(e) = run_with(args) {
        eprintln!("canterm: {}", e);
        std::process::exit(1);
    }
}

fn run_with(args: Args) -> Result<(), String> {
    let path = match args.config {
        Some(ref path) => path.clone(),
        None => settings_path()?,
    };
    let mut settings = load_settings(&path)?;
    args.apply(&mut settings);

    if args.write_config {
        save_settings(&path, &settings)?;
        println!("Settings written to {}", path.display());
        return Ok(());
    }

    if let Some(ref dir) = settings.log_dir {
        init_file_logging(dir)?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start runtime: {}", e))?;
    let result = runtime.block_on(run_session(&settings));

    stop_file_logging();
    result
}

async fn run_session(settings: &AppSettings) -> Result<(), String> {
    let monitor = Monitor::open(settings).map_err(|e| e.to_string())?;
    monitor.start().await;

    let mut terminal = setup_terminal().map_err(|e| format!("Failed to set up terminal: {}", e))?;
    set_stderr_echo(false);

    let result = event_loop(&mut terminal, &monitor).await;

    set_stderr_echo(true);
    let restored = restore_terminal(&mut terminal);
    monitor.shutdown().await;

    result.map_err(|e| format!("Terminal error: {}", e))?;
    restored.map_err(|e| format!("Failed to restore terminal: {}", e))
}

fn setup_terminal() -> io::Result<Term> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;

    // Restore the terminal before a panic message is printed
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original_hook(panic);
    }));

    Terminal::new(CrosstermBackend::new(stdout))
}

fn restore_terminal(terminal: &mut Term) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()
}

async fn event_loop(terminal: &mut Term, monitor: &Monitor) -> io::Result<()> {
    let mut app = App::new();
    let mut keys = EventStream::new();
    let mut session_events = monitor.subscribe();
    let mut tick = tokio::time::interval(TICK);

    while app.running {
        terminal.draw(|frame| view::render(frame, &app, monitor))?;

        tokio::select! {
            _ = tick.tick() => {}
            event = keys.next() => match event {
                Some(Ok(Event::Key(key))) => {
                    if let Some(command) = app.handle_key(key, monitor) {
                        app.apply(command, monitor).await;
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e),
                None => break,
            },
            event = session_events.recv() => match event {
                Ok(event) => app.on_session_event(event),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    Ok(())
}
