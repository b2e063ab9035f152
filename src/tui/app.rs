// src/tui/app.rs
//
// Front-end state and key handling.

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use crate::filter::FilterChange;
use crate::run_control::RunState;
use crate::session::{Monitor, SessionEvent};
use crate::tui::theme::Theme;

/// Which widget receives key presses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Focus {
    Screen,
    FilterInput,
    FilterList,
    TransmitId,
    TransmitData,
}

impl Focus {
    const ORDER: [Focus; 5] = [
        Focus::Screen,
        Focus::FilterInput,
        Focus::FilterList,
        Focus::TransmitId,
        Focus::TransmitData,
    ];

    fn index(self) -> usize {
        Self::ORDER.iter().position(|f| *f == self).unwrap_or(0)
    }

    pub fn next(self) -> Self {
        Self::ORDER[(self.index() + 1) % Self::ORDER.len()]
    }

    pub fn prev(self) -> Self {
        Self::ORDER[(self.index() + Self::ORDER.len() - 1) % Self::ORDER.len()]
    }
}

/// Actions that must be awaited by the event loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Pause,
    Resume,
}

/// Front-end state. Everything about the bus lives in the `Monitor`.
pub struct App {
    pub running: bool,
    pub focus: Focus,
    pub theme: Theme,
    pub filter_input: String,
    pub tx_id: String,
    pub tx_data: String,
    /// Cursor in the filter entry list
    pub selected_filter: usize,
    /// Last diagnostic, shown in the status line
    pub status: Option<String>,
    /// Whether `status` is an error
    pub status_is_error: bool,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        Self {
            running: true,
            focus: Focus::Screen,
            theme: Theme::default(),
            filter_input: String::new(),
            tx_id: String::new(),
            tx_data: String::new(),
            selected_filter: 0,
            status: None,
            status_is_error: false,
        }
    }

    pub fn quit(&mut self) {
        self.running = false;
    }

    fn info(&mut self, message: impl Into<String>) {
        self.status = Some(message.into());
        self.status_is_error = false;
    }

    fn error(&mut self, message: impl Into<String>) {
        self.status = Some(message.into());
        self.status_is_error = true;
    }

    /// Handle one key press. Returns a command when the key needs an async
    /// monitor operation.
    pub fn handle_key(&mut self, key: KeyEvent, monitor: &Monitor) -> Option<Command> {
        if key.kind != KeyEventKind::Press {
            return None;
        }
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.quit();
            return None;
        }

        match key.code {
            KeyCode::Tab => {
                self.focus = self.focus.next();
                return None;
            }
            KeyCode::BackTab => {
                self.focus = self.focus.prev();
                return None;
            }
            KeyCode::Esc => {
                self.focus = Focus::Screen;
                return None;
            }
            _ => {}
        }

        match self.focus {
            Focus::Screen => match key.code {
                KeyCode::Char('p') => return Some(Command::Pause),
                KeyCode::Char('r') => return Some(Command::Resume),
                KeyCode::Char('d') => self.theme.toggle(),
                KeyCode::Char('c') => self.clear_filters(monitor),
                KeyCode::Char('q') => self.quit(),
                _ => {}
            },
            Focus::FilterInput => {
                if key.code == KeyCode::Enter {
                    self.add_filter(monitor);
                } else {
                    edit(&mut self.filter_input, key.code);
                }
            }
            Focus::FilterList => self.handle_filter_list(key.code, monitor),
            Focus::TransmitId => {
                if key.code == KeyCode::Enter {
                    self.transmit(monitor);
                } else {
                    edit(&mut self.tx_id, key.code);
                }
            }
            Focus::TransmitData => {
                if key.code == KeyCode::Enter {
                    self.transmit(monitor);
                } else {
                    edit(&mut self.tx_data, key.code);
                }
            }
        }
        None
    }

    /// Run an async command against the monitor.
    pub async fn apply(&mut self, command: Command, monitor: &Monitor) {
        match command {
            Command::Pause => {
                if monitor.pause().await {
                    self.info("Receive paused");
                }
            }
            Command::Resume => match monitor.resume().await {
                Ok(true) => self.info("Receive resumed"),
                Ok(false) => {}
                Err(e) => self.error(format!("Resume failed: {}", e)),
            },
        }
    }

    pub fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::IngestionFailed(e) => {
                self.error(format!("Receive stopped: {} (r to reconnect)", e))
            }
            SessionEvent::Transmitted(result) => match result.error {
                Some(e) => self.error(format!("Message Failed to Send: {}", e)),
                None => self.info(format!(
                    "Sent 0x{:X} [{}]",
                    result.frame.identifier(),
                    result.frame.len()
                )),
            },
            SessionEvent::RunStateChanged(RunState::Paused) => {}
            SessionEvent::RunStateChanged(RunState::Running) => {}
        }
    }

    fn add_filter(&mut self, monitor: &Monitor) {
        match monitor.add_filter(&self.filter_input) {
            Ok(FilterChange::Changed) => {
                self.info(format!("Filter {} added", self.filter_input.trim()));
                self.filter_input.clear();
            }
            Ok(FilterChange::NoOp) => {}
            Err(e) => self.error(e.to_string()),
        }
    }

    fn clear_filters(&mut self, monitor: &Monitor) {
        if monitor.clear_filters() == FilterChange::Changed {
            self.info("Filters cleared");
        }
        self.selected_filter = 0;
    }

    fn handle_filter_list(&mut self, code: KeyCode, monitor: &Monitor) {
        let entries = monitor.filter().entries();
        match code {
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected_filter = self.selected_filter.saturating_sub(1);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if self.selected_filter + 1 < entries.len() {
                    self.selected_filter += 1;
                }
            }
            KeyCode::Char(' ') | KeyCode::Enter => {
                if let Some(entry) = entries.get(self.selected_filter) {
                    monitor.set_filter_enabled(entry.id, !entry.enabled);
                }
            }
            KeyCode::Char('c') => self.clear_filters(monitor),
            _ => {}
        }
    }

    fn transmit(&mut self, monitor: &Monitor) {
        match monitor.transmit(&self.tx_id, &self.tx_data) {
            // Outcome of the send arrives as a session event
            Ok(result) if result.is_success() => self.tx_data.clear(),
            Ok(_) => {}
            Err(e) => self.error(e.to_string()),
        }
    }
}

/// Apply an editing key to a text field.
fn edit(buffer: &mut String, code: KeyCode) {
    match code {
        KeyCode::Char(c) => buffer.push(c),
        KeyCode::Backspace => {
            buffer.pop();
        }
        _ => {}
    }
}
