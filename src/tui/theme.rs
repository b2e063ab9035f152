// src/tui/theme.rs

use ratatui::style::{Color, Modifier, Style};

/// Colour set for the terminal UI. `d` flips between dark and light.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Theme {
    pub dark: bool,
}

impl Default for Theme {
    fn default() -> Self {
        Self { dark: true }
    }
}

impl Theme {
    pub fn toggle(&mut self) {
        self.dark = !self.dark;
    }

    pub fn base(&self) -> Style {
        if self.dark {
            Style::default().fg(Color::Gray).bg(Color::Black)
        } else {
            Style::default().fg(Color::Black).bg(Color::White)
        }
    }

    pub fn border(&self) -> Color {
        if self.dark {
            Color::DarkGray
        } else {
            Color::Gray
        }
    }

    pub fn focused_border(&self) -> Color {
        if self.dark {
            Color::Cyan
        } else {
            Color::Blue
        }
    }

    pub fn header(&self) -> Style {
        Style::default()
            .fg(if self.dark { Color::Yellow } else { Color::Magenta })
            .add_modifier(Modifier::BOLD)
    }

    pub fn selected(&self) -> Style {
        Style::default().add_modifier(Modifier::REVERSED)
    }

    pub fn error(&self) -> Style {
        Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)
    }

    pub fn dim(&self) -> Style {
        Style::default().add_modifier(Modifier::DIM)
    }
}
