//! Access log display.

use crossterm::style::{Color, Stylize, style};

use crate::mock::session::LogEvent;

/// Receives access-log entries from the supervisor.
pub trait LogSink: Send {
    /// Show one entry.
    fn entry(&mut self, event: &LogEvent);
}

/// Prints entries to stdout, colored by status.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn entry(&mut self, event: &LogEvent) {
        let entry = &event.entry;
        println!(
            "{} {} {} {}",
            style(&entry.timestamp).with(Color::DarkGrey),
            style(&entry.method).with(Color::Blue),
            style(&entry.status_code).with(status_color(entry.status())),
            style(&entry.path).with(Color::White),
        );
    }
}

/// Color for a status code: green below 400, yellow for 4xx, red otherwise.
pub fn status_color(status: Option<u16>) -> Color {
    match status {
        Some(code) if code < 400 => Color::Green,
        Some(code) if code < 500 => Color::Yellow,
        _ => Color::Red,
    }
}
