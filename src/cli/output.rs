//! Output formatting utilities for the CLI.

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use serde::Serialize;
use std::env;

use crate::domain::models::JobStatus;

pub trait CommandOutput: Serialize {
    fn to_human(&self) -> String;

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub fn output<T: CommandOutput>(result: &T, json_mode: bool) {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(&result.to_json()).unwrap_or_default());
    } else {
        println!("{}", result.to_human());
    }
}

/// Truncate a string to a maximum length, appending "..." if truncated.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// Bordered table with bold headers that wraps to the terminal width.
pub fn table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold)),
        );
    table
}

pub fn job_status_cell(status: JobStatus) -> Cell {
    let cell = Cell::new(status.as_str());
    if !supports_color() {
        return cell;
    }
    cell.fg(match status {
        JobStatus::Succeeded => Color::Green,
        JobStatus::Running => Color::Cyan,
        JobStatus::Queued => Color::Yellow,
        JobStatus::Failed | JobStatus::TimedOut => Color::Red,
    })
}

/// Check if color output is supported
pub fn supports_color() -> bool {
    if env::var("NO_COLOR").is_ok() {
        return false;
    }
    !matches!(env::var("TERM").as_deref(), Ok("dumb"))
}
