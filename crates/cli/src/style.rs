//! Terminal styling and report tables.

use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use console::Style;

use vendorsync_core::models::{LocalChange, LocalChangeKind, PathAction, PathOutcome};

/// Green checkmark prefix.
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Yellow warning prefix.
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

pub fn header(msg: &str) -> String {
    Style::new().bold().apply_to(msg).to_string()
}

pub fn dim(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}

fn new_table(columns: Vec<&str>) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(columns);
    table
}

/// One row per path touched by an update.
pub fn outcome_table(outcomes: &[PathOutcome]) -> Table {
    let mut table = new_table(vec!["Path", "Action", "Detail"]);
    for outcome in outcomes {
        let color = match outcome.action {
            PathAction::Conflict => Color::Red,
            PathAction::Merged | PathAction::KeptLocal => Color::Yellow,
            PathAction::Skipped { .. } => Color::DarkGrey,
            _ => Color::Green,
        };
        let detail = match &outcome.action {
            PathAction::Moved { from } | PathAction::Copied { from } => format!("from {}", from),
            PathAction::Skipped { reason } => reason.clone(),
            _ => String::new(),
        };
        table.add_row(vec![
            Cell::new(&outcome.path),
            Cell::new(outcome.action.label()).fg(color),
            Cell::new(detail),
        ]);
    }
    table
}

/// One row per locally changed vendored file.
pub fn local_change_table(changes: &[LocalChange]) -> Table {
    let mut table = new_table(vec!["Path", "Change"]);
    for change in changes {
        let color = match change.kind {
            LocalChangeKind::Modified => Color::Yellow,
            LocalChangeKind::Missing => Color::Red,
            LocalChangeKind::AddedLocally => Color::Cyan,
        };
        table.add_row(vec![
            Cell::new(&change.path),
            Cell::new(change.kind.to_string()).fg(color),
        ]);
    }
    table
}
