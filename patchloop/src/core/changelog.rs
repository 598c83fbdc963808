//! Rendering of `CHANGE_LOG.md`.

use crate::core::types::ChangeLog;

/// Render the change log as markdown with fixed section order.
///
/// An empty log renders as a single line instead of three empty sections.
pub fn render_change_log(goal: &str, commit_message: &str, log: &ChangeLog) -> String {
    let mut buf = String::new();
    buf.push_str("# Change Log\n\n");
    buf.push_str(&format!("Goal: {}\n\n", goal.trim()));
    buf.push_str(&format!("Commit: {}\n", commit_message.trim()));
    if log.is_empty() {
        buf.push_str("\nNo changes recorded.\n");
        return buf;
    }
    for (title, items) in [
        ("Breaking Changes", &log.breaking_changes),
        ("New Features", &log.new_features),
        ("Bug Fixes", &log.bug_fixes),
    ] {
        buf.push_str(&format!("\n## {title}\n\n"));
        if items.is_empty() {
            buf.push_str("None.\n");
            continue;
        }
        for item in items {
            buf.push_str(&format!("- {}\n", item.trim()));
        }
    }
    buf
}
