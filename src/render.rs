//! Terminal rendering of conversation state.
//!
//! Pure functions over current state: the chat loop re-renders after every
//! mutation (login, submit, logout) instead of mutating a display
//! incrementally. Audit turns show their retrieved-context annotation.

use chrono::DateTime;

use crate::models::Message;

/// Render one turn as display lines.
pub fn render_turn(msg: &Message) -> String {
    let mut out = format!("[{}] {}\n", msg.role.as_str(), msg.text);
    if let Some(context) = &msg.context {
        if !context.is_empty() {
            out.push_str(&format!("    retrieved: {}\n", context.join(" | ")));
        }
    }
    out
}

/// Render a slice of turns in order.
pub fn render_turns(turns: &[Message]) -> String {
    turns.iter().map(render_turn).collect()
}

/// One persisted log line with timestamp, for the history view.
pub fn render_history_line(msg: &Message) -> String {
    let when = DateTime::from_timestamp_millis(msg.timestamp)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
    format!("{} [{}] {}\n", when, msg.role.as_str(), msg.text)
}

/// Render the full persisted log, oldest first.
pub fn render_history(messages: &[Message]) -> String {
    messages.iter().map(render_history_line).collect()
}
