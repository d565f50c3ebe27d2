//! Conversation history window.

use fieldsage_core::message::ChatMessage;

/// Number of trailing messages carried into a prompt by default.
pub const HISTORY_WINDOW: usize = 3;

/// Render the last [`HISTORY_WINDOW`] messages as a prompt suffix.
pub fn render_history(history: Option<&[ChatMessage]>) -> String {
    render_history_window(history.unwrap_or_default(), HISTORY_WINDOW)
}

/// Render the last `turns` messages, oldest first, as
/// `\n\nPrevious conversation:\nUser: ..\nAI: ..`.
///
/// Returns an empty string when there is nothing to render.
pub fn render_history_window(history: &[ChatMessage], turns: usize) -> String {
    let start = history.len().saturating_sub(turns);
    let window = &history[start..];
    if window.is_empty() {
        return String::new();
    }

    let lines: Vec<String> = window
        .iter()
        .map(|m| format!("{}: {}", m.kind.label(), m.content))
        .collect();
    format!("\n\nPrevious conversation:\n{}", lines.join("\n"))
}
