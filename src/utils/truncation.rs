/// Marker appended to tool results that were cut at the wire-level cap.
pub const TRUNCATION_MARKER: &str = "\n... [truncated]";

/// Return the prefix of `text` holding at most `max_chars` characters.
/// Never splits a multi-byte character.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Cap `text` at `max_chars` characters, appending `TRUNCATION_MARKER` when
/// anything was removed.
pub fn truncate_with_marker(text: &str, max_chars: usize) -> String {
    let head = truncate_chars(text, max_chars);
    if head.len() == text.len() {
        text.to_string()
    } else {
        format!("{}{}", head, TRUNCATION_MARKER)
    }
}

/// Optional summary helper: empty input stays `None`.
pub fn summarize(text: Option<&str>, max_chars: usize) -> Option<String> {
    match text {
        Some(t) if !t.is_empty() => Some(truncate_chars(t, max_chars).to_string()),
        _ => None,
    }
}
