// src/util.rs — Shared string helpers

/// Longest prefix of `s` that is at most `max_len` bytes and ends on a char
/// boundary.
pub fn truncate_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// One-line preview for history entries and logs: whitespace runs collapse
/// to a single space, and a cut preview ends in `...`.
pub fn excerpt(s: &str, max_len: usize) -> String {
    let flat = s.split_whitespace().collect::<Vec<_>>().join(" ");
    let cut = truncate_str(&flat, max_len);
    if cut.len() < flat.len() {
        format!("{}...", cut.trim_end())
    } else {
        flat
    }
}
