// src/core/history.rs — Bounded view of the loop history for prompts

const COMPRESSED_HEADER: &str = "# Compressed history";
const OMITTED_MARKER: &str = "...(earlier rounds omitted)...";

/// Entries up to `window` are joined verbatim. Longer histories keep the
/// last `window` entries behind a header and an omission marker.
pub fn compress_history(history: &[String], window: usize) -> String {
    if history.len() <= window {
        return history.join("\n\n");
    }

    let mut parts = Vec::with_capacity(window + 2);
    parts.push(COMPRESSED_HEADER);
    parts.push(OMITTED_MARKER);
    parts.extend(history[history.len() - window..].iter().map(String::as_str));
    parts.join("\n\n")
}
