//! Truncation for log previews
//!
//! Keeps a prefix and suffix of long values (chat templates, sample records)
//! and cuts on UTF-8 boundaries.

pub const DEFAULT_PREVIEW_BYTES: usize = 240;

pub fn preview(content: &str, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content.to_string();
    }
    if max_bytes == 0 {
        return format!("[{} bytes]", content.len());
    }

    let half = max_bytes / 2;
    let prefix_end = floor_boundary(content, half);
    let suffix_start = ceil_boundary(content, content.len() - half).max(prefix_end);

    format!(
        "{} ... [{} bytes] ... {}",
        &content[..prefix_end],
        suffix_start - prefix_end,
        &content[suffix_start..]
    )
}

/// Preview of a JSON value, rendered compactly.
pub fn preview_json(value: &impl serde::Serialize) -> String {
    let rendered = serde_json::to_string(value).unwrap_or_default();
    preview(&rendered, DEFAULT_PREVIEW_BYTES)
}

fn floor_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}
