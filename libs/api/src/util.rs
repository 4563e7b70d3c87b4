/// Current Unix time in milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Longest payload prefix included in log lines.
pub const PREVIEW_LIMIT: usize = 256;

/// Lossy, truncated rendering of a payload for log output.
///
/// Cuts on a char boundary and appends `…` when something was dropped.
pub fn preview(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= PREVIEW_LIMIT {
        return text.into_owned();
    }
    let mut end = PREVIEW_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}
