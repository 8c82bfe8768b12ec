//! Prompt context around the target line.

pub const TARGET_OPEN: &str = "<<<TARGET>>>";
pub const TARGET_CLOSE: &str = "<<<END>>>";

/// Lines `[line - radius, line + radius)` of `text`, clipped to the buffer,
/// with the target line wrapped in [`TARGET_OPEN`] / [`TARGET_CLOSE`].
#[must_use]
pub fn context_window(text: &str, line: u32, radius: u32) -> String {
    let line = line as usize;
    let radius = radius as usize;
    let start = line.saturating_sub(radius);
    let end = line.saturating_add(radius);

    text.lines()
        .enumerate()
        .skip(start)
        .take(end - start)
        .map(|(idx, content)| {
            if idx == line {
                format!("{TARGET_OPEN}{content}{TARGET_CLOSE}")
            } else {
                content.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
