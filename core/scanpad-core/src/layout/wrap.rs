//! Greedy width-bounded wrapping over glyphs.

use super::metrics::{GlyphMetrics, TextStyle};

/// Splits `text` into lines no wider than `inner_width`.
///
/// Glyphs are appended while the running width fits; the glyph that would
/// overflow starts the next line. `\n` forces a break and is not part of any
/// line. A single glyph wider than `inner_width` still gets a line of its
/// own. Empty input yields no lines.
pub fn wrap_text(
    text: &str,
    inner_width: u32,
    style: TextStyle,
    metrics: &dyn GlyphMetrics,
) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let paragraph = paragraph.strip_suffix('\r').unwrap_or(paragraph);
        let mut line = String::new();
        let mut width = 0u32;

        for glyph in paragraph.chars() {
            let advance = metrics.advance(glyph, style);
            if !line.is_empty() && width + advance > inner_width {
                lines.push(std::mem::take(&mut line));
                width = 0;
            }
            line.push(glyph);
            width += advance;
        }
        lines.push(line);
    }
    lines
}
