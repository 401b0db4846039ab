//! Glyph measurement.
//!
//! The layout engine never talks to a font directly; it asks a
//! [`GlyphMetrics`] how wide each glyph is and how tall a line is. The
//! bundled [`MonospaceMetrics`] uses fixed cells (East Asian wide glyphs take
//! two), which is what the bitmap fonts on small panels look like anyway.

use std::borrow::Cow;
use std::path::Path;
use std::sync::Once;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextStyle {
    /// Labels and secondary text (14 px).
    Info,
    /// Primary identifiers (18 px).
    Main,
    /// Full-screen messages (24 px).
    Banner,
}

pub trait GlyphMetrics: Send + Sync {
    /// Horizontal advance of one glyph in pixels.
    fn advance(&self, glyph: char, style: TextStyle) -> u32;

    fn line_height(&self, style: TextStyle) -> u32;

    /// Rewrites text into something this font can draw.
    fn prepare<'a>(&self, text: &'a str) -> Cow<'a, str> {
        Cow::Borrowed(text)
    }

    fn text_width(&self, text: &str, style: TextStyle) -> u32 {
        text.chars().map(|c| self.advance(c, style)).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonospaceMetrics {
    unicode: bool,
}

impl MonospaceMetrics {
    /// Metrics for a font that covers CJK and other non-ASCII text.
    pub fn unicode() -> Self {
        Self { unicode: true }
    }

    /// Metrics for the built-in fallback font: anything outside printable
    /// ASCII is replaced before layout.
    pub fn ascii_only() -> Self {
        Self { unicode: false }
    }

    pub fn is_unicode(&self) -> bool {
        self.unicode
    }

    fn cell(style: TextStyle) -> (u32, u32) {
        // (half-width advance, line height)
        match style {
            TextStyle::Info => (7, 14),
            TextStyle::Main => (9, 18),
            TextStyle::Banner => (12, 24),
        }
    }
}

impl GlyphMetrics for MonospaceMetrics {
    fn advance(&self, glyph: char, style: TextStyle) -> u32 {
        let (half, _) = Self::cell(style);
        if glyph.is_control() {
            0
        } else if is_wide(glyph) {
            half * 2
        } else {
            half
        }
    }

    fn line_height(&self, style: TextStyle) -> u32 {
        Self::cell(style).1
    }

    fn prepare<'a>(&self, text: &'a str) -> Cow<'a, str> {
        if self.unicode {
            Cow::Borrowed(text)
        } else {
            sanitize_ascii(text)
        }
    }
}

static FONT_FALLBACK_WARNING: Once = Once::new();

/// Picks metrics for the configured font. A missing or unreadable font file
/// falls back to ASCII-only rendering; the fallback is logged once per
/// process.
pub fn metrics_for_font(font_source: Option<&Path>) -> MonospaceMetrics {
    match font_source {
        Some(path) if path.is_file() => {
            tracing::debug!(font = %path.display(), "Using unicode glyph metrics");
            MonospaceMetrics::unicode()
        }
        other => {
            FONT_FALLBACK_WARNING.call_once(|| {
                let font = other
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "<none>".to_string());
                tracing::warn!(font = %font, "Font unavailable; rendering ASCII only");
            });
            MonospaceMetrics::ascii_only()
        }
    }
}

/// Replaces every glyph outside printable ASCII (newlines excepted) with `?`.
pub fn sanitize_ascii(text: &str) -> Cow<'_, str> {
    let keep = |c: char| c == '\n' || (' '..='~').contains(&c);
    if text.chars().all(keep) {
        return Cow::Borrowed(text);
    }
    Cow::Owned(
        text.chars()
            .map(|c| if keep(c) { c } else { '?' })
            .collect(),
    )
}

fn is_wide(glyph: char) -> bool {
    matches!(
        glyph as u32,
        0x1100..=0x115F
            | 0x2E80..=0x303E
            | 0x3041..=0x33FF
            | 0x3400..=0x4DBF
            | 0x4E00..=0x9FFF
            | 0xA000..=0xA4CF
            | 0xAC00..=0xD7A3
            | 0xF900..=0xFAFF
            | 0xFE30..=0xFE4F
            | 0xFF00..=0xFF60
            | 0xFFE0..=0xFFE6
            | 0x1F300..=0x1F64F
            | 0x20000..=0x3FFFD
    )
}
