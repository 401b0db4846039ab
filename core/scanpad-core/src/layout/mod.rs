//! Layout Engine: fits header text, wrapped metadata and a code image into
//! a fixed canvas.
//!
//! # Algorithm
//!
//! ```text
//! ┌──────────────────────┐  y = margin
//! │ header lines         │  fixed height, top-down
//! │ name (wrapped)       │  stops at text_height_fraction * height,
//! │ description (wrapped)│  last line ends in the truncation marker
//! │                      │
//! │      ┌────────┐      │  edge = min(width - 2m, height - y - 2m)
//! │      │  code  │      │  bottom-centred
//! │      └────────┘      │  height - edge - margin
//! └──────────────────────┘
//! ```
//!
//! When the edge would fall below `floor_size`, the text is laid out again
//! with the compressed header, then without the wrapped body, before the
//! edge is finally clamped to `floor_size`. The code region only ever gets
//! the space left after text, so the two cannot overlap unless the canvas
//! itself is smaller than the floor (reported as `undersized`).

pub mod metrics;
pub mod wrap;

use std::sync::Arc;

use serde::Serialize;

use crate::code::CodeBitmap;

pub use metrics::{metrics_for_font, sanitize_ascii, GlyphMetrics, MonospaceMetrics, TextStyle};
pub use wrap::wrap_text;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DrawOp {
    Text {
        x: u32,
        y: u32,
        text: String,
        style: TextStyle,
    },
    Code {
        x: u32,
        y: u32,
        #[serde(rename = "edge", serialize_with = "serialize_edge")]
        bitmap: CodeBitmap,
    },
}

fn serialize_edge<S: serde::Serializer>(
    bitmap: &CodeBitmap,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_u32(bitmap.edge())
}

/// Everything a driver needs to put one screen on the panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
    pub canvas: Canvas,
    pub ops: Vec<DrawOp>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderLine {
    pub text: String,
    pub style: TextStyle,
    /// Extra pixels below this line.
    pub gap_after: u32,
}

impl HeaderLine {
    pub fn new(text: impl Into<String>, style: TextStyle, gap_after: u32) -> Self {
        Self {
            text: text.into(),
            style,
            gap_after,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LayoutFields {
    pub header: Vec<HeaderLine>,
    /// Shorter header used when the full one leaves too little room.
    pub compressed_header: Vec<HeaderLine>,
    pub name: String,
    pub description: String,
}

impl LayoutFields {
    /// The device screen: node id, timestamp and the tail of the session id,
    /// followed by the metadata name and description.
    pub fn device(
        node_id: &str,
        timestamp: &str,
        session_id: &str,
        name: &str,
        description: &str,
    ) -> Self {
        let tail_start = session_id
            .char_indices()
            .rev()
            .nth(7)
            .map(|(index, _)| index)
            .unwrap_or(0);
        let short_id = &session_id[tail_start..];

        Self {
            header: vec![
                HeaderLine::new("Node ID:", TextStyle::Info, 2),
                HeaderLine::new(node_id, TextStyle::Main, 6),
                HeaderLine::new("Timestamp:", TextStyle::Info, 2),
                HeaderLine::new(timestamp, TextStyle::Info, 2),
                HeaderLine::new(format!("(QR ID: {})", short_id), TextStyle::Info, 4),
            ],
            compressed_header: vec![
                HeaderLine::new(node_id, TextStyle::Main, 4),
                HeaderLine::new(timestamp, TextStyle::Info, 4),
            ],
            name: name.to_string(),
            description: description.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutConstraints {
    pub margin: u32,
    /// Left edge of all text.
    pub text_inset: u32,
    /// Share of the canvas height the text block may occupy.
    pub text_height_fraction: f32,
    pub floor_size: u32,
    /// Gap between wrapped body lines.
    pub line_gap: u32,
    pub truncation_marker: String,
}

impl Default for LayoutConstraints {
    fn default() -> Self {
        Self {
            margin: 4,
            text_inset: 10,
            text_height_fraction: 0.55,
            floor_size: 40,
            line_gap: 2,
            truncation_marker: "...".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub frame: Frame,
    pub code_edge: u32,
    /// First y below the text block.
    pub text_bottom: u32,
    pub compressed: bool,
    pub truncated: bool,
    pub body_dropped: bool,
    pub undersized: bool,
}

struct TextBlock {
    ops: Vec<DrawOp>,
    bottom: u32,
    truncated: bool,
}

#[derive(Clone)]
pub struct LayoutEngine {
    constraints: LayoutConstraints,
    metrics: Arc<dyn GlyphMetrics>,
}

impl LayoutEngine {
    pub fn new(constraints: LayoutConstraints, metrics: Arc<dyn GlyphMetrics>) -> Self {
        Self {
            constraints,
            metrics,
        }
    }

    pub fn constraints(&self) -> &LayoutConstraints {
        &self.constraints
    }

    pub fn metrics(&self) -> &dyn GlyphMetrics {
        self.metrics.as_ref()
    }

    /// Width available to wrapped text.
    pub fn inner_width(&self, canvas: Canvas) -> u32 {
        canvas
            .width
            .saturating_sub(self.constraints.text_inset + self.constraints.margin)
    }

    pub fn layout(&self, canvas: Canvas, fields: &LayoutFields, code: &CodeBitmap) -> Layout {
        let floor = i64::from(self.constraints.floor_size);
        let has_body = !fields.name.is_empty() || !fields.description.is_empty();

        let mut compressed = false;
        let mut body_dropped = false;
        let mut text = self.place_text(canvas, &fields.header, fields, true);
        let mut fit = self.code_fit(canvas, text.bottom);

        if fit < floor {
            tracing::debug!(fit, "Code below floor size; compressing header");
            text = self.place_text(canvas, &fields.compressed_header, fields, true);
            fit = self.code_fit(canvas, text.bottom);
            compressed = true;
        }
        if fit < floor && has_body {
            tracing::debug!(fit, "Code below floor size; dropping wrapped text");
            text = self.place_text(canvas, &fields.compressed_header, fields, false);
            fit = self.code_fit(canvas, text.bottom);
            body_dropped = true;
        }

        let undersized = fit < floor;
        if undersized {
            tracing::warn!(
                width = canvas.width,
                height = canvas.height,
                floor = self.constraints.floor_size,
                "Canvas too small for a readable code"
            );
        }

        let edge = fit.max(floor) as u32;
        let x = canvas.width.saturating_sub(edge) / 2;
        let y = canvas
            .height
            .saturating_sub(edge)
            .saturating_sub(self.constraints.margin);

        let mut ops = text.ops;
        ops.push(DrawOp::Code {
            x,
            y,
            bitmap: code.scaled(edge),
        });

        Layout {
            frame: Frame { canvas, ops },
            code_edge: edge,
            text_bottom: text.bottom,
            compressed,
            truncated: text.truncated,
            body_dropped,
            undersized,
        }
    }

    /// A message centred on an otherwise blank canvas, wrapped if needed.
    pub fn message(&self, canvas: Canvas, text: &str, style: TextStyle) -> Frame {
        let metrics = self.metrics.as_ref();
        let prepared = metrics.prepare(text);
        let inner = canvas
            .width
            .saturating_sub(2 * self.constraints.margin);
        let lines = wrap_text(&prepared, inner, style, metrics);

        let line_height = metrics.line_height(style);
        let count = lines.len() as u32;
        let total = count * line_height + count.saturating_sub(1) * self.constraints.line_gap;
        let mut y = canvas.height.saturating_sub(total) / 2;

        let mut ops = Vec::with_capacity(lines.len());
        for line in lines {
            let width = metrics.text_width(&line, style);
            ops.push(DrawOp::Text {
                x: canvas.width.saturating_sub(width) / 2,
                y,
                text: line,
                style,
            });
            y += line_height + self.constraints.line_gap;
        }
        Frame { canvas, ops }
    }

    /// `min(width - 2m, height - y - 2m)`, negative when there is no room.
    fn code_fit(&self, canvas: Canvas, text_bottom: u32) -> i64 {
        let margin = i64::from(self.constraints.margin);
        let max_w = i64::from(canvas.width) - 2 * margin;
        let max_h = i64::from(canvas.height) - i64::from(text_bottom) - 2 * margin;
        max_w.min(max_h)
    }

    fn place_text(
        &self,
        canvas: Canvas,
        header: &[HeaderLine],
        fields: &LayoutFields,
        include_body: bool,
    ) -> TextBlock {
        let metrics = self.metrics.as_ref();
        let x = self.constraints.text_inset;
        let mut y = self.constraints.margin;
        let mut ops = Vec::new();

        for line in header {
            ops.push(DrawOp::Text {
                x,
                y,
                text: metrics.prepare(&line.text).into_owned(),
                style: line.style,
            });
            y += metrics.line_height(line.style) + line.gap_after;
        }

        let mut truncated = false;
        if include_body {
            let limit = (canvas.height as f32 * self.constraints.text_height_fraction) as u32;
            let inner = self.inner_width(canvas);
            let mut last_body: Option<usize> = None;

            let body = [
                (fields.name.as_str(), TextStyle::Main),
                (fields.description.as_str(), TextStyle::Info),
            ];
            'fields: for (text, style) in body {
                let prepared = metrics.prepare(text);
                let line_height = metrics.line_height(style);
                for line in wrap_text(&prepared, inner, style, metrics) {
                    if y + line_height > limit {
                        truncated = true;
                        // With no body line placed, the marker goes on the
                        // last header line.
                        match last_body.or_else(|| ops.len().checked_sub(1)) {
                            Some(index) => self.mark_truncated(&mut ops[index], inner),
                            None => {
                                let marker = self.fitted_marker(style, inner);
                                if !marker.is_empty() {
                                    ops.push(DrawOp::Text {
                                        x,
                                        y,
                                        text: marker,
                                        style,
                                    });
                                    y += line_height;
                                }
                            }
                        }
                        break 'fields;
                    }
                    ops.push(DrawOp::Text {
                        x,
                        y,
                        text: line,
                        style,
                    });
                    last_body = Some(ops.len() - 1);
                    y += line_height + self.constraints.line_gap;
                }
            }
        }

        TextBlock {
            ops,
            bottom: y,
            truncated,
        }
    }

    /// Trims the line's tail until the marker fits, then appends it.
    fn mark_truncated(&self, op: &mut DrawOp, inner_width: u32) {
        let DrawOp::Text { text, style, .. } = op else {
            return;
        };
        let metrics = self.metrics.as_ref();
        let marker = self.fitted_marker(*style, inner_width);
        let marker_width = metrics.text_width(&marker, *style);
        while !text.is_empty() && metrics.text_width(text, *style) + marker_width > inner_width {
            text.pop();
        }
        text.push_str(&marker);
    }

    /// The truncation marker, cut down to `inner_width` on narrow canvases.
    fn fitted_marker(&self, style: TextStyle, inner_width: u32) -> String {
        let metrics = self.metrics.as_ref();
        let mut marker = metrics
            .prepare(&self.constraints.truncation_marker)
            .into_owned();
        while !marker.is_empty() && metrics.text_width(&marker, style) > inner_width {
            marker.pop();
        }
        marker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> LayoutEngine {
        LayoutEngine::new(
            LayoutConstraints::default(),
            Arc::new(MonospaceMetrics::unicode()),
        )
    }

    fn code() -> CodeBitmap {
        CodeBitmap::new(2, vec![true, false, false, true]).expect("bitmap")
    }

    /// 4 (margin) + 18 + 6 + 14 + 2 + 14 + 2 = 60
    fn sixty_px_header() -> Vec<HeaderLine> {
        vec![
            HeaderLine::new("node-s-8213", TextStyle::Main, 6),
            HeaderLine::new("Timestamp:", TextStyle::Info, 2),
            HeaderLine::new("2026-10-19 12:00:00", TextStyle::Info, 2),
        ]
    }

    fn text_ops(frame: &Frame) -> Vec<(u32, String, TextStyle)> {
        frame
            .ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Text { y, text, style, .. } => Some((*y, text.clone(), *style)),
                DrawOp::Code { .. } => None,
            })
            .collect()
    }

    fn code_op(frame: &Frame) -> (u32, u32, u32) {
        frame
            .ops
            .iter()
            .find_map(|op| match op {
                DrawOp::Code { x, y, bitmap } => Some((*x, *y, bitmap.edge())),
                DrawOp::Text { .. } => None,
            })
            .expect("code op")
    }

    #[test]
    fn code_edge_for_landscape_panel() {
        let engine = engine();
        let margin = engine.constraints().margin;
        let fields = LayoutFields {
            header: sixty_px_header(),
            compressed_header: vec![],
            ..Default::default()
        };

        let layout = engine.layout(Canvas::new(250, 122), &fields, &code());

        assert_eq!(layout.text_bottom, 60);
        assert_eq!(layout.code_edge, (250 - 2 * margin).min(122 - 60 - 2 * margin));
        assert_eq!(layout.code_edge, 54);
        assert!(!layout.compressed);
        let (x, y, edge) = code_op(&layout.frame);
        assert_eq!(edge, 54);
        assert_eq!(x, (250 - 54) / 2);
        assert_eq!(y, 122 - 54 - margin);
    }

    #[test]
    fn small_canvas_takes_compressed_header() {
        let engine = engine();
        let fields = LayoutFields::device("node-s-8213", "2026-10-19 12:00:00", "01J9ZQ4W7D3M", "", "");

        let layout = engine.layout(Canvas::new(122, 100), &fields, &code());

        assert!(layout.compressed);
        assert!(!layout.undersized);
        assert!(layout.code_edge >= engine.constraints().floor_size);
        assert_eq!(text_ops(&layout.frame).len(), 2);
        let (_, y, edge) = code_op(&layout.frame);
        assert!(y >= layout.text_bottom);
        assert!(y + edge <= 100);
    }

    #[test]
    fn hopeless_canvas_clamps_to_floor() {
        let engine = engine();
        let fields = LayoutFields::device("n", "t", "id", "name", "desc");

        let layout = engine.layout(Canvas::new(60, 50), &fields, &code());

        assert!(layout.compressed);
        assert!(layout.body_dropped);
        assert!(layout.undersized);
        assert_eq!(layout.code_edge, engine.constraints().floor_size);
    }

    #[test]
    fn empty_fields_give_header_and_full_code() {
        let engine = engine();
        let fields = LayoutFields::device("node", "ts", "abcdefghijkl", "", "");

        let layout = engine.layout(Canvas::new(122, 250), &fields, &code());

        let texts = text_ops(&layout.frame);
        assert_eq!(texts.len(), 5);
        assert_eq!(texts[4].1, "(QR ID: efghijkl)");
        assert!(!layout.truncated);
        // 4 + 16 + 24 + 16 + 16 + 18 = 94; min(114, 250 - 94 - 8)
        assert_eq!(layout.text_bottom, 94);
        assert_eq!(layout.code_edge, 114);
    }

    #[test]
    fn long_description_is_truncated_before_code_region() {
        let engine = engine();
        let canvas = Canvas::new(122, 250);
        let description = "The quick brown fox jumps over the lazy dog. ".repeat(10);
        let fields = LayoutFields::device("node", "ts", "id", "Name", &description);

        let layout = engine.layout(canvas, &fields, &code());

        assert!(layout.truncated);
        let limit = (250.0 * engine.constraints().text_height_fraction) as u32;
        assert!(layout.text_bottom <= limit + engine.constraints().line_gap);
        let (_, code_y, _) = code_op(&layout.frame);
        for (y, _, style) in text_ops(&layout.frame) {
            assert!(y + engine.metrics().line_height(style) <= code_y);
        }

        let inner = engine.inner_width(canvas);
        let body: Vec<String> = text_ops(&layout.frame)
            .into_iter()
            .skip(5)
            .map(|(_, text, style)| {
                assert!(engine.metrics().text_width(&text, style) <= inner);
                text
            })
            .collect();
        let joined = body.concat();
        let marker = &engine.constraints().truncation_marker;
        assert!(joined.ends_with(marker.as_str()));
        let kept = &joined[..joined.len() - marker.len()];
        let original = format!("Name{}", description);
        assert!(original.starts_with(kept));
    }

    #[test]
    fn full_header_still_marks_truncation() {
        let engine = engine();
        let canvas = Canvas::new(300, 200);
        let fields = LayoutFields::device("node", "ts", "abcdefghijkl", "Name", "Some description");

        let layout = engine.layout(canvas, &fields, &code());

        // Header ends at 94; the 18 px name line would cross 110.
        assert!(layout.truncated);
        assert!(!layout.body_dropped);
        let texts = text_ops(&layout.frame);
        assert_eq!(texts.len(), 5);
        assert_eq!(texts[4].1, "(QR ID: efghijkl)...");
        let inner = engine.inner_width(canvas);
        for (_, text, style) in &texts {
            assert!(engine.metrics().text_width(text, *style) <= inner);
        }
    }

    #[test]
    fn marker_is_clamped_to_narrow_width() {
        let engine = LayoutEngine::new(
            LayoutConstraints {
                floor_size: 10,
                ..LayoutConstraints::default()
            },
            Arc::new(MonospaceMetrics::unicode()),
        );
        // Inner width 20: two 9 px glyphs fit, the 27 px marker does not.
        let canvas = Canvas::new(34, 60);
        let fields = LayoutFields {
            name: "abcdefgh".to_string(),
            ..Default::default()
        };

        let layout = engine.layout(canvas, &fields, &code());

        assert!(layout.truncated);
        let texts = text_ops(&layout.frame);
        assert_eq!(texts, vec![(4, "..".to_string(), TextStyle::Main)]);
        let inner = engine.inner_width(canvas);
        assert_eq!(inner, 20);
        for (_, text, style) in &texts {
            assert!(engine.metrics().text_width(text, *style) <= inner);
        }
    }

    #[test]
    fn body_lines_respect_inner_width() {
        let engine = engine();
        let canvas = Canvas::new(250, 400);
        let fields = LayoutFields::device(
            "node",
            "ts",
            "id",
            "読み取り成功 yama log",
            "yama log QRe-paper with a description long enough to wrap twice",
        );

        let layout = engine.layout(canvas, &fields, &code());

        assert!(!layout.truncated);
        let inner = engine.inner_width(canvas);
        let body: Vec<String> = text_ops(&layout.frame)
            .into_iter()
            .skip(5)
            .map(|(_, text, style)| {
                assert!(engine.metrics().text_width(&text, style) <= inner);
                text
            })
            .collect();
        assert_eq!(
            body.concat(),
            format!("{}{}", fields.name, fields.description)
        );
    }

    #[test]
    fn ascii_metrics_sanitize_rendered_text() {
        let engine = LayoutEngine::new(
            LayoutConstraints::default(),
            Arc::new(MonospaceMetrics::ascii_only()),
        );
        let fields = LayoutFields::device("node", "ts", "id", "読み", "");

        let layout = engine.layout(Canvas::new(122, 250), &fields, &code());

        let texts = text_ops(&layout.frame);
        assert_eq!(texts[5].1, "??");
    }

    #[test]
    fn message_is_centred() {
        let engine = engine();
        let frame = engine.message(Canvas::new(250, 122), "Scanned!", TextStyle::Banner);

        let texts = text_ops(&frame);
        assert_eq!(texts.len(), 1);
        let DrawOp::Text { x, y, .. } = &frame.ops[0] else {
            panic!("expected text op");
        };
        // 8 glyphs * 12 px = 96 px wide, 24 px tall.
        assert_eq!(*x, (250 - 96) / 2);
        assert_eq!(*y, (122 - 24) / 2);
    }
}
