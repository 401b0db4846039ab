//! Display driver boundary.
//!
//! The controller only ever talks to a [`DisplayDriver`]: init, clear, show a
//! composed [`Frame`], and put the panel to sleep. Panel-specific drivers
//! live outside this crate; [`HeadlessDisplay`] composes frames into an
//! in-memory bitmap and can dump each one as a PNG.

use std::path::PathBuf;

use fs_err as fs;
use image::{GrayImage, Luma};

use crate::layout::{Canvas, DrawOp, Frame, TextStyle};

#[derive(Debug, thiserror::Error)]
pub enum DisplayError {
    #[error("display I/O failed: {0}")]
    Io(String),

    #[error("display is not initialized")]
    NotInitialized,

    #[error("display disconnected")]
    Disconnected,

    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

pub trait DisplayDriver: Send {
    fn init(&mut self) -> Result<(), DisplayError>;

    fn canvas(&self) -> Canvas;

    fn clear(&mut self) -> Result<(), DisplayError>;

    fn show(&mut self, frame: &Frame) -> Result<(), DisplayError>;

    /// Low-power mode. A later `init` wakes the panel.
    fn sleep(&mut self) -> Result<(), DisplayError>;
}

/// A driver with no panel behind it.
///
/// Code ops are blitted into a grayscale buffer; text ops are kept as
/// `(y, text)` pairs since glyph rasterization belongs to a real panel.
#[derive(Debug)]
pub struct HeadlessDisplay {
    canvas: Canvas,
    buffer: GrayImage,
    texts: Vec<(u32, String, TextStyle)>,
    snapshot_dir: Option<PathBuf>,
    frames_shown: u64,
    initialized: bool,
}

impl HeadlessDisplay {
    pub fn new(canvas: Canvas) -> Self {
        Self {
            canvas,
            buffer: blank(canvas),
            texts: Vec::new(),
            snapshot_dir: None,
            frames_shown: 0,
            initialized: false,
        }
    }

    /// Writes every shown frame to `dir/frame-NNNNN.png`.
    pub fn with_snapshots(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = Some(dir.into());
        self
    }

    pub fn buffer(&self) -> &GrayImage {
        &self.buffer
    }

    pub fn texts(&self) -> &[(u32, String, TextStyle)] {
        &self.texts
    }

    pub fn frames_shown(&self) -> u64 {
        self.frames_shown
    }

    fn ensure_initialized(&self) -> Result<(), DisplayError> {
        if self.initialized {
            Ok(())
        } else {
            Err(DisplayError::NotInitialized)
        }
    }

    fn save_snapshot(&self) -> Result<(), DisplayError> {
        let Some(dir) = &self.snapshot_dir else {
            return Ok(());
        };
        let path = dir.join(format!("frame-{:05}.png", self.frames_shown));
        self.buffer
            .save(&path)
            .map_err(|err| DisplayError::Io(format!("{}: {}", path.display(), err)))?;
        tracing::debug!(path = %path.display(), "Frame snapshot written");
        Ok(())
    }
}

fn blank(canvas: Canvas) -> GrayImage {
    GrayImage::from_pixel(canvas.width, canvas.height, Luma([255u8]))
}

impl DisplayDriver for HeadlessDisplay {
    fn init(&mut self) -> Result<(), DisplayError> {
        if let Some(dir) = &self.snapshot_dir {
            fs::create_dir_all(dir).map_err(|err| DisplayError::Io(err.to_string()))?;
        }
        self.initialized = true;
        tracing::debug!(
            width = self.canvas.width,
            height = self.canvas.height,
            "Headless display initialized"
        );
        Ok(())
    }

    fn canvas(&self) -> Canvas {
        self.canvas
    }

    fn clear(&mut self) -> Result<(), DisplayError> {
        self.ensure_initialized()?;
        self.buffer = blank(self.canvas);
        self.texts.clear();
        Ok(())
    }

    fn show(&mut self, frame: &Frame) -> Result<(), DisplayError> {
        self.ensure_initialized()?;
        if frame.canvas != self.canvas {
            return Err(DisplayError::InvalidFrame(format!(
                "frame is {}x{}, panel is {}x{}",
                frame.canvas.width, frame.canvas.height, self.canvas.width, self.canvas.height
            )));
        }

        self.buffer = blank(self.canvas);
        self.texts.clear();
        for op in &frame.ops {
            match op {
                DrawOp::Text { y, text, style, .. } => {
                    tracing::debug!(y, text = %text, "Text");
                    self.texts.push((*y, text.clone(), *style));
                }
                DrawOp::Code { x, y, bitmap } => {
                    for by in 0..bitmap.edge() {
                        for bx in 0..bitmap.edge() {
                            let (px, py) = (x + bx, y + by);
                            if px < self.canvas.width
                                && py < self.canvas.height
                                && bitmap.is_dark(bx, by)
                            {
                                self.buffer.put_pixel(px, py, Luma([0u8]));
                            }
                        }
                    }
                }
            }
        }

        self.frames_shown += 1;
        self.save_snapshot()
    }

    fn sleep(&mut self) -> Result<(), DisplayError> {
        self.initialized = false;
        tracing::debug!("Headless display asleep");
        Ok(())
    }
}
