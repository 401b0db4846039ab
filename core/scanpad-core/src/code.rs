//! Code-image capability: payload bytes in, square 1-bit bitmap out.
//!
//! The layout engine and display drivers only see [`CodeBitmap`]; how the
//! symbol is produced stays behind [`CodeImager`].

use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use qrcode::{Color, EcLevel, QrCode};

use crate::error::{Result, ScanpadError};

/// Square monochrome bitmap, row-major, `true` = dark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBitmap {
    edge: u32,
    dark: Vec<bool>,
}

impl CodeBitmap {
    pub fn new(edge: u32, dark: Vec<bool>) -> Result<Self> {
        let expected = (edge as usize) * (edge as usize);
        if dark.len() != expected {
            return Err(ScanpadError::CodeImage(format!(
                "bitmap has {} pixels, expected {} for edge {}",
                dark.len(),
                expected,
                edge
            )));
        }
        Ok(Self { edge, dark })
    }

    pub fn edge(&self) -> u32 {
        self.edge
    }

    pub fn is_dark(&self, x: u32, y: u32) -> bool {
        if x >= self.edge || y >= self.edge {
            return false;
        }
        self.dark[(y * self.edge + x) as usize]
    }

    /// Nearest-neighbour resize to `edge` x `edge`.
    pub fn scaled(&self, edge: u32) -> CodeBitmap {
        if edge == self.edge || self.edge == 0 {
            return self.clone();
        }
        let mut dark = Vec::with_capacity((edge as usize) * (edge as usize));
        for y in 0..edge {
            let src_y = (u64::from(y) * u64::from(self.edge) / u64::from(edge)) as u32;
            for x in 0..edge {
                let src_x = (u64::from(x) * u64::from(self.edge) / u64::from(edge)) as u32;
                dark.push(self.is_dark(src_x, src_y));
            }
        }
        CodeBitmap { edge, dark }
    }

    pub fn to_gray_image(&self) -> GrayImage {
        GrayImage::from_fn(self.edge, self.edge, |x, y| {
            if self.is_dark(x, y) {
                Luma([0u8])
            } else {
                Luma([255u8])
            }
        })
    }

    pub fn to_png(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        DynamicImage::ImageLuma8(self.to_gray_image())
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|err| ScanpadError::CodeImage(format!("PNG encoding failed: {}", err)))?;
        Ok(bytes)
    }
}

pub trait CodeImager: Send + Sync {
    fn encode(&self, payload: &[u8]) -> Result<CodeBitmap>;
}

/// QR symbols at error-correction level L, with a quiet zone.
#[derive(Debug, Clone, Copy)]
pub struct QrImager {
    module_px: u32,
    quiet_zone: u32,
}

impl Default for QrImager {
    fn default() -> Self {
        Self {
            module_px: 4,
            quiet_zone: 4,
        }
    }
}

impl QrImager {
    pub fn new(module_px: u32, quiet_zone: u32) -> Self {
        Self {
            module_px: module_px.max(1),
            quiet_zone,
        }
    }
}

impl CodeImager for QrImager {
    fn encode(&self, payload: &[u8]) -> Result<CodeBitmap> {
        let code = QrCode::with_error_correction_level(payload, EcLevel::L)
            .map_err(|err| ScanpadError::CodeImage(err.to_string()))?;
        let modules = code.width() as u32;
        let colors = code.to_colors();

        let span = modules + 2 * self.quiet_zone;
        let edge = span * self.module_px;
        let mut dark = Vec::with_capacity((edge as usize) * (edge as usize));
        for y in 0..edge {
            let my = y / self.module_px;
            for x in 0..edge {
                let mx = x / self.module_px;
                let inside = (self.quiet_zone..self.quiet_zone + modules).contains(&mx)
                    && (self.quiet_zone..self.quiet_zone + modules).contains(&my);
                let is_dark = inside && {
                    let index = (my - self.quiet_zone) * modules + (mx - self.quiet_zone);
                    colors[index as usize] == Color::Dark
                };
                dark.push(is_dark);
            }
        }
        CodeBitmap::new(edge, dark)
    }
}
