//! Glyph coverage bitmaps for the renderer.

use std::path::Path;

use anyhow::{anyhow, Result};
use fontdue::{Font, FontSettings};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error_codes::{CodedError, FONT_LOAD_FAILED};
use crate::font_assets::{describe_symbols, read_font_bytes, unsupported_symbols};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphMetrics {
    /// Font units to pixels at the requested height.
    pub scale: f32,
    /// Baseline distance from the top of a line, in pixels.
    pub ascent: f32,
}

/// Coverage bitmap with offsets relative to the pen position on the baseline.
/// `y_offset` is measured downward, so glyphs that rise above the baseline
/// have a negative offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterizedGlyph {
    pub width: usize,
    pub height: usize,
    pub x_offset: i32,
    pub y_offset: i32,
    pub coverage: Vec<u8>,
}

impl RasterizedGlyph {
    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            x_offset: 0,
            y_offset: 0,
            coverage: Vec::new(),
        }
    }

    /// Rejects a bitmap whose coverage does not hold `width * height` bytes.
    pub fn validated(self, symbol: char) -> Result<Self, GlyphError> {
        let expected = self.width * self.height;
        if self.coverage.len() != expected {
            return Err(GlyphError::Malformed {
                symbol,
                expected,
                actual: self.coverage.len(),
            });
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GlyphError {
    #[error("font has no glyph for {0:?}")]
    MissingGlyph(char),
    #[error("glyph for {symbol:?} has {actual} coverage bytes, expected {expected}")]
    Malformed {
        symbol: char,
        expected: usize,
        actual: usize,
    },
}

pub trait GlyphSource: Send {
    fn metrics(&self, pixel_height: f32) -> GlyphMetrics;
    fn rasterize(&self, symbol: char, pixel_height: f32) -> Result<RasterizedGlyph, GlyphError>;
}

pub struct FontdueGlyphSource {
    font: Font,
    label: String,
}

impl FontdueGlyphSource {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = read_font_bytes(path).map_err(|error| {
            anyhow!(CodedError::environment(FONT_LOAD_FAILED, format!("{error:#}")))
        })?;
        Self::from_bytes(bytes, &path.display().to_string())
    }

    pub fn from_bytes(bytes: Vec<u8>, label: &str) -> Result<Self> {
        let font = Font::from_bytes(bytes, FontSettings::default()).map_err(|error| {
            anyhow!(CodedError::usage(
                FONT_LOAD_FAILED,
                format!("failed to parse font {label}: {error}"),
            ))
        })?;
        debug!(font = label, glyphs = font.glyph_count(), "font loaded");
        Ok(Self {
            font,
            label: label.to_owned(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Logs ramp symbols the font cannot draw; those cells render blank.
    pub fn warn_unsupported(&self, symbols: &[char]) -> Vec<char> {
        let missing = unsupported_symbols(&self.font, symbols);
        if !missing.is_empty() {
            warn!(
                font = %self.label,
                symbols = %describe_symbols(&missing),
                "font is missing glyphs for charset symbols"
            );
        }
        missing
    }
}

impl GlyphSource for FontdueGlyphSource {
    fn metrics(&self, pixel_height: f32) -> GlyphMetrics {
        let ascent = self
            .font
            .horizontal_line_metrics(pixel_height)
            .map(|line| line.ascent)
            .unwrap_or(pixel_height);
        GlyphMetrics {
            scale: self.font.scale_factor(pixel_height),
            ascent,
        }
    }

    fn rasterize(&self, symbol: char, pixel_height: f32) -> Result<RasterizedGlyph, GlyphError> {
        if symbol.is_whitespace() {
            return Ok(RasterizedGlyph::empty());
        }
        if self.font.lookup_glyph_index(symbol) == 0 {
            return Err(GlyphError::MissingGlyph(symbol));
        }

        let (metrics, coverage) = self.font.rasterize(symbol, pixel_height);

        // fontdue reports the bitmap's bottom edge above the baseline (y up).
        RasterizedGlyph {
            width: metrics.width,
            height: metrics.height,
            x_offset: metrics.xmin,
            y_offset: -(metrics.ymin + metrics.height as i32),
            coverage,
        }
        .validated(symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::{FontdueGlyphSource, GlyphError, GlyphSource, RasterizedGlyph};
    use crate::error_codes::{find_coded_error, FONT_LOAD_FAILED};
    use crate::font_assets::resolve_font_path;

    #[test]
    fn garbage_bytes_are_a_coded_font_error() {
        let error = FontdueGlyphSource::from_bytes(vec![1, 2, 3, 4], "junk.ttf")
            .err()
            .expect("parse should fail");
        assert_eq!(find_coded_error(&error).map(|e| e.code), Some(FONT_LOAD_FAILED));
    }

    #[test]
    fn short_coverage_is_malformed() {
        let glyph = RasterizedGlyph {
            width: 4,
            height: 4,
            x_offset: 0,
            y_offset: 0,
            coverage: vec![255; 3],
        };
        assert_eq!(
            glyph.validated('x').err(),
            Some(GlyphError::Malformed {
                symbol: 'x',
                expected: 16,
                actual: 3,
            })
        );
        assert!(RasterizedGlyph::empty().validated(' ').is_ok());
    }

    #[test]
    fn system_font_rasterizes_above_baseline() {
        let Ok(path) = resolve_font_path(None) else {
            eprintln!("skipping: no system monospace font available");
            return;
        };
        let source = FontdueGlyphSource::load(&path).expect("load font");
        let metrics = source.metrics(16.0);
        assert!(metrics.ascent > 0.0);
        assert!(metrics.scale > 0.0);

        let glyph = source.rasterize('@', 16.0).expect("rasterize");
        assert!(glyph.width > 0 && glyph.height > 0);
        assert_eq!(glyph.coverage.len(), glyph.width * glyph.height);
        assert!(glyph.y_offset < 0);

        let space = source.rasterize(' ', 16.0).expect("space");
        assert_eq!(space.coverage.len(), 0);

        let unassigned = '\u{10FFFD}';
        assert_eq!(
            source.rasterize(unassigned, 16.0).err(),
            Some(GlyphError::MissingGlyph(unassigned))
        );
    }
}
