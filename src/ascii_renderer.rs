use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, warn};

use crate::ascii_grid::{Grid, Rgb};
use crate::glyph_source::{GlyphMetrics, GlyphSource, RasterizedGlyph};
use crate::media::PixelFrame;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("renderer {0} was not initialized")]
    NotInitialized(&'static str),
    #[error("invalid renderer setup: {0}")]
    InvalidSetup(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasLayout {
    pub width: u32,
    pub height: u32,
    pub block_width: u32,
    pub block_height: u32,
}

struct GlyphState {
    source: Box<dyn GlyphSource>,
    pixel_height: f32,
    metrics: GlyphMetrics,
    ascent: i32,
}

enum CachedGlyph {
    Ready(RasterizedGlyph),
    Unavailable,
}

/// Draws symbol grids onto RGB canvases.
///
/// Each distinct symbol is rasterized once; failures are remembered too, so a
/// symbol the glyph source cannot produce is reported only on first use.
pub struct AsciiRenderer {
    glyphs: Option<GlyphState>,
    canvas: Option<CanvasLayout>,
    glyph_cache: HashMap<char, CachedGlyph>,
}

impl AsciiRenderer {
    pub fn new() -> Self {
        Self {
            glyphs: None,
            canvas: None,
            glyph_cache: HashMap::new(),
        }
    }

    pub fn init_glyph_source(
        &mut self,
        source: Box<dyn GlyphSource>,
        pixel_height: f32,
    ) -> Result<GlyphMetrics, RenderError> {
        if !pixel_height.is_finite() || pixel_height <= 0.0 {
            return Err(RenderError::InvalidSetup(format!(
                "glyph pixel height must be > 0, got {pixel_height}"
            )));
        }
        let metrics = source.metrics(pixel_height);
        let ascent = metrics.ascent.floor() as i32;
        debug!(pixel_height, scale = metrics.scale, ascent, "glyph source initialized");
        self.glyphs = Some(GlyphState {
            source,
            pixel_height,
            metrics,
            ascent,
        });
        self.glyph_cache.clear();
        Ok(metrics)
    }

    pub fn init_canvas(
        &mut self,
        width: u32,
        height: u32,
        block_width: u32,
        block_height: u32,
    ) -> Result<CanvasLayout, RenderError> {
        if width == 0 || height == 0 || block_width == 0 || block_height == 0 {
            return Err(RenderError::InvalidSetup(format!(
                "canvas {width}x{height} with block {block_width}x{block_height} must be non-zero"
            )));
        }
        let layout = CanvasLayout {
            width,
            height,
            block_width,
            block_height,
        };
        self.canvas = Some(layout);
        Ok(layout)
    }

    pub fn canvas(&self) -> Option<CanvasLayout> {
        self.canvas
    }

    pub fn metrics(&self) -> Option<GlyphMetrics> {
        self.glyphs.as_ref().map(|state| state.metrics)
    }

    pub fn ascent(&self) -> Option<i32> {
        self.glyphs.as_ref().map(|state| state.ascent)
    }

    pub fn glyph_cache_len(&self) -> usize {
        self.glyph_cache.len()
    }

    pub fn render(&mut self, grid: &Grid) -> Result<PixelFrame, RenderError> {
        let Self {
            glyphs,
            canvas,
            glyph_cache,
        } = self;
        let layout = canvas.ok_or(RenderError::NotInitialized("canvas"))?;
        let state = glyphs
            .as_ref()
            .ok_or(RenderError::NotInitialized("glyph source"))?;

        let mut frame = PixelFrame::black(layout.width, layout.height);
        for (row, col, cell) in grid.iter_positioned() {
            let glyph = glyph_cache.entry(cell.symbol).or_insert_with(|| {
                let rasterized = state
                    .source
                    .rasterize(cell.symbol, state.pixel_height)
                    .and_then(|glyph| glyph.validated(cell.symbol));
                match rasterized {
                    Ok(glyph) => CachedGlyph::Ready(glyph),
                    Err(error) => {
                        warn!(symbol = ?cell.symbol, %error, "glyph unavailable; cells will stay blank");
                        CachedGlyph::Unavailable
                    }
                }
            });
            let CachedGlyph::Ready(glyph) = glyph else {
                continue;
            };

            let x = col as i64 * i64::from(layout.block_width);
            let y = row as i64 * i64::from(layout.block_height) + i64::from(state.ascent);
            blend_glyph(
                frame.as_bytes_mut(),
                layout.width,
                layout.height,
                x + i64::from(glyph.x_offset),
                y + i64::from(glyph.y_offset),
                glyph,
                cell.color,
            );
        }

        Ok(frame)
    }
}

/// Writes `color * coverage / 255` for every covered glyph pixel that lands
/// inside the frame. A glyph with a mismatched coverage buffer draws nothing.
pub fn blend_glyph(
    frame: &mut [u8],
    frame_width: u32,
    frame_height: u32,
    x: i64,
    y: i64,
    glyph: &RasterizedGlyph,
    color: Rgb,
) {
    if glyph.coverage.len() != glyph.width * glyph.height {
        return;
    }
    let channels = color.channels();
    for row in 0..glyph.height {
        let py = y + row as i64;
        if py < 0 || py >= i64::from(frame_height) {
            continue;
        }

        for col in 0..glyph.width {
            let px = x + col as i64;
            if px < 0 || px >= i64::from(frame_width) {
                continue;
            }

            let coverage = glyph.coverage[row * glyph.width + col];
            if coverage == 0 {
                continue;
            }

            let idx = (py as usize * frame_width as usize + px as usize) * 3;
            for (channel, value) in channels.iter().enumerate() {
                frame[idx + channel] = ((u16::from(*value) * u16::from(coverage)) / 255) as u8;
            }
        }
    }
}
