//! Single-image conversion through the same converter and renderer as the
//! video pipeline.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use serde::Serialize;
use tracing::info;

use crate::config::ResolvedConfig;
use crate::error_codes::{CodedError, DECODER_OPEN_FAILED};
use crate::filter_job::{build_converter, build_renderer};
use crate::font_assets::resolve_font_path;
use crate::glyph_source::{FontdueGlyphSource, GlyphSource};
use crate::media::PixelFrame;

#[derive(Debug, Clone, Serialize)]
pub struct StillSummary {
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub cols: usize,
    pub rows: usize,
    pub text_output: Option<PathBuf>,
}

pub fn load_rgb_frame(path: &Path) -> Result<PixelFrame> {
    let image = image::open(path).map_err(|error| {
        anyhow!(CodedError::environment(
            DECODER_OPEN_FAILED,
            format!("failed to decode image {}: {error}", path.display()),
        ))
    })?;
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    PixelFrame::from_rgb(width, height, rgb.into_raw())
}

pub fn save_rgb_frame(frame: PixelFrame, path: &Path) -> Result<()> {
    let (width, height) = (frame.width(), frame.height());
    let image = RgbImage::from_raw(width, height, frame.into_bytes())
        .ok_or_else(|| anyhow!("rendered buffer does not match {width}x{height}"))?;
    image
        .save(path)
        .with_context(|| format!("failed to write image {}", path.display()))
}

pub fn run_still(
    input: &Path,
    output: &Path,
    text_output: Option<&Path>,
    config: &ResolvedConfig,
) -> Result<StillSummary> {
    let font_path = resolve_font_path(config.font.as_deref())?;
    let glyphs = FontdueGlyphSource::load(&font_path)?;
    glyphs.warn_unsupported(config.charset.symbols());
    render_still(input, output, text_output, config, Box::new(glyphs))
}

/// Same as [`run_still`] with a caller-supplied glyph source.
pub fn render_still(
    input: &Path,
    output: &Path,
    text_output: Option<&Path>,
    config: &ResolvedConfig,
    glyphs: Box<dyn GlyphSource>,
) -> Result<StillSummary> {
    let frame = load_rgb_frame(input)?;
    let (width, height) = (frame.width(), frame.height());
    let (converter, layout) = build_converter(config, width, height)?;
    let mut renderer = build_renderer(glyphs, config.font_size, &layout)?;

    let grid = converter.convert(&frame, config.color_enabled)?;
    if let Some(text_path) = text_output {
        fs::write(text_path, grid.to_text())
            .with_context(|| format!("failed to write {}", text_path.display()))?;
    }
    let rendered = renderer.render(&grid)?;
    save_rgb_frame(rendered, output)?;

    info!(
        output = %output.display(),
        cols = layout.cols,
        rows = layout.rows,
        "wrote ascii still"
    );
    Ok(StillSummary {
        output: output.to_path_buf(),
        width,
        height,
        cols: layout.cols,
        rows: layout.rows,
        text_output: text_output.map(Path::to_path_buf),
    })
}
