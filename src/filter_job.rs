use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::ascii_converter::{AsciiConverter, BlockLayout};
use crate::ascii_renderer::AsciiRenderer;
use crate::config::ResolvedConfig;
use crate::decoding::{check_extension, FfmpegDecoder, FrameSource};
use crate::encoding::{
    check_output_extension, EncoderSettings, FfmpegEncoder, FfmpegTools, GOP_SIZE, MAX_B_FRAMES,
};
use crate::error_codes::{CodedError, CONVERTER_INIT_FAILED, INVALID_CONFIG, RENDERER_INIT_FAILED};
use crate::font_assets::resolve_font_path;
use crate::glyph_source::{FontdueGlyphSource, GlyphSource};
use crate::pipeline::{run_pipeline, PipelineOptions, PipelineSummary};

/// Everything a render job will do, resolved without touching ffmpeg.
#[derive(Debug, Clone, Serialize)]
pub struct FilterJobPlan {
    pub input: PathBuf,
    pub output: PathBuf,
    pub charset: String,
    pub ramp: String,
    pub block_width: u32,
    pub block_height: u32,
    pub color: bool,
    pub audio: bool,
    pub max_frames: Option<u64>,
    pub font_path: PathBuf,
    pub font_size: f32,
    pub bitrate: u64,
    pub ffmpeg_mode: &'static str,
    pub encoder: String,
}

pub fn build_filter_plan(
    input: &Path,
    output: &Path,
    config: &ResolvedConfig,
) -> Result<FilterJobPlan> {
    check_extension(input)?;
    check_output_extension(output)?;
    if input == output {
        return Err(CodedError::usage(
            INVALID_CONFIG,
            "output path must differ from the input path",
        )
        .with_details(json!({ "path": input.display().to_string() }))
        .into());
    }
    let font_path = resolve_font_path(config.font.as_deref())?;
    Ok(FilterJobPlan {
        input: input.to_path_buf(),
        output: output.to_path_buf(),
        charset: config.charset_label.clone(),
        ramp: config.charset.to_ramp(),
        block_width: config.block_width,
        block_height: config.block_height,
        color: config.color_enabled,
        audio: config.audio_enabled,
        max_frames: config.max_frames,
        font_path,
        font_size: config.font_size,
        bitrate: config.bitrate,
        ffmpeg_mode: config.ffmpeg.label(),
        encoder: format!(
            "ffmpeg -c:v libx264 -b:v {} -g {GOP_SIZE} -bf {MAX_B_FRAMES} -pix_fmt yuv420p",
            config.bitrate
        ),
    })
}

/// Opens every collaborator, then runs the pipeline. Any failure before the
/// workers start is returned as an error; later failures are counted in the
/// summary.
pub fn run_filter_job(plan: &FilterJobPlan, config: &ResolvedConfig) -> Result<PipelineSummary> {
    let tools = FfmpegTools::resolve(config.ffmpeg)?;
    let decoder = FfmpegDecoder::open(&tools, &plan.input, config.audio_enabled)?;
    let metadata = decoder.metadata().clone();

    let glyphs = FontdueGlyphSource::load(&plan.font_path)?;
    glyphs.warn_unsupported(config.charset.symbols());

    let (converter, layout) = build_converter(config, metadata.width, metadata.height)?;
    let renderer = build_renderer(Box::new(glyphs), config.font_size, &layout)?;

    let mut encoder = FfmpegEncoder::init(
        &tools,
        &plan.output,
        EncoderSettings {
            width: metadata.width,
            height: metadata.height,
            frame_rate: metadata.frame_rate,
            bitrate: config.bitrate,
        },
    )?;
    if decoder.has_audio() {
        encoder.add_audio_stream()?;
    }

    info!(
        input = %plan.input.display(),
        output = %plan.output.display(),
        charset = %plan.charset,
        "filter job ready"
    );
    run_pipeline(
        Box::new(decoder),
        converter,
        renderer,
        Box::new(encoder),
        PipelineOptions {
            color_enabled: config.color_enabled,
            max_frames: config.max_frames,
            audio_enabled: config.audio_enabled,
            ..PipelineOptions::default()
        },
    )
}

pub(crate) fn build_converter(
    config: &ResolvedConfig,
    width: u32,
    height: u32,
) -> Result<(AsciiConverter, BlockLayout)> {
    let mut converter = AsciiConverter::new(config.charset.clone());
    let layout = converter
        .init(width, height, config.block_width, config.block_height)
        .map_err(|error| anyhow!(CodedError::usage(CONVERTER_INIT_FAILED, error.to_string())))?;
    Ok((converter, layout))
}

/// Renderer whose canvas matches the source frame and the converter's
/// effective block size.
pub(crate) fn build_renderer(
    glyphs: Box<dyn GlyphSource>,
    font_size: f32,
    layout: &BlockLayout,
) -> Result<AsciiRenderer> {
    let mut renderer = AsciiRenderer::new();
    renderer
        .init_glyph_source(glyphs, font_size)
        .map_err(|error| anyhow!(CodedError::usage(RENDERER_INIT_FAILED, error.to_string())))?;
    renderer
        .init_canvas(
            layout.source_width,
            layout.source_height,
            layout.block_width,
            layout.block_height,
        )
        .map_err(|error| anyhow!(CodedError::usage(RENDERER_INIT_FAILED, error.to_string())))?;
    Ok(renderer)
}
