//! Four-stage frame pipeline: decode → convert → render → encode.
//!
//! Each stage runs on its own named thread and talks to its neighbours only
//! through [`handoff`] queues. A stage stops its output queue once its input
//! is exhausted, so end-of-stream flows strictly downstream. Undecoded audio
//! takes a side queue from the decode stage straight to the encode stage.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, Scope, ScopedJoinHandle};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::ascii_converter::AsciiConverter;
use crate::ascii_grid::Grid;
use crate::ascii_renderer::AsciiRenderer;
use crate::decoding::FrameSource;
use crate::encoding::FrameSink;
use crate::error_codes::{CodedError, CONVERTER_INIT_FAILED, RENDERER_INIT_FAILED};
use crate::handoff::{handoff, HandoffReceiver, HandoffSender};
use crate::media::{AudioPacket, PixelFrame};
use crate::progress::ProgressTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub color_enabled: bool,
    /// Stop decoding after this many frames.
    pub max_frames: Option<u64>,
    pub audio_enabled: bool,
    /// Progress is logged every this many encoded frames.
    pub report_every: u64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            color_enabled: true,
            max_frames: None,
            audio_enabled: true,
            report_every: 30,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineSummary {
    pub frames_decoded: u64,
    pub frames_converted: u64,
    pub frames_rendered: u64,
    pub frames_encoded: u64,
    pub frames_dropped: u64,
    pub audio_packets_forwarded: u64,
    pub write_failures: u64,
    pub stopped_at_frame_limit: bool,
    pub finalize_error: Option<String>,
    /// Decode, convert, render and encode, in that order.
    pub stages: Vec<StageReport>,
}

impl PipelineSummary {
    pub fn is_clean(&self) -> bool {
        self.frames_dropped == 0 && self.write_failures == 0 && self.finalize_error.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Decode,
    Convert,
    Render,
    Encode,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Self::Decode => "decode",
            Self::Convert => "convert",
            Self::Render => "render",
            Self::Encode => "encode",
        }
    }

    fn thread_name(self) -> String {
        format!("ascii-filter-{}", self.name())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageState {
    Running,
    /// Upstream has stopped; queued items are still being processed.
    Draining,
    /// Sentinel observed. Terminal.
    Stopped,
}

/// Every state a stage passed through, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub states: Vec<StageState>,
}

impl StageReport {
    pub fn drained(&self) -> bool {
        self.states.contains(&StageState::Draining)
    }

    pub fn final_state(&self) -> Option<StageState> {
        self.states.last().copied()
    }
}

#[derive(Debug)]
struct StageTracker {
    stage: Stage,
    states: Vec<StageState>,
}

impl StageTracker {
    fn new(stage: Stage) -> Self {
        debug!(stage = %stage, "stage running");
        Self {
            stage,
            states: vec![StageState::Running],
        }
    }

    fn state(&self) -> StageState {
        self.states.last().copied().unwrap_or(StageState::Running)
    }

    fn observe<T>(&mut self, input: &HandoffReceiver<T>) {
        if self.state() == StageState::Running && input.is_stopped() {
            self.states.push(StageState::Draining);
            debug!(stage = %self.stage, queued = input.queued(), "stage draining");
        }
    }

    fn stop(mut self) -> StageReport {
        self.states.push(StageState::Stopped);
        debug!(stage = %self.stage, "stage stopped");
        StageReport {
            stage: self.stage,
            states: self.states,
        }
    }
}

/// What a worker hands back when it exits.
#[derive(Debug)]
struct Finished<S> {
    stats: S,
    report: StageReport,
}

#[derive(Debug, Default)]
struct DecodeStats {
    frames: u64,
    audio_packets: u64,
    hit_frame_limit: bool,
}

#[derive(Debug, Default)]
struct TransformStats {
    passed: u64,
    dropped: u64,
}

#[derive(Debug, Default)]
struct EncodeStats {
    frames: u64,
    audio_packets: u64,
    write_failures: u64,
    finalize_error: Option<String>,
}

struct Collaborators {
    source: Box<dyn FrameSource>,
    converter: AsciiConverter,
    renderer: AsciiRenderer,
    sink: Box<dyn FrameSink>,
}

struct StageHandles<'scope> {
    decode: ScopedJoinHandle<'scope, Finished<DecodeStats>>,
    convert: ScopedJoinHandle<'scope, Finished<TransformStats>>,
    render: ScopedJoinHandle<'scope, Finished<TransformStats>>,
    encode: ScopedJoinHandle<'scope, Finished<EncodeStats>>,
}

struct StageResults {
    decode: Finished<DecodeStats>,
    convert: Finished<TransformStats>,
    render: Finished<TransformStats>,
    encode: Finished<EncodeStats>,
}

impl StageHandles<'_> {
    fn join(self) -> Result<StageResults> {
        let decode = join_stage(Stage::Decode, self.decode);
        let convert = join_stage(Stage::Convert, self.convert);
        let render = join_stage(Stage::Render, self.render);
        let encode = join_stage(Stage::Encode, self.encode);
        Ok(StageResults {
            decode: decode?,
            convert: convert?,
            render: render?,
            encode: encode?,
        })
    }
}

/// Runs one job to completion and joins every worker before returning.
///
/// Setup problems are reported before any worker starts. Once running,
/// per-frame and per-packet failures are logged and counted in the summary
/// rather than aborting the job.
pub fn run_pipeline(
    source: Box<dyn FrameSource>,
    converter: AsciiConverter,
    renderer: AsciiRenderer,
    sink: Box<dyn FrameSink>,
    options: PipelineOptions,
) -> Result<PipelineSummary> {
    let layout = converter.layout().ok_or_else(|| {
        anyhow!(CodedError::usage(
            CONVERTER_INIT_FAILED,
            "converter must be initialized before the pipeline starts",
        ))
    })?;
    let metadata = source.metadata();
    if layout.source_width != metadata.width || layout.source_height != metadata.height {
        return Err(CodedError::usage(
            CONVERTER_INIT_FAILED,
            format!(
                "converter expects {}x{} frames but source produces {}x{}",
                layout.source_width, layout.source_height, metadata.width, metadata.height
            ),
        )
        .into());
    }
    if renderer.canvas().is_none() || renderer.metrics().is_none() {
        return Err(CodedError::usage(
            RENDERER_INIT_FAILED,
            "renderer needs a canvas and a glyph source before the pipeline starts",
        )
        .into());
    }

    let audio_active = options.audio_enabled && source.has_audio();
    let total = [options.max_frames, metadata.estimated_total_frames()]
        .into_iter()
        .flatten()
        .min();
    let progress = ProgressTracker::new(total, options.report_every);
    let cancel = AtomicBool::new(false);
    info!(
        width = metadata.width,
        height = metadata.height,
        cols = layout.cols,
        rows = layout.rows,
        audio = audio_active,
        color = options.color_enabled,
        "starting pipeline"
    );

    let collaborators = Collaborators {
        source,
        converter,
        renderer,
        sink,
    };
    // Leaving the scope joins every stage that did start, including after a
    // failed spawn.
    let results = thread::scope(|scope| {
        match start_stages(scope, collaborators, options, audio_active, &cancel, &progress) {
            Ok(handles) => handles.join(),
            Err(error) => {
                cancel.store(true, Ordering::Relaxed);
                error!(error = %format!("{error:#}"), "pipeline startup failed; stopping started stages");
                Err(error)
            }
        }
    })?;

    let StageResults {
        decode,
        convert,
        render,
        encode,
    } = results;
    let summary = PipelineSummary {
        frames_decoded: decode.stats.frames,
        frames_converted: convert.stats.passed,
        frames_rendered: render.stats.passed,
        frames_encoded: encode.stats.frames,
        frames_dropped: convert.stats.dropped + render.stats.dropped,
        audio_packets_forwarded: encode.stats.audio_packets,
        write_failures: encode.stats.write_failures,
        stopped_at_frame_limit: decode.stats.hit_frame_limit,
        finalize_error: encode.stats.finalize_error,
        stages: vec![decode.report, convert.report, render.report, encode.report],
    };
    if decode.stats.audio_packets > summary.audio_packets_forwarded {
        debug!(
            read = decode.stats.audio_packets,
            forwarded = summary.audio_packets_forwarded,
            "some audio packets were not written"
        );
    }
    if summary.write_failures > 0 {
        warn!(
            failures = summary.write_failures,
            "some frames or audio packets could not be written; output is incomplete"
        );
    }
    info!(
        decoded = summary.frames_decoded,
        encoded = summary.frames_encoded,
        dropped = summary.frames_dropped,
        audio_packets = summary.audio_packets_forwarded,
        "pipeline finished"
    );
    Ok(summary)
}

fn start_stages<'scope, 'env>(
    scope: &'scope Scope<'scope, 'env>,
    collaborators: Collaborators,
    options: PipelineOptions,
    audio_active: bool,
    cancel: &'env AtomicBool,
    progress: &'env ProgressTracker,
) -> Result<StageHandles<'scope>> {
    let Collaborators {
        source,
        converter,
        renderer,
        sink,
    } = collaborators;
    let (frame_tx, frame_rx) = handoff::<PixelFrame>();
    let (grid_tx, grid_rx) = handoff::<Grid>();
    let (rendered_tx, rendered_rx) = handoff::<PixelFrame>();
    let (audio_tx, audio_rx) = if audio_active {
        let (tx, rx) = handoff::<AudioPacket>();
        (Some(tx), Some(rx))
    } else {
        (None, None)
    };

    let decode = spawn_stage(scope, Stage::Decode, move || {
        decode_worker(source, frame_tx, audio_tx, options.max_frames, cancel)
    })?;
    let convert = spawn_stage(scope, Stage::Convert, move || {
        convert_worker(converter, frame_rx, grid_tx, options.color_enabled)
    })?;
    let render = spawn_stage(scope, Stage::Render, move || {
        render_worker(renderer, grid_rx, rendered_tx)
    })?;
    let encode = spawn_stage(scope, Stage::Encode, move || {
        encode_worker(sink, rendered_rx, audio_rx, progress)
    })?;
    Ok(StageHandles {
        decode,
        convert,
        render,
        encode,
    })
}

fn spawn_stage<'scope, 'env, T, F>(
    scope: &'scope Scope<'scope, 'env>,
    stage: Stage,
    body: F,
) -> Result<ScopedJoinHandle<'scope, T>>
where
    T: Send + 'scope,
    F: FnOnce() -> T + Send + 'scope,
{
    thread::Builder::new()
        .name(stage.thread_name())
        .spawn_scoped(scope, body)
        .with_context(|| format!("failed to spawn {stage} worker thread"))
}

fn join_stage<T>(stage: Stage, handle: ScopedJoinHandle<'_, T>) -> Result<T> {
    handle
        .join()
        .map_err(|_| anyhow!("{stage} worker thread panicked"))
}

fn decode_worker(
    mut source: Box<dyn FrameSource>,
    frames: HandoffSender<PixelFrame>,
    audio: Option<HandoffSender<AudioPacket>>,
    max_frames: Option<u64>,
    cancel: &AtomicBool,
) -> Finished<DecodeStats> {
    let tracker = StageTracker::new(Stage::Decode);
    let mut stats = DecodeStats::default();
    let mut audio_open = audio.is_some();
    let mut exhausted = false;

    loop {
        if cancel.load(Ordering::Relaxed) {
            warn!(frames = stats.frames, "decode cancelled");
            break;
        }
        if max_frames.is_some_and(|max| stats.frames >= max) {
            stats.hit_frame_limit = true;
            info!(frames = stats.frames, "frame limit reached; stopping decode");
            break;
        }
        match source.read_frame() {
            Ok(Some(frame)) => {
                frames.push(frame);
                stats.frames += 1;
            }
            Ok(None) => {
                exhausted = true;
                break;
            }
            Err(error) => {
                error!(error = %format!("{error:#}"), frame = stats.frames, "decode failed; ending stream");
                break;
            }
        }
        if let Some(audio) = audio.as_ref().filter(|_| audio_open) {
            audio_open = forward_audio(source.as_mut(), audio, &mut stats);
        }
    }

    if exhausted {
        if let Some(audio) = audio.as_ref() {
            while audio_open && !cancel.load(Ordering::Relaxed) {
                audio_open = forward_audio(source.as_mut(), audio, &mut stats);
            }
        }
    }

    frames.stop();
    if let Some(audio) = audio.as_ref() {
        audio.stop();
    }
    debug!(frames = stats.frames, audio_packets = stats.audio_packets, "decode stage stopped");
    Finished {
        stats,
        report: tracker.stop(),
    }
}

/// Moves one audio packet downstream. Returns false once audio is exhausted.
fn forward_audio(
    source: &mut dyn FrameSource,
    audio: &HandoffSender<AudioPacket>,
    stats: &mut DecodeStats,
) -> bool {
    match source.read_audio_packet() {
        Ok(Some(packet)) => {
            audio.push(packet);
            stats.audio_packets += 1;
            true
        }
        Ok(None) => false,
        Err(error) => {
            warn!(error = %format!("{error:#}"), "audio read failed; dropping remaining audio");
            false
        }
    }
}

fn convert_worker(
    converter: AsciiConverter,
    frames: HandoffReceiver<PixelFrame>,
    grids: HandoffSender<Grid>,
    color_enabled: bool,
) -> Finished<TransformStats> {
    let mut tracker = StageTracker::new(Stage::Convert);
    let mut stats = TransformStats::default();
    let mut index = 0_u64;
    while let Some(frame) = frames.pop() {
        tracker.observe(&frames);
        match converter.convert(&frame, color_enabled) {
            Ok(grid) => {
                grids.push(grid);
                stats.passed += 1;
            }
            Err(error) => {
                warn!(frame = index, %error, "dropping frame: conversion failed");
                stats.dropped += 1;
            }
        }
        index += 1;
    }
    grids.stop();
    Finished {
        stats,
        report: tracker.stop(),
    }
}

fn render_worker(
    mut renderer: AsciiRenderer,
    grids: HandoffReceiver<Grid>,
    rendered: HandoffSender<PixelFrame>,
) -> Finished<TransformStats> {
    let mut tracker = StageTracker::new(Stage::Render);
    let mut stats = TransformStats::default();
    let mut index = 0_u64;
    while let Some(grid) = grids.pop() {
        tracker.observe(&grids);
        match renderer.render(&grid) {
            Ok(frame) => {
                rendered.push(frame);
                stats.passed += 1;
            }
            Err(error) => {
                warn!(frame = index, %error, "dropping frame: render failed");
                stats.dropped += 1;
            }
        }
        index += 1;
    }
    rendered.stop();
    debug!(glyphs = renderer.glyph_cache_len(), "render stage glyph cache");
    Finished {
        stats,
        report: tracker.stop(),
    }
}

fn encode_worker(
    mut sink: Box<dyn FrameSink>,
    rendered: HandoffReceiver<PixelFrame>,
    audio: Option<HandoffReceiver<AudioPacket>>,
    progress: &ProgressTracker,
) -> Finished<EncodeStats> {
    let mut tracker = StageTracker::new(Stage::Encode);
    let mut stats = EncodeStats::default();
    while let Some(frame) = rendered.pop() {
        tracker.observe(&rendered);
        let index = progress.advance() - 1;
        match sink.encode_frame(frame) {
            Ok(()) => stats.frames += 1,
            Err(error) => {
                stats.write_failures += 1;
                error!(frame = index, error = %format!("{error:#}"), "failed to encode frame");
            }
        }
    }
    progress.finish();

    if let Some(audio) = audio {
        for packet in audio {
            match sink.write_audio_packet(packet) {
                Ok(()) => stats.audio_packets += 1,
                Err(error) => {
                    stats.write_failures += 1;
                    error!(error = %format!("{error:#}"), "failed to write audio packet");
                }
            }
        }
    }
    let report = tracker.stop();

    if let Err(error) = sink.finalize() {
        error!(error = %format!("{error:#}"), "failed to finalize output");
        stats.finalize_error = Some(format!("{error:#}"));
    }
    Finished { stats, report }
}
