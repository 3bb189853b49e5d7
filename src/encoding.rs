use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStderr, Command, Stdio};

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::decoding::check_container;
use crate::error_codes::{CodedError, ENCODER_INIT_FAILED, FFMPEG_NOT_FOUND};
use crate::media::{AudioPacket, FrameRate, PixelFrame};

/// Bit rate used when none is configured.
pub const DEFAULT_BITRATE: u64 = 400_000;
pub const GOP_SIZE: u32 = 12;
pub const MAX_B_FRAMES: u32 = 1;

/// Output containers that can carry an H.264 stream. WebM is limited to
/// VP8/VP9/AV1, so it is accepted as input only.
pub const OUTPUT_EXTENSIONS: [&str; 6] = ["mp4", "mkv", "avi", "mov", "flv", "wmv"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FfmpegMode {
    #[default]
    Auto,
    System,
    Sidecar,
}

impl FfmpegMode {
    pub fn label(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::System => "system",
            Self::Sidecar => "sidecar",
        }
    }
}

/// Resolved `ffmpeg` / `ffprobe` executables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegTools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub mode: FfmpegMode,
}

impl FfmpegTools {
    pub fn system() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            mode: FfmpegMode::System,
        }
    }

    pub fn resolve(mode: FfmpegMode) -> Result<Self> {
        match mode {
            FfmpegMode::Auto | FfmpegMode::System => Ok(Self {
                mode,
                ..Self::system()
            }),
            FfmpegMode::Sidecar => {
                #[cfg(feature = "sidecar_ffmpeg")]
                {
                    let ffmpeg = ffmpeg_sidecar::paths::ffmpeg_path();
                    if !ffmpeg.exists() {
                        info!("downloading ffmpeg sidecar binary");
                        ffmpeg_sidecar::download::auto_download()
                            .context("failed to auto-download ffmpeg sidecar binary")?;
                    }
                    let ffprobe = ffmpeg.with_file_name(if cfg!(windows) {
                        "ffprobe.exe"
                    } else {
                        "ffprobe"
                    });
                    Ok(Self {
                        ffmpeg,
                        ffprobe,
                        mode,
                    })
                }
                #[cfg(not(feature = "sidecar_ffmpeg"))]
                {
                    Err(CodedError::usage(
                        FFMPEG_NOT_FOUND,
                        "ffmpeg sidecar mode requested but ascii-filter was built without `sidecar_ffmpeg`. Rebuild with `--features sidecar_ffmpeg`.",
                    )
                    .into())
                }
            }
        }
    }

    pub fn mode_label(&self) -> &'static str {
        self.mode.label()
    }
}

pub(crate) fn spawn_tool(
    tool: &Path,
    mode_label: &str,
    args: &[String],
    stdin: Stdio,
    stdout: Stdio,
    stderr: Stdio,
) -> Result<Child> {
    Command::new(tool)
        .args(args.iter().map(String::as_str))
        .stdin(stdin)
        .stdout(stdout)
        .stderr(stderr)
        .spawn()
        .map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                anyhow!(CodedError::environment(
                    FFMPEG_NOT_FOUND,
                    format!(
                        "{} executable not found (mode={mode_label}). Install ffmpeg (system mode) or use sidecar mode with `--features sidecar_ffmpeg`.",
                        tool.display()
                    ),
                )
                .with_details(json!({ "resolved_path": tool.display().to_string(), "mode": mode_label })))
            } else {
                anyhow!(
                    "failed to spawn {} (mode={mode_label}, args='{}'): {error}",
                    tool.display(),
                    args.join(" ")
                )
            }
        })
}

/// Consumer side of the pipeline: accepts rendered frames and passthrough
/// audio, then produces the output file on `finalize`.
pub trait FrameSink: Send {
    fn encode_frame(&mut self, frame: PixelFrame) -> Result<()>;
    fn write_audio_packet(&mut self, packet: AudioPacket) -> Result<()>;
    fn finalize(self: Box<Self>) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    pub bitrate: u64,
}

struct AudioStaging {
    path: PathBuf,
    writer: BufWriter<File>,
    bytes: u64,
}

/// H.264 encoder driving an `ffmpeg` child over stdin.
///
/// Video is always written to a staging file beside the output. Without audio
/// `finalize` renames it into place; with audio it is muxed with the staged
/// audio stream.
pub struct FfmpegEncoder {
    tools: FfmpegTools,
    settings: EncoderSettings,
    output_path: PathBuf,
    video_path: PathBuf,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr: Option<ChildStderr>,
    audio: Option<AudioStaging>,
    frames_written: u64,
}

impl FfmpegEncoder {
    pub fn init(tools: &FfmpegTools, output_path: &Path, settings: EncoderSettings) -> Result<Self> {
        validate_output_path(output_path)?;
        check_output_extension(output_path)?;
        if settings.width == 0 || settings.height == 0 {
            return Err(CodedError::usage(
                ENCODER_INIT_FAILED,
                format!("encoder dimensions must be > 0, got {}x{}", settings.width, settings.height),
            )
            .into());
        }
        if settings.bitrate == 0 {
            return Err(CodedError::usage(ENCODER_INIT_FAILED, "bitrate must be > 0").into());
        }

        let video_path = staging_path(output_path, "video", None);
        let args = ffmpeg_encode_args(&settings, &video_path);
        debug!(args = %args.join(" "), "spawning ffmpeg encoder");
        let mut child = spawn_tool(
            &tools.ffmpeg,
            tools.mode_label(),
            &args,
            Stdio::piped(),
            Stdio::null(),
            Stdio::piped(),
        )?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("failed to capture ffmpeg stdin"))?;
        let stderr = child.stderr.take();

        Ok(Self {
            tools: tools.clone(),
            settings,
            output_path: output_path.to_path_buf(),
            video_path,
            child: Some(child),
            stdin: Some(stdin),
            stderr,
            audio: None,
            frames_written: 0,
        })
    }

    /// Stages passthrough audio for muxing at `finalize`.
    pub fn add_audio_stream(&mut self) -> Result<()> {
        if self.audio.is_some() {
            return Ok(());
        }
        let path = staging_path(&self.output_path, "audio", Some("mka"));
        let file = File::create(&path).map_err(|error| {
            anyhow!(CodedError::environment(
                ENCODER_INIT_FAILED,
                format!("failed to create audio staging file {}: {error}", path.display()),
            ))
        })?;
        self.audio = Some(AudioStaging {
            path,
            writer: BufWriter::new(file),
            bytes: 0,
        });
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    fn finish_video(&mut self) -> Result<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.flush().context("failed to flush ffmpeg stdin")?;
        }
        let mut child = self
            .child
            .take()
            .ok_or_else(|| anyhow!("encoder has already been finalized"))?;
        let status = child.wait().context("failed waiting for ffmpeg process")?;
        let stderr_tail = read_stderr_tail(&mut self.stderr)?;
        if !status.success() {
            bail!(
                "ffmpeg encoder failed with status {status} (mode={}, output={}, stderr_tail='{}')",
                self.tools.mode_label(),
                self.video_path.display(),
                stderr_tail
            );
        }
        Ok(())
    }

    fn mux_audio(&self, audio_path: &Path) -> Result<()> {
        let args = ffmpeg_mux_args(&self.video_path, audio_path, &self.output_path);
        debug!(args = %args.join(" "), "muxing audio");
        let child = spawn_tool(
            &self.tools.ffmpeg,
            self.tools.mode_label(),
            &args,
            Stdio::null(),
            Stdio::null(),
            Stdio::piped(),
        )?;
        let output = child
            .wait_with_output()
            .context("failed waiting for ffmpeg mux process")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "ffmpeg mux failed with status {} (stderr_tail='{}')",
                output.status,
                last_n_chars(&stderr, 500)
            );
        }
        Ok(())
    }

    fn promote_video(&self) -> Result<()> {
        fs::rename(&self.video_path, &self.output_path).with_context(|| {
            format!(
                "failed to move encoded video {} to {}",
                self.video_path.display(),
                self.output_path.display()
            )
        })
    }
}

impl FrameSink for FfmpegEncoder {
    fn encode_frame(&mut self, frame: PixelFrame) -> Result<()> {
        if frame.width() != self.settings.width || frame.height() != self.settings.height {
            bail!(
                "frame is {}x{} but encoder expects {}x{}",
                frame.width(),
                frame.height(),
                self.settings.width,
                self.settings.height
            );
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("encoder has already been finalized"))?;
        stdin
            .write_all(frame.as_bytes())
            .context("failed to write frame to ffmpeg stdin")?;
        self.frames_written += 1;
        Ok(())
    }

    fn write_audio_packet(&mut self, packet: AudioPacket) -> Result<()> {
        let audio = self
            .audio
            .as_mut()
            .ok_or_else(|| anyhow!("no audio stream was added to the encoder"))?;
        audio
            .writer
            .write_all(packet.as_bytes())
            .with_context(|| format!("failed to stage audio packet in {}", audio.path.display()))?;
        audio.bytes += packet.len() as u64;
        Ok(())
    }

    fn finalize(mut self: Box<Self>) -> Result<()> {
        self.finish_video()?;

        let Some(audio) = self.audio.take() else {
            self.promote_video()?;
            info!(output = %self.output_path.display(), frames = self.frames_written, "encoded video");
            return Ok(());
        };

        let AudioStaging {
            path: audio_path,
            mut writer,
            bytes,
        } = audio;
        let flushed = writer.flush();
        drop(writer);

        let result = if bytes == 0 {
            warn!("audio stream was empty; writing video only");
            self.promote_video()
        } else if let Err(error) = flushed {
            warn!(%error, path = %audio_path.display(), "failed to flush staged audio; writing video only");
            self.promote_video()
        } else {
            match self.mux_audio(&audio_path) {
                Ok(()) => {
                    let _ = fs::remove_file(&self.video_path);
                    Ok(())
                }
                Err(error) => {
                    warn!(error = %format!("{error:#}"), "audio mux failed; keeping video-only output");
                    self.promote_video()
                        .and(Err(error.context("output was written without audio")))
                }
            }
        };
        let _ = fs::remove_file(&audio_path);

        if result.is_ok() {
            info!(
                output = %self.output_path.display(),
                frames = self.frames_written,
                audio_bytes = bytes,
                "encoded video with audio"
            );
        }
        result
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(audio) = self.audio.take() {
            drop(audio.writer);
            let _ = fs::remove_file(&audio.path);
        }
        if self.video_path.exists() {
            let _ = fs::remove_file(&self.video_path);
        }
    }
}

fn validate_output_path(output_path: &Path) -> Result<()> {
    let path_str = output_path.to_string_lossy();
    if path_str.len() > 1024 {
        bail!("Output path is suspiciously long");
    }
    if path_str.chars().any(|c| c.is_control()) {
        bail!("Output path contains invalid control characters");
    }
    if output_path.file_name().is_none() {
        bail!("Output path '{}' has no file name", output_path.display());
    }
    Ok(())
}

pub fn check_output_extension(path: &Path) -> Result<()> {
    check_container(path, &OUTPUT_EXTENSIONS, "H.264 output container")
}

/// Hidden sibling of `output_path` used while encoding.
pub fn staging_path(output_path: &Path, role: &str, extension: Option<&str>) -> PathBuf {
    let stem = output_path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("output");
    let extension = extension
        .map(str::to_owned)
        .or_else(|| {
            output_path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(str::to_owned)
        })
        .unwrap_or_else(|| "mp4".to_owned());
    output_path.with_file_name(format!(".{stem}.{role}-staging.{extension}"))
}

pub fn ffmpeg_encode_args(settings: &EncoderSettings, output_path: &Path) -> Vec<String> {
    let mut args = ffmpeg_rawvideo_input_args(settings.width, settings.height, settings.frame_rate);
    args.extend(ffmpeg_h264_output_args(settings));
    args.push(output_path.to_string_lossy().into_owned());
    args
}

pub fn ffmpeg_rawvideo_input_args(width: u32, height: u32, frame_rate: FrameRate) -> Vec<String> {
    vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
        "-y".to_owned(),
        "-f".to_owned(),
        "rawvideo".to_owned(),
        "-pix_fmt".to_owned(),
        "rgb24".to_owned(),
        "-s:v".to_owned(),
        format!("{width}x{height}"),
        "-r".to_owned(),
        frame_rate.to_ffmpeg_arg(),
        "-i".to_owned(),
        "-".to_owned(),
        "-an".to_owned(),
    ]
}

pub fn ffmpeg_h264_output_args(settings: &EncoderSettings) -> Vec<String> {
    let mut args = vec![
        "-c:v".to_owned(),
        "libx264".to_owned(),
        "-preset".to_owned(),
        "medium".to_owned(),
        "-b:v".to_owned(),
        settings.bitrate.to_string(),
        "-g".to_owned(),
        GOP_SIZE.to_string(),
        "-bf".to_owned(),
        MAX_B_FRAMES.to_string(),
        "-pix_fmt".to_owned(),
        "yuv420p".to_owned(),
    ];
    // yuv420p needs even dimensions.
    if settings.width % 2 != 0 || settings.height % 2 != 0 {
        args.push("-vf".to_owned());
        args.push("pad=ceil(iw/2)*2:ceil(ih/2)*2".to_owned());
    }
    args
}

pub fn ffmpeg_mux_args(video_path: &Path, audio_path: &Path, output_path: &Path) -> Vec<String> {
    vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
        "-y".to_owned(),
        "-i".to_owned(),
        video_path.to_string_lossy().into_owned(),
        "-i".to_owned(),
        audio_path.to_string_lossy().into_owned(),
        "-map".to_owned(),
        "0:v:0".to_owned(),
        "-map".to_owned(),
        "1:a:0".to_owned(),
        "-c".to_owned(),
        "copy".to_owned(),
        "-shortest".to_owned(),
        output_path.to_string_lossy().into_owned(),
    ]
}

fn read_stderr_tail(stderr: &mut Option<ChildStderr>) -> Result<String> {
    let Some(mut pipe) = stderr.take() else {
        return Ok(String::new());
    };
    let mut buf = Vec::new();
    pipe.read_to_end(&mut buf)
        .context("failed reading ffmpeg stderr")?;
    let text = String::from_utf8_lossy(&buf).to_string();
    Ok(last_n_chars(&text, 500))
}

pub(crate) fn last_n_chars(s: &str, max_chars: usize) -> String {
    let mut chars = s.chars().collect::<Vec<_>>();
    if chars.len() > max_chars {
        chars = chars[chars.len().saturating_sub(max_chars)..].to_vec();
    }
    chars.into_iter().collect::<String>().trim().to_owned()
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{
        check_output_extension, ffmpeg_encode_args, ffmpeg_h264_output_args, ffmpeg_mux_args,
        last_n_chars, staging_path, EncoderSettings, FfmpegEncoder, FfmpegMode, FfmpegTools,
    };
    use crate::error_codes::{find_coded_error, UNSUPPORTED_FILE_TYPE};
    use crate::media::FrameRate;

    fn settings(width: u32, height: u32) -> EncoderSettings {
        EncoderSettings {
            width,
            height,
            frame_rate: FrameRate::new(30000, 1001),
            bitrate: 400_000,
        }
    }

    #[test]
    fn encode_args_describe_rgb24_stdin_and_h264_output() {
        let args = ffmpeg_encode_args(&settings(640, 360), Path::new("/tmp/out.mp4"));
        let joined = args.join(" ");
        assert!(joined.contains("-f rawvideo -pix_fmt rgb24 -s:v 640x360 -r 30000/1001 -i -"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-b:v 400000 -g 12 -bf 1 -pix_fmt yuv420p"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mp4"));
        assert!(!args.iter().any(|arg| arg == "-vf"));
    }

    #[test]
    fn webm_output_is_rejected_before_ffmpeg_starts() {
        assert!(check_output_extension(Path::new("ascii.MKV")).is_ok());
        let error = check_output_extension(Path::new("/tmp/ascii.webm")).expect_err("webm rejected");
        assert_eq!(find_coded_error(&error).map(|e| e.code), Some(UNSUPPORTED_FILE_TYPE));

        let tools = FfmpegTools::system();
        let error = FfmpegEncoder::init(&tools, Path::new("/tmp/ascii.webm"), settings(64, 48))
            .err()
            .expect("encoder refuses webm");
        assert_eq!(find_coded_error(&error).map(|e| e.code), Some(UNSUPPORTED_FILE_TYPE));
    }

    #[test]
    fn odd_dimensions_are_padded() {
        let args = ffmpeg_h264_output_args(&settings(641, 360));
        let vf = args.iter().position(|arg| arg == "-vf").expect("pad filter");
        assert_eq!(args[vf + 1], "pad=ceil(iw/2)*2:ceil(ih/2)*2");
    }

    #[test]
    fn mux_copies_video_and_first_audio_stream() {
        let args = ffmpeg_mux_args(Path::new("v.mp4"), Path::new("a.mka"), Path::new("out.mp4"));
        assert_eq!(
            args[4..].join(" "),
            "-i v.mp4 -i a.mka -map 0:v:0 -map 1:a:0 -c copy -shortest out.mp4"
        );
    }

    #[test]
    fn staging_paths_are_hidden_siblings() {
        let out = Path::new("/videos/clip.mov");
        assert_eq!(
            staging_path(out, "video", None),
            Path::new("/videos/.clip.video-staging.mov")
        );
        assert_eq!(
            staging_path(out, "audio", Some("mka")),
            Path::new("/videos/.clip.audio-staging.mka")
        );
    }

    #[test]
    fn system_mode_uses_path_binaries() {
        let tools = FfmpegTools::resolve(FfmpegMode::Auto).expect("tools");
        assert_eq!(tools.ffmpeg, Path::new("ffmpeg"));
        assert_eq!(tools.ffprobe, Path::new("ffprobe"));
        assert_eq!(tools.mode_label(), "auto");
    }

    #[test]
    fn stderr_tail_keeps_last_chars() {
        assert_eq!(last_n_chars("  abcdef ", 4), "def");
        assert_eq!(last_n_chars("abc", 10), "abc");
    }
}
