use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Stdio};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::encoding::{last_n_chars, spawn_tool, FfmpegTools};
use crate::error_codes::{CodedError, DECODER_OPEN_FAILED, UNSUPPORTED_FILE_TYPE};
use crate::media::{rgb_len, AudioPacket, FrameRate, PixelFrame, VideoMetadata};

pub const SUPPORTED_EXTENSIONS: [&str; 7] = ["mp4", "mkv", "avi", "mov", "flv", "webm", "wmv"];

/// Size of one opaque audio packet read from the passthrough stream.
pub const AUDIO_PACKET_BYTES: usize = 16 * 1024;

/// Producer side of the pipeline.
pub trait FrameSource: Send {
    fn metadata(&self) -> &VideoMetadata;
    fn has_audio(&self) -> bool;
    /// `Ok(None)` once the video stream is exhausted.
    fn read_frame(&mut self) -> Result<Option<PixelFrame>>;
    /// `Ok(None)` once the audio stream is exhausted or absent.
    fn read_audio_packet(&mut self) -> Result<Option<AudioPacket>>;
}

pub fn check_extension(path: &Path) -> Result<()> {
    check_container(path, &SUPPORTED_EXTENSIONS, "video container")
}

pub(crate) fn check_container(path: &Path, allowed: &[&str], what: &str) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if allowed.contains(&ext.as_str()) {
        return Ok(());
    }
    Err(CodedError::usage(
        UNSUPPORTED_FILE_TYPE,
        format!(
            "'{}' is not a supported {what}; expected one of: .{}",
            path.display(),
            allowed.join(", .")
        ),
    )
    .with_details(json!({ "path": path.display().to_string(), "extension": ext }))
    .into())
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    pix_fmt: Option<String>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

/// Reads stream metadata through `ffprobe`.
#[tracing::instrument(skip(tools), fields(mode = tools.mode_label()))]
pub fn probe(tools: &FfmpegTools, path: &Path) -> Result<VideoMetadata> {
    let args = [
        "-v",
        "error",
        "-print_format",
        "json",
        "-show_streams",
        "-show_format",
    ]
    .map(str::to_owned)
    .into_iter()
    .chain(std::iter::once(path.to_string_lossy().into_owned()))
    .collect::<Vec<_>>();
    let child = spawn_tool(
        &tools.ffprobe,
        tools.mode_label(),
        &args,
        Stdio::null(),
        Stdio::piped(),
        Stdio::piped(),
    )?;
    let output = child
        .wait_with_output()
        .context("failed waiting for ffprobe")?;
    if !output.status.success() {
        return Err(CodedError::environment(
            DECODER_OPEN_FAILED,
            format!(
                "ffprobe failed for '{}': {}",
                path.display(),
                last_n_chars(&String::from_utf8_lossy(&output.stderr), 500)
            ),
        )
        .into());
    }
    parse_probe_output(&output.stdout)
        .with_context(|| format!("failed to read stream info for '{}'", path.display()))
}

pub fn parse_probe_output(json: &[u8]) -> Result<VideoMetadata> {
    let parsed: ProbeOutput =
        serde_json::from_slice(json).context("ffprobe json parse failed")?;
    let video = parsed
        .streams
        .iter()
        .find(|stream| stream.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| anyhow!(CodedError::usage(DECODER_OPEN_FAILED, "no video stream found")))?;
    let (width, height) = match (video.width, video.height) {
        (Some(width), Some(height)) if width > 0 && height > 0 => (width, height),
        _ => {
            return Err(anyhow!(CodedError::usage(
                DECODER_OPEN_FAILED,
                "ffprobe reported no usable video dimensions",
            )))
        }
    };
    let frame_rate = [video.avg_frame_rate.as_deref(), video.r_frame_rate.as_deref()]
        .into_iter()
        .flatten()
        .find_map(FrameRate::parse)
        .unwrap_or_else(|| {
            warn!("ffprobe reported no frame rate; assuming 25 fps");
            FrameRate::default()
        });
    let format = parsed.format.as_ref();
    let duration_seconds = format
        .and_then(|format| format.duration.as_deref())
        .or(video.duration.as_deref())
        .and_then(|raw| raw.trim().parse::<f64>().ok());
    let bit_rate = video
        .bit_rate
        .as_deref()
        .or_else(|| format.and_then(|format| format.bit_rate.as_deref()))
        .and_then(|raw| raw.trim().parse::<u64>().ok());
    let has_audio = parsed
        .streams
        .iter()
        .any(|stream| stream.codec_type.as_deref() == Some("audio"));

    Ok(VideoMetadata {
        width,
        height,
        frame_rate,
        duration_seconds,
        bit_rate,
        pixel_format: video.pix_fmt.clone(),
        has_audio,
    })
}

pub fn ffmpeg_decode_video_args(input_path: &Path) -> Vec<String> {
    vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
        "-nostdin".to_owned(),
        "-i".to_owned(),
        input_path.to_string_lossy().into_owned(),
        "-map".to_owned(),
        "0:v:0".to_owned(),
        "-f".to_owned(),
        "rawvideo".to_owned(),
        "-pix_fmt".to_owned(),
        "rgb24".to_owned(),
        "-".to_owned(),
    ]
}

pub fn ffmpeg_copy_audio_args(input_path: &Path) -> Vec<String> {
    vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
        "-nostdin".to_owned(),
        "-i".to_owned(),
        input_path.to_string_lossy().into_owned(),
        "-map".to_owned(),
        "0:a:0".to_owned(),
        "-vn".to_owned(),
        "-c:a".to_owned(),
        "copy".to_owned(),
        "-f".to_owned(),
        "matroska".to_owned(),
        "-".to_owned(),
    ]
}

struct ChildStream {
    label: &'static str,
    child: Child,
    stdout: Option<ChildStdout>,
}

impl ChildStream {
    fn spawn(tools: &FfmpegTools, label: &'static str, args: &[String]) -> Result<Self> {
        let mut child = spawn_tool(
            &tools.ffmpeg,
            tools.mode_label(),
            args,
            Stdio::null(),
            Stdio::piped(),
            Stdio::inherit(),
        )?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to capture ffmpeg {label} stdout"))?;
        Ok(Self {
            label,
            child,
            stdout: Some(stdout),
        })
    }

    /// Closes the pipe and reports a non-zero exit as an error.
    fn finish(&mut self) -> Result<()> {
        drop(self.stdout.take());
        let status = self
            .child
            .wait()
            .with_context(|| format!("failed waiting for ffmpeg {} decoder", self.label))?;
        if !status.success() {
            return Err(anyhow!(
                "ffmpeg {} decoder exited with status {status}",
                self.label
            ));
        }
        Ok(())
    }
}

impl Drop for ChildStream {
    fn drop(&mut self) {
        drop(self.stdout.take());
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Decodes a container file into RGB24 frames plus an undecoded copy of its
/// first audio stream, each through its own `ffmpeg` child.
pub struct FfmpegDecoder {
    path: PathBuf,
    metadata: VideoMetadata,
    frame_len: usize,
    video: Option<ChildStream>,
    audio: Option<ChildStream>,
    frames_read: u64,
}

impl FfmpegDecoder {
    pub fn open(tools: &FfmpegTools, path: &Path, with_audio: bool) -> Result<Self> {
        check_extension(path)?;
        if !path.is_file() {
            return Err(CodedError::environment(
                DECODER_OPEN_FAILED,
                format!("input file '{}' does not exist", path.display()),
            )
            .into());
        }
        let metadata = probe(tools, path)?;
        let video = ChildStream::spawn(tools, "video", &ffmpeg_decode_video_args(path))?;
        let audio = if with_audio && metadata.has_audio {
            Some(ChildStream::spawn(tools, "audio", &ffmpeg_copy_audio_args(path))?)
        } else {
            None
        };
        debug!(
            path = %path.display(),
            width = metadata.width,
            height = metadata.height,
            fps = metadata.fps(),
            audio = audio.is_some(),
            "decoder opened"
        );
        Ok(Self {
            path: path.to_path_buf(),
            frame_len: rgb_len(metadata.width, metadata.height),
            metadata,
            video: Some(video),
            audio,
            frames_read: 0,
        })
    }
}

impl FrameSource for FfmpegDecoder {
    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    fn read_frame(&mut self) -> Result<Option<PixelFrame>> {
        let Some(stream) = self.video.as_mut() else {
            return Ok(None);
        };
        let Some(stdout) = stream.stdout.as_mut() else {
            return Ok(None);
        };
        let mut buffer = vec![0_u8; self.frame_len];
        match stdout.read_exact(&mut buffer) {
            Ok(()) => {
                self.frames_read += 1;
                PixelFrame::from_rgb(self.metadata.width, self.metadata.height, buffer).map(Some)
            }
            Err(error) if error.kind() == ErrorKind::UnexpectedEof => {
                let finished = stream.finish();
                self.video = None;
                debug!(path = %self.path.display(), frames = self.frames_read, "video stream exhausted");
                finished.map(|()| None)
            }
            Err(error) => Err(anyhow!("failed to read frame from ffmpeg: {error}")),
        }
    }

    fn read_audio_packet(&mut self) -> Result<Option<AudioPacket>> {
        let Some(stream) = self.audio.as_mut() else {
            return Ok(None);
        };
        let Some(stdout) = stream.stdout.as_mut() else {
            return Ok(None);
        };
        let mut buffer = vec![0_u8; AUDIO_PACKET_BYTES];
        loop {
            match stdout.read(&mut buffer) {
                Ok(0) => {
                    let finished = stream.finish();
                    self.audio = None;
                    return finished.map(|()| None);
                }
                Ok(len) => {
                    buffer.truncate(len);
                    return Ok(Some(AudioPacket::new(buffer)));
                }
                Err(error) if error.kind() == ErrorKind::Interrupted => continue,
                Err(error) => return Err(anyhow!("failed to read audio from ffmpeg: {error}")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{check_extension, ffmpeg_copy_audio_args, ffmpeg_decode_video_args, parse_probe_output};
    use crate::error_codes::{find_coded_error, DECODER_OPEN_FAILED, UNSUPPORTED_FILE_TYPE};
    use crate::media::FrameRate;

    #[test]
    fn container_extensions_are_case_insensitive() {
        assert!(check_extension(Path::new("clip.MP4")).is_ok());
        assert!(check_extension(Path::new("clip.webm")).is_ok());
        let error = check_extension(Path::new("notes.txt")).expect_err("txt rejected");
        assert_eq!(find_coded_error(&error).map(|e| e.code), Some(UNSUPPORTED_FILE_TYPE));
        assert!(check_extension(Path::new("no_extension")).is_err());
    }

    #[test]
    fn probe_json_yields_metadata() {
        let json = br#"{
            "streams": [
                {"codec_type": "audio", "bit_rate": "128000"},
                {"codec_type": "video", "width": 1280, "height": 720, "pix_fmt": "yuv420p",
                 "avg_frame_rate": "30000/1001", "r_frame_rate": "30/1", "bit_rate": "2500000"}
            ],
            "format": {"duration": "10.100000", "bit_rate": "2700000"}
        }"#;
        let metadata = parse_probe_output(json).expect("metadata");
        assert_eq!((metadata.width, metadata.height), (1280, 720));
        assert_eq!(metadata.frame_rate, FrameRate::new(30000, 1001));
        assert_eq!(metadata.bit_rate, Some(2_500_000));
        assert_eq!(metadata.pixel_format.as_deref(), Some("yuv420p"));
        assert!(metadata.has_audio);
        assert_eq!(metadata.estimated_total_frames(), Some(302));
    }

    #[test]
    fn probe_falls_back_to_real_frame_rate() {
        let json = br#"{"streams":[{"codec_type":"video","width":4,"height":4,"avg_frame_rate":"0/0","r_frame_rate":"24/1"}]}"#;
        let metadata = parse_probe_output(json).expect("metadata");
        assert_eq!(metadata.frame_rate, FrameRate::new(24, 1));
        assert!(!metadata.has_audio);
        assert_eq!(metadata.duration_seconds, None);
    }

    #[test]
    fn probe_without_video_is_a_coded_open_failure() {
        let json = br#"{"streams":[{"codec_type":"audio"}]}"#;
        let error = parse_probe_output(json).expect_err("no video");
        assert_eq!(find_coded_error(&error).map(|e| e.code), Some(DECODER_OPEN_FAILED));
    }

    #[test]
    fn decode_args_select_first_streams() {
        let video = ffmpeg_decode_video_args(Path::new("in.mkv")).join(" ");
        assert!(video.ends_with("-i in.mkv -map 0:v:0 -f rawvideo -pix_fmt rgb24 -"));
        let audio = ffmpeg_copy_audio_args(Path::new("in.mkv")).join(" ");
        assert!(audio.ends_with("-map 0:a:0 -vn -c:a copy -f matroska -"));
    }
}
