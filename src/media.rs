use anyhow::{bail, Result};
use serde::Serialize;

/// Tightly packed RGB24 frame, row-major with no row padding.
///
/// Frames are moved between stages, never cloned.
#[derive(Debug, PartialEq, Eq)]
pub struct PixelFrame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelFrame {
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = rgb_len(width, height);
        if data.len() != expected {
            bail!(
                "rgb buffer for {}x{} frame must be {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            );
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn black(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; rgb_len(width, height)],
        }
    }

    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let mut data = Vec::with_capacity(rgb_len(width, height));
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&rgb);
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.data[idx], self.data[idx + 1], self.data[idx + 2]])
    }
}

pub fn rgb_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

/// One undecoded chunk of the source audio stream, forwarded byte for byte.
#[derive(Debug, PartialEq, Eq)]
pub struct AudioPacket {
    data: Vec<u8>,
}

impl AudioPacket {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Parses ffprobe's `30000/1001` style rates. A bare integer is accepted too.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (num, den) = match raw.split_once('/') {
            Some((num, den)) => (num.trim().parse().ok()?, den.trim().parse().ok()?),
            None => (raw.parse().ok()?, 1),
        };
        if num == 0 || den == 0 {
            return None;
        }
        Some(Self { num, den })
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    /// ffmpeg `-r` argument form.
    pub fn to_ffmpeg_arg(self) -> String {
        if self.den == 1 {
            self.num.to_string()
        } else {
            format!("{}/{}", self.num, self.den)
        }
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self { num: 25, den: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    pub duration_seconds: Option<f64>,
    pub bit_rate: Option<u64>,
    pub pixel_format: Option<String>,
    pub has_audio: bool,
}

impl VideoMetadata {
    pub fn fps(&self) -> f64 {
        self.frame_rate.as_f64()
    }

    pub fn estimated_total_frames(&self) -> Option<u64> {
        let duration = self.duration_seconds?;
        if !duration.is_finite() || duration <= 0.0 {
            return None;
        }
        Some((duration * self.fps()).floor() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::{FrameRate, PixelFrame, VideoMetadata};

    #[test]
    fn from_rgb_rejects_mismatched_length() {
        assert!(PixelFrame::from_rgb(2, 2, vec![0; 11]).is_err());
        let frame = PixelFrame::from_rgb(2, 2, vec![0; 12]).expect("frame");
        assert_eq!(frame.as_bytes().len(), 12);
    }

    #[test]
    fn pixel_reads_row_major_triplets() {
        let mut frame = PixelFrame::black(3, 2);
        let idx = (1 * 3 + 2) * 3;
        frame.as_bytes_mut()[idx..idx + 3].copy_from_slice(&[1, 2, 3]);
        assert_eq!(frame.pixel(2, 1), Some([1, 2, 3]));
        assert_eq!(frame.pixel(3, 0), None);
    }

    #[test]
    fn frame_rate_parses_ffprobe_fractions() {
        assert_eq!(FrameRate::parse("30000/1001"), Some(FrameRate::new(30000, 1001)));
        assert_eq!(FrameRate::parse("24"), Some(FrameRate::new(24, 1)));
        assert_eq!(FrameRate::parse("0/0"), None);
        assert_eq!(FrameRate::new(24, 1).to_ffmpeg_arg(), "24");
    }

    #[test]
    fn total_frames_floor_duration_times_fps() {
        let metadata = VideoMetadata {
            width: 64,
            height: 48,
            frame_rate: FrameRate::new(25, 1),
            duration_seconds: Some(2.03),
            bit_rate: None,
            pixel_format: Some("yuv420p".to_owned()),
            has_audio: false,
        };
        assert_eq!(metadata.estimated_total_frames(), Some(50));
    }
}
