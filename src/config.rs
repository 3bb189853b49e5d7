use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::ascii_converter::{DEFAULT_BLOCK_HEIGHT, DEFAULT_BLOCK_WIDTH};
use crate::charset::{Charset, CharsetPreset};
use crate::encoding::{FfmpegMode, DEFAULT_BITRATE};
use crate::error_codes::{CodedError, INVALID_CONFIG};

/// Job settings as written in a YAML file. Every field is optional.
///
/// ```yaml
/// preset: standard
/// block_width: 6
/// block_height: 12
/// color: false
/// max_frames: 300
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FilterConfig {
    pub preset: Option<CharsetPreset>,
    pub ramp: Option<String>,
    pub block_width: u32,
    pub block_height: u32,
    pub color: bool,
    pub max_frames: Option<u64>,
    pub audio: bool,
    pub font: Option<PathBuf>,
    pub font_size: Option<f32>,
    pub bitrate: u64,
    pub ffmpeg: FfmpegMode,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            preset: None,
            ramp: None,
            block_width: DEFAULT_BLOCK_WIDTH,
            block_height: DEFAULT_BLOCK_HEIGHT,
            color: true,
            max_frames: None,
            audio: true,
            font: None,
            font_size: None,
            bitrate: DEFAULT_BITRATE,
            ffmpeg: FfmpegMode::Auto,
        }
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub preset: Option<CharsetPreset>,
    pub ramp: Option<String>,
    pub block: Option<(u32, u32)>,
    pub no_color: bool,
    pub max_frames: Option<u64>,
    pub no_audio: bool,
    pub font: Option<PathBuf>,
    pub font_size: Option<f32>,
    pub bitrate: Option<u64>,
    pub ffmpeg: Option<FfmpegMode>,
}

/// Validated, immutable settings handed to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub charset: Charset,
    pub charset_label: String,
    pub block_width: u32,
    pub block_height: u32,
    pub color_enabled: bool,
    pub max_frames: Option<u64>,
    pub audio_enabled: bool,
    pub font: Option<PathBuf>,
    pub font_size: f32,
    pub bitrate: u64,
    pub ffmpeg: FfmpegMode,
}

impl FilterConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut config = Self::from_yaml_str(&contents)
            .with_context(|| format!("invalid config {}", path.display()))?;

        // Relative font paths are relative to the config file.
        if let Some(font) = config.font.as_mut() {
            if font.is_relative() {
                let base = path
                    .parent()
                    .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
                *font = base.join(&*font);
            }
        }
        Ok(config)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents).map_err(|error| {
            let location = error
                .location()
                .map(|location| format!("line {}, column {}", location.line(), location.column()))
                .unwrap_or_else(|| "unknown location".to_owned());
            anyhow!(CodedError::usage(
                INVALID_CONFIG,
                format!("failed to parse yaml at {location}: {error}"),
            ))
        })
    }

    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        // A ramp on the command line replaces a preset from the file and
        // vice versa.
        if let Some(preset) = overrides.preset {
            self.preset = Some(preset);
            self.ramp = None;
        }
        if let Some(ramp) = overrides.ramp.as_ref() {
            self.ramp = Some(ramp.clone());
            self.preset = None;
        }
        if let Some((width, height)) = overrides.block {
            self.block_width = width;
            self.block_height = height;
        }
        if overrides.no_color {
            self.color = false;
        }
        if let Some(max_frames) = overrides.max_frames {
            self.max_frames = Some(max_frames);
        }
        if overrides.no_audio {
            self.audio = false;
        }
        if let Some(font) = overrides.font.as_ref() {
            self.font = Some(font.clone());
        }
        if let Some(font_size) = overrides.font_size {
            self.font_size = Some(font_size);
        }
        if let Some(bitrate) = overrides.bitrate {
            self.bitrate = bitrate;
        }
        if let Some(mode) = overrides.ffmpeg {
            self.ffmpeg = mode;
        }
    }

    pub fn resolve(&self) -> Result<ResolvedConfig> {
        let (charset, charset_label) = match (self.preset, self.ramp.as_deref()) {
            (Some(_), Some(_)) => {
                return Err(invalid("set either `preset` or `ramp`, not both", json!({})));
            }
            (_, Some(ramp)) => (
                Charset::from_ramp(ramp).map_err(|error| invalid(&error.to_string(), json!({ "ramp": ramp })))?,
                "custom".to_owned(),
            ),
            (preset, None) => {
                let preset = preset.unwrap_or_default();
                (preset.charset(), preset.name().to_owned())
            }
        };
        if self.block_width == 0 || self.block_height == 0 {
            return Err(invalid(
                "block size must be > 0",
                json!({ "block_width": self.block_width, "block_height": self.block_height }),
            ));
        }
        if self.max_frames == Some(0) {
            return Err(invalid("max_frames must be > 0", json!({ "max_frames": 0 })));
        }
        if self.bitrate == 0 {
            return Err(invalid("bitrate must be > 0", json!({ "bitrate": 0 })));
        }
        let font_size = self.font_size.unwrap_or(self.block_height as f32);
        if !font_size.is_finite() || font_size <= 0.0 {
            return Err(invalid("font_size must be > 0", json!({ "font_size": font_size })));
        }

        Ok(ResolvedConfig {
            charset,
            charset_label,
            block_width: self.block_width,
            block_height: self.block_height,
            color_enabled: self.color,
            max_frames: self.max_frames,
            audio_enabled: self.audio,
            font: self.font.clone(),
            font_size,
            bitrate: self.bitrate,
            ffmpeg: self.ffmpeg,
        })
    }
}

fn invalid(message: &str, details: serde_json::Value) -> anyhow::Error {
    CodedError::usage(INVALID_CONFIG, message).with_details(details).into()
}

/// Parses `WIDTHxHEIGHT` block sizes such as `4x8`.
pub fn parse_block_size(raw: &str) -> Result<(u32, u32)> {
    let value = raw.trim();
    let (width_raw, height_raw) = value
        .split_once('x')
        .or_else(|| value.split_once('X'))
        .ok_or_else(|| anyhow!("invalid block size '{}': expected WIDTHxHEIGHT", raw))?;
    let width = width_raw
        .trim()
        .parse::<u32>()
        .with_context(|| format!("invalid block size '{}': width must be an integer", raw))?;
    let height = height_raw
        .trim()
        .parse::<u32>()
        .with_context(|| format!("invalid block size '{}': height must be an integer", raw))?;
    if width == 0 || height == 0 {
        return Err(anyhow!("invalid block size '{}': width/height must be > 0", raw));
    }
    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use super::{parse_block_size, ConfigOverrides, FilterConfig};
    use crate::charset::CharsetPreset;
    use crate::encoding::FfmpegMode;
    use crate::error_codes::{find_coded_error, INVALID_CONFIG};

    #[test]
    fn defaults_resolve_to_detailed_ramp_and_block_height_font() {
        let resolved = FilterConfig::default().resolve().expect("resolve");
        assert_eq!(resolved.charset_label, "detailed");
        assert_eq!(resolved.charset.len(), 70);
        assert_eq!((resolved.block_width, resolved.block_height), (4, 8));
        assert_eq!(resolved.font_size, 8.0);
        assert_eq!(resolved.bitrate, 400_000);
        assert!(resolved.color_enabled && resolved.audio_enabled);
    }

    #[test]
    fn yaml_fields_override_defaults() {
        let config = FilterConfig::from_yaml_str(
            "preset: minimal\nblock_width: 6\nblock_height: 12\ncolor: false\nffmpeg: system\n",
        )
        .expect("yaml");
        assert_eq!(config.preset, Some(CharsetPreset::Minimal));
        assert_eq!(config.ffmpeg, FfmpegMode::System);
        let resolved = config.resolve().expect("resolve");
        assert_eq!(resolved.charset.to_ramp(), " .:#");
        assert!(!resolved.color_enabled);
        assert_eq!(resolved.font_size, 12.0);
    }

    #[test]
    fn unknown_yaml_keys_are_coded_errors() {
        let error = FilterConfig::from_yaml_str("colour: true\n").expect_err("typo rejected");
        assert_eq!(find_coded_error(&error).map(|e| e.code), Some(INVALID_CONFIG));
    }

    #[test]
    fn cli_ramp_replaces_file_preset() {
        let mut config = FilterConfig::from_yaml_str("preset: blocks\n").expect("yaml");
        config.apply(&ConfigOverrides {
            ramp: Some(" #".to_owned()),
            no_audio: true,
            max_frames: Some(10),
            ..ConfigOverrides::default()
        });
        let resolved = config.resolve().expect("resolve");
        assert_eq!(resolved.charset_label, "custom");
        assert_eq!(resolved.charset.to_ramp(), " #");
        assert!(!resolved.audio_enabled);
        assert_eq!(resolved.max_frames, Some(10));
    }

    #[test]
    fn conflicting_or_zero_values_are_rejected() {
        let both = FilterConfig {
            preset: Some(CharsetPreset::Standard),
            ramp: Some("ab".to_owned()),
            ..FilterConfig::default()
        };
        assert!(both.resolve().is_err());

        let zero_block = FilterConfig {
            block_width: 0,
            ..FilterConfig::default()
        };
        let error = zero_block.resolve().expect_err("zero block");
        assert_eq!(find_coded_error(&error).map(|e| e.code), Some(INVALID_CONFIG));

        let zero_frames = FilterConfig {
            max_frames: Some(0),
            ..FilterConfig::default()
        };
        assert!(zero_frames.resolve().is_err());
    }

    #[test]
    fn relative_font_is_resolved_against_config_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("filter.yaml");
        fs::write(&path, "font: fonts/mono.ttf\n").expect("write config");
        let config = FilterConfig::load(&path).expect("load");
        assert_eq!(config.font, Some(dir.path().join(PathBuf::from("fonts/mono.ttf"))));
    }

    #[test]
    fn block_size_parses_width_x_height() {
        assert_eq!(parse_block_size("4x8").expect("size"), (4, 8));
        assert_eq!(parse_block_size(" 10X20 ").expect("size"), (10, 20));
        assert!(parse_block_size("4").is_err());
        assert!(parse_block_size("0x8").is_err());
    }
}
