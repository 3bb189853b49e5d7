use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fontdue::Font;
use serde_json::json;

use crate::error_codes::{CodedError, FONT_LOAD_FAILED};

/// Monospace fonts probed, in order, when no font path is configured.
pub const SYSTEM_FONT_CANDIDATES: [&str; 10] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/dejavu/DejaVuSansMono.ttf",
    "/usr/share/fonts/TTF/DejaVuSansMono.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationMono-Regular.ttf",
    "/usr/share/fonts/liberation-mono/LiberationMono-Regular.ttf",
    "/usr/share/fonts/truetype/noto/NotoSansMono-Regular.ttf",
    "/System/Library/Fonts/Menlo.ttc",
    "/System/Library/Fonts/Monaco.ttf",
    "/Library/Fonts/Courier New.ttf",
    "C:\\Windows\\Fonts\\consola.ttf",
];

pub fn resolve_font_path(font_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = font_path {
        if !path.is_file() {
            return Err(CodedError::usage(
                FONT_LOAD_FAILED,
                format!("font file '{}' does not exist", path.display()),
            )
            .with_details(json!({ "path": path.display().to_string() }))
            .into());
        }
        return Ok(path.to_path_buf());
    }

    SYSTEM_FONT_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            CodedError::usage(
                FONT_LOAD_FAILED,
                "no monospace font found on this system; pass --font <path-to-ttf>",
            )
            .with_details(json!({ "searched": SYSTEM_FONT_CANDIDATES }))
            .into()
        })
}

pub fn read_font_bytes(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed to read font file '{}'", path.display()))
}

/// Symbols the font has no glyph for. Whitespace never needs one.
pub fn unsupported_symbols(font: &Font, symbols: &[char]) -> Vec<char> {
    let mut missing = symbols
        .iter()
        .copied()
        .filter(|ch| !ch.is_whitespace() && font.lookup_glyph_index(*ch) == 0)
        .collect::<Vec<_>>();
    missing.dedup();
    missing
}

pub fn describe_symbols(symbols: &[char]) -> String {
    symbols
        .iter()
        .map(|ch| format!("U+{:04X} ({})", *ch as u32, ch.escape_default()))
        .collect::<Vec<_>>()
        .join(", ")
}
