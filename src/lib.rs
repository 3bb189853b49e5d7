pub mod ascii_converter;
pub mod ascii_grid;
pub mod ascii_renderer;
pub mod charset;
pub mod config;
pub mod decoding;
pub mod encoding;
pub mod error_codes;
pub mod filter_job;
pub mod font_assets;
pub mod glyph_source;
pub mod handoff;
pub mod media;
pub mod pipeline;
pub mod progress;
pub mod still;
