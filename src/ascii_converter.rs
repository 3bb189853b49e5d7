//! Block-luminance sampling of RGB frames into symbol grids.

use thiserror::Error;
use tracing::{debug, warn};

use crate::ascii_grid::{Cell, Grid, Rgb};
use crate::charset::Charset;
use crate::media::PixelFrame;

pub const DEFAULT_BLOCK_WIDTH: u32 = 4;
pub const DEFAULT_BLOCK_HEIGHT: u32 = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConvertError {
    #[error("converter was used before init")]
    NotInitialized,
    #[error("invalid converter geometry: {0}")]
    InvalidGeometry(String),
    #[error(
        "frame is {actual_width}x{actual_height} but converter was initialized for {expected_width}x{expected_height}"
    )]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },
}

/// Geometry fixed by [`AsciiConverter::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    pub source_width: u32,
    pub source_height: u32,
    pub block_width: u32,
    pub block_height: u32,
    pub cols: usize,
    pub rows: usize,
}

impl BlockLayout {
    /// Blocks larger than the source are clamped to it, so every layout has at
    /// least one row and one column.
    pub fn new(
        source_width: u32,
        source_height: u32,
        block_width: u32,
        block_height: u32,
    ) -> Result<Self, ConvertError> {
        if source_width == 0 || source_height == 0 {
            return Err(ConvertError::InvalidGeometry(format!(
                "source dimensions must be > 0, got {source_width}x{source_height}"
            )));
        }
        if block_width == 0 || block_height == 0 {
            return Err(ConvertError::InvalidGeometry(format!(
                "block dimensions must be > 0, got {block_width}x{block_height}"
            )));
        }

        let clamped_width = block_width.min(source_width);
        let clamped_height = block_height.min(source_height);
        if clamped_width != block_width || clamped_height != block_height {
            warn!(
                requested = %format!("{block_width}x{block_height}"),
                clamped = %format!("{clamped_width}x{clamped_height}"),
                source = %format!("{source_width}x{source_height}"),
                "block size exceeds source frame; clamping"
            );
        }

        Ok(Self {
            source_width,
            source_height,
            block_width: clamped_width,
            block_height: clamped_height,
            cols: (source_width / clamped_width) as usize,
            rows: (source_height / clamped_height) as usize,
        })
    }
}

/// Integer BT.601 luma of one pixel.
pub fn luminance(r: u8, g: u8, b: u8) -> u32 {
    (u32::from(r) * 299 + u32::from(g) * 587 + u32::from(b) * 114) / 1000
}

#[derive(Debug, Clone)]
pub struct AsciiConverter {
    layout: Option<BlockLayout>,
    charset: Charset,
}

impl AsciiConverter {
    pub fn new(charset: Charset) -> Self {
        Self {
            layout: None,
            charset,
        }
    }

    pub fn init(
        &mut self,
        source_width: u32,
        source_height: u32,
        block_width: u32,
        block_height: u32,
    ) -> Result<BlockLayout, ConvertError> {
        let layout = BlockLayout::new(source_width, source_height, block_width, block_height)?;
        debug!(
            cols = layout.cols,
            rows = layout.rows,
            block_width = layout.block_width,
            block_height = layout.block_height,
            "converter initialized"
        );
        self.layout = Some(layout);
        Ok(layout)
    }

    /// Takes effect on the next `convert`.
    pub fn set_charset(&mut self, charset: Charset) {
        self.charset = charset;
    }

    pub fn charset(&self) -> &Charset {
        &self.charset
    }

    pub fn layout(&self) -> Option<BlockLayout> {
        self.layout
    }

    pub fn convert(&self, frame: &PixelFrame, color_enabled: bool) -> Result<Grid, ConvertError> {
        let layout = self.layout.ok_or(ConvertError::NotInitialized)?;
        if frame.width() != layout.source_width || frame.height() != layout.source_height {
            return Err(ConvertError::DimensionMismatch {
                expected_width: layout.source_width,
                expected_height: layout.source_height,
                actual_width: frame.width(),
                actual_height: frame.height(),
            });
        }

        let pixels = frame.as_bytes();
        let stride = layout.source_width as usize * 3;
        let block_width = layout.block_width as usize;
        let block_height = layout.block_height as usize;
        let source_width = layout.source_width as usize;
        let source_height = layout.source_height as usize;
        let mut grid = Grid::blank(layout.rows, layout.cols);

        for row in 0..layout.rows {
            let y0 = row * block_height;
            let y1 = (y0 + block_height).min(source_height);
            for col in 0..layout.cols {
                let x0 = col * block_width;
                let x1 = (x0 + block_width).min(source_width);

                let mut sums = [0_u64; 3];
                let mut luma_sum = 0_u64;
                let mut count = 0_u64;
                for y in y0..y1 {
                    let line = &pixels[y * stride..(y + 1) * stride];
                    for px in line[x0 * 3..x1 * 3].chunks_exact(3) {
                        sums[0] += u64::from(px[0]);
                        sums[1] += u64::from(px[1]);
                        sums[2] += u64::from(px[2]);
                        luma_sum += u64::from(luminance(px[0], px[1], px[2]));
                        count += 1;
                    }
                }

                grid.set(row, col, self.block_cell(sums, luma_sum, count, color_enabled));
            }
        }

        Ok(grid)
    }

    fn block_cell(&self, sums: [u64; 3], luma_sum: u64, count: u64, color_enabled: bool) -> Cell {
        if count == 0 {
            return Cell::BLANK;
        }
        let average = ((luma_sum + count / 2) / count).min(255) as u8;
        let symbol = self.charset.symbol_for_luminance(average);
        let color = if color_enabled {
            Rgb::new(
                (sums[0] / count) as u8,
                (sums[1] / count) as u8,
                (sums[2] / count) as u8,
            )
        } else {
            Rgb::WHITE
        };
        Cell::new(symbol, color)
    }
}

#[cfg(test)]
mod tests {
    use super::{luminance, AsciiConverter, ConvertError};
    use crate::ascii_grid::Rgb;
    use crate::charset::{Charset, CharsetPreset};
    use crate::media::PixelFrame;

    fn converter(ramp: &str, width: u32, height: u32, block_w: u32, block_h: u32) -> AsciiConverter {
        let mut converter = AsciiConverter::new(Charset::from_ramp(ramp).expect("charset"));
        converter
            .init(width, height, block_w, block_h)
            .expect("converter init");
        converter
    }

    #[test]
    fn grid_dimensions_floor_divide_source() {
        let converter = converter(" .@", 37, 21, 4, 8);
        let grid = converter
            .convert(&PixelFrame::black(37, 21), true)
            .expect("convert");
        assert_eq!(grid.rows(), 21 / 8);
        assert_eq!(grid.cols(), 37 / 4);
    }

    #[test]
    fn mid_gray_maps_to_space_on_two_symbol_ramp() {
        assert_eq!(luminance(128, 128, 128), 128);
        let converter = converter(" @", 16, 16, 4, 4);
        let grid = converter
            .convert(&PixelFrame::filled(16, 16, [128, 128, 128]), true)
            .expect("convert");
        assert!(grid.cells().iter().all(|cell| cell.symbol == ' '));
    }

    #[test]
    fn extremes_map_to_ramp_ends() {
        let converter = converter(" .@", 8, 8, 4, 4);
        let white = converter
            .convert(&PixelFrame::filled(8, 8, [255, 255, 255]), true)
            .expect("convert");
        assert!(white.cells().iter().all(|cell| cell.symbol == '@'));
        let black = converter
            .convert(&PixelFrame::black(8, 8), true)
            .expect("convert");
        assert!(black.cells().iter().all(|cell| cell.symbol == ' '));
    }

    #[test]
    fn oversized_block_is_clamped_to_source() {
        let converter = converter(" .@", 4, 4, 8, 8);
        let layout = converter.layout().expect("layout");
        assert_eq!((layout.block_width, layout.block_height), (4, 4));
        let grid = converter
            .convert(&PixelFrame::filled(4, 4, [255, 255, 255]), true)
            .expect("convert");
        assert_eq!((grid.rows(), grid.cols()), (1, 1));
        assert_eq!(grid.get(0, 0).map(|cell| cell.symbol), Some('@'));
    }

    #[test]
    fn uniform_frame_yields_uniform_cells() {
        let converter = converter(CharsetPreset::Detailed.ramp(), 24, 16, 4, 8);
        let grid = converter
            .convert(&PixelFrame::filled(24, 16, [200, 100, 50]), true)
            .expect("convert");
        let first = *grid.get(0, 0).expect("cell");
        assert_eq!(first.color, Rgb::new(200, 100, 50));
        assert!(grid.cells().iter().all(|cell| *cell == first));
    }

    #[test]
    fn color_disabled_uses_white() {
        let converter = converter(" @", 8, 8, 4, 4);
        let grid = converter
            .convert(&PixelFrame::filled(8, 8, [10, 200, 30]), false)
            .expect("convert");
        assert!(grid.cells().iter().all(|cell| cell.color == Rgb::WHITE));
    }

    #[test]
    fn block_color_is_truncated_channel_mean() {
        // Two pixels per block: (0,0,0) and (255,255,1).
        let data = vec![0, 0, 0, 255, 255, 1];
        let frame = PixelFrame::from_rgb(2, 1, data).expect("frame");
        let converter = converter(" @", 2, 1, 2, 1);
        let grid = converter.convert(&frame, true).expect("convert");
        assert_eq!(grid.get(0, 0).map(|cell| cell.color), Some(Rgb::new(127, 127, 0)));
    }

    #[test]
    fn trailing_pixels_outside_full_blocks_are_ignored() {
        // 5 columns with 4-wide blocks: column 4 is bright but never sampled.
        let mut frame = PixelFrame::black(5, 4);
        for y in 0..4 {
            let idx = (y * 5 + 4) * 3;
            frame.as_bytes_mut()[idx..idx + 3].copy_from_slice(&[255, 255, 255]);
        }
        let converter = converter(" @", 5, 4, 4, 4);
        let grid = converter.convert(&frame, true).expect("convert");
        assert_eq!(grid.to_text(), " \n");
    }

    #[test]
    fn set_charset_applies_to_next_convert() {
        let mut converter = converter(" @", 4, 4, 4, 4);
        let frame = PixelFrame::filled(4, 4, [255, 255, 255]);
        assert_eq!(converter.convert(&frame, true).expect("convert").to_text(), "@\n");
        converter.set_charset(Charset::from_ramp(".#").expect("charset"));
        assert_eq!(converter.convert(&frame, true).expect("convert").to_text(), "#\n");
    }

    #[test]
    fn convert_before_init_and_wrong_size_are_errors() {
        let uninit = AsciiConverter::new(Charset::default());
        assert_eq!(
            uninit.convert(&PixelFrame::black(4, 4), true),
            Err(ConvertError::NotInitialized)
        );
        let converter = converter(" @", 8, 8, 4, 4);
        assert!(matches!(
            converter.convert(&PixelFrame::black(4, 4), true),
            Err(ConvertError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn zero_block_size_is_rejected() {
        let mut converter = AsciiConverter::new(Charset::default());
        assert!(matches!(
            converter.init(8, 8, 0, 4),
            Err(ConvertError::InvalidGeometry(_))
        ));
    }
}
