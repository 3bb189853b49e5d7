use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn channels(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }
}

impl From<[u8; 3]> for Rgb {
    fn from(value: [u8; 3]) -> Self {
        Self::new(value[0], value[1], value[2])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub symbol: char,
    pub color: Rgb,
}

impl Cell {
    pub const BLANK: Cell = Cell {
        symbol: ' ',
        color: Rgb::BLACK,
    };

    pub fn new(symbol: char, color: Rgb) -> Self {
        Self { symbol, color }
    }
}

/// Row-major matrix of cells produced for one frame.
#[derive(Debug, PartialEq, Eq)]
pub struct Grid {
    rows: usize,
    cols: usize,
    cells: Vec<Cell>,
}

impl Grid {
    pub fn blank(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            cells: vec![Cell::BLANK; rows * cols],
        }
    }

    /// Builds a grid from text lines, padding short lines with blanks and
    /// giving every symbol the same color.
    pub fn from_lines<I>(lines: I, cols: usize, rows: usize, color: Rgb) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut grid = Self::blank(rows, cols);
        for (row, line) in lines.into_iter().take(rows).enumerate() {
            for (col, symbol) in line.as_ref().chars().take(cols).enumerate() {
                grid.set(row, col, Cell::new(symbol, color));
            }
        }
        grid
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&Cell> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.cells.get(row * self.cols + col)
    }

    pub fn set(&mut self, row: usize, col: usize, cell: Cell) {
        if row < self.rows && col < self.cols {
            self.cells[row * self.cols + col] = cell;
        }
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Cells with their (row, col) position, in row-major order.
    pub fn iter_positioned(&self) -> impl Iterator<Item = (usize, usize, &Cell)> + '_ {
        let cols = self.cols.max(1);
        self.cells
            .iter()
            .enumerate()
            .map(move |(index, cell)| (index / cols, index % cols, cell))
    }

    pub fn to_text(&self) -> String {
        if self.rows == 0 || self.cols == 0 {
            return String::new();
        }
        let mut value = String::with_capacity(self.rows * (self.cols + 1));
        for row in self.cells.chunks_exact(self.cols) {
            value.extend(row.iter().map(|cell| cell.symbol));
            value.push('\n');
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use super::{Cell, Grid, Rgb};

    #[test]
    fn from_lines_pads_short_rows() {
        let grid = Grid::from_lines(["AB", "C"], 3, 3, Rgb::WHITE);
        assert_eq!(grid.to_text(), "AB \nC  \n   \n");
        assert_eq!(grid.get(1, 1), Some(&Cell::BLANK));
        assert_eq!(grid.get(0, 0).map(|cell| cell.color), Some(Rgb::WHITE));
    }

    #[test]
    fn positioned_iteration_is_row_major() {
        let grid = Grid::from_lines(["ab", "cd"], 2, 2, Rgb::WHITE);
        let order = grid
            .iter_positioned()
            .map(|(row, col, cell)| (row, col, cell.symbol))
            .collect::<Vec<_>>();
        assert_eq!(order, vec![(0, 0, 'a'), (0, 1, 'b'), (1, 0, 'c'), (1, 1, 'd')]);
    }

    #[test]
    fn out_of_range_set_is_ignored() {
        let mut grid = Grid::blank(1, 1);
        grid.set(4, 4, Cell::new('x', Rgb::WHITE));
        assert_eq!(grid.to_text(), " \n");
    }
}
