//! Terminal Grid
//!
//! A 2D grid of cells representing the visible terminal area, stored as one
//! flat row-major array so it can be copied into shared memory in one pass.
//! Every method takes `(row, col)` in that order.

use serde::{Deserialize, Serialize};

use super::cell::Cell;
use super::damage::DamageRect;
use super::scrollback::Line;

/// The terminal grid - `rows * cols` cells plus a wrapped flag per row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    cols: usize,
    rows: usize,
    cells: Vec<Cell>,
    /// `wrapped[r]` is set when row `r` continues on row `r + 1`
    wrapped: Vec<bool>,
}

impl Grid {
    pub fn new(cols: usize, rows: usize) -> Self {
        Self::filled(cols, rows, Cell::default())
    }

    /// A grid with every cell set to `blank`
    pub fn filled(cols: usize, rows: usize, blank: Cell) -> Self {
        Self {
            cols,
            rows,
            cells: vec![blank; cols * rows],
            wrapped: vec![false; rows],
        }
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// All cells, row-major
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut [Cell] {
        &mut self.cells
    }

    fn index(&self, row: usize, col: usize) -> Option<usize> {
        (row < self.rows && col < self.cols).then(|| row * self.cols + col)
    }

    /// Get a reference to a cell
    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        self.index(row, col).map(|i| &self.cells[i])
    }

    /// Get a mutable reference to a cell
    pub fn cell_mut(&mut self, row: usize, col: usize) -> Option<&mut Cell> {
        let i = self.index(row, col)?;
        self.cells.get_mut(i)
    }

    /// Store a cell. Out-of-bounds writes are ignored and return false.
    pub fn write(&mut self, row: usize, col: usize, cell: Cell) -> bool {
        match self.cell_mut(row, col) {
            Some(slot) => {
                *slot = cell;
                true
            }
            None => false,
        }
    }

    /// Get the cells of one row
    pub fn row(&self, row: usize) -> Option<&[Cell]> {
        (row < self.rows).then(|| &self.cells[row * self.cols..(row + 1) * self.cols])
    }

    pub fn row_mut(&mut self, row: usize) -> Option<&mut [Cell]> {
        if row >= self.rows {
            return None;
        }
        let cols = self.cols;
        Some(&mut self.cells[row * cols..(row + 1) * cols])
    }

    pub fn is_wrapped(&self, row: usize) -> bool {
        self.wrapped.get(row).copied().unwrap_or(false)
    }

    pub fn set_wrapped(&mut self, row: usize, wrapped: bool) {
        if let Some(w) = self.wrapped.get_mut(row) {
            *w = wrapped;
        }
    }

    /// Copy a row out as a scrollback line
    pub fn line(&self, row: usize) -> Option<Line> {
        self.row(row)
            .map(|cells| Line::from_cells(cells.to_vec(), self.is_wrapped(row)))
    }

    /// Replace a row with a line, cropping or padding with `blank`
    pub fn set_line(&mut self, row: usize, line: &Line, blank: Cell) {
        let wrapped = line.wrapped;
        if let Some(dst) = self.row_mut(row) {
            for (col, slot) in dst.iter_mut().enumerate() {
                *slot = line.cells.get(col).copied().unwrap_or(blank);
            }
            self.set_wrapped(row, wrapped);
        }
    }

    /// Scroll rows `top..=bottom` up by `n`, filling the bottom with `blank`.
    /// Returns the rows that left the region, top first.
    pub fn scroll_region_up(&mut self, top: usize, bottom: usize, n: usize, blank: Cell) -> Vec<Line> {
        if top > bottom || bottom >= self.rows || n == 0 {
            return Vec::new();
        }
        let n = n.min(bottom - top + 1);
        let evicted: Vec<Line> = (top..top + n).filter_map(|r| self.line(r)).collect();

        let cols = self.cols;
        let region = &mut self.cells[top * cols..(bottom + 1) * cols];
        region.rotate_left(n * cols);
        let len = region.len();
        region[len - n * cols..].fill(blank);

        let flags = &mut self.wrapped[top..=bottom];
        flags.rotate_left(n);
        let len = flags.len();
        flags[len - n..].fill(false);

        evicted
    }

    /// Scroll rows `top..=bottom` down by `n`, filling the top with `blank`.
    /// Rows pushed off the bottom are discarded.
    pub fn scroll_region_down(&mut self, top: usize, bottom: usize, n: usize, blank: Cell) {
        if top > bottom || bottom >= self.rows || n == 0 {
            return;
        }
        let n = n.min(bottom - top + 1);

        let cols = self.cols;
        let region = &mut self.cells[top * cols..(bottom + 1) * cols];
        region.rotate_right(n * cols);
        region[..n * cols].fill(blank);

        let flags = &mut self.wrapped[top..=bottom];
        flags.rotate_right(n);
        flags[..n].fill(false);
    }

    /// Insert `n` blank lines at `row`, pushing lines down to `bottom`
    pub fn insert_lines(&mut self, row: usize, n: usize, bottom: usize, blank: Cell) {
        self.scroll_region_down(row, bottom, n, blank);
    }

    /// Delete `n` lines at `row`, pulling lines up from `bottom`
    pub fn delete_lines(&mut self, row: usize, n: usize, bottom: usize, blank: Cell) {
        self.scroll_region_up(row, bottom, n, blank);
    }

    /// Insert `n` blank cells at position, shifting existing cells right
    pub fn insert_cells(&mut self, row: usize, col: usize, n: usize, blank: Cell) {
        if let Some(r) = self.row_mut(row) {
            if col >= r.len() {
                return;
            }
            let tail = &mut r[col..];
            let n = n.min(tail.len());
            tail.rotate_right(n);
            tail[..n].fill(blank);
        }
    }

    /// Delete `n` cells at position, shifting remaining cells left
    pub fn delete_cells(&mut self, row: usize, col: usize, n: usize, blank: Cell) {
        if let Some(r) = self.row_mut(row) {
            if col >= r.len() {
                return;
            }
            let tail = &mut r[col..];
            let n = n.min(tail.len());
            tail.rotate_left(n);
            let len = tail.len();
            tail[len - n..].fill(blank);
        }
    }

    /// Reset every cell inside `region` to `blank`
    pub fn clear(&mut self, region: DamageRect, blank: Cell) {
        let region = region.clamp(self.rows, self.cols);
        if region.is_empty() {
            return;
        }
        for row in region.start_row..region.end_row {
            let start = row * self.cols;
            self.cells[start + region.start_col..start + region.end_col].fill(blank);
            if region.start_col == 0 && region.end_col == self.cols {
                self.wrapped[row] = false;
            }
        }
    }

    /// Reset the whole grid to `blank`
    pub fn clear_all(&mut self, blank: Cell) {
        self.cells.fill(blank);
        self.wrapped.fill(false);
    }

    /// Change the geometry.
    ///
    /// Content stays anchored at the top-left: the overlap of the old and new
    /// geometry is kept, everything newly exposed becomes `blank`.
    pub fn resize(&mut self, cols: usize, rows: usize, blank: Cell) {
        if cols == self.cols && rows == self.rows {
            return;
        }
        let mut cells = vec![blank; cols * rows];
        let keep_cols = cols.min(self.cols);
        for row in 0..rows.min(self.rows) {
            let src = &self.cells[row * self.cols..row * self.cols + keep_cols];
            cells[row * cols..row * cols + keep_cols].copy_from_slice(src);
        }
        self.cells = cells;
        self.wrapped.resize(rows, false);
        self.cols = cols;
        self.rows = rows;
    }

    /// Length of the row's content (excluding trailing empty cells)
    pub fn content_len(&self, row: usize) -> usize {
        self.row(row)
            .and_then(|r| r.iter().rposition(|c| !c.is_empty()))
            .map(|i| i + 1)
            .unwrap_or(0)
    }

    /// Row text with wide-char padding skipped and trailing blanks trimmed
    pub fn row_text(&self, row: usize) -> String {
        self.line(row).map(|l| l.text()).unwrap_or_default()
    }

    /// Whole screen as text, one line per row
    pub fn text(&self) -> String {
        (0..self.rows)
            .map(|r| self.row_text(r))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
