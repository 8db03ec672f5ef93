//! History rows evicted off the top of the primary screen.
//!
//! Rows are kept oldest first. Once `capacity` rows are stored, every new row
//! pushes out the oldest one. A capacity of zero disables history entirely.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::cell::Cell;

/// One row of cells plus its soft-wrap flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    pub cells: Vec<Cell>,
    /// Set when the row overflowed into the following one
    pub wrapped: bool,
}

impl Line {
    /// A blank row `cols` cells wide
    pub fn new(cols: usize) -> Self {
        Self::from_cells(vec![Cell::default(); cols], false)
    }

    pub fn from_cells(cells: Vec<Cell>, wrapped: bool) -> Self {
        Self { cells, wrapped }
    }

    pub fn get(&self, col: usize) -> Option<&Cell> {
        self.cells.get(col)
    }

    /// True when no cell carries a glyph
    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(Cell::is_empty)
    }

    /// Row contents as a string without wide-glyph spacers or trailing blanks
    pub fn text(&self) -> String {
        let mut out: String = self
            .cells
            .iter()
            .filter(|cell| !cell.is_wide_continuation())
            .map(Cell::display_char)
            .collect();
        let trimmed = out.trim_end().len();
        out.truncate(trimmed);
        out
    }
}

/// Bounded history of evicted rows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scrollback {
    rows: VecDeque<Line>,
    capacity: usize,
}

// Upper bound on the up-front allocation; large limits grow lazily
const INITIAL_RESERVE: usize = 1024;

impl Scrollback {
    pub fn new(capacity: usize) -> Self {
        Self {
            rows: VecDeque::with_capacity(capacity.min(INITIAL_RESERVE)),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row limit
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append `line` as the newest row, evicting the oldest at the limit
    pub fn push(&mut self, line: Line) {
        if self.capacity == 0 {
            return;
        }
        self.evict_to(self.capacity - 1);
        self.rows.push_back(line);
    }

    /// Take back the newest row, used when the screen scrolls down into history
    pub fn pop_newest(&mut self) -> Option<Line> {
        self.rows.pop_back()
    }

    /// Row at `index`, counting from the oldest
    pub fn get(&self, index: usize) -> Option<&Line> {
        self.rows.get(index)
    }

    /// Row at `index`, counting back from the newest
    pub fn get_from_end(&self, index: usize) -> Option<&Line> {
        let pos = self.rows.len().checked_sub(index + 1)?;
        self.rows.get(pos)
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Line> + ExactSizeIterator {
        self.rows.iter()
    }

    /// Change the limit; shrinking discards the oldest rows
    pub fn set_capacity(&mut self, capacity: usize) {
        self.evict_to(capacity);
        self.capacity = capacity;
    }

    fn evict_to(&mut self, keep: usize) {
        let excess = self.rows.len().saturating_sub(keep);
        self.rows.drain(..excess);
    }
}
