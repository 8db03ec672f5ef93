//! Text selection over displayed grid coordinates
//!
//! A selection is an anchor and a moving cursor plus a mode. Coordinates are
//! those of the currently displayed rows; nothing is stored about the
//! underlying content, so queries are recomputed against whatever row source
//! is passed in.

use serde::{Deserialize, Serialize};

use super::cell::Cell;
use super::grid::Grid;

/// Rows that a selection can be resolved against
pub trait RowSource {
    fn cols(&self) -> usize;
    fn rows(&self) -> usize;
    fn cell(&self, row: usize, col: usize) -> Option<&Cell>;
    /// Whether `row` continues on the next row
    fn is_wrapped(&self, row: usize) -> bool;
}

impl RowSource for Grid {
    fn cols(&self) -> usize {
        Grid::cols(self)
    }

    fn rows(&self) -> usize {
        Grid::rows(self)
    }

    fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        Grid::cell(self, row, col)
    }

    fn is_wrapped(&self, row: usize) -> bool {
        Grid::is_wrapped(self, row)
    }
}

/// A position in the displayed grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SelectionPoint {
    pub row: usize,
    pub col: usize,
}

impl SelectionPoint {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

/// Selection granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SelectionMode {
    #[default]
    None,
    /// Character-level selection (drag)
    Character,
    /// Word-level selection (double-click)
    Word,
    /// Line-level selection (triple-click)
    Line,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Selection {
    anchor: SelectionPoint,
    cursor: SelectionPoint,
    mode: SelectionMode,
}

/// Cells that join into a word with their neighbours
fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a selection: anchor and cursor both at (row, col)
    pub fn start(&mut self, row: usize, col: usize, mode: SelectionMode) {
        let point = SelectionPoint::new(row, col);
        self.anchor = point;
        self.cursor = point;
        self.mode = mode;
    }

    /// Move the selection cursor; ignored when nothing is selected
    pub fn extend(&mut self, row: usize, col: usize) {
        if self.is_active() {
            self.cursor = SelectionPoint::new(row, col);
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_active(&self) -> bool {
        self.mode != SelectionMode::None
    }

    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    pub fn anchor(&self) -> SelectionPoint {
        self.anchor
    }

    pub fn cursor(&self) -> SelectionPoint {
        self.cursor
    }

    /// Anchor and cursor in reading order
    pub fn normalized(&self) -> (SelectionPoint, SelectionPoint) {
        if self.anchor <= self.cursor {
            (self.anchor, self.cursor)
        } else {
            (self.cursor, self.anchor)
        }
    }

    /// Inclusive start and end after mode expansion, clamped to the source
    pub fn bounds<S: RowSource + ?Sized>(&self, source: &S) -> Option<(SelectionPoint, SelectionPoint)> {
        let (rows, cols) = (source.rows(), source.cols());
        if !self.is_active() || rows == 0 || cols == 0 {
            return None;
        }
        let clamp = |p: SelectionPoint| SelectionPoint::new(p.row.min(rows - 1), p.col.min(cols - 1));
        let (start, end) = self.normalized();
        let (start, end) = (clamp(start), clamp(end));

        match self.mode {
            SelectionMode::None => None,
            SelectionMode::Character => Some((start, end)),
            SelectionMode::Word => Some((word_start(source, start), word_end(source, end))),
            SelectionMode::Line => Some((
                SelectionPoint::new(start.row, 0),
                SelectionPoint::new(end.row, cols - 1),
            )),
        }
    }

    /// Check if the cell at (row, col) is selected
    pub fn contains<S: RowSource + ?Sized>(&self, source: &S, row: usize, col: usize) -> bool {
        let Some((start, end)) = self.bounds(source) else {
            return false;
        };
        let point = SelectionPoint::new(row, col);
        start <= point && point <= end
    }

    /// Extract the selected text.
    ///
    /// Wide-character trailing cells are skipped. A newline separates rows
    /// unless the earlier row is soft-wrapped; trailing blanks are trimmed
    /// where a hard line ends, except for a single-cell selection.
    pub fn text<S: RowSource + ?Sized>(&self, source: &S) -> String {
        let Some((start, end)) = self.bounds(source) else {
            return String::new();
        };
        let cols = source.cols();
        let single_cell = start == end;
        let mut out = String::new();

        for row in start.row..=end.row {
            let first = if row == start.row { start.col } else { 0 };
            let last = if row == end.row { end.col } else { cols - 1 };
            let mut segment = String::new();
            for col in first..=last {
                let Some(cell) = source.cell(row, col) else {
                    break;
                };
                if cell.is_wide_continuation() {
                    continue;
                }
                segment.push(cell.display_char());
            }

            let wrapped = source.is_wrapped(row);
            if last == cols - 1 && !wrapped && !single_cell {
                segment.truncate(segment.trim_end_matches(' ').len());
            }
            out.push_str(&segment);
            if row != end.row && !wrapped {
                out.push('\n');
            }
        }
        out
    }
}

fn word_char_at<S: RowSource + ?Sized>(source: &S, row: usize, col: usize) -> bool {
    let Some(cell) = source.cell(row, col) else {
        return false;
    };
    if cell.is_wide_continuation() && col > 0 {
        return word_char_at(source, row, col - 1);
    }
    is_word_char(cell.display_char())
}

fn word_start<S: RowSource + ?Sized>(source: &S, point: SelectionPoint) -> SelectionPoint {
    let mut col = point.col;
    if word_char_at(source, point.row, col) {
        while col > 0 && word_char_at(source, point.row, col - 1) {
            col -= 1;
        }
    }
    SelectionPoint::new(point.row, col)
}

fn word_end<S: RowSource + ?Sized>(source: &S, point: SelectionPoint) -> SelectionPoint {
    let mut col = point.col;
    if word_char_at(source, point.row, col) {
        while col + 1 < source.cols() && word_char_at(source, point.row, col + 1) {
            col += 1;
        }
    }
    SelectionPoint::new(point.row, col)
}
