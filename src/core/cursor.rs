//! Write position, pen and the per-cursor modes (DECOM, DECAWM, IRM).

use serde::{Deserialize, Serialize};

use super::cell::{Attributes, Cell, Color, Palette};

/// Style stamped onto every cell the terminal writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pen {
    pub attrs: Attributes,
    pub fg: Color,
    pub bg: Color,
}

impl Pen {
    pub fn cell(&self, c: char, palette: &Palette) -> Cell {
        let fg = palette.foreground(self.fg);
        let bg = palette.background(self.bg);
        Cell::styled(c, fg, bg, self.attrs)
    }

    /// Erase fills with the current background but no glyph
    pub fn blank(&self, palette: &Palette) -> Cell {
        palette.blank(self.bg)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub row: usize,
    pub col: usize,
    /// DECTCEM
    pub visible: bool,
    pub pen: Pen,
    /// Row addressing is relative to the scroll region
    pub origin_mode: bool,
    pub autowrap: bool,
    /// Set after writing into the last column; the next printable wraps first
    pub pending_wrap: bool,
    /// IRM: printing shifts the rest of the row right
    pub insert_mode: bool,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            row: 0,
            col: 0,
            visible: true,
            pen: Pen::default(),
            origin_mode: false,
            autowrap: true,
            pending_wrap: false,
            insert_mode: false,
        }
    }
}

/// What DECSC captures and DECRC puts back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedCursor {
    pub row: usize,
    pub col: usize,
    pub pen: Pen,
    pub origin_mode: bool,
    pub autowrap: bool,
}

impl Default for SavedCursor {
    fn default() -> Self {
        Cursor::default().save()
    }
}

/// The part of the cursor published to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CursorState {
    pub row: usize,
    pub col: usize,
    pub visible: bool,
}

fn last(n: usize) -> usize {
    n.saturating_sub(1)
}

impl Cursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CursorState {
        let Self { row, col, visible, .. } = *self;
        CursorState { row, col, visible }
    }

    /// Every explicit move cancels a deferred wrap
    fn place(&mut self, row: usize, col: usize) {
        self.row = row;
        self.col = col;
        self.pending_wrap = false;
    }

    /// Top-left corner, or the region's first row under DECOM
    pub fn home(&mut self, scroll_top: usize) {
        let row = if self.origin_mode { scroll_top } else { 0 };
        self.place(row, 0);
    }

    /// CUU. A cursor inside the region stops at `top_margin`, one above it
    /// stops at row 0.
    pub fn move_up(&mut self, n: usize, top_margin: usize) {
        let floor = if self.row < top_margin { 0 } else { top_margin };
        self.place(self.row.saturating_sub(n).max(floor), self.col);
    }

    /// CUD, the mirror of [`Cursor::move_up`]
    pub fn move_down(&mut self, n: usize, bottom_margin: usize, rows: usize) {
        let ceiling = if self.row > bottom_margin {
            last(rows)
        } else {
            bottom_margin
        };
        self.place(self.row.saturating_add(n).min(ceiling), self.col);
    }

    pub fn move_left(&mut self, n: usize) {
        self.place(self.row, self.col.saturating_sub(n));
    }

    pub fn move_right(&mut self, n: usize, cols: usize) {
        self.place(self.row, self.col.saturating_add(n).min(last(cols)));
    }

    pub fn set_col(&mut self, col: usize, cols: usize) {
        self.place(self.row, col.min(last(cols)));
    }

    /// Absolute row; under DECOM `row` counts from the region top
    pub fn set_row(&mut self, row: usize, rows: usize, scroll_top: usize, scroll_bottom: usize) {
        let row = if self.origin_mode {
            scroll_top.saturating_add(row).min(scroll_bottom)
        } else {
            row.min(last(rows))
        };
        self.place(row, self.col);
    }

    pub fn carriage_return(&mut self) {
        self.place(self.row, 0);
    }

    pub fn clamp(&mut self, cols: usize, rows: usize) {
        self.place(self.row.min(last(rows)), self.col.min(last(cols)));
    }

    pub fn save(&self) -> SavedCursor {
        SavedCursor {
            row: self.row,
            col: self.col,
            pen: self.pen,
            origin_mode: self.origin_mode,
            autowrap: self.autowrap,
        }
    }

    /// Put back a saved cursor, clamped to the current screen
    pub fn restore(&mut self, saved: &SavedCursor, cols: usize, rows: usize) {
        self.pen = saved.pen;
        self.origin_mode = saved.origin_mode;
        self.autowrap = saved.autowrap;
        self.row = saved.row;
        self.col = saved.col;
        self.clamp(cols, rows);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Rgb;

    fn at(row: usize, col: usize) -> Cursor {
        Cursor {
            row,
            col,
            ..Cursor::default()
        }
    }

    #[test]
    fn test_default_cursor() {
        let cursor = Cursor::default();
        assert_eq!((cursor.row, cursor.col), (0, 0));
        assert!(cursor.visible);
        assert!(cursor.autowrap);
        assert!(!cursor.origin_mode);
        assert_eq!(SavedCursor::default().row, 0);
        assert!(SavedCursor::default().autowrap);
    }

    #[test]
    fn test_relative_moves() {
        let mut cursor = at(10, 10);
        cursor.move_up(3, 0);
        assert_eq!(cursor.row, 7);
        cursor.move_down(5, 23, 24);
        assert_eq!(cursor.row, 12);
        cursor.move_left(4);
        assert_eq!(cursor.col, 6);
        cursor.move_right(10, 80);
        assert_eq!(cursor.col, 16);
    }

    #[test]
    fn test_moves_stop_at_screen_edges() {
        let mut cursor = Cursor::new();
        cursor.move_up(100, 0);
        cursor.move_left(100);
        assert_eq!((cursor.row, cursor.col), (0, 0));
        cursor.move_down(100, 23, 24);
        cursor.move_right(100, 80);
        assert_eq!((cursor.row, cursor.col), (23, 79));
    }

    #[test]
    fn test_vertical_moves_respect_margins() {
        let mut cursor = at(8, 0);
        cursor.move_up(10, 5);
        assert_eq!(cursor.row, 5);

        // Above the region the top margin does not apply
        let mut cursor = at(3, 0);
        cursor.move_up(10, 5);
        assert_eq!(cursor.row, 0);

        let mut cursor = at(8, 0);
        cursor.move_down(10, 10, 24);
        assert_eq!(cursor.row, 10);

        let mut cursor = at(12, 0);
        cursor.move_down(50, 10, 24);
        assert_eq!(cursor.row, 23);
    }

    #[test]
    fn test_save_restore_roundtrip_and_clamp() {
        let mut cursor = at(8, 15);
        cursor.pen.attrs = Attributes::BOLD;
        cursor.pen.fg = Color::Indexed(1);
        let saved = cursor.save();

        cursor.reset();
        cursor.restore(&saved, 80, 24);
        assert_eq!((cursor.row, cursor.col), (8, 15));
        assert!(cursor.pen.attrs.contains(Attributes::BOLD));
        assert_eq!(cursor.pen.fg, Color::Indexed(1));

        cursor.restore(&saved, 10, 5);
        assert_eq!((cursor.row, cursor.col), (4, 9));
    }

    #[test]
    fn test_origin_mode_addressing() {
        let mut cursor = Cursor::new();
        cursor.origin_mode = true;
        cursor.home(5);
        assert_eq!((cursor.row, cursor.col), (5, 0));

        cursor.set_row(2, 24, 5, 10);
        assert_eq!(cursor.row, 7);
        cursor.set_row(20, 24, 5, 10);
        assert_eq!(cursor.row, 10);
    }

    #[test]
    fn test_moves_clear_pending_wrap() {
        let mut cursor = at(10, 79);
        cursor.pending_wrap = true;
        cursor.carriage_return();
        assert_eq!((cursor.row, cursor.col), (10, 0));
        assert!(!cursor.pending_wrap);
    }

    #[test]
    fn test_pen_resolves_colors() {
        let pen = Pen {
            attrs: Attributes::ITALIC,
            fg: Color::Indexed(2),
            bg: Color::Rgb(1, 2, 3),
        };
        let cell = pen.cell('x', &Palette::default());
        assert_eq!(cell.fg, Rgb::new(0, 205, 0));
        assert_eq!(cell.bg, Rgb::new(1, 2, 3));
        assert_eq!(cell.attributes(), Attributes::ITALIC);
    }
}
