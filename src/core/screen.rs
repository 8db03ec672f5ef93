//! The visible terminal: primary and alternate buffers, scroll margins, tab
//! stops and mode flags.
//!
//! Mutations never notify anyone directly. They append [`TerminalEvent`]s
//! which the owner collects with [`Screen::take_events`] after a batch of
//! output has been applied.

use serde::{Deserialize, Serialize};
use unicode_width::UnicodeWidthChar;

use super::cell::{Attributes, Cell, Palette};
use super::cursor::{Cursor, CursorState, SavedCursor};
use super::damage::DamageRect;
use super::grid::Grid;
use super::scrollback::{Line, Scrollback};

/// Mode flags that outlive a single sequence
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Modes {
    /// DECCKM
    pub application_cursor: bool,
    /// DECKPAM / DECKPNM
    pub application_keypad: bool,
    /// DECSET 2004
    pub bracketed_paste: bool,
    /// DECSET 1004
    pub focus_reporting: bool,
    pub mouse_tracking: MouseMode,
    pub mouse_encoding: MouseEncoding,
    /// LNM: LF also returns the carriage
    pub linefeed_mode: bool,
    /// DECSCNM
    pub reverse_video: bool,
}

/// Which mouse events the application asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MouseMode {
    #[default]
    None,
    /// DECSET 9, presses only
    X10,
    /// DECSET 1000, presses and releases
    Normal,
    /// DECSET 1002, adds drags
    ButtonEvent,
    /// DECSET 1003, every motion
    AnyEvent,
}

/// How mouse reports encode coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MouseEncoding {
    /// Single bytes, so at most 223 cells in each direction
    #[default]
    X10,
    /// DECSET 1005
    Utf8,
    /// DECSET 1006, `CSI < b;x;y M/m`
    Sgr,
}

/// An observable effect of interpreting output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalEvent {
    /// These cells may differ from the last published frame
    Damage(DamageRect),
    CursorMoved(CursorState),
    Bell,
    TitleChanged(String),
    /// Count of rows appended to history
    ScrollbackPushed(usize),
    /// Count of rows taken back out of history onto the screen
    ScrollbackPopped(usize),
    ScrollbackCleared,
    MouseModeChanged(MouseMode),
    AltScreenChanged(bool),
}

/// A grid with its own cursor and DECSC slot
#[derive(Debug, Clone)]
struct Buffer {
    grid: Grid,
    cursor: Cursor,
    saved: SavedCursor,
}

impl Buffer {
    fn new(cols: usize, rows: usize, blank: Cell) -> Self {
        Self {
            grid: Grid::filled(cols, rows, blank),
            cursor: Cursor::new(),
            saved: SavedCursor::default(),
        }
    }

    fn reset(&mut self, blank: Cell) {
        self.grid.clear_all(blank);
        self.cursor.reset();
        self.saved = SavedCursor::default();
    }
}

fn initial_tab_stops(cols: usize) -> Vec<bool> {
    (0..cols).map(|col| col != 0 && col % 8 == 0).collect()
}

#[derive(Debug, Clone)]
pub struct Screen {
    cols: usize,
    rows: usize,
    primary: Buffer,
    alternate: Buffer,
    alt_active: bool,
    /// Fed only by the primary buffer
    history: Scrollback,
    /// Inclusive scroll margins
    margin_top: usize,
    margin_bottom: usize,
    tab_stops: Vec<bool>,
    pub modes: Modes,
    title: String,
    palette: Palette,
    /// Target of REP
    last_printed: Option<char>,
    events: Vec<TerminalEvent>,
}

impl Screen {
    pub fn new(cols: usize, rows: usize, scrollback_capacity: usize) -> Self {
        Self::with_palette(cols, rows, scrollback_capacity, Palette::default())
    }

    /// Zero dimensions are bumped to one
    pub fn with_palette(cols: usize, rows: usize, scrollback_capacity: usize, palette: Palette) -> Self {
        let (cols, rows) = (cols.max(1), rows.max(1));
        let blank = palette.blank(Default::default());
        Self {
            cols,
            rows,
            primary: Buffer::new(cols, rows, blank),
            alternate: Buffer::new(cols, rows, blank),
            alt_active: false,
            history: Scrollback::new(scrollback_capacity),
            margin_top: 0,
            margin_bottom: rows - 1,
            tab_stops: initial_tab_stops(cols),
            modes: Modes::default(),
            title: String::new(),
            palette,
            last_printed: None,
            events: Vec::new(),
        }
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    fn active(&self) -> &Buffer {
        match self.alt_active {
            true => &self.alternate,
            false => &self.primary,
        }
    }

    fn active_mut(&mut self) -> &mut Buffer {
        match self.alt_active {
            true => &mut self.alternate,
            false => &mut self.primary,
        }
    }

    /// Grid of whichever buffer is showing
    pub fn grid(&self) -> &Grid {
        &self.active().grid
    }

    fn grid_mut(&mut self) -> &mut Grid {
        &mut self.active_mut().grid
    }

    pub fn cursor(&self) -> &Cursor {
        &self.active().cursor
    }

    pub fn cursor_mut(&mut self) -> &mut Cursor {
        &mut self.active_mut().cursor
    }

    pub fn scrollback(&self) -> &Scrollback {
        &self.history
    }

    pub fn scroll_top(&self) -> usize {
        self.margin_top
    }

    pub fn scroll_bottom(&self) -> usize {
        self.margin_bottom
    }

    pub fn is_alternate(&self) -> bool {
        self.alt_active
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        self.grid().cell(row, col)
    }

    pub fn row_text(&self, row: usize) -> String {
        self.grid().row_text(row)
    }

    /// Drain everything recorded since the previous call
    pub fn take_events(&mut self) -> Vec<TerminalEvent> {
        std::mem::take(&mut self.events)
    }

    /// Consecutive touching rects collapse into one event
    fn damage(&mut self, rect: DamageRect) {
        let rect = rect.clamp(self.rows, self.cols);
        if rect.is_empty() {
            return;
        }
        match self.events.last_mut() {
            Some(TerminalEvent::Damage(prev)) if prev.touches(&rect) => *prev = prev.union(&rect),
            _ => self.events.push(TerminalEvent::Damage(rect)),
        }
    }

    fn damage_rows(&mut self, start: usize, end: usize) {
        self.damage(DamageRect::rows(start, end, self.cols));
    }

    fn damage_all(&mut self) {
        self.damage(DamageRect::full(self.rows, self.cols));
    }

    /// Damage from `col` to the end of `row`
    fn damage_line_from(&mut self, row: usize, col: usize) {
        self.damage(DamageRect::new(row, col, row + 1, self.cols));
    }

    fn blank(&self) -> Cell {
        self.cursor().pen.blank(&self.palette)
    }

    fn default_blank(&self) -> Cell {
        self.palette.blank(Default::default())
    }

    fn position(&self) -> (usize, usize) {
        let cursor = self.cursor();
        (cursor.row, cursor.col)
    }

    fn archive(&mut self, lines: Vec<Line>) {
        let count = lines.len();
        if count == 0 {
            return;
        }
        lines.into_iter().for_each(|line| self.history.push(line));
        if self.history.capacity() > 0 {
            self.events.push(TerminalEvent::ScrollbackPushed(count));
        }
    }

    /// Write `c` with the current pen and advance.
    ///
    /// Zero-width characters have no cell of their own and are dropped.
    pub fn print_char(&mut self, c: char) {
        let width = match c.width() {
            Some(w) if w > 0 => w,
            _ => return,
        };
        self.last_printed = Some(c);
        if self.cursor().pending_wrap {
            self.soft_wrap();
        }

        let cols = self.cols;
        if width == 2 && self.cursor().col + 2 > cols {
            if cols < 2 {
                return;
            }
            if self.cursor().autowrap {
                // No room for both halves; pad the margin and continue below
                let (row, _) = self.position();
                let blank = self.blank();
                self.grid_mut().write(row, cols - 1, blank);
                self.damage(DamageRect::cell(row, cols - 1));
                self.soft_wrap();
            } else {
                self.cursor_mut().col = cols - 2;
            }
        }

        let (row, col) = self.position();
        let pen = self.cursor().pen;
        let blank = self.blank();
        if self.cursor().insert_mode {
            self.grid_mut().insert_cells(row, col, width, blank);
            self.damage_line_from(row, col);
        }
        self.split_wide_neighbours(row, col, width, blank);

        let cell = pen.cell(c, &self.palette);
        if width == 2 {
            let spacer = Cell::blank(cell.fg, cell.bg).with_attributes(pen.attrs | Attributes::WIDE_CONTINUATION);
            let grid = self.grid_mut();
            grid.write(row, col, cell.with_attributes(pen.attrs | Attributes::WIDE));
            grid.write(row, col + 1, spacer);
        } else {
            self.grid_mut().write(row, col, cell);
        }
        self.damage(DamageRect::new(row, col, row + 1, col + width));

        let autowrap = self.cursor().autowrap;
        let cursor = self.cursor_mut();
        if col + width < cols {
            cursor.col = col + width;
        } else {
            cursor.col = cols - 1;
            cursor.pending_wrap = autowrap;
        }
    }

    /// Blank the orphaned half of any wide glyph the write at `col` cuts into
    fn split_wide_neighbours(&mut self, row: usize, col: usize, width: usize, blank: Cell) {
        let starts_on_spacer = self.grid().cell(row, col).is_some_and(Cell::is_wide_continuation);
        if starts_on_spacer && col > 0 {
            self.grid_mut().write(row, col - 1, blank);
            self.damage(DamageRect::cell(row, col - 1));
        }
        let end = col + width - 1;
        let ends_on_lead = self
            .grid()
            .cell(row, end)
            .is_some_and(|c| c.attributes().contains(Attributes::WIDE));
        if ends_on_lead && end + 1 < self.cols {
            self.grid_mut().write(row, end + 1, blank);
            self.damage(DamageRect::cell(row, end + 1));
        }
    }

    /// REP, bounded by one screenful
    pub fn repeat_last(&mut self, n: usize) {
        let Some(c) = self.last_printed else {
            return;
        };
        for _ in 0..n.min(self.cols * self.rows) {
            self.print_char(c);
        }
    }

    fn soft_wrap(&mut self) {
        let (row, _) = self.position();
        self.grid_mut().set_wrapped(row, true);
        self.cursor_mut().carriage_return();
        self.index();
    }

    /// LF, VT and FF
    pub fn linefeed(&mut self) {
        self.index();
        if self.modes.linefeed_mode {
            self.cursor_mut().carriage_return();
        }
    }

    pub fn carriage_return(&mut self) {
        self.cursor_mut().carriage_return();
    }

    pub fn backspace(&mut self) {
        self.cursor_mut().move_left(1);
    }

    /// HT / CHT; the last column acts as a final stop
    pub fn tab(&mut self, n: usize) {
        let last = self.cols - 1;
        let mut col = self.cursor().col;
        for _ in 0..n.max(1) {
            col = (col + 1..self.cols).find(|&c| self.tab_stops[c]).unwrap_or(last);
        }
        let cols = self.cols;
        self.cursor_mut().set_col(col, cols);
    }

    /// CBT
    pub fn back_tab(&mut self, n: usize) {
        let mut col = self.cursor().col;
        for _ in 0..n.max(1) {
            col = (0..col).rev().find(|&c| self.tab_stops[c]).unwrap_or(0);
        }
        let cols = self.cols;
        self.cursor_mut().set_col(col, cols);
    }

    /// IND: down one row, scrolling the region at its bottom margin
    pub fn index(&mut self) {
        self.cursor_mut().pending_wrap = false;
        let (row, _) = self.position();
        if row == self.margin_bottom {
            self.scroll_up(1);
        } else if row + 1 < self.rows {
            self.cursor_mut().row = row + 1;
        }
    }

    /// RI: up one row, scrolling the region at its top margin
    pub fn reverse_index(&mut self) {
        self.cursor_mut().pending_wrap = false;
        let (row, _) = self.position();
        if row == self.margin_top {
            self.scroll_down(1);
        } else if row > 0 {
            self.cursor_mut().row = row - 1;
        }
    }

    /// NEL
    pub fn next_line(&mut self) {
        self.index();
        self.cursor_mut().carriage_return();
    }

    /// Shift the region up by `n`. Rows leaving a full-height region of the
    /// primary buffer are archived in the scrollback.
    pub fn scroll_up(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        let (top, bottom) = (self.margin_top, self.margin_bottom);
        let blank = self.blank();
        let evicted = self.grid_mut().scroll_region_up(top, bottom, n, blank);
        if top == 0 && bottom == self.rows - 1 && !self.alt_active {
            self.archive(evicted);
        }
        self.damage_rows(top, bottom + 1);
    }

    /// Shift the region down by `n`, opening blank rows at its top
    pub fn scroll_down(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        let (top, bottom) = (self.margin_top, self.margin_bottom);
        let blank = self.blank();
        self.grid_mut().scroll_region_down(top, bottom, n, blank);
        self.damage_rows(top, bottom + 1);
    }

    /// DECSTBM with zero-based inclusive rows. A region of fewer than two
    /// rows resets to the full screen. The cursor always homes.
    pub fn set_scroll_region(&mut self, top: usize, bottom: usize) {
        let last = self.rows - 1;
        let (top, bottom) = (top.min(last), bottom.min(last));
        if bottom > top {
            self.margin_top = top;
            self.margin_bottom = bottom;
        } else {
            self.reset_scroll_region();
        }
        let home = self.margin_top;
        self.cursor_mut().home(home);
    }

    pub fn reset_scroll_region(&mut self) {
        self.margin_top = 0;
        self.margin_bottom = self.rows - 1;
    }

    fn set_tab_at_cursor(&mut self, on: bool) {
        let col = self.cursor().col;
        if let Some(stop) = self.tab_stops.get_mut(col) {
            *stop = on;
        }
    }

    /// HTS
    pub fn set_tab_stop(&mut self) {
        self.set_tab_at_cursor(true);
    }

    /// TBC 0
    pub fn clear_tab_stop(&mut self) {
        self.set_tab_at_cursor(false);
    }

    /// TBC 3
    pub fn clear_all_tab_stops(&mut self) {
        self.tab_stops.fill(false);
    }

    fn clear_rect(&mut self, rect: DamageRect) {
        let blank = self.blank();
        self.grid_mut().clear(rect, blank);
        self.damage(rect);
    }

    /// ED. Mode 3 drops the scrollback and leaves the screen alone.
    pub fn erase_in_display(&mut self, mode: u32) {
        let (row, col) = self.position();
        let (rows, cols) = (self.rows, self.cols);
        match mode {
            0 => {
                self.clear_rect(DamageRect::new(row, col, row + 1, cols));
                self.clear_rect(DamageRect::rows(row + 1, rows, cols));
            }
            1 => {
                self.clear_rect(DamageRect::rows(0, row, cols));
                self.clear_rect(DamageRect::new(row, 0, row + 1, col + 1));
            }
            2 => self.clear_rect(DamageRect::full(rows, cols)),
            3 if !self.history.is_empty() => {
                self.history.clear();
                self.events.push(TerminalEvent::ScrollbackCleared);
            }
            _ => {}
        }
        self.cursor_mut().pending_wrap = false;
    }

    /// EL
    pub fn erase_in_line(&mut self, mode: u32) {
        let (row, col) = self.position();
        let rect = match mode {
            0 => DamageRect::new(row, col, row + 1, self.cols),
            1 => DamageRect::new(row, 0, row + 1, col + 1),
            2 => DamageRect::rows(row, row + 1, self.cols),
            _ => return,
        };
        self.clear_rect(rect);
        self.cursor_mut().pending_wrap = false;
    }

    /// ECH
    pub fn erase_chars(&mut self, n: usize) {
        let (row, col) = self.position();
        self.clear_rect(DamageRect::new(row, col, row + 1, col + n.max(1)));
        self.cursor_mut().pending_wrap = false;
    }

    /// Bottom margin when the cursor sits inside the region, else `None`
    fn region_bottom_at_cursor(&self) -> Option<usize> {
        let row = self.cursor().row;
        (self.margin_top..=self.margin_bottom)
            .contains(&row)
            .then_some(self.margin_bottom)
    }

    /// IL
    pub fn insert_lines(&mut self, n: usize) {
        let Some(bottom) = self.region_bottom_at_cursor().filter(|_| n > 0) else {
            return;
        };
        let (row, _) = self.position();
        let blank = self.blank();
        self.grid_mut().insert_lines(row, n, bottom, blank);
        self.cursor_mut().carriage_return();
        self.damage_rows(row, bottom + 1);
    }

    /// DL
    pub fn delete_lines(&mut self, n: usize) {
        let Some(bottom) = self.region_bottom_at_cursor().filter(|_| n > 0) else {
            return;
        };
        let (row, _) = self.position();
        let blank = self.blank();
        self.grid_mut().delete_lines(row, n, bottom, blank);
        self.cursor_mut().carriage_return();
        self.damage_rows(row, bottom + 1);
    }

    /// ICH
    pub fn insert_chars(&mut self, n: usize) {
        let (row, col) = self.position();
        let blank = self.blank();
        self.grid_mut().insert_cells(row, col, n.max(1), blank);
        self.cursor_mut().pending_wrap = false;
        self.damage_line_from(row, col);
    }

    /// DCH
    pub fn delete_chars(&mut self, n: usize) {
        let (row, col) = self.position();
        let blank = self.blank();
        self.grid_mut().delete_cells(row, col, n.max(1), blank);
        self.cursor_mut().pending_wrap = false;
        self.damage_line_from(row, col);
    }

    /// CUP / HVP with zero-based coordinates
    pub fn move_cursor_to(&mut self, row: usize, col: usize) {
        let (rows, cols) = (self.rows, self.cols);
        let (top, bottom) = (self.margin_top, self.margin_bottom);
        let cursor = self.cursor_mut();
        cursor.set_row(row, rows, top, bottom);
        cursor.set_col(col, cols);
    }

    /// CUU
    pub fn move_cursor_up(&mut self, n: usize) {
        let top = self.margin_top;
        self.cursor_mut().move_up(n, top);
    }

    /// CUD
    pub fn move_cursor_down(&mut self, n: usize) {
        let (bottom, rows) = (self.margin_bottom, self.rows);
        self.cursor_mut().move_down(n, bottom, rows);
    }

    /// CUF
    pub fn move_cursor_forward(&mut self, n: usize) {
        let cols = self.cols;
        self.cursor_mut().move_right(n, cols);
    }

    /// CUB
    pub fn move_cursor_backward(&mut self, n: usize) {
        self.cursor_mut().move_left(n);
    }

    /// CHA
    pub fn move_cursor_to_col(&mut self, col: usize) {
        let cols = self.cols;
        self.cursor_mut().set_col(col, cols);
    }

    /// VPA
    pub fn move_cursor_to_row(&mut self, row: usize) {
        let (rows, top, bottom) = (self.rows, self.margin_top, self.margin_bottom);
        self.cursor_mut().set_row(row, rows, top, bottom);
    }

    /// DECSC, one slot per buffer
    pub fn save_cursor(&mut self) {
        let buffer = self.active_mut();
        buffer.saved = buffer.cursor.save();
    }

    /// DECRC
    pub fn restore_cursor(&mut self) {
        let (cols, rows) = (self.cols, self.rows);
        let Buffer { cursor, saved, .. } = self.active_mut();
        cursor.restore(saved, cols, rows);
    }

    /// Show a cleared alternate buffer, carrying the primary cursor over
    pub fn enter_alternate_screen(&mut self) {
        if self.alt_active {
            return;
        }
        let blank = self.primary.cursor.pen.blank(&self.palette);
        self.alternate.grid.clear_all(blank);
        self.alternate.cursor = self.primary.cursor.clone();
        self.switch_buffer(true);
    }

    pub fn exit_alternate_screen(&mut self) {
        if self.alt_active {
            self.switch_buffer(false);
        }
    }

    fn switch_buffer(&mut self, alternate: bool) {
        self.alt_active = alternate;
        self.events.push(TerminalEvent::AltScreenChanged(alternate));
        self.damage_all();
    }

    /// Records an event only when the title actually changes
    pub fn set_title(&mut self, title: String) {
        if title == self.title {
            return;
        }
        self.events.push(TerminalEvent::TitleChanged(title.clone()));
        self.title = title;
    }

    pub fn bell(&mut self) {
        self.events.push(TerminalEvent::Bell);
    }

    pub fn set_mouse_mode(&mut self, mode: MouseMode) {
        if self.modes.mouse_tracking == mode {
            return;
        }
        self.modes.mouse_tracking = mode;
        self.events.push(TerminalEvent::MouseModeChanged(mode));
    }

    pub fn set_cursor_visible(&mut self, visible: bool) {
        self.cursor_mut().visible = visible;
    }

    /// Every cell renders differently afterwards, so it all counts as damage
    pub fn set_reverse_video(&mut self, enable: bool) {
        if self.modes.reverse_video == enable {
            return;
        }
        self.modes.reverse_video = enable;
        self.damage_all();
    }

    /// DECALN
    pub fn alignment_test(&mut self) {
        self.grid_mut().clear_all(Cell::new('E'));
        self.reset_scroll_region();
        self.cursor_mut().home(0);
        self.damage_all();
    }

    /// Change dimensions, keeping the primary cursor's row on screen.
    /// Newly exposed cells take the pen's background.
    ///
    /// Shrinking past the primary cursor archives the rows above it.
    /// Growing while that cursor is on the last row restores rows from the
    /// scrollback so the content stays anchored to the bottom.
    pub fn resize(&mut self, new_cols: usize, new_rows: usize) {
        let (new_cols, new_rows) = (new_cols.max(1), new_rows.max(1));
        if (new_cols, new_rows) == (self.cols, self.rows) {
            return;
        }
        let blank = self.blank();
        let old_rows = self.rows;

        let overflow = (self.primary.cursor.row + 1).saturating_sub(new_rows);
        if overflow > 0 {
            let evicted = self.primary.grid.scroll_region_up(0, old_rows - 1, overflow, blank);
            self.primary.cursor.row -= overflow;
            self.archive(evicted);
        }

        self.primary.grid.resize(new_cols, new_rows, blank);
        self.alternate.grid.resize(new_cols, new_rows, blank);

        let anchored = self.primary.cursor.row + 1 == old_rows;
        let restore = if anchored {
            (new_rows.saturating_sub(old_rows)).min(self.history.len())
        } else {
            0
        };
        if restore > 0 {
            self.primary.grid.scroll_region_down(0, new_rows - 1, restore, blank);
            for row in (0..restore).rev() {
                if let Some(line) = self.history.pop_newest() {
                    self.primary.grid.set_line(row, &line, blank);
                }
            }
            self.primary.cursor.row += restore;
            self.events.push(TerminalEvent::ScrollbackPopped(restore));
        }

        self.cols = new_cols;
        self.rows = new_rows;
        self.reset_scroll_region();
        self.tab_stops = initial_tab_stops(new_cols);
        self.primary.cursor.clamp(new_cols, new_rows);
        self.alternate.cursor.clamp(new_cols, new_rows);
        self.damage_all();
    }

    /// RIS
    pub fn reset(&mut self) {
        self.exit_alternate_screen();
        let blank = self.default_blank();
        self.primary.reset(blank);
        self.alternate.reset(blank);
        self.reset_scroll_region();
        self.tab_stops = initial_tab_stops(self.cols);

        self.set_mouse_mode(MouseMode::None);
        self.modes = Modes::default();
        self.set_title(String::new());
        self.last_printed = None;

        if !self.history.is_empty() {
            self.history.clear();
            self.events.push(TerminalEvent::ScrollbackCleared);
        }
        self.damage_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Color, Rgb};

    fn screen_with(cols: usize, rows: usize, text: &str) -> Screen {
        let mut screen = Screen::new(cols, rows, 100);
        type_text(&mut screen, text);
        screen
    }

    fn type_text(screen: &mut Screen, text: &str) {
        text.chars().for_each(|c| screen.print_char(c));
    }

    /// Row `i` starts with the digit `i`
    fn numbered_rows(cols: usize, rows: usize) -> Screen {
        let mut screen = Screen::new(cols, rows, 100);
        for row in 0..rows {
            screen.move_cursor_to(row, 0);
            type_text(&mut screen, &row.to_string());
        }
        screen
    }

    fn texts(screen: &Screen) -> Vec<String> {
        (0..screen.rows()).map(|row| screen.row_text(row)).collect()
    }

    #[test]
    fn test_new_screen_is_blank_at_home() {
        let screen = Screen::new(80, 24, 1000);
        assert_eq!((screen.cols(), screen.rows()), (80, 24));
        assert_eq!(screen.cursor().state(), CursorState { row: 0, col: 0, visible: true });
        assert_eq!((screen.scroll_top(), screen.scroll_bottom()), (0, 23));
        assert!(!screen.is_alternate());
    }

    #[test]
    fn test_zero_size_is_bumped() {
        let screen = Screen::new(0, 0, 0);
        assert_eq!((screen.cols(), screen.rows()), (1, 1));
    }

    #[test]
    fn test_printing_damages_written_cells() {
        let mut screen = screen_with(80, 24, "ok");
        assert_eq!(screen.row_text(0), "ok");
        assert_eq!(screen.cursor().col, 2);
        assert_eq!(
            screen.take_events(),
            vec![TerminalEvent::Damage(DamageRect::new(0, 0, 1, 2))]
        );
    }

    #[test]
    fn test_autowrap_marks_continued_rows() {
        let screen = screen_with(4, 3, "wrapping");
        assert_eq!(texts(&screen), vec!["wrap", "ping", ""]);
        assert!(screen.grid().is_wrapped(0));
        assert!(!screen.grid().is_wrapped(1));
        assert!(screen.cursor().pending_wrap);
    }

    #[test]
    fn test_without_autowrap_last_column_is_overwritten() {
        let mut screen = Screen::new(3, 2, 0);
        screen.cursor_mut().autowrap = false;
        type_text(&mut screen, "abcde");
        assert_eq!(texts(&screen), vec!["abe", ""]);
    }

    #[test]
    fn test_wrap_flag_moves_with_scrolled_row() {
        let mut screen = Screen::new(3, 2, 100);
        screen.move_cursor_to(1, 0);
        type_text(&mut screen, "xyzw");
        assert_eq!(texts(&screen), vec!["xyz", "w"]);
        assert!(screen.grid().is_wrapped(0));
    }

    #[test]
    fn test_wide_glyph_takes_two_cells() {
        let screen = screen_with(10, 2, "a世b");
        let grid = screen.grid();
        assert!(grid.cell(0, 1).unwrap().attributes().contains(Attributes::WIDE));
        assert!(grid.cell(0, 2).unwrap().is_wide_continuation());
        assert_eq!(screen.row_text(0), "a世b");
        assert_eq!(screen.cursor().col, 4);
    }

    #[test]
    fn test_wide_glyph_at_margin_wraps_whole() {
        let screen = screen_with(3, 2, "ab世");
        assert_eq!(texts(&screen), vec!["ab", "世"]);
    }

    #[test]
    fn test_overwriting_spacer_clears_lead() {
        let mut screen = screen_with(10, 1, "世");
        screen.move_cursor_to(0, 1);
        type_text(&mut screen, "x");
        assert!(screen.cell(0, 0).unwrap().is_empty());
        assert_eq!(screen.row_text(0), " x");
    }

    #[test]
    fn test_combining_marks_are_dropped() {
        let screen = screen_with(10, 1, "e\u{301}");
        assert_eq!(screen.row_text(0), "e");
        assert_eq!(screen.cursor().col, 1);
    }

    #[test]
    fn test_repeat_last_character() {
        let mut screen = screen_with(10, 1, "z");
        screen.repeat_last(3);
        assert_eq!(screen.row_text(0), "zzzz");
    }

    #[test]
    fn test_linefeed_at_bottom_archives_top_row() {
        let mut screen = Screen::new(20, 3, 1000);
        for word in ["one", "two", "three", "four"] {
            if word != "one" {
                screen.linefeed();
                screen.carriage_return();
            }
            type_text(&mut screen, word);
        }
        assert_eq!(texts(&screen), vec!["two", "three", "four"]);
        assert_eq!(screen.scrollback().len(), 1);
        assert_eq!(screen.scrollback().get(0).unwrap().text(), "one");
        assert!(screen.take_events().contains(&TerminalEvent::ScrollbackPushed(1)));
    }

    #[test]
    fn test_linefeed_mode_returns_carriage() {
        let mut screen = screen_with(10, 3, "abc");
        screen.modes.linefeed_mode = true;
        screen.linefeed();
        assert_eq!((screen.cursor().row, screen.cursor().col), (1, 0));
    }

    #[test]
    fn test_partial_region_never_archives() {
        let mut screen = numbered_rows(10, 5);
        screen.set_scroll_region(1, 3);
        screen.move_cursor_to(3, 0);
        screen.linefeed();
        assert_eq!(texts(&screen), vec!["0", "2", "3", "", "4"]);
        assert!(screen.scrollback().is_empty());
    }

    #[test]
    fn test_top_anchored_region_never_archives() {
        let mut screen = numbered_rows(10, 5);
        screen.set_scroll_region(0, 3);
        screen.move_cursor_to(3, 0);
        screen.linefeed();
        assert_eq!(texts(&screen), vec!["1", "2", "3", "", "4"]);
        assert!(screen.scrollback().is_empty());
    }

    #[test]
    fn test_reverse_index_at_top_scrolls_down() {
        let mut screen = numbered_rows(10, 3);
        screen.move_cursor_to(0, 0);
        screen.reverse_index();
        assert_eq!(texts(&screen), vec!["", "0", "1"]);
    }

    #[test]
    fn test_invalid_region_resets_and_homes() {
        let mut screen = Screen::new(10, 6, 0);
        screen.set_scroll_region(2, 4);
        assert_eq!((screen.scroll_top(), screen.scroll_bottom()), (2, 4));
        screen.move_cursor_to(5, 5);
        screen.set_scroll_region(3, 3);
        assert_eq!((screen.scroll_top(), screen.scroll_bottom()), (0, 5));
        assert_eq!((screen.cursor().row, screen.cursor().col), (0, 0));
    }

    #[test]
    fn test_alternate_buffer_never_archives() {
        let mut screen = Screen::new(10, 2, 1000);
        screen.enter_alternate_screen();
        (0..5).for_each(|_| screen.linefeed());
        assert!(screen.scrollback().is_empty());
    }

    #[test]
    fn test_erase_display_below_cursor() {
        let mut screen = screen_with(10, 3, &"#".repeat(30));
        screen.move_cursor_to(1, 5);
        screen.erase_in_display(0);
        assert_eq!(texts(&screen), vec!["##########", "#####", ""]);
    }

    #[test]
    fn test_erase_display_above_cursor() {
        let mut screen = screen_with(4, 3, &"#".repeat(12));
        screen.move_cursor_to(1, 1);
        screen.erase_in_display(1);
        assert_eq!(texts(&screen), vec!["", "  ##", "####"]);
    }

    #[test]
    fn test_erase_saved_lines_only_touches_history() {
        let mut screen = screen_with(5, 1, "a");
        screen.linefeed();
        type_text(&mut screen, "b");
        screen.take_events();
        screen.erase_in_display(3);
        assert!(screen.scrollback().is_empty());
        assert_eq!(screen.row_text(0), " b");
        assert_eq!(screen.take_events(), vec![TerminalEvent::ScrollbackCleared]);
    }

    #[test]
    fn test_erase_fills_with_pen_background() {
        let mut screen = Screen::new(4, 1, 10);
        screen.cursor_mut().pen.bg = Color::Indexed(1);
        screen.erase_in_line(2);
        assert_eq!(screen.cell(0, 3).unwrap().bg, Rgb::new(205, 0, 0));
    }

    #[test]
    fn test_erase_line_modes() {
        let mut screen = screen_with(10, 1, "0123456789");
        screen.move_cursor_to(0, 5);
        screen.erase_in_line(0);
        assert_eq!(screen.row_text(0), "01234");
        screen.move_cursor_to(0, 2);
        screen.erase_in_line(1);
        assert_eq!(screen.row_text(0), "   34");
        screen.move_cursor_to(0, 3);
        screen.erase_chars(1);
        assert_eq!(screen.row_text(0), "    4");
    }

    #[test]
    fn test_insert_and_delete_lines() {
        let mut screen = numbered_rows(10, 5);
        screen.move_cursor_to(2, 3);
        screen.insert_lines(2);
        assert_eq!(texts(&screen), vec!["0", "1", "", "", "2"]);
        assert_eq!(screen.cursor().col, 0);

        screen.delete_lines(2);
        assert_eq!(texts(&screen), vec!["0", "1", "2", "", ""]);
    }

    #[test]
    fn test_line_edits_outside_region_are_ignored() {
        let mut screen = numbered_rows(10, 5);
        screen.set_scroll_region(1, 2);
        screen.move_cursor_to(4, 0);
        screen.insert_lines(1);
        screen.delete_lines(1);
        assert_eq!(texts(&screen), vec!["0", "1", "2", "3", "4"]);
    }

    #[test]
    fn test_insert_and_delete_chars() {
        let mut screen = screen_with(10, 1, "abcdefghij");
        screen.move_cursor_to(0, 3);
        screen.insert_chars(2);
        assert_eq!(screen.row_text(0), "abc  defgh");
        screen.delete_chars(2);
        assert_eq!(screen.row_text(0), "abcdefgh");
    }

    #[test]
    fn test_insert_mode_shifts_row() {
        let mut screen = screen_with(6, 1, "abc");
        screen.move_cursor_to(0, 1);
        screen.cursor_mut().insert_mode = true;
        type_text(&mut screen, "X");
        assert_eq!(screen.row_text(0), "aXbc");
    }

    #[test]
    fn test_alternate_screen_preserves_primary() {
        let mut screen = screen_with(20, 4, "primary");
        screen.enter_alternate_screen();
        assert_eq!(screen.row_text(0), "");
        assert_eq!(screen.cursor().col, 7);
        screen.move_cursor_to(0, 0);
        type_text(&mut screen, "alt");

        screen.exit_alternate_screen();
        assert_eq!(screen.row_text(0), "primary");

        let events = screen.take_events();
        assert!(events.contains(&TerminalEvent::AltScreenChanged(true)));
        assert!(events.contains(&TerminalEvent::AltScreenChanged(false)));
    }

    #[test]
    fn test_saved_cursor_is_per_buffer() {
        let mut screen = Screen::new(80, 24, 0);
        screen.move_cursor_to(10, 20);
        screen.cursor_mut().pen.attrs = Attributes::BOLD;
        screen.save_cursor();

        screen.enter_alternate_screen();
        screen.move_cursor_to(2, 2);
        screen.save_cursor();
        screen.move_cursor_to(0, 0);
        screen.restore_cursor();
        assert_eq!((screen.cursor().row, screen.cursor().col), (2, 2));

        screen.exit_alternate_screen();
        screen.move_cursor_to(0, 0);
        screen.cursor_mut().pen.attrs = Attributes::empty();
        screen.restore_cursor();
        assert_eq!((screen.cursor().row, screen.cursor().col), (10, 20));
        assert!(screen.cursor().pen.attrs.contains(Attributes::BOLD));
    }

    #[test]
    fn test_resize_clamps_cursor() {
        let mut screen = screen_with(80, 24, "X");
        screen.move_cursor_to(10, 79);
        screen.resize(40, 12);
        assert_eq!((screen.cols(), screen.rows()), (40, 12));
        assert_eq!((screen.cursor().row, screen.cursor().col), (10, 39));
        assert_eq!(screen.row_text(0), "X");
    }

    #[test]
    fn test_resize_shrink_archives_rows_above_cursor() {
        let mut screen = numbered_rows(10, 4);
        screen.resize(10, 2);
        assert_eq!(texts(&screen), vec!["2", "3"]);
        assert_eq!(screen.cursor().row, 1);
        let archived: Vec<String> = screen.scrollback().iter().map(Line::text).collect();
        assert_eq!(archived, vec!["0", "1"]);
    }

    #[test]
    fn test_resize_grow_restores_history() {
        let mut screen = Screen::new(10, 2, 100);
        type_text(&mut screen, "a");
        for c in ['b', 'c'] {
            screen.linefeed();
            screen.carriage_return();
            screen.print_char(c);
        }
        assert_eq!(screen.scrollback().len(), 1);
        screen.take_events();

        screen.resize(10, 4);
        assert_eq!(texts(&screen), vec!["a", "b", "c", ""]);
        assert_eq!(screen.cursor().row, 2);
        assert!(screen.scrollback().is_empty());
        assert!(screen.take_events().contains(&TerminalEvent::ScrollbackPopped(1)));
    }

    #[test]
    fn test_resize_fills_exposed_cells_with_pen_background() {
        let mut screen = screen_with(4, 2, "ab");
        screen.cursor_mut().pen.bg = Color::Rgb(1, 2, 3);
        screen.resize(6, 3);
        assert_eq!(screen.cell(0, 5).unwrap().bg, Rgb::new(1, 2, 3));
        assert_eq!(screen.cell(2, 0).unwrap().bg, Rgb::new(1, 2, 3));
        // Retained cells keep their own background
        assert_eq!(screen.cell(0, 0).unwrap().bg, Palette::DEFAULT_BG);
    }

    #[test]
    fn test_same_size_resize_is_silent() {
        let mut screen = Screen::new(10, 4, 0);
        screen.resize(10, 4);
        assert!(screen.take_events().is_empty());
    }

    #[test]
    fn test_tab_stops() {
        let mut screen = Screen::new(20, 1, 0);
        screen.tab(2);
        assert_eq!(screen.cursor().col, 16);
        screen.tab(1);
        assert_eq!(screen.cursor().col, 19);
        screen.back_tab(1);
        assert_eq!(screen.cursor().col, 16);

        screen.clear_all_tab_stops();
        screen.move_cursor_to(0, 5);
        screen.set_tab_stop();
        screen.move_cursor_to(0, 0);
        screen.tab(1);
        assert_eq!(screen.cursor().col, 5);
        screen.clear_tab_stop();
        screen.move_cursor_to(0, 0);
        screen.tab(1);
        assert_eq!(screen.cursor().col, 19);
    }

    #[test]
    fn test_title_event_only_on_change() {
        let mut screen = Screen::new(10, 2, 10);
        screen.set_title("vim".into());
        screen.set_title("vim".into());
        screen.bell();
        assert_eq!(
            screen.take_events(),
            vec![TerminalEvent::TitleChanged("vim".into()), TerminalEvent::Bell]
        );
        assert_eq!(screen.title(), "vim");
    }

    #[test]
    fn test_alignment_pattern() {
        let mut screen = Screen::new(3, 2, 0);
        screen.alignment_test();
        assert_eq!(texts(&screen), vec!["EEE", "EEE"]);
    }

    #[test]
    fn test_reset_restores_defaults() {
        let mut screen = screen_with(10, 2, "abc");
        screen.set_mouse_mode(MouseMode::Normal);
        screen.set_scroll_region(0, 0);
        screen.reset();
        assert_eq!(texts(&screen), vec!["", ""]);
        assert_eq!(screen.modes, Modes::default());
        assert_eq!(screen.cursor().col, 0);
    }
}
