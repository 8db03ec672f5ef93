//! Serializable picture of a grid, used by the dump tool and by tests.
//!
//! Feeding identical bytes into a fresh terminal yields an identical
//! snapshot.

use serde::{Deserialize, Serialize};

use super::cell::{Attributes, Cell, Rgb};
use super::cursor::CursorState;
use super::grid::Grid;
use super::screen::Screen;

/// A complete snapshot of a displayed grid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub cols: usize,
    pub rows: usize,
    pub cursor: CursorState,
    /// Visible rows, top first
    pub lines: Vec<LineSnapshot>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub alternate_screen: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
}

/// One row: its text plus runs of identically styled cells
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSnapshot {
    pub text: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub wrapped: bool,
    /// Styled runs; rows of default-styled cells have none
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runs: Vec<StyleRun>,
}

/// Consecutive cells sharing colors and attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleRun {
    pub col: usize,
    pub len: usize,
    pub fg: String,
    pub bg: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attrs: Vec<String>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn attribute_names(attrs: Attributes) -> Vec<String> {
    attrs
        .difference(Attributes::WIDE | Attributes::WIDE_CONTINUATION)
        .iter_names()
        .map(|(name, _)| name.to_ascii_lowercase())
        .collect()
}

type StyleKey = (Rgb, Rgb, Attributes);

fn style_key(cell: &Cell) -> StyleKey {
    let attrs = cell
        .attributes()
        .difference(Attributes::WIDE | Attributes::WIDE_CONTINUATION);
    (cell.fg, cell.bg, attrs)
}

fn line_snapshot(grid: &Grid, row: usize) -> LineSnapshot {
    let default_key = style_key(&Cell::default());
    let cells = grid.row(row).unwrap_or(&[]);
    let mut runs = Vec::new();
    let mut start = 0;
    while start < cells.len() {
        let key = style_key(&cells[start]);
        let len = cells[start..].iter().take_while(|c| style_key(c) == key).count();
        if key != default_key {
            let (fg, bg, attrs) = key;
            runs.push(StyleRun {
                col: start,
                len,
                fg: fg.to_string(),
                bg: bg.to_string(),
                attrs: attribute_names(attrs),
            });
        }
        start += len;
    }

    LineSnapshot {
        text: grid.row_text(row),
        wrapped: grid.is_wrapped(row),
        runs,
    }
}

impl Snapshot {
    /// Snapshot any grid with the given cursor
    pub fn from_grid(grid: &Grid, cursor: CursorState) -> Self {
        Snapshot {
            cols: grid.cols(),
            rows: grid.rows(),
            cursor,
            lines: (0..grid.rows()).map(|row| line_snapshot(grid, row)).collect(),
            alternate_screen: false,
            title: String::new(),
        }
    }

    /// Includes the alternate-screen flag and title
    pub fn from_screen(screen: &Screen) -> Self {
        Snapshot {
            alternate_screen: screen.is_alternate(),
            title: screen.title().to_string(),
            ..Self::from_grid(screen.grid(), screen.cursor().state())
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Plain text of the screen with trailing empty lines removed
    pub fn to_text(&self) -> String {
        let last = self.lines.iter().rposition(|l| !l.text.is_empty());
        let kept = last.map_or(0, |i| i + 1);
        let mut text = String::new();
        for line in &self.lines[..kept] {
            text.push_str(&line.text);
            text.push('\n');
        }
        if text.is_empty() {
            text.push('\n');
        }
        text
    }
}
