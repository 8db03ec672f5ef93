//! Platform-independent terminal state.
//!
//! Cells and grids, scrollback, damage tracking, the VT screen model with
//! its cursor, selection and snapshots. Nothing in here does I/O; the same
//! sequence of operations always yields the same state.

mod cell;
mod cursor;
mod damage;
mod grid;
mod screen;
mod scrollback;
mod selection;
mod snapshot;

pub use cell::{Attributes, Cell, Color, Palette, Rgb};
pub use cursor::{Cursor, CursorState, Pen, SavedCursor};
pub use damage::{Damage, DamageRect, DamageTracker, MAX_RECTS};
pub use grid::Grid;
pub use screen::{Modes, MouseEncoding, MouseMode, Screen, TerminalEvent};
pub use scrollback::{Line, Scrollback};
pub use selection::{RowSource, Selection, SelectionMode, SelectionPoint};
pub use snapshot::{LineSnapshot, Snapshot, StyleRun};
