//! Byte stream to [`Action`] conversion.
//!
//! Follows the DEC VT500 state diagram at <https://vt100.net/emu/dec_ansi_parser>.
//! The parser keeps its state between calls, so input may arrive in any
//! chunking.

mod actions;
mod state;

pub use actions::{Action, ColorSpec, CsiAction, EscAction, OscAction, SgrAttribute};
pub use state::Parser;
