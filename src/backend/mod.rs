//! Terminal backends
//!
//! A backend owns a grid that a renderer can draw, plus the damage and cursor
//! state describing what changed since the last frame. [`LocalBackend`] runs
//! the VT interpreter and the child process in this process;
//! [`RemoteBackend`] mirrors a grid published by a server through shared
//! memory and forwards input over the control socket.

mod local;
mod remote;

pub use local::{LocalBackend, LocalConfig};
pub use remote::{RemoteBackend, RemoteConfig};

use std::os::fd::BorrowedFd;

use crate::core::{CursorState, Damage, DamageRect, Grid, MouseMode, SelectionMode};
use crate::input::{Modifiers, SpecialKey};
use crate::protocol::ProtocolError;
use crate::pty::PtyError;
use crate::shm::ShmError;

/// Error type for backend operations
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("PTY error: {0}")]
    Pty(#[from] PtyError),

    #[error("Shared grid error: {0}")]
    Shm(#[from] ShmError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend is not running")]
    NotRunning,

    #[error("Disconnected from server")]
    Disconnected,

    #[error("Timed out waiting for server at {0}")]
    HandshakeTimeout(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Things the embedding application should react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Bell,
    TitleChanged(String),
    /// The child process exited; carries its exit code when known
    ChildExited(Option<i32>),
    /// Grid geometry changed (remote side: the shared grid was remapped)
    Resized { cols: usize, rows: usize },
    MouseModeChanged(MouseMode),
    /// The connection to the server was lost
    Disconnected,
}

/// The surface shared by local and remote backends.
///
/// Coordinates passed to the selection methods are in displayed space,
/// i.e. already shifted by the scroll offset.
pub trait TerminalBackend {
    /// Whether the child (or the connection to it) is still alive
    fn is_running(&self) -> bool;

    /// Descriptor to watch for readability, if any
    fn poll_fd(&self) -> Option<BorrowedFd<'_>>;

    /// Service pending I/O without blocking. Returns true if anything was
    /// read or written.
    fn process_io(&mut self) -> BackendResult<bool>;

    /// Whether buffered output is waiting for the descriptor to be writable
    fn wants_write(&self) -> bool;

    fn send_key(&mut self, codepoint: u32, modifiers: Modifiers) -> BackendResult<()>;
    fn send_special_key(&mut self, key: SpecialKey, modifiers: Modifiers) -> BackendResult<()>;
    fn send_raw(&mut self, data: &[u8]) -> BackendResult<()>;
    fn resize(&mut self, cols: usize, rows: usize) -> BackendResult<()>;

    fn scroll_up(&mut self, lines: usize) -> BackendResult<()>;
    fn scroll_down(&mut self, lines: usize) -> BackendResult<()>;
    fn scroll_to_top(&mut self) -> BackendResult<()>;
    fn scroll_to_bottom(&mut self) -> BackendResult<()>;
    fn scroll_offset(&self) -> usize;
    fn is_scrolled_back(&self) -> bool {
        self.scroll_offset() > 0
    }
    fn scrollback_len(&self) -> usize;

    /// Bring the displayed grid up to date with the terminal state
    fn sync_to_grid(&mut self);
    /// The grid a renderer should draw
    fn grid(&self) -> &Grid;
    fn cols(&self) -> usize {
        self.grid().cols()
    }
    fn rows(&self) -> usize {
        self.grid().rows()
    }
    fn cursor(&self) -> CursorState;
    fn is_alt_screen(&self) -> bool;
    fn mouse_mode(&self) -> MouseMode;
    fn wants_mouse_events(&self) -> bool {
        self.mouse_mode() != MouseMode::None
    }

    fn has_damage(&self) -> bool;
    fn has_full_damage(&self) -> bool;
    fn damage_rects(&self) -> Vec<DamageRect>;
    fn clear_damage(&mut self);
    /// Return the accumulated damage and clear it
    fn take_damage(&mut self) -> Damage {
        let damage = Damage {
            full: self.has_full_damage(),
            rects: if self.has_full_damage() {
                Vec::new()
            } else {
                self.damage_rects()
            },
        };
        self.clear_damage();
        damage
    }

    fn start_selection(&mut self, row: usize, col: usize, mode: SelectionMode);
    fn extend_selection(&mut self, row: usize, col: usize);
    fn clear_selection(&mut self);
    fn has_selection(&self) -> bool;
    fn is_in_selection(&self, row: usize, col: usize) -> bool;
    fn selected_text(&self) -> String;

    /// Drain queued notifications
    fn take_notifications(&mut self) -> Vec<Notification>;
}
