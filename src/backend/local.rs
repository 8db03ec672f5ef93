//! In-process backend: VT interpreter driven by a PTY child

use std::os::fd::{AsFd, BorrowedFd};

use tracing::{debug, info, trace, warn};

use super::{BackendError, BackendResult, Notification, TerminalBackend};
use crate::core::{
    Color, CursorState, DamageRect, DamageTracker, Grid, MouseMode, Palette, Selection, SelectionMode,
    TerminalEvent,
};
use crate::input::{encode_char, encode_paste, encode_special, KeyModes, Modifiers, SpecialKey};
use crate::pty::{Pty, SpawnCommand, WindowSize};
use crate::terminal::Terminal;

/// Bytes read from the PTY per readiness
const READ_BUFFER_SIZE: usize = 40960;

/// Geometry and history settings for a [`LocalBackend`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalConfig {
    pub cols: usize,
    pub rows: usize,
    pub scrollback_lines: usize,
    pub palette: Palette,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            cols: 80,
            rows: 24,
            scrollback_lines: 10_000,
            palette: Palette::default(),
        }
    }
}

/// Terminal backend that owns the interpreter and the child process.
///
/// Without a child ([`LocalBackend::new`]) the backend is detached: output is
/// fed through [`LocalBackend::process_output`] and input stays buffered.
pub struct LocalBackend {
    terminal: Terminal,
    pty: Option<Pty>,
    running: bool,
    /// Grid handed to renderers, composed from scrollback and live rows
    view: Grid,
    damage: DamageTracker,
    selection: Selection,
    scroll_offset: usize,
    /// Live cursor, as reported by the interpreter
    cursor: CursorState,
    mouse_mode: MouseMode,
    /// Input not yet accepted by the PTY
    pending_write: Vec<u8>,
    read_buf: Vec<u8>,
    notifications: Vec<Notification>,
}

impl LocalBackend {
    /// Create a detached backend with no child process
    pub fn new(config: LocalConfig) -> Self {
        let cols = config.cols.max(1);
        let rows = config.rows.max(1);
        let terminal = Terminal::with_palette(cols, rows, config.scrollback_lines, config.palette);
        let view = terminal.screen().grid().clone();
        let cursor = terminal.cursor();
        let mut damage = DamageTracker::new(rows, cols);
        damage.mark_full();
        Self {
            terminal,
            pty: None,
            running: true,
            view,
            damage,
            selection: Selection::new(),
            scroll_offset: 0,
            cursor,
            mouse_mode: MouseMode::None,
            pending_write: Vec::new(),
            read_buf: vec![0; READ_BUFFER_SIZE],
            notifications: Vec::new(),
        }
    }

    /// Create a backend and spawn `command` on a PTY of matching size
    pub fn spawn(config: LocalConfig, command: &SpawnCommand) -> BackendResult<Self> {
        let mut backend = Self::new(config);
        let size = WindowSize::from_grid(backend.terminal.screen().cols(), backend.terminal.screen().rows());
        let pty = Pty::spawn(command, size)?;
        info!(pid = pty.child_pid().as_raw(), program = %command.program, "child started");
        backend.pty = Some(pty);
        Ok(backend)
    }

    pub fn terminal(&self) -> &Terminal {
        &self.terminal
    }

    pub fn title(&self) -> &str {
        self.terminal.screen().title()
    }

    pub fn child_pid(&self) -> Option<i32> {
        self.pty.as_ref().map(|p| p.child_pid().as_raw())
    }

    /// Input queued for the child but not yet written
    pub fn pending_input(&self) -> &[u8] {
        &self.pending_write
    }

    /// Feed bytes as if the child had written them
    pub fn process_output(&mut self, data: &[u8]) {
        trace!(len = data.len(), "terminal output");
        let events = self.terminal.feed(data);
        self.handle_events(events);
        let reply = self.terminal.take_output();
        if !reply.is_empty() {
            self.pending_write.extend_from_slice(&reply);
        }
    }

    /// Paste text, bracketed when the application asked for it
    pub fn paste(&mut self, text: &str) -> BackendResult<()> {
        let bracketed = self.terminal.screen().modes.bracketed_paste;
        self.queue_input(&encode_paste(text, bracketed))
    }

    /// Stop talking to the child. The next read observes EOF.
    pub fn stop(&mut self) {
        if self.pty.take().is_some() {
            info!("backend stopped");
        }
        self.running = false;
    }

    fn max_scroll(&self) -> usize {
        let screen = self.terminal.screen();
        if screen.is_alternate() {
            0
        } else {
            screen.scrollback().len()
        }
    }

    fn set_scroll_offset(&mut self, offset: usize) {
        let offset = offset.min(self.max_scroll());
        if offset != self.scroll_offset {
            debug!(from = self.scroll_offset, to = offset, "scroll offset changed");
            self.scroll_offset = offset;
            self.damage.mark_full();
        }
    }

    /// Record damage for a rect in live coordinates, shifted into view space
    fn mark_live_damage(&mut self, rect: DamageRect) {
        let rows = self.view.rows();
        let start_row = rect.start_row + self.scroll_offset;
        if start_row >= rows {
            return;
        }
        let end_row = (rect.end_row + self.scroll_offset).min(rows);
        self.damage
            .mark_damage(DamageRect::new(start_row, rect.start_col, end_row, rect.end_col));
    }

    fn handle_events(&mut self, events: Vec<TerminalEvent>) {
        for event in events {
            match event {
                TerminalEvent::Damage(rect) => self.mark_live_damage(rect),
                TerminalEvent::CursorMoved(state) => {
                    let old = std::mem::replace(&mut self.cursor, state);
                    self.mark_live_damage(DamageRect::cell(old.row, old.col));
                    self.mark_live_damage(DamageRect::cell(state.row, state.col));
                }
                TerminalEvent::Bell => self.notifications.push(Notification::Bell),
                TerminalEvent::TitleChanged(title) => {
                    self.notifications.push(Notification::TitleChanged(title))
                }
                TerminalEvent::ScrollbackPushed(n) => {
                    // Keep the viewed lines in place while history grows
                    if self.scroll_offset > 0 {
                        self.scroll_offset = (self.scroll_offset + n).min(self.max_scroll());
                    }
                }
                TerminalEvent::ScrollbackPopped(_) => {
                    self.scroll_offset = self.scroll_offset.min(self.max_scroll());
                }
                TerminalEvent::ScrollbackCleared => {
                    self.scroll_offset = 0;
                    self.damage.mark_full();
                }
                TerminalEvent::MouseModeChanged(mode) => {
                    self.mouse_mode = mode;
                    self.notifications.push(Notification::MouseModeChanged(mode));
                }
                TerminalEvent::AltScreenChanged(_) => {
                    self.scroll_offset = 0;
                    self.selection.clear();
                    self.damage.mark_full();
                }
            }
        }
    }

    fn queue_input(&mut self, bytes: &[u8]) -> BackendResult<()> {
        if !self.running {
            return Err(BackendError::NotRunning);
        }
        trace!(len = bytes.len(), "queue input");
        self.pending_write.extend_from_slice(bytes);
        self.flush_writes()
    }

    /// Write as much buffered input as the PTY accepts
    fn flush_writes(&mut self) -> BackendResult<()> {
        let Some(pty) = self.pty.as_mut() else {
            return Ok(());
        };
        while !self.pending_write.is_empty() {
            let written = pty.write(&self.pending_write)?;
            if written == 0 {
                break;
            }
            self.pending_write.drain(..written);
        }
        Ok(())
    }

    fn handle_child_exit(&mut self) {
        let status = self.pty.as_mut().and_then(|pty| pty.try_wait().ok().flatten());
        info!(?status, "child exited");
        self.running = false;
        self.notifications.push(Notification::ChildExited(status));
    }
}

impl TerminalBackend for LocalBackend {
    fn is_running(&self) -> bool {
        self.running
    }

    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        self.pty.as_ref().map(|pty| pty.as_fd())
    }

    fn process_io(&mut self) -> BackendResult<bool> {
        if !self.running || self.pty.is_none() {
            return Ok(false);
        }
        self.flush_writes()?;

        let mut buf = std::mem::take(&mut self.read_buf);
        let result = match self.pty.as_mut() {
            Some(pty) => pty.read(&mut buf),
            None => Ok(None),
        };
        let progressed = match result {
            Ok(Some(0)) => {
                self.handle_child_exit();
                true
            }
            Ok(Some(n)) => {
                self.process_output(&buf[..n]);
                true
            }
            Ok(None) => false,
            Err(e) => {
                self.read_buf = buf;
                return Err(e.into());
            }
        };
        self.read_buf = buf;

        if self.running {
            self.flush_writes()?;
        }
        Ok(progressed)
    }

    fn wants_write(&self) -> bool {
        self.pty.is_some() && !self.pending_write.is_empty()
    }

    fn send_key(&mut self, codepoint: u32, modifiers: Modifiers) -> BackendResult<()> {
        let Some(c) = char::from_u32(codepoint) else {
            warn!(codepoint, "ignoring invalid codepoint");
            return Ok(());
        };
        self.queue_input(&encode_char(c, modifiers))
    }

    fn send_special_key(&mut self, key: SpecialKey, modifiers: Modifiers) -> BackendResult<()> {
        let modes = KeyModes::from(&self.terminal.screen().modes);
        let bytes = encode_special(key, modifiers, modes);
        if bytes.is_empty() {
            debug!(?key, "special key has no encoding");
            return Ok(());
        }
        self.queue_input(&bytes)
    }

    fn send_raw(&mut self, data: &[u8]) -> BackendResult<()> {
        self.queue_input(data)
    }

    fn resize(&mut self, cols: usize, rows: usize) -> BackendResult<()> {
        let (cols, rows) = (cols.max(1), rows.max(1));
        let screen = self.terminal.screen();
        if screen.cols() == cols && screen.rows() == rows {
            return Ok(());
        }

        // Grid first, then the child's window size
        self.damage.resize(rows, cols);
        self.view = Grid::filled(cols, rows, self.terminal.screen().palette().blank(Color::Default));
        let events = self.terminal.resize(cols, rows);
        self.scroll_offset = self.scroll_offset.min(self.max_scroll());
        self.handle_events(events);
        if let Some(pty) = &self.pty {
            pty.resize(WindowSize::from_grid(cols, rows))?;
        }
        self.selection.clear();
        self.damage.mark_full();
        self.sync_to_grid();
        info!(cols, rows, "terminal resized");
        Ok(())
    }

    fn scroll_up(&mut self, lines: usize) -> BackendResult<()> {
        self.set_scroll_offset(self.scroll_offset.saturating_add(lines));
        Ok(())
    }

    fn scroll_down(&mut self, lines: usize) -> BackendResult<()> {
        self.set_scroll_offset(self.scroll_offset.saturating_sub(lines));
        Ok(())
    }

    fn scroll_to_top(&mut self) -> BackendResult<()> {
        self.set_scroll_offset(self.max_scroll());
        Ok(())
    }

    fn scroll_to_bottom(&mut self) -> BackendResult<()> {
        self.set_scroll_offset(0);
        Ok(())
    }

    fn scroll_offset(&self) -> usize {
        self.scroll_offset
    }

    fn scrollback_len(&self) -> usize {
        self.terminal.screen().scrollback().len()
    }

    fn sync_to_grid(&mut self) {
        let screen = self.terminal.screen();
        let live = screen.grid();
        if self.view.cols() != live.cols() || self.view.rows() != live.rows() {
            self.view = live.clone();
        }

        if self.scroll_offset == 0 {
            self.view.cells_mut().copy_from_slice(live.cells());
            for row in 0..live.rows() {
                self.view.set_wrapped(row, live.is_wrapped(row));
            }
            return;
        }

        let blank = screen.palette().blank(Color::Default);
        let history = screen.scrollback();
        let top = history.len().saturating_sub(self.scroll_offset);
        for row in 0..self.view.rows() {
            let line_index = top + row;
            let line = if line_index < history.len() {
                history.get(line_index).cloned()
            } else {
                live.line(line_index - history.len())
            };
            if let Some(line) = line {
                self.view.set_line(row, &line, blank);
            }
        }
    }

    fn grid(&self) -> &Grid {
        &self.view
    }

    /// Cursor in view space; hidden when scrolled out of view
    fn cursor(&self) -> CursorState {
        let row = self.cursor.row + self.scroll_offset;
        CursorState {
            row,
            col: self.cursor.col,
            visible: self.cursor.visible && row < self.view.rows(),
        }
    }

    fn is_alt_screen(&self) -> bool {
        self.terminal.screen().is_alternate()
    }

    fn mouse_mode(&self) -> MouseMode {
        self.mouse_mode
    }

    fn has_damage(&self) -> bool {
        self.damage.has_damage()
    }

    fn has_full_damage(&self) -> bool {
        self.damage.is_full()
    }

    fn damage_rects(&self) -> Vec<DamageRect> {
        self.damage.rects().to_vec()
    }

    fn clear_damage(&mut self) {
        self.damage.clear();
    }

    fn start_selection(&mut self, row: usize, col: usize, mode: SelectionMode) {
        self.selection.start(row, col, mode);
        self.damage.mark_full();
    }

    fn extend_selection(&mut self, row: usize, col: usize) {
        if self.selection.is_active() {
            self.selection.extend(row, col);
            self.damage.mark_full();
        }
    }

    fn clear_selection(&mut self) {
        if self.selection.is_active() {
            self.selection.clear();
            self.damage.mark_full();
        }
    }

    fn has_selection(&self) -> bool {
        self.selection.is_active()
    }

    fn is_in_selection(&self, row: usize, col: usize) -> bool {
        self.selection.contains(&self.view, row, col)
    }

    fn selected_text(&self) -> String {
        self.selection.text(&self.view)
    }

    fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }
}
