//! Reader-side backend mirroring a server's shared grid

use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use super::{BackendError, BackendResult, Notification, TerminalBackend};
use crate::core::{CursorState, DamageRect, DamageTracker, Grid, MouseMode, Selection, SelectionMode};
use crate::input::{Modifiers, SpecialKey};
use crate::protocol::{ClientCommand, DamageNotice, LineDecoder, ServerMessage};
use crate::shm::{BufferHeader, SharedGridReader};

/// Delay between connection attempts while a server starts up
const CONNECT_RETRY: Duration = Duration::from_millis(20);

/// Attempts to map a region the server announced but may still be creating
const MAP_ATTEMPTS: usize = 200;

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub socket_path: PathBuf,
    /// Server to launch when nothing is listening on `socket_path`
    pub server_program: Option<PathBuf>,
    pub server_args: Vec<String>,
    pub connect_timeout: Duration,
}

impl RemoteConfig {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            server_program: None,
            server_args: Vec::new(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Backend that renders a grid published by a `gridmux-server`.
///
/// Queries are answered from the mapped region. Input, resize and scroll
/// requests go to the server as protocol commands; their effect shows up in
/// a later frame.
pub struct RemoteBackend {
    stream: UnixStream,
    decoder: LineDecoder,
    outbound: Vec<u8>,
    reader: SharedGridReader,
    /// Server process started by [`RemoteBackend::start`], if any
    server: Option<Child>,
    connected: bool,
    view: Grid,
    cursor: CursorState,
    alt_screen: bool,
    scroll_offset: usize,
    damage: DamageTracker,
    /// Sequence number of the last frame accounted for
    last_seq: u64,
    selection: Selection,
    notifications: Vec<Notification>,
}

impl RemoteBackend {
    /// Connect to a server, launching one if configured and none is up, and
    /// complete the handshake.
    pub fn start(config: &RemoteConfig) -> BackendResult<Self> {
        let deadline = Instant::now() + config.connect_timeout;
        let mut server = None;
        let stream = loop {
            match UnixStream::connect(&config.socket_path) {
                Ok(stream) => break stream,
                Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused) => {
                    if server.is_none() {
                        let Some(program) = &config.server_program else {
                            return Err(e.into());
                        };
                        info!(program = %program.display(), "no server listening, starting one");
                        server = Some(
                            Command::new(program)
                                .args(&config.server_args)
                                .stdin(Stdio::null())
                                .spawn()?,
                        );
                    }
                    if Instant::now() >= deadline {
                        return Err(BackendError::HandshakeTimeout(config.socket_path.display().to_string()));
                    }
                    std::thread::sleep(CONNECT_RETRY);
                }
                Err(e) => return Err(e.into()),
            }
        };
        let mut backend = Self::handshake(stream, deadline, &config.socket_path.display().to_string())?;
        backend.server = server;
        Ok(backend)
    }

    /// Complete the handshake on an already connected socket
    pub fn connect(stream: UnixStream, timeout: Duration) -> BackendResult<Self> {
        let label = stream
            .peer_addr()
            .ok()
            .and_then(|addr| addr.as_pathname().map(|p| p.display().to_string()))
            .unwrap_or_else(|| "socket".to_string());
        Self::handshake(stream, Instant::now() + timeout, &label)
    }

    fn handshake(mut stream: UnixStream, deadline: Instant, label: &str) -> BackendResult<Self> {
        let timeout_err = || BackendError::HandshakeTimeout(label.to_string());

        stream.write_all(&ClientCommand::Start(None).encode())?;

        let mut decoder = LineDecoder::new();
        let mut buf = [0u8; 1024];
        let (shm_name, cols, rows) = 'handshake: loop {
            while let Some(message) = decoder.next_message() {
                match message? {
                    ServerMessage::Connected { shm_name, cols, rows } => break 'handshake (shm_name, cols, rows),
                    other => debug!(?other, "message before CONNECTED ignored"),
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(timeout_err());
            }
            stream.set_read_timeout(Some(remaining))?;
            match stream.read(&mut buf) {
                Ok(0) => return Err(BackendError::Disconnected),
                Ok(n) => decoder.feed(&buf[..n]),
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    return Err(timeout_err());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        };
        stream.set_read_timeout(None)?;
        stream.set_nonblocking(true)?;

        let reader = SharedGridReader::open_when_ready(&shm_name, MAP_ATTEMPTS)?;
        info!(shm = %shm_name, cols, rows, "attached to server");

        let mut damage = DamageTracker::new(rows, cols);
        damage.mark_full();
        let mut backend = Self {
            stream,
            decoder,
            outbound: Vec::new(),
            reader,
            server: None,
            connected: true,
            view: Grid::new(cols, rows),
            cursor: CursorState::default(),
            alt_screen: false,
            scroll_offset: 0,
            damage,
            last_seq: 0,
            selection: Selection::new(),
            notifications: Vec::new(),
        };
        backend.sync_to_grid();
        // The server may already have queued messages behind CONNECTED
        backend.drain_messages();
        Ok(backend)
    }

    /// Name of the mapped shared grid
    pub fn shm_name(&self) -> &str {
        self.reader.name()
    }

    /// Sequence number of the last frame seen
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Pid of the server this backend launched
    pub fn server_pid(&self) -> Option<u32> {
        self.server.as_ref().map(Child::id)
    }

    /// Header of the frame currently published
    pub fn active_buffer_header(&self) -> BufferHeader {
        self.reader.active_buffer_header()
    }

    fn send(&mut self, command: ClientCommand) -> BackendResult<()> {
        if !self.connected {
            return Err(BackendError::Disconnected);
        }
        trace!(?command, "sending");
        self.outbound.extend_from_slice(&command.encode());
        self.flush()
    }

    fn flush(&mut self) -> BackendResult<()> {
        while !self.outbound.is_empty() {
            match self.stream.write(&self.outbound) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => {
                    self.outbound.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    self.disconnect();
                    return Err(BackendError::Disconnected);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.connected {
            info!("server connection closed");
            self.connected = false;
            self.outbound.clear();
            self.notifications.push(Notification::Disconnected);
        }
    }

    fn drain_messages(&mut self) {
        while let Some(message) = self.decoder.next_message() {
            match message {
                Ok(ServerMessage::Damage(notice)) => self.handle_damage(notice),
                Ok(ServerMessage::Resized { shm_name, cols, rows }) => self.remap(&shm_name, cols, rows),
                Ok(ServerMessage::Connected { shm_name, cols, rows }) => {
                    if cols != self.view.cols() || rows != self.view.rows() || shm_name != self.reader.name() {
                        self.remap(&shm_name, cols, rows);
                    }
                }
                Ok(ServerMessage::Ok) => debug!("server acknowledged start"),
                Err(e) => warn!(error = %e, "skipping malformed server message"),
            }
        }
    }

    fn handle_damage(&mut self, notice: DamageNotice) {
        if notice.seq <= self.last_seq {
            // Already picked up by an earlier read of the region
            return;
        }
        if notice.seq != self.last_seq + 1 {
            debug!(last = self.last_seq, seq = notice.seq, "missed frames, redrawing everything");
            self.damage.mark_full();
        } else if notice.full {
            self.damage.mark_full();
        } else {
            self.damage.mark_damage(notice.rect);
        }
        self.cursor = notice.cursor;
        self.last_seq = notice.seq;
    }

    fn remap(&mut self, shm_name: &str, cols: usize, rows: usize) {
        match SharedGridReader::open_when_ready(shm_name, MAP_ATTEMPTS) {
            Ok(reader) => {
                info!(shm = shm_name, cols = reader.cols(), rows = reader.rows(), "remapped shared grid");
                let (cols, rows) = (reader.cols(), reader.rows());
                self.reader = reader;
                self.view = Grid::new(cols, rows);
                self.damage.resize(rows, cols);
                self.damage.mark_full();
                self.selection.clear();
                self.notifications.push(Notification::Resized { cols, rows });
            }
            Err(e) => warn!(shm = shm_name, cols, rows, error = %e, "failed to remap shared grid"),
        }
    }

    fn apply_header(&mut self, header: &BufferHeader) {
        if header.seq > self.last_seq {
            if header.seq != self.last_seq + 1 || header.is_full_damage() {
                self.damage.mark_full();
            } else {
                self.damage.mark_damage(header.damage());
            }
            self.last_seq = header.seq;
        }
        self.cursor = header.cursor();
        self.alt_screen = header.is_alt_screen();
        self.scroll_offset = usize::try_from(header.scroll_offset).unwrap_or(0);
    }
}

impl TerminalBackend for RemoteBackend {
    fn is_running(&self) -> bool {
        self.connected
    }

    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        self.connected.then(|| self.stream.as_fd())
    }

    fn process_io(&mut self) -> BackendResult<bool> {
        if !self.connected {
            return Ok(false);
        }
        self.flush()?;

        let mut buf = [0u8; 4096];
        let mut progressed = false;
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    self.disconnect();
                    progressed = true;
                    break;
                }
                Ok(n) => {
                    self.decoder.feed(&buf[..n]);
                    progressed = true;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                    self.disconnect();
                    progressed = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.drain_messages();
        Ok(progressed)
    }

    fn wants_write(&self) -> bool {
        !self.outbound.is_empty()
    }

    fn send_key(&mut self, codepoint: u32, modifiers: Modifiers) -> BackendResult<()> {
        self.send(ClientCommand::Key {
            codepoint,
            modifiers: modifiers.to_wire(),
        })
    }

    fn send_special_key(&mut self, key: SpecialKey, modifiers: Modifiers) -> BackendResult<()> {
        self.send(ClientCommand::Special {
            key: key.code(),
            modifiers: modifiers.to_wire(),
        })
    }

    fn send_raw(&mut self, data: &[u8]) -> BackendResult<()> {
        self.send(ClientCommand::Raw(data.to_vec()))
    }

    fn resize(&mut self, cols: usize, rows: usize) -> BackendResult<()> {
        if cols == self.view.cols() && rows == self.view.rows() {
            return Ok(());
        }
        self.send(ClientCommand::Resize { cols, rows })
    }

    fn scroll_up(&mut self, lines: usize) -> BackendResult<()> {
        self.send(ClientCommand::Scroll(i32::try_from(lines).unwrap_or(i32::MAX)))
    }

    fn scroll_down(&mut self, lines: usize) -> BackendResult<()> {
        self.send(ClientCommand::Scroll(-i32::try_from(lines).unwrap_or(i32::MAX)))
    }

    fn scroll_to_top(&mut self) -> BackendResult<()> {
        self.send(ClientCommand::ScrollTop)
    }

    fn scroll_to_bottom(&mut self) -> BackendResult<()> {
        self.send(ClientCommand::ScrollBottom)
    }

    fn scroll_offset(&self) -> usize {
        self.scroll_offset
    }

    /// History depth is not published; the current offset is a lower bound
    fn scrollback_len(&self) -> usize {
        self.scroll_offset
    }

    fn sync_to_grid(&mut self) {
        match self.reader.read_into_grid(&mut self.view) {
            Ok(header) => self.apply_header(&header),
            Err(e) => warn!(error = %e, "failed to read shared grid"),
        }
    }

    fn grid(&self) -> &Grid {
        &self.view
    }

    fn cursor(&self) -> CursorState {
        self.cursor
    }

    fn is_alt_screen(&self) -> bool {
        self.alt_screen
    }

    /// Mouse reporting state is not part of the published frame
    fn mouse_mode(&self) -> MouseMode {
        MouseMode::None
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
