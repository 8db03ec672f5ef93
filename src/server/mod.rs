//! Multiplexing server loop
//!
//! One thread, one `poll(2)` loop. The loop services the PTY and the control
//! socket as they become ready and, once per tick, publishes pending damage
//! into the shared grid and tells every client about it.

mod client;

pub use client::{ClientConnection, ReadStatus};

use std::fs;
use std::io;
use std::os::fd::AsFd;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::{debug, error, info, trace, warn};

use crate::backend::{BackendError, LocalBackend, Notification, TerminalBackend};
use crate::config::Config;
use crate::core::DamageRect;
use crate::input::{Modifiers, SpecialKey};
use crate::protocol::{ClientCommand, DamageNotice, ServerMessage};
use crate::shm::{self, FrameMeta, SharedGrid, ShmError};

/// Error type for the server
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind control socket {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Control socket error: {0}")]
    Socket(#[from] io::Error),

    #[error("Shared grid error: {0}")]
    SharedGrid(#[from] ShmError),

    #[error("Poll failed: {0}")]
    Poll(#[source] Errno),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

pub type ServerResult<T> = Result<T, ServerError>;

/// PTY reads serviced per readiness before giving clients a turn
const MAX_READS_PER_WAKE: usize = 16;

/// Set `flag` on SIGINT and SIGTERM
pub fn install_signal_handlers(flag: &Arc<AtomicBool>) -> io::Result<()> {
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(signal, Arc::clone(flag))?;
    }
    Ok(())
}

/// Create the shared grid, replacing a stale region left by a dead server
fn create_shared_grid(name: &str, cols: usize, rows: usize) -> ServerResult<SharedGrid> {
    match SharedGrid::create(name, cols, rows) {
        Err(ShmError::AlreadyExists(_)) => {
            warn!(name, "removing stale shared grid");
            shm::unlink(name)?;
            Ok(SharedGrid::create(name, cols, rows)?)
        }
        other => Ok(other?),
    }
}

/// Bind the control socket, replacing a stale socket file
fn bind_socket(path: &Path) -> ServerResult<UnixListener> {
    if let Ok(meta) = fs::symlink_metadata(path) {
        if meta.file_type().is_socket() {
            warn!(path = %path.display(), "removing stale socket");
            fs::remove_file(path).map_err(|source| ServerError::Bind {
                path: path.to_path_buf(),
                source,
            })?;
        }
    }
    let bind_err = |source| ServerError::Bind {
        path: path.to_path_buf(),
        source,
    };
    let listener = UnixListener::bind(path).map_err(bind_err)?;
    listener.set_nonblocking(true).map_err(bind_err)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o666)).map_err(bind_err)?;
    Ok(listener)
}

/// Everything the server loop owns
pub struct ServerState {
    socket_path: PathBuf,
    shm_name: String,
    listener: UnixListener,
    backend: LocalBackend,
    /// `None` only between dropping and recreating the region on resize
    shared: Option<SharedGrid>,
    clients: Vec<ClientConnection>,
    next_client_id: u64,
    tick: Duration,
    last_tick: Instant,
    shutdown: Arc<AtomicBool>,
}

impl ServerState {
    /// Spawn the configured shell and set up socket and shared grid
    pub fn new(config: &Config) -> ServerResult<Self> {
        let backend = LocalBackend::spawn(config.local_config(), &config.spawn_command())?;
        Self::with_backend(config, backend)
    }

    /// Serve an existing backend
    pub fn with_backend(config: &Config, backend: LocalBackend) -> ServerResult<Self> {
        let shared = create_shared_grid(&config.shm_name, backend.cols(), backend.rows())?;
        let listener = match bind_socket(&config.socket_path) {
            Ok(listener) => listener,
            Err(e) => {
                drop(shared);
                return Err(e);
            }
        };
        info!(
            socket = %config.socket_path.display(),
            shm = %config.shm_name,
            cols = backend.cols(),
            rows = backend.rows(),
            "server listening"
        );
        Ok(Self {
            socket_path: config.socket_path.clone(),
            shm_name: config.shm_name.clone(),
            listener,
            backend,
            shared: Some(shared),
            clients: Vec::new(),
            next_client_id: 1,
            tick: config.tick(),
            last_tick: Instant::now(),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn shm_name(&self) -> &str {
        &self.shm_name
    }

    pub fn backend(&self) -> &LocalBackend {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut LocalBackend {
        &mut self.backend
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Sequence number of the last published frame
    pub fn seq(&self) -> u64 {
        self.shared.as_ref().map(SharedGrid::seq).unwrap_or(0)
    }

    /// Flag that stops [`ServerState::run`] when set
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Run until shutdown is requested or the child exits
    pub fn run(&mut self) -> ServerResult<()> {
        while !self.shutdown.load(Ordering::Relaxed) {
            self.poll_once()?;
            if !self.backend.is_running() {
                self.sync_tick()?;
                info!("child exited, stopping server");
                break;
            }
        }
        Ok(())
    }

    /// Wait for readiness (at most until the next tick) and service it
    pub fn poll_once(&mut self) -> ServerResult<()> {
        let until_tick = (self.last_tick + self.tick).saturating_duration_since(Instant::now());
        let timeout = PollTimeout::from(until_tick.as_millis().min(u16::MAX as u128) as u16);

        let (listener_ready, pty_ready, client_ready) = {
            let mut fds = Vec::with_capacity(2 + self.clients.len());
            fds.push(PollFd::new(self.listener.as_fd(), PollFlags::POLLIN));
            let pty_fd = self.backend.poll_fd();
            let has_pty = pty_fd.is_some();
            if let Some(fd) = pty_fd {
                let mut flags = PollFlags::POLLIN;
                if self.backend.wants_write() {
                    flags |= PollFlags::POLLOUT;
                }
                fds.push(PollFd::new(fd, flags));
            }
            for client in &self.clients {
                let mut flags = PollFlags::POLLIN;
                if client.wants_write() {
                    flags |= PollFlags::POLLOUT;
                }
                fds.push(PollFd::new(client.as_fd(), flags));
            }

            match poll(&mut fds, timeout) {
                Ok(_) => {}
                Err(Errno::EINTR) => return Ok(()),
                Err(e) => return Err(ServerError::Poll(e)),
            }

            let ready: Vec<bool> = fds
                .iter()
                .map(|fd| fd.revents().is_some_and(|r| !r.is_empty()))
                .collect();
            let client_start = if has_pty { 2 } else { 1 };
            (ready[0], has_pty && ready[1], ready[client_start..].to_vec())
        };

        if pty_ready {
            self.service_pty()?;
        }
        if listener_ready {
            self.accept_clients();
        }
        self.service_clients(&client_ready)?;

        if self.last_tick.elapsed() >= self.tick {
            self.last_tick = Instant::now();
            self.sync_tick()?;
        }
        Ok(())
    }

    fn service_pty(&mut self) -> ServerResult<()> {
        for _ in 0..MAX_READS_PER_WAKE {
            if !self.backend.process_io()? {
                break;
            }
        }
        Ok(())
    }

    fn accept_clients(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    let id = self.next_client_id;
                    self.next_client_id += 1;
                    let mut client = match ClientConnection::new(id, stream) {
                        Ok(client) => client,
                        Err(e) => {
                            warn!(error = %e, "failed to set up client");
                            continue;
                        }
                    };
                    let hello = ServerMessage::Connected {
                        shm_name: self.shm_name.clone(),
                        cols: self.backend.cols(),
                        rows: self.backend.rows(),
                    };
                    match client.send(&hello) {
                        Ok(()) => {
                            info!(client = id, "client connected");
                            self.clients.push(client);
                        }
                        Err(e) => warn!(client = id, error = %e, "client dropped during handshake"),
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn service_clients(&mut self, ready: &[bool]) -> ServerResult<()> {
        let mut commands = Vec::new();
        let mut closed = Vec::new();

        for (idx, client) in self.clients.iter_mut().enumerate() {
            if !ready.get(idx).copied().unwrap_or(false) {
                continue;
            }
            let status = client.read_available().and_then(|status| {
                client.flush()?;
                Ok(status)
            });
            match status {
                Ok(ReadStatus::Open) => {}
                Ok(ReadStatus::Closed) => closed.push(client.id()),
                Err(e) => {
                    debug!(client = client.id(), error = %e, "client read failed");
                    closed.push(client.id());
                }
            }
            while let Some(command) = client.next_command() {
                match command {
                    Ok(command) => commands.push((client.id(), command)),
                    Err(e) => warn!(client = client.id(), error = %e, "skipping malformed command"),
                }
            }
        }

        self.drop_clients(&closed);
        for (id, command) in commands {
            self.handle_command(id, command)?;
        }
        Ok(())
    }

    fn drop_clients(&mut self, ids: &[u64]) {
        if ids.is_empty() {
            return;
        }
        self.clients.retain(|client| {
            let keep = !ids.contains(&client.id());
            if !keep {
                info!(client = client.id(), "client disconnected");
            }
            keep
        });
    }

    /// Send a message to every client, dropping the ones that fail
    fn broadcast(&mut self, message: &ServerMessage) {
        let mut failed = Vec::new();
        for client in &mut self.clients {
            if let Err(e) = client.send(message) {
                debug!(client = client.id(), error = %e, "client write failed");
                failed.push(client.id());
            }
        }
        self.drop_clients(&failed);
    }

    fn send_to(&mut self, id: u64, message: &ServerMessage) {
        let failed = self
            .clients
            .iter_mut()
            .find(|c| c.id() == id)
            .is_some_and(|client| client.send(message).is_err());
        if failed {
            self.drop_clients(&[id]);
        }
    }

    /// Apply one client command. Backend refusals are logged, not fatal.
    pub fn handle_command(&mut self, client: u64, command: ClientCommand) -> ServerResult<()> {
        trace!(client, ?command, "command");
        let result = match command {
            ClientCommand::Key { codepoint, modifiers } => {
                self.backend.send_key(codepoint, Modifiers::from_wire(modifiers))
            }
            ClientCommand::Special { key, modifiers } => match SpecialKey::from_code(key) {
                Some(key) => self.backend.send_special_key(key, Modifiers::from_wire(modifiers)),
                None => {
                    warn!(client, key, "unknown special key");
                    Ok(())
                }
            },
            ClientCommand::Raw(data) => self.backend.send_raw(&data),
            ClientCommand::Resize { cols, rows } => return self.resize(cols, rows),
            ClientCommand::Scroll(lines) if lines > 0 => self.backend.scroll_up(lines.unsigned_abs() as usize),
            ClientCommand::Scroll(lines) => self.backend.scroll_down(lines.unsigned_abs() as usize),
            ClientCommand::ScrollTop => self.backend.scroll_to_top(),
            ClientCommand::ScrollBottom => self.backend.scroll_to_bottom(),
            ClientCommand::Start(shell) => {
                debug!(client, ?shell, "start requested, child already running");
                self.send_to(client, &ServerMessage::Ok);
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!(client, error = %e, "command failed");
        }
        Ok(())
    }

    /// Resize the terminal and recreate the shared grid under the same name.
    ///
    /// Runs grid resize, PTY window size and region recreation back to back,
    /// then tells clients to remap before any further damage goes out.
    pub fn resize(&mut self, cols: usize, rows: usize) -> ServerResult<()> {
        if cols == self.backend.cols() && rows == self.backend.rows() {
            debug!(cols, rows, "resize to current size ignored");
            return Ok(());
        }
        if !(1..=shm::MAX_DIMENSION).contains(&cols) || !(1..=shm::MAX_DIMENSION).contains(&rows) {
            warn!(cols, rows, "resize out of range ignored");
            return Ok(());
        }

        self.backend.resize(cols, rows)?;

        let seq = self.seq();
        // The old region must be gone before one with the same name exists
        self.shared = None;
        let shared = match create_shared_grid(&self.shm_name, cols, rows) {
            Ok(shared) => shared,
            Err(e) => {
                error!(error = %e, "failed to recreate shared grid for resize");
                return Err(e);
            }
        };
        self.shared = Some(shared.with_start_seq(seq));
        info!(cols, rows, "resized");

        self.broadcast(&ServerMessage::Resized {
            shm_name: self.shm_name.clone(),
            cols,
            rows,
        });
        self.sync_tick()?;
        Ok(())
    }

    /// Publish pending damage, if any, and notify clients.
    ///
    /// Returns the sequence number of the published frame.
    pub fn sync_tick(&mut self) -> ServerResult<Option<u64>> {
        for notification in self.backend.take_notifications() {
            match notification {
                Notification::ChildExited(status) => info!(?status, "child exited"),
                other => debug!(?other, "backend notification"),
            }
        }
        if !self.backend.has_damage() {
            return Ok(None);
        }

        self.backend.sync_to_grid();
        let damage = self.backend.take_damage();
        let (rows, cols) = (self.backend.rows(), self.backend.cols());
        let rect = damage
            .bounding_rect(rows, cols)
            .unwrap_or(DamageRect::full(rows, cols));
        let cursor = self.backend.cursor();
        let meta = FrameMeta {
            cursor,
            alt_screen: self.backend.is_alt_screen(),
            full_damage: damage.full,
            damage: rect,
            scroll_offset: i32::try_from(self.backend.scroll_offset()).unwrap_or(i32::MAX),
        };

        let Some(shared) = self.shared.as_mut() else {
            return Ok(None);
        };
        let seq = shared.publish(self.backend.grid(), meta)?;
        self.broadcast(&ServerMessage::Damage(DamageNotice {
            seq,
            full: damage.full,
            rect,
            cursor,
        }));
        Ok(Some(seq))
    }
}

impl Drop for ServerState {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.socket_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(error = %e, "failed to remove control socket");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalConfig;
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::UnixStream;

    fn test_config(dir: &Path, tag: &str) -> Config {
        Config {
            socket_path: dir.join("gridmux.sock"),
            shm_name: format!("/gridmux-srv-{}-{}", tag, std::process::id()),
            cols: 20,
            rows: 5,
            ..Config::default()
        }
    }

    fn server(dir: &Path, tag: &str) -> ServerState {
        let config = test_config(dir, tag);
        let backend = LocalBackend::new(LocalConfig {
            cols: 20,
            rows: 5,
            ..LocalConfig::default()
        });
        ServerState::with_backend(&config, backend).unwrap()
    }

    #[test]
    fn test_first_tick_publishes_full_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = server(dir.path(), "first");
        assert_eq!(state.sync_tick().unwrap(), Some(1));
        assert_eq!(state.sync_tick().unwrap(), None);
        assert_eq!(state.seq(), 1);
    }

    #[test]
    fn test_socket_is_world_accessible_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let state = server(dir.path(), "perm");
            let mode = fs::metadata(state.socket_path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o666);
            state.socket_path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_stale_socket_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), "stale");
        let stale = UnixListener::bind(&config.socket_path).unwrap();
        drop(stale);
        assert!(config.socket_path.exists());
        let state = ServerState::with_backend(&config, LocalBackend::new(LocalConfig::default()));
        assert!(state.is_ok());
    }

    #[test]
    fn test_client_receives_connected_and_ok() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = server(dir.path(), "hello");
        let stream = UnixStream::connect(state.socket_path()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut reader = BufReader::new(stream);

        state.poll_once().unwrap();
        assert_eq!(state.client_count(), 1);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, format!("CONNECTED {} 20 5\n", state.shm_name()));

        writer.write_all(b"START\n").unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        line.clear();
        while line.is_empty() && Instant::now() < deadline {
            state.poll_once().unwrap();
            let _ = reader.read_line(&mut line);
            // The first tick may publish a frame before the reply
            if line.starts_with("DAMAGE") {
                line.clear();
            }
        }
        assert_eq!(line, "OK\n");
    }

    #[test]
    fn test_commands_reach_backend() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = server(dir.path(), "cmds");
        state
            .handle_command(0, ClientCommand::Key { codepoint: 'a' as u32, modifiers: 0 })
            .unwrap();
        state
            .handle_command(0, ClientCommand::Special { key: SpecialKey::Enter.code(), modifiers: 0 })
            .unwrap();
        state
            .handle_command(0, ClientCommand::Raw(b"ls".to_vec()))
            .unwrap();
        // Unknown special keys are skipped
        state
            .handle_command(0, ClientCommand::Special { key: 9999, modifiers: 0 })
            .unwrap();
        assert_eq!(state.backend().pending_input(), b"a\rls");
    }

    #[test]
    fn test_scroll_commands() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = server(dir.path(), "scroll");
        for i in 0..10 {
            state
                .backend_mut()
                .process_output(format!("{i}\r\n").as_bytes());
        }
        state.handle_command(0, ClientCommand::Scroll(2)).unwrap();
        assert_eq!(state.backend().scroll_offset(), 2);
        state.handle_command(0, ClientCommand::Scroll(-1)).unwrap();
        assert_eq!(state.backend().scroll_offset(), 1);
        state.handle_command(0, ClientCommand::ScrollTop).unwrap();
        assert_eq!(state.backend().scroll_offset(), state.backend().scrollback_len());
        state.handle_command(0, ClientCommand::ScrollBottom).unwrap();
        assert_eq!(state.backend().scroll_offset(), 0);
    }

    #[test]
    fn test_resize_recreates_region_and_keeps_seq() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = server(dir.path(), "resize");
        state.sync_tick().unwrap();
        state.resize(30, 8).unwrap();
        assert_eq!((state.backend().cols(), state.backend().rows()), (30, 8));
        assert_eq!(state.seq(), 2);

        let reader = shm::SharedGridReader::open(state.shm_name()).unwrap();
        assert_eq!((reader.cols(), reader.rows()), (30, 8));
        assert_eq!(reader.active_buffer_header().seq, 2);

        // Same geometry again is a no-op
        state.resize(30, 8).unwrap();
        assert_eq!(state.seq(), 2);
    }
}
