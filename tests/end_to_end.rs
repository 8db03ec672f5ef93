//! Server and clients over a real socket and real shared memory

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use gridmux::backend::{LocalBackend, LocalConfig, Notification, RemoteBackend, RemoteConfig, TerminalBackend};
use gridmux::config::Config;
use gridmux::server::ServerState;
use gridmux::shm::SharedGridReader;

const TIMEOUT: Duration = Duration::from_secs(5);

fn config(dir: &Path, tag: &str) -> Config {
    Config {
        // Frames are only published when a test asks for one
        tick_ms: 60_000,
        socket_path: dir.join("gridmux.sock"),
        shm_name: format!("/gridmux-e2e-{}-{}", tag, std::process::id()),
        cols: 20,
        rows: 10,
        ..Config::default()
    }
}

fn detached(config: &Config) -> LocalBackend {
    LocalBackend::new(LocalConfig {
        cols: config.cols,
        rows: config.rows,
        ..LocalConfig::default()
    })
}

struct Client {
    writer: UnixStream,
    reader: BufReader<UnixStream>,
}

impl Client {
    fn connect(path: &Path) -> Self {
        let stream = UnixStream::connect(path).unwrap();
        stream.set_read_timeout(Some(TIMEOUT)).unwrap();
        Self {
            writer: stream.try_clone().unwrap(),
            reader: BufReader::new(stream),
        }
    }

    fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).unwrap();
    }

    fn line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).unwrap();
        line
    }
}

/// Run the loop until `done` holds
fn pump(state: &mut ServerState, mut done: impl FnMut(&ServerState) -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !done(state) {
        assert!(Instant::now() < deadline, "server did not reach expected state");
        state.poll_once().unwrap();
    }
}

#[test]
fn test_damage_notice_matches_published_frame() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), "damage");
    let mut state = ServerState::with_backend(&config, detached(&config)).unwrap();

    let mut client = Client::connect(state.socket_path());
    pump(&mut state, |s| s.client_count() == 1);
    assert_eq!(client.line(), format!("CONNECTED {} 20 10\n", config.shm_name));

    assert_eq!(state.sync_tick().unwrap(), Some(1));
    assert_eq!(client.line(), "DAMAGE 1 1 0 0 10 20 0 0 1\n");

    state.backend_mut().process_output(b"\x1b[3;3H");
    assert_eq!(state.sync_tick().unwrap(), Some(2));
    client.line();

    state
        .backend_mut()
        .process_output(b"XY\x1b[4;3HXY\x1b[4;4H");
    assert_eq!(state.sync_tick().unwrap(), Some(3));
    assert_eq!(client.line(), "DAMAGE 3 0 2 2 4 4 3 3 1\n");

    let reader = SharedGridReader::open(&config.shm_name).unwrap();
    let (header, grid) = reader.snapshot().unwrap();
    assert_eq!(header.seq, 3);
    assert!(!header.is_full_damage());
    assert_eq!(grid.row_text(2), "  XY");
    assert_eq!(grid.row_text(3), "  XY");
}

#[test]
fn test_commands_from_socket_reach_backend() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), "input");
    let mut state = ServerState::with_backend(&config, detached(&config)).unwrap();

    let mut client = Client::connect(state.socket_path());
    pump(&mut state, |s| s.client_count() == 1);
    client.line();

    client.send("KEY 97 0\nSPECIAL 1 0\nBOGUS\nRAW 3\nl\ns\n");
    pump(&mut state, |s| s.backend().pending_input().len() >= 5);
    assert_eq!(state.backend().pending_input(), b"a\rl\ns");

    client.send("START\n");
    state.poll_once().unwrap();
    assert_eq!(client.line(), "OK\n");
}

#[test]
fn test_resize_remaps_clients() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), "resize");
    let mut state = ServerState::with_backend(&config, detached(&config)).unwrap();

    let mut client = Client::connect(state.socket_path());
    pump(&mut state, |s| s.client_count() == 1);
    client.line();
    state.sync_tick().unwrap();
    assert!(client.line().starts_with("DAMAGE 1 "));

    client.send("RESIZE 30 12\n");
    pump(&mut state, |s| s.backend().cols() == 30);
    assert_eq!(client.line(), format!("RESIZED {} 30 12\n", config.shm_name));
    // The first frame after a resize is full and continues the numbering
    assert!(client.line().starts_with("DAMAGE 2 1 0 0 12 30 "));

    let reader = SharedGridReader::open(&config.shm_name).unwrap();
    assert_eq!((reader.cols(), reader.rows()), (30, 12));

    // Same size again changes nothing
    client.send("RESIZE 30 12\n");
    state.poll_once().unwrap();
    assert_eq!(state.seq(), 2);
}

#[test]
fn test_remote_backend_follows_server() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        tick_ms: 20,
        ..config(dir.path(), "remote")
    };
    let socket_path = config.socket_path.clone();

    let (tx, rx) = mpsc::channel();
    let server = thread::spawn(move || {
        let mut state = ServerState::with_backend(&config, detached(&config)).unwrap();
        state.backend_mut().process_output(b"remote view");
        tx.send(state.shutdown_flag()).unwrap();
        state.run().unwrap();
    });
    let shutdown = rx.recv_timeout(TIMEOUT).unwrap();

    let mut remote = RemoteBackend::start(&RemoteConfig::new(&socket_path)).unwrap();
    assert_eq!((remote.cols(), remote.rows()), (20, 10));

    let deadline = Instant::now() + TIMEOUT;
    while remote.grid().row_text(0) != "remote view" {
        assert!(Instant::now() < deadline, "frame never arrived");
        remote.process_io().unwrap();
        remote.sync_to_grid();
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(remote.cursor().col, 11);

    remote.resize(25, 8).unwrap();
    let deadline = Instant::now() + TIMEOUT;
    while remote.cols() != 25 {
        assert!(Instant::now() < deadline, "resize never arrived");
        remote.process_io().unwrap();
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(remote.rows(), 8);
    assert!(remote
        .take_notifications()
        .contains(&Notification::Resized { cols: 25, rows: 8 }));

    shutdown.store(true, Ordering::Relaxed);
    server.join().unwrap();
    assert!(!socket_path.exists());
}
