//! Gridmux dump
//!
//! Prints a screen snapshot as text or JSON. The screen comes from a running
//! server (over its socket, or straight from a shared grid region), or from
//! replaying a byte stream through a detached interpreter.

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use gridmux::backend::{LocalBackend, LocalConfig, RemoteBackend, RemoteConfig, TerminalBackend};
use gridmux::config::Config;
use gridmux::core::Snapshot;
use gridmux::shm::SharedGridReader;
use tracing::{debug, error};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "gridmux-dump", version, about = "Print a gridmux screen snapshot")]
struct DumpArgs {
    /// Control socket of a running server
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Read this shared grid region directly instead of using the socket
    #[arg(short = 'm', long = "shm", conflicts_with_all = ["socket", "replay"])]
    shm_name: Option<String>,

    /// Replay raw terminal output from a file ("-" for stdin)
    #[arg(long, conflicts_with = "socket")]
    replay: Option<PathBuf>,

    /// Columns for --replay
    #[arg(short, long, default_value_t = 80)]
    cols: usize,

    /// Rows for --replay
    #[arg(short, long, default_value_t = 24)]
    rows: usize,

    /// Text to send to the server before dumping
    #[arg(short, long)]
    input: Option<String>,

    /// How long to wait for the server to redraw after --input
    #[arg(long, default_value_t = 200)]
    settle_ms: u64,

    /// Emit JSON instead of plain text
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args = DumpArgs::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &DumpArgs) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = if let Some(path) = &args.replay {
        replay(path, args.cols, args.rows)?
    } else if let Some(name) = &args.shm_name {
        let reader = SharedGridReader::open(name)?;
        let (header, grid) = reader.snapshot()?;
        debug!(seq = header.seq, "read frame");
        Snapshot {
            alternate_screen: header.is_alt_screen(),
            ..Snapshot::from_grid(&grid, header.cursor())
        }
    } else {
        let socket = args.socket.clone().unwrap_or_else(Config::default_socket_path);
        from_server(RemoteConfig::new(socket), args.input.as_deref(), args.settle_ms)?
    };

    let out = if args.json {
        let mut json = snapshot.to_json()?;
        json.push('\n');
        json
    } else {
        snapshot.to_text()
    };
    io::stdout().write_all(out.as_bytes())?;
    Ok(())
}

fn replay(path: &PathBuf, cols: usize, rows: usize) -> Result<Snapshot, Box<dyn std::error::Error>> {
    let data = if path.as_os_str() == "-" {
        let mut data = Vec::new();
        io::stdin().read_to_end(&mut data)?;
        data
    } else {
        fs::read(path)?
    };
    debug!(len = data.len(), "replaying");

    let mut backend = LocalBackend::new(LocalConfig {
        cols,
        rows,
        ..LocalConfig::default()
    });
    backend.process_output(&data);
    Ok(Snapshot::from_screen(backend.terminal().screen()))
}

fn from_server(config: RemoteConfig, input: Option<&str>, settle_ms: u64) -> Result<Snapshot, Box<dyn std::error::Error>> {
    let mut backend = RemoteBackend::start(&config)?;
    if let Some(text) = input {
        let start_seq = backend.last_seq();
        backend.send_raw(text.as_bytes())?;
        let deadline = Instant::now() + Duration::from_millis(settle_ms);
        while Instant::now() < deadline {
            backend.process_io()?;
            if backend.last_seq() > start_seq {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        // Let the rest of the redraw land
        std::thread::sleep(Duration::from_millis(settle_ms / 4));
    }
    backend.sync_to_grid();
    Ok(Snapshot {
        alternate_screen: backend.is_alt_screen(),
        ..Snapshot::from_grid(backend.grid(), backend.cursor())
    })
}
