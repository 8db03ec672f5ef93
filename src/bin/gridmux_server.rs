//! Gridmux server
//!
//! Spawns a shell on a PTY, interprets its output and publishes the screen
//! through shared memory. Readers attach over the control socket.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use gridmux::config::{CliArgs, Config};
use gridmux::server::{install_signal_handlers, ServerState};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args = CliArgs::parse();
    let config = match Config::load_with_args(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(2);
        }
    };

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut server = ServerState::new(config)?;
    install_signal_handlers(&server.shutdown_flag())?;
    server.run()?;
    info!("server stopped");
    Ok(())
}
