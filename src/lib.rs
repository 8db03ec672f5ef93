//! Gridmux terminal multiplexer library
//!
//! A VT emulator driven by a PTY child, whose screen is published through a
//! double-buffered shared-memory grid to any number of reader processes:
//!
//! - `core`: cells, grid, scrollback, damage, selection, screen model
//! - `parser`: VT/xterm escape sequence parser
//! - `terminal`: interpreter tying parser and screen together
//! - `input`: key and mouse encoding
//! - `pty`: pseudo-terminal and child process management
//! - `backend`: the `TerminalBackend` surface, local and remote
//! - `shm`: the shared replication buffer
//! - `protocol`: control-socket wire format
//! - `server`: the multiplexing event loop
//! - `config`: server configuration

pub mod backend;
pub mod config;
pub mod core;
pub mod input;
pub mod parser;
pub mod protocol;
pub mod pty;
pub mod server;
pub mod shm;
pub mod terminal;
