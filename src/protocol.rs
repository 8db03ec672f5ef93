//! Control-socket wire protocol
//!
//! Line-oriented UTF-8 commands terminated by `\n`. The one exception is
//! `RAW <len>`, whose line is followed by exactly `len` payload bytes.
//!
//! Client to server: `KEY <codepoint> <mod>`, `SPECIAL <key> <mod>`,
//! `RAW <len>`, `RESIZE <cols> <rows>`, `SCROLL <lines>`, `SCROLL_TOP`,
//! `SCROLL_BOTTOM`, `START [shell]`.
//!
//! Server to client: `CONNECTED <shm> <cols> <rows>`,
//! `DAMAGE <seq> <full> <sr> <sc> <er> <ec> <row> <col> <visible>`,
//! `RESIZED <shm> <cols> <rows>`, `OK`.

use std::str::FromStr;

use crate::core::{CursorState, DamageRect};

/// Longest command line accepted before the buffer is discarded
pub const MAX_LINE_LEN: usize = 4096;
/// Largest `RAW` payload accepted
pub const MAX_RAW_LEN: usize = 1 << 20;

/// Error type for protocol parsing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Unknown command: {0:?}")]
    UnknownCommand(String),

    #[error("{command}: expected {expected} argument(s), got {found}")]
    Arity {
        command: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("{command}: invalid number {value:?}")]
    InvalidNumber { command: &'static str, value: String },

    #[error("RAW payload of {0} bytes exceeds the limit")]
    RawTooLarge(usize),

    #[error("Line exceeds {0} bytes")]
    LineTooLong(usize),

    #[error("Line is not valid UTF-8")]
    InvalidUtf8,
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// A request from a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Key { codepoint: u32, modifiers: u32 },
    Special { key: u32, modifiers: u32 },
    Raw(Vec<u8>),
    Resize { cols: usize, rows: usize },
    /// Positive scrolls back into history, negative towards the live screen
    Scroll(i32),
    ScrollTop,
    ScrollBottom,
    Start(Option<String>),
}

/// Payload of a `DAMAGE` notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DamageNotice {
    pub seq: u64,
    pub full: bool,
    pub rect: DamageRect,
    pub cursor: CursorState,
}

/// A notification from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Connected { shm_name: String, cols: usize, rows: usize },
    Damage(DamageNotice),
    Resized { shm_name: String, cols: usize, rows: usize },
    Ok,
}

impl ClientCommand {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ClientCommand::Key { codepoint, modifiers } => format!("KEY {codepoint} {modifiers}\n").into_bytes(),
            ClientCommand::Special { key, modifiers } => format!("SPECIAL {key} {modifiers}\n").into_bytes(),
            ClientCommand::Raw(data) => {
                let mut out = format!("RAW {}\n", data.len()).into_bytes();
                out.extend_from_slice(data);
                out
            }
            ClientCommand::Resize { cols, rows } => format!("RESIZE {cols} {rows}\n").into_bytes(),
            ClientCommand::Scroll(lines) => format!("SCROLL {lines}\n").into_bytes(),
            ClientCommand::ScrollTop => b"SCROLL_TOP\n".to_vec(),
            ClientCommand::ScrollBottom => b"SCROLL_BOTTOM\n".to_vec(),
            ClientCommand::Start(None) => b"START\n".to_vec(),
            ClientCommand::Start(Some(shell)) => format!("START {shell}\n").into_bytes(),
        }
    }
}

impl ServerMessage {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ServerMessage::Connected { shm_name, cols, rows } => format!("CONNECTED {shm_name} {cols} {rows}\n"),
            ServerMessage::Resized { shm_name, cols, rows } => format!("RESIZED {shm_name} {cols} {rows}\n"),
            ServerMessage::Damage(d) => format!(
                "DAMAGE {} {} {} {} {} {} {} {} {}\n",
                d.seq,
                d.full as u8,
                d.rect.start_row,
                d.rect.start_col,
                d.rect.end_row,
                d.rect.end_col,
                d.cursor.row,
                d.cursor.col,
                d.cursor.visible as u8,
            ),
            ServerMessage::Ok => "OK\n".to_string(),
        }
        .into_bytes()
    }

    /// Parse one line (without its terminator)
    pub fn parse(line: &str) -> ProtocolResult<Self> {
        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();
        match command {
            "CONNECTED" => {
                let (shm_name, cols, rows) = geometry("CONNECTED", &args)?;
                Ok(ServerMessage::Connected { shm_name, cols, rows })
            }
            "RESIZED" => {
                let (shm_name, cols, rows) = geometry("RESIZED", &args)?;
                Ok(ServerMessage::Resized { shm_name, cols, rows })
            }
            "DAMAGE" => {
                let [seq, full, sr, sc, er, ec, row, col, visible] = exact::<9>("DAMAGE", &args)?;
                Ok(ServerMessage::Damage(DamageNotice {
                    seq: number("DAMAGE", seq)?,
                    full: flag("DAMAGE", full)?,
                    rect: DamageRect::new(
                        number("DAMAGE", sr)?,
                        number("DAMAGE", sc)?,
                        number("DAMAGE", er)?,
                        number("DAMAGE", ec)?,
                    ),
                    cursor: CursorState {
                        row: number("DAMAGE", row)?,
                        col: number("DAMAGE", col)?,
                        visible: flag("DAMAGE", visible)?,
                    },
                }))
            }
            "OK" => Ok(ServerMessage::Ok),
            _ => Err(ProtocolError::UnknownCommand(line.to_string())),
        }
    }
}

fn exact<'a, const N: usize>(command: &'static str, args: &[&'a str]) -> ProtocolResult<[&'a str; N]> {
    <[&str; N]>::try_from(args).map_err(|_| ProtocolError::Arity {
        command,
        expected: N,
        found: args.len(),
    })
}

fn number<T: FromStr>(command: &'static str, value: &str) -> ProtocolResult<T> {
    value.parse().map_err(|_| ProtocolError::InvalidNumber {
        command,
        value: value.to_string(),
    })
}

fn geometry(command: &'static str, args: &[&str]) -> ProtocolResult<(String, usize, usize)> {
    let [shm, cols, rows] = exact::<3>(command, args)?;
    Ok((shm.to_string(), number(command, cols)?, number(command, rows)?))
}

fn flag(command: &'static str, value: &str) -> ProtocolResult<bool> {
    Ok(number::<u32>(command, value)? != 0)
}

/// Parse a command line. `RAW` lines are handled by [`LineDecoder`].
fn parse_command(line: &str) -> ProtocolResult<ClientCommand> {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let args: Vec<&str> = rest.split_whitespace().collect();
    match command {
        "KEY" => {
            let [codepoint, modifiers] = exact::<2>("KEY", &args)?;
            Ok(ClientCommand::Key {
                codepoint: number("KEY", codepoint)?,
                modifiers: number("KEY", modifiers)?,
            })
        }
        "SPECIAL" => {
            let [key, modifiers] = exact::<2>("SPECIAL", &args)?;
            Ok(ClientCommand::Special {
                key: number("SPECIAL", key)?,
                modifiers: number("SPECIAL", modifiers)?,
            })
        }
        "RESIZE" => {
            let [cols, rows] = exact::<2>("RESIZE", &args)?;
            Ok(ClientCommand::Resize {
                cols: number("RESIZE", cols)?,
                rows: number("RESIZE", rows)?,
            })
        }
        "SCROLL" => {
            let [lines] = exact::<1>("SCROLL", &args)?;
            Ok(ClientCommand::Scroll(number("SCROLL", lines)?))
        }
        "SCROLL_TOP" => Ok(ClientCommand::ScrollTop),
        "SCROLL_BOTTOM" => Ok(ClientCommand::ScrollBottom),
        "START" => {
            let shell = rest.trim();
            Ok(ClientCommand::Start((!shell.is_empty()).then(|| shell.to_string())))
        }
        _ => Err(ProtocolError::UnknownCommand(line.to_string())),
    }
}

/// Incremental decoder for a byte stream of protocol lines.
///
/// Bytes may arrive split at any point, including inside a `RAW` payload.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
    /// Payload length still owed by a `RAW` line
    pending_raw: Option<usize>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes received but not yet decoded
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Next complete line, without its terminator. Empty lines are skipped.
    fn next_line(&mut self) -> Option<ProtocolResult<String>> {
        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
                if self.buf.len() > MAX_LINE_LEN {
                    self.buf.clear();
                    return Some(Err(ProtocolError::LineTooLong(MAX_LINE_LEN)));
                }
                return None;
            };
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line.is_empty() {
                continue;
            }
            return Some(String::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8));
        }
    }

    /// Next client command, or `None` until more bytes arrive
    pub fn next_command(&mut self) -> Option<ProtocolResult<ClientCommand>> {
        loop {
            if let Some(len) = self.pending_raw {
                if self.buf.len() < len {
                    return None;
                }
                self.pending_raw = None;
                let payload: Vec<u8> = self.buf.drain(..len).collect();
                return Some(Ok(ClientCommand::Raw(payload)));
            }

            let line = match self.next_line()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e)),
            };
            if let Some(len) = line.strip_prefix("RAW ") {
                match number::<usize>("RAW", len.trim()) {
                    Ok(len) if len > MAX_RAW_LEN => return Some(Err(ProtocolError::RawTooLarge(len))),
                    Ok(len) => {
                        self.pending_raw = Some(len);
                        continue;
                    }
                    Err(e) => return Some(Err(e)),
                }
            }
            return Some(parse_command(&line));
        }
    }

    /// Next server message, or `None` until more bytes arrive
    pub fn next_message(&mut self) -> Option<ProtocolResult<ServerMessage>> {
        self.next_line()
            .map(|line| line.and_then(|line| ServerMessage::parse(&line)))
    }
}
