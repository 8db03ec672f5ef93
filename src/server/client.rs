//! A control-socket connection as seen by the server

use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;

use tracing::trace;

use crate::protocol::{ClientCommand, LineDecoder, ProtocolResult, ServerMessage};

/// Unsent bytes allowed to pile up before a client is dropped
const MAX_OUTBOUND: usize = 1 << 20;

/// Result of draining a client's socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Open,
    Closed,
}

pub struct ClientConnection {
    id: u64,
    stream: UnixStream,
    decoder: LineDecoder,
    outbound: Vec<u8>,
}

impl ClientConnection {
    pub fn new(id: u64, stream: UnixStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(Self {
            id,
            stream,
            decoder: LineDecoder::new(),
            outbound: Vec::new(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Read everything available without blocking
    pub fn read_available(&mut self) -> io::Result<ReadStatus> {
        let mut buf = [0u8; 4096];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Ok(ReadStatus::Closed),
                Ok(n) => {
                    trace!(client = self.id, len = n, "client bytes");
                    self.decoder.feed(&buf[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadStatus::Open),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn next_command(&mut self) -> Option<ProtocolResult<ClientCommand>> {
        self.decoder.next_command()
    }

    /// Queue a message and try to send it right away
    pub fn send(&mut self, message: &ServerMessage) -> io::Result<()> {
        self.outbound.extend_from_slice(&message.encode());
        if self.outbound.len() > MAX_OUTBOUND {
            return Err(io::Error::new(io::ErrorKind::OutOfMemory, "client is not reading"));
        }
        self.flush()
    }

    /// Write queued bytes until the socket would block
    pub fn flush(&mut self) -> io::Result<()> {
        while !self.outbound.is_empty() {
            match self.stream.write(&self.outbound) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.outbound.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub fn wants_write(&self) -> bool {
        !self.outbound.is_empty()
    }
}

impl AsFd for ClientConnection {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}
