//! Pseudoterminal allocation and the child process attached to it.
//!
//! [`Pty`] owns the master side in non-blocking mode. The child runs
//! [`SpawnCommand`] in a new session with the slave as its controlling
//! terminal.

#[cfg(unix)]
mod unix;

#[cfg(unix)]
pub use unix::Pty;

use nix::errno::Errno;

#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    /// One of the posix_openpt/grantpt/unlockpt/ptsname steps failed
    #[error("pty allocation failed in {step}: {source}")]
    Allocate {
        step: &'static str,
        #[source]
        source: Errno,
    },

    #[error("cannot open pty slave {path}: {source}")]
    OpenSlave {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("fork failed: {0}")]
    Fork(#[source] Errno),

    #[error("fcntl on pty master failed: {0}")]
    Fcntl(#[source] Errno),

    #[error("window size ioctl failed: {0}")]
    Winsize(#[source] Errno),

    #[error("waitpid failed: {0}")]
    Wait(#[source] Errno),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PtyError {
    fn allocate(step: &'static str) -> impl FnOnce(Errno) -> Self {
        move |source| Self::Allocate { step, source }
    }
}

pub type PtyResult<T> = Result<T, PtyError>;

/// Dimensions handed to TIOCSWINSZ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
    pub pixel_width: u16,
    pub pixel_height: u16,
}

impl WindowSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }

    /// Grid dimensions saturated to the 16-bit fields of `winsize`
    pub fn from_grid(cols: usize, rows: usize) -> Self {
        let clip = |n: usize| u16::try_from(n).unwrap_or(u16::MAX);
        Self::new(clip(cols), clip(rows))
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

/// Program and argv for the pty child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl SpawnCommand {
    /// An interactive shell with no arguments
    pub fn shell(shell: impl Into<String>) -> Self {
        Self::with_args(shell, &[])
    }

    /// `/bin/sh -c <command>`
    pub fn command_line(command: impl Into<String>) -> Self {
        Self {
            program: "/bin/sh".into(),
            args: vec!["-c".into(), command.into()],
        }
    }

    pub fn with_args(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|&a| a.to_owned()).collect(),
        }
    }
}
