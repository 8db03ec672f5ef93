//! POSIX pty backed by posix_openpt and fork/exec.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, RawFd};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execvpe, fork, setsid, ForkResult, Pid};

use super::{PtyError, PtyResult, SpawnCommand, WindowSize};

/// Master side of a pty plus the child running on its slave
pub struct Pty {
    /// Non-blocking
    master: File,
    child_pid: Pid,
    /// Exit code once the child has been reaped
    exit_status: Option<i32>,
}

fn cstring(s: &str) -> PtyResult<CString> {
    CString::new(s).map_err(|_| PtyError::InvalidCommand(format!("{s:?} contains a NUL byte")))
}

impl Pty {
    /// Spawn `command` on a new PTY of the given size.
    ///
    /// The child runs in its own session with the slave as controlling
    /// terminal and `TERM=xterm-256color`.
    pub fn spawn(command: &SpawnCommand, size: WindowSize) -> PtyResult<Self> {
        let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY).map_err(PtyError::allocate("posix_openpt"))?;
        grantpt(&master).map_err(PtyError::allocate("grantpt"))?;
        unlockpt(&master).map_err(PtyError::allocate("unlockpt"))?;
        let slave_name = ptsname_r(&master).map_err(PtyError::allocate("ptsname"))?;

        // SAFETY: the descriptor comes straight out of a PtyMaster we own
        let master = unsafe { File::from_raw_fd(master.into_raw_fd()) };
        set_window_size(master.as_raw_fd(), size)?;

        let slave = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(&slave_name)
            .map_err(|source| PtyError::OpenSlave {
                path: slave_name.clone(),
                source,
            })?;

        // Everything the child needs is prepared before fork so the child
        // only makes async-signal-safe calls.
        let program = cstring(&command.program)?;
        let mut argv = vec![program.clone()];
        for arg in &command.args {
            argv.push(cstring(arg)?);
        }
        let mut envp = Vec::new();
        for (key, value) in std::env::vars() {
            if key != "TERM" && key != "COLORTERM" {
                envp.push(cstring(&format!("{key}={value}"))?);
            }
        }
        envp.push(cstring("TERM=xterm-256color")?);
        envp.push(cstring("COLORTERM=truecolor")?);

        let slave_fd = slave.as_raw_fd();
        let master_fd = master.as_raw_fd();

        // SAFETY: the child only calls async-signal-safe functions before exec
        match unsafe { fork() }.map_err(PtyError::Fork)? {
            ForkResult::Child => {
                let _ = setsid();
                // SAFETY: plain libc calls on descriptors this process owns
                unsafe {
                    libc::ioctl(slave_fd, libc::TIOCSCTTY as _, 0);
                    libc::dup2(slave_fd, libc::STDIN_FILENO);
                    libc::dup2(slave_fd, libc::STDOUT_FILENO);
                    libc::dup2(slave_fd, libc::STDERR_FILENO);
                    if slave_fd > libc::STDERR_FILENO {
                        libc::close(slave_fd);
                    }
                    libc::close(master_fd);
                }
                let _ = execvpe(&program, &argv, &envp);
                // SAFETY: exec failed; leave without running any destructors
                unsafe { libc::_exit(127) }
            }
            ForkResult::Parent { child } => {
                drop(slave);
                set_nonblocking(master_fd)?;
                tracing::debug!(pid = child.as_raw(), program = %command.program, "spawned child on pty");
                Ok(Pty {
                    master,
                    child_pid: child,
                    exit_status: None,
                })
            }
        }
    }

    pub fn master_fd(&self) -> RawFd {
        self.master.as_raw_fd()
    }

    pub fn child_pid(&self) -> Pid {
        self.child_pid
    }

    /// Reap the child if it has exited, without blocking
    pub fn try_wait(&mut self) -> PtyResult<Option<i32>> {
        if self.exit_status.is_some() {
            return Ok(self.exit_status);
        }
        match waitpid(self.child_pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => self.exit_status = Some(code),
            Ok(WaitStatus::Signaled(_, signal, _)) => self.exit_status = Some(128 + signal as i32),
            Ok(_) => {}
            // Already reaped elsewhere
            Err(nix::errno::Errno::ECHILD) => self.exit_status = Some(0),
            Err(e) => return Err(PtyError::Wait(e)),
        }
        Ok(self.exit_status)
    }

    /// Reaps the child without blocking once it has exited
    pub fn is_alive(&mut self) -> bool {
        matches!(self.try_wait(), Ok(None))
    }

    /// Read from the PTY master (non-blocking).
    ///
    /// `Ok(None)` means no data right now. `Ok(Some(0))` means end of file:
    /// the slave side is gone, which Linux reports as `EIO`.
    pub fn read(&mut self, buf: &mut [u8]) -> PtyResult<Option<usize>> {
        match self.master.read(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(e) if e.raw_os_error() == Some(libc::EIO) => Ok(Some(0)),
            Err(e) => Err(PtyError::Io(e)),
        }
    }

    /// Write to the PTY master (non-blocking); returns how much was taken
    pub fn write(&mut self, data: &[u8]) -> PtyResult<usize> {
        match self.master.write(data) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(PtyError::Io(e)),
        }
    }

    /// Resize the PTY; the child receives SIGWINCH
    pub fn resize(&self, size: WindowSize) -> PtyResult<()> {
        set_window_size(self.master.as_raw_fd(), size)
    }

    pub fn signal(&self, signal: Signal) -> PtyResult<()> {
        kill(self.child_pid, signal).map_err(|e| PtyError::Io(io::Error::from(e)))
    }
}

impl AsFd for Pty {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.master.as_fd()
    }
}

impl Drop for Pty {
    fn drop(&mut self) {
        if self.exit_status.is_none() {
            let _ = kill(self.child_pid, Signal::SIGHUP);
            let _ = waitpid(self.child_pid, Some(WaitPidFlag::WNOHANG));
        }
    }
}

fn set_nonblocking(fd: RawFd) -> PtyResult<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(PtyError::Fcntl)?;
    let flags = OFlag::from_bits_truncate(flags);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).map_err(PtyError::Fcntl)?;
    Ok(())
}

/// TIOCSWINSZ, which also makes the kernel raise SIGWINCH in the child
fn set_window_size(fd: RawFd, size: WindowSize) -> PtyResult<()> {
    let winsize = libc::winsize {
        ws_row: size.rows,
        ws_col: size.cols,
        ws_xpixel: size.pixel_width,
        ws_ypixel: size.pixel_height,
    };

    // SAFETY: fd is an open pty master and winsize outlives the call
    let result = unsafe { libc::ioctl(fd, libc::TIOCSWINSZ, &winsize) };

    if result < 0 {
        Err(PtyError::Winsize(nix::errno::Errno::last()))
    } else {
        Ok(())
    }
}

/// Read back the window size, used to check TIOCSWINSZ took effect
#[cfg(test)]
fn get_window_size(fd: RawFd) -> PtyResult<WindowSize> {
    let mut winsize = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };

    // SAFETY: fd is an open pty master and winsize is writable
    let result = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut winsize) };

    if result < 0 {
        Err(PtyError::Winsize(nix::errno::Errno::last()))
    } else {
        Ok(WindowSize {
            rows: winsize.ws_row,
            cols: winsize.ws_col,
            pixel_width: winsize.ws_xpixel,
            pixel_height: winsize.ws_ypixel,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    /// Read until `needle` shows up or the deadline passes
    fn read_until(pty: &mut Pty, needle: &str) -> String {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut out = Vec::new();
        let mut buf = [0u8; 1024];
        while Instant::now() < deadline {
            match pty.read(&mut buf).unwrap() {
                Some(0) => break,
                Some(n) => out.extend_from_slice(&buf[..n]),
                None => std::thread::sleep(Duration::from_millis(10)),
            }
            if String::from_utf8_lossy(&out).contains(needle) {
                break;
            }
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    #[test]
    fn test_pty_spawn_echo() {
        let cmd = SpawnCommand::with_args("/bin/echo", &["hello"]);
        let mut pty = Pty::spawn(&cmd, WindowSize::new(80, 24)).unwrap();
        let output = read_until(&mut pty, "hello");
        assert!(output.contains("hello"), "unexpected output: {output:?}");

        let deadline = Instant::now() + Duration::from_secs(5);
        while pty.is_alive() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(pty.try_wait().unwrap(), Some(0));
    }

    #[test]
    fn test_pty_write_read() {
        let cmd = SpawnCommand::with_args("/bin/cat", &[]);
        let mut pty = Pty::spawn(&cmd, WindowSize::new(80, 24)).unwrap();
        let mut data: &[u8] = b"ping\n";
        while !data.is_empty() {
            let n = pty.write(data).unwrap();
            data = &data[n..];
        }
        let output = read_until(&mut pty, "ping");
        assert!(output.contains("ping"), "unexpected output: {output:?}");
    }

    #[test]
    fn test_pty_resize() {
        let cmd = SpawnCommand::with_args("/bin/cat", &[]);
        let pty = Pty::spawn(&cmd, WindowSize::new(80, 24)).unwrap();
        pty.resize(WindowSize::new(120, 40)).unwrap();
        let size = get_window_size(pty.master_fd()).unwrap();
        assert_eq!((size.cols, size.rows), (120, 40));
    }

    #[test]
    fn test_pty_term_variable() {
        let cmd = SpawnCommand::command_line("echo term=$TERM");
        let mut pty = Pty::spawn(&cmd, WindowSize::new(80, 24)).unwrap();
        let output = read_until(&mut pty, "xterm-256color");
        assert!(output.contains("term=xterm-256color"), "unexpected output: {output:?}");
    }
}
