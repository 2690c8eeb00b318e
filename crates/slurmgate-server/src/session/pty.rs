//! Pseudo-terminal allocation and the async master handle.
//!
//! The master fd is non-blocking and driven through tokio's `AsyncFd`, so
//! relay tasks never park a runtime thread on terminal I/O.

use nix::fcntl::OFlag;
use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt};
use slurmgate_core::{GateError, GateResult};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::unix::AsyncFd;
use tokio::sync::watch;
use tracing::debug;

/// The controlling side of a session's pseudo-terminal.
///
/// Closing it releases the master fd once in-flight reads and writes have
/// observed the close, which hangs up the child's terminal.
pub struct Terminal {
    master: Mutex<Option<Arc<AsyncFd<File>>>>,
    closed: watch::Sender<bool>,
}

impl Terminal {
    fn new(master: OwnedFd) -> io::Result<Self> {
        set_nonblocking(master.as_raw_fd())?;
        let fd = AsyncFd::new(File::from(master))?;
        let (closed, _) = watch::channel(false);
        Ok(Self {
            master: Mutex::new(Some(Arc::new(fd))),
            closed,
        })
    }

    fn handle(&self) -> Option<Arc<AsyncFd<File>>> {
        self.master
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Close the master. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        let taken = self
            .master
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if taken.is_some() {
            self.closed.send_replace(true);
            debug!("terminal closed");
            true
        } else {
            false
        }
    }

    /// Read terminal output. `Ok(0)` means the terminal is closed or the
    /// child side hung up.
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(fd) = self.handle() else {
            return Ok(0);
        };
        let mut closed = self.closed.subscribe();
        loop {
            if *closed.borrow_and_update() {
                return Ok(0);
            }
            tokio::select! {
                guard = fd.readable() => {
                    let mut guard = guard?;
                    match guard.try_io(|inner| {
                        let mut file: &File = inner.get_ref();
                        file.read(buf)
                    }) {
                        Ok(Ok(n)) => return Ok(n),
                        // Linux reports a hung-up slave as EIO on the master.
                        Ok(Err(e)) if e.raw_os_error() == Some(libc::EIO) => return Ok(0),
                        Ok(Err(e)) => return Err(e),
                        Err(_would_block) => continue,
                    }
                }
                _ = closed.changed() => continue,
            }
        }
    }

    /// Write all of `data` to the terminal input.
    pub async fn write_all(&self, mut data: &[u8]) -> io::Result<()> {
        let Some(fd) = self.handle() else {
            return Err(closed_error());
        };
        let mut closed = self.closed.subscribe();
        while !data.is_empty() {
            if *closed.borrow_and_update() {
                return Err(closed_error());
            }
            tokio::select! {
                guard = fd.writable() => {
                    let mut guard = guard?;
                    match guard.try_io(|inner| {
                        let mut file: &File = inner.get_ref();
                        file.write(data)
                    }) {
                        Ok(Ok(0)) => return Err(io::ErrorKind::WriteZero.into()),
                        Ok(Ok(n)) => data = &data[n..],
                        Ok(Err(e)) => return Err(e),
                        Err(_would_block) => continue,
                    }
                }
                _ = closed.changed() => continue,
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Terminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terminal")
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "terminal closed")
}

/// A freshly allocated terminal pair. The slave end goes to the child.
pub struct PtyPair {
    pub terminal: Terminal,
    pub slave: OwnedFd,
}

/// Allocate a pseudo-terminal with the given window size.
///
/// Both ends are opened close-on-exec, so a child forked concurrently by
/// another session can never inherit them.
pub fn allocate(cols: u16, rows: u16) -> GateResult<PtyPair> {
    let (master, slave) = open_pair()
        .map_err(|e| GateError::LaunchFailure(format!("failed to open pty: {e}")))?;

    set_window_size(&slave, cols, rows)
        .map_err(|e| GateError::LaunchFailure(format!("failed to configure pty: {e}")))?;

    let terminal = Terminal::new(master)
        .map_err(|e| GateError::LaunchFailure(format!("failed to register pty master: {e}")))?;

    debug!(cols, rows, "pty allocated");
    Ok(PtyPair { terminal, slave })
}

fn open_pair() -> io::Result<(OwnedFd, OwnedFd)> {
    let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_CLOEXEC)?;
    grantpt(&master)?;
    unlockpt(&master)?;
    let path = ptsname_r(&master)?;

    // std opens with O_CLOEXEC.
    let slave = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY)
        .open(&path)?;

    // SAFETY: the raw fd comes straight out of the PtyMaster, which gives up
    // ownership of it.
    let master = unsafe { OwnedFd::from_raw_fd(master.into_raw_fd()) };
    Ok((master, OwnedFd::from(slave)))
}

fn set_window_size(slave: &OwnedFd, cols: u16, rows: u16) -> io::Result<()> {
    let size = libc::winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: TIOCSWINSZ reads a winsize that outlives the call.
    let rc = unsafe {
        libc::ioctl(
            slave.as_raw_fd(),
            libc::TIOCSWINSZ as _,
            &size as *const libc::winsize,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn set_nonblocking(fd: i32) -> io::Result<()> {
    // SAFETY: fcntl on an fd we own; flags are read before being modified.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
