//! Pseudo-terminal allocation.
//!
//! Opens a master via `posix_openpt`, unlocks the slave, and puts the line
//! discipline into raw mode with local echo switched back on, so keystrokes
//! written by the writer reappear in the relayed output like they would for
//! a human typist. The parent never opens the slave; only the executor does,
//! after it has become a session leader.

use std::ffi::CString;
use std::fs::OpenOptions;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};

use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::pty::{grantpt, posix_openpt, unlockpt, PtyMaster, Winsize};
use nix::sys::termios::{self, LocalFlags, SetArg, SpecialCharacterIndices};
use nix::unistd;
use tokio::io::unix::AsyncFd;
use tracing::{debug, info};

use crate::error::{JigError, JigResult};

nix::ioctl_read_bad!(tiocgwinsz, libc::TIOCGWINSZ, Winsize);
nix::ioctl_write_ptr_bad!(tiocswinsz, libc::TIOCSWINSZ, Winsize);

/// EOF character used when VEOF is unset or disabled (0 or 0xff).
const FALLBACK_EOF: u8 = 0x04;

/// Master side of a freshly allocated pty plus what the executor needs to
/// attach to the slave.
#[derive(Debug)]
pub struct PtyPair {
    master: OwnedFd,
    slave_path: CString,
    eof_char: u8,
}

impl PtyPair {
    /// Allocate a master/slave pair and configure its line discipline.
    pub fn open() -> JigResult<Self> {
        let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY)
            .map_err(|e| JigError::Allocation(format!("posix_openpt: {e}")))?;
        grantpt(&master).map_err(|e| JigError::Allocation(format!("grantpt: {e}")))?;
        unlockpt(&master).map_err(|e| JigError::Allocation(format!("unlockpt: {e}")))?;

        let slave_path = resolve_slave_path(&master)?;

        // Safety: into_raw_fd hands over sole ownership of a valid descriptor.
        let master = unsafe { OwnedFd::from_raw_fd(master.into_raw_fd()) };
        fcntl(master.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
            .map_err(|e| JigError::Allocation(format!("fcntl FD_CLOEXEC: {e}")))?;

        let mut pair = Self {
            master,
            slave_path,
            eof_char: FALLBACK_EOF,
        };
        pair.configure_raw()?;

        info!(slave = ?pair.slave_path, "pty allocated");
        Ok(pair)
    }

    /// Raw mode with local echo forced on.
    fn configure_raw(&mut self) -> JigResult<()> {
        let mut settings = termios::tcgetattr(&self.master)
            .map_err(|e| JigError::Allocation(format!("tcgetattr: {e}")))?;
        termios::cfmakeraw(&mut settings);
        settings.local_flags |= LocalFlags::ECHO;

        let veof = settings.control_chars[SpecialCharacterIndices::VEOF as usize];
        if veof != 0 && veof != 0xff {
            self.eof_char = veof;
        }

        termios::tcsetattr(&self.master, SetArg::TCSANOW, &settings)
            .map_err(|e| JigError::Allocation(format!("tcsetattr: {e}")))?;
        debug!(eof = self.eof_char, "pty set to raw mode with echo");
        Ok(())
    }

    /// Device path of the slave, to be opened by the executor.
    pub fn slave_path(&self) -> &CString {
        &self.slave_path
    }

    /// The terminal's EOF control character.
    pub fn eof_char(&self) -> u8 {
        self.eof_char
    }

    pub fn master_fd(&self) -> RawFd {
        self.master.as_raw_fd()
    }

    pub fn set_window_size(&self, size: &Winsize) -> JigResult<()> {
        set_window_size(self.master.as_raw_fd(), size)
    }

    pub fn window_size(&self) -> JigResult<Winsize> {
        window_size(self.master.as_raw_fd())
            .map_err(|e| JigError::sys("ioctl TIOCGWINSZ", e))
    }

    /// Switch the master to non-blocking mode and register it with the
    /// tokio reactor. Must be called from within a runtime.
    pub fn into_async(self) -> JigResult<AsyncPty> {
        let fd = self.master.as_raw_fd();
        let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(|e| JigError::sys("fcntl F_GETFL", e))?;
        let flags = OFlag::from_bits_truncate(flags);
        fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))
            .map_err(|e| JigError::sys("fcntl F_SETFL", e))?;

        Ok(AsyncPty {
            fd: AsyncFd::new(self.master)?,
            eof_char: self.eof_char,
        })
    }
}

#[cfg(target_os = "linux")]
fn resolve_slave_path(master: &PtyMaster) -> JigResult<CString> {
    let name = nix::pty::ptsname_r(master)
        .map_err(|e| JigError::Allocation(format!("ptsname_r: {e}")))?;
    CString::new(name).map_err(|e| JigError::Allocation(format!("slave path: {e}")))
}

#[cfg(not(target_os = "linux"))]
fn resolve_slave_path(master: &PtyMaster) -> JigResult<CString> {
    // Safety: called before any other thread exists that could call ptsname.
    let name = unsafe { nix::pty::ptsname(master) }
        .map_err(|e| JigError::Allocation(format!("ptsname: {e}")))?;
    CString::new(name).map_err(|e| JigError::Allocation(format!("slave path: {e}")))
}

/// The pty master registered with the async reactor.
///
/// Shared between the writer (writes only) and the reader (reads only); the
/// two directions of a pty are independent byte streams.
#[derive(Debug)]
pub struct AsyncPty {
    fd: AsyncFd<OwnedFd>,
    eof_char: u8,
}

impl AsyncPty {
    /// Read the next chunk of child output.
    ///
    /// Returns `Ok(0)` once every holder of the slave has gone away (the
    /// kernel reports this as `EIO` on the master).
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| {
                unistd::read(inner.get_ref().as_raw_fd(), buf).map_err(io::Error::from)
            }) {
                Ok(Err(e)) if e.raw_os_error() == Some(libc::EIO) => return Ok(0),
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Write all of `data` to the child's terminal input.
    pub async fn write_all(&self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            let mut guard = self.fd.writable().await?;
            match guard.try_io(|inner| unistd::write(inner.get_ref(), data).map_err(io::Error::from)) {
                Ok(Ok(0)) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(Ok(n)) => data = &data[n..],
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }

    pub fn eof_char(&self) -> u8 {
        self.eof_char
    }

    pub fn set_window_size(&self, size: &Winsize) -> JigResult<()> {
        set_window_size(self.fd.as_raw_fd(), size)
    }
}

fn set_window_size(fd: RawFd, size: &Winsize) -> JigResult<()> {
    // Safety: fd is an open pty master and size points to a valid winsize.
    unsafe { tiocswinsz(fd, size) }.map_err(|e| JigError::sys("ioctl TIOCSWINSZ", e))?;
    debug!(rows = size.ws_row, cols = size.ws_col, "pty resized");
    Ok(())
}

fn window_size(fd: RawFd) -> nix::Result<Winsize> {
    let mut size = Winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // Safety: size is a valid, writable winsize.
    unsafe { tiocgwinsz(fd, &mut size) }?;
    Ok(size)
}

/// Size of the terminal the harness itself runs in, if it has one.
///
/// Tries the standard descriptors first, then the controlling terminal.
pub fn caller_window_size() -> Option<Winsize> {
    let usable = |size: Winsize| (size.ws_row > 0 && size.ws_col > 0).then_some(size);

    for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        if let Some(size) = window_size(fd).ok().and_then(usable) {
            return Some(size);
        }
    }

    let tty = OpenOptions::new().read(true).open("/dev/tty").ok()?;
    window_size(tty.as_raw_fd()).ok().and_then(usable)
}
