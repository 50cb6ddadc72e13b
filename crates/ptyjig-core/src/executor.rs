//! Child executor: runs the target command on the pty slave.
//!
//! The child becomes a session leader, acquires the slave as its
//! controlling terminal and standard I/O, reports readiness over a
//! close-on-exec pipe, then execs. If exec fails the saved standard
//! descriptors are restored, the error is reported, and the child exits 1,
//! so the failure reaches the controller as an ordinary exit status.

use std::ffi::{CStr, CString};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::fcntl::{self, FcntlArg, OFlag};
use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::stat::Mode;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{self, ForkResult, Pid};
use tracing::{debug, info, warn};

use crate::error::{JigError, JigResult};
use crate::pty::PtyPair;

nix::ioctl_write_int_bad!(tiocsctty, libc::TIOCSCTTY);

/// Exit status of a child whose exec failed.
pub const EXEC_FAILURE_STATUS: i32 = 1;

/// How the executor terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitState {
    Exited(i32),
    Signaled { signal: Signal, core_dumped: bool },
}

impl ExitState {
    /// Map a wait status to a termination, if it is one.
    pub fn from_wait_status(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, code) => Some(ExitState::Exited(code)),
            WaitStatus::Signaled(_, signal, core_dumped) => Some(ExitState::Signaled {
                signal,
                core_dumped,
            }),
            _ => None,
        }
    }

    /// Exit code the harness reports for this termination.
    pub fn exit_code(&self) -> i32 {
        match *self {
            ExitState::Exited(code) => code,
            ExitState::Signaled { signal, .. } => 128 + signal as i32,
        }
    }
}

/// Handle on the forked executor. Its pid doubles as its process group
/// and session id.
#[derive(Debug)]
pub struct Executor {
    pid: Pid,
    program: String,
}

impl Executor {
    /// Fork the executor and block until it reports that its terminal is set
    /// up. Fork failure is fatal; exec failure is not (see module docs).
    pub fn spawn(pty: &PtyPair, command: &[String], suppress_interrupts: bool) -> JigResult<Self> {
        let program = command
            .first()
            .ok_or_else(|| JigError::Config("no command given".into()))?
            .clone();
        let argv = command
            .iter()
            .map(|arg| CString::new(arg.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| JigError::Config(format!("invalid argument: {e}")))?;

        // Everything the child might print is formatted here, before fork.
        let exec_context = format!("{program}: ");
        let mut argv_ptrs: Vec<*const libc::c_char> = argv.iter().map(|arg| arg.as_ptr()).collect();
        argv_ptrs.push(std::ptr::null());
        let (ready_rx, ready_tx) = readiness_pipe()?;

        // Safety: between fork and exec the child makes raw syscalls only and
        // never allocates or takes a lock.
        match unsafe { unistd::fork() } {
            Ok(ForkResult::Child) => {
                drop(ready_rx);
                let child = ChildSetup {
                    slave: pty.slave_path(),
                    argv: &argv_ptrs,
                    exec_context: exec_context.as_bytes(),
                    suppress_interrupts,
                };
                child.run(ready_tx)
            }
            Ok(ForkResult::Parent { child }) => {
                drop(ready_tx);
                debug!(pid = child.as_raw(), "executor forked");
                wait_ready(&ready_rx, child);
                info!(pid = child.as_raw(), program = %program, "executor started");
                Ok(Self {
                    pid: child,
                    program,
                })
            }
            Err(e) => Err(JigError::Spawn(format!("fork: {e}"))),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Name of the command being run.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Send `signal` to the executor's whole process group.
    ///
    /// A group that no longer exists counts as success.
    pub fn kill_group(&self, signal: Signal) -> JigResult<()> {
        match signal::killpg(self.pid, signal) {
            Ok(()) => {
                debug!(pgid = self.pid.as_raw(), ?signal, "signalled executor group");
                Ok(())
            }
            Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(JigError::sys("killpg", e)),
        }
    }

    /// Collect the executor's status without blocking.
    ///
    /// A child stopped by SIGTSTP is resumed and reported as still running.
    pub fn try_reap(&self) -> JigResult<Option<ExitState>> {
        let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED;
        loop {
            match waitpid(self.pid, Some(flags)) {
                Ok(WaitStatus::Stopped(pid, Signal::SIGTSTP)) => {
                    debug!(pid = pid.as_raw(), "executor stopped, resuming");
                    match signal::kill(pid, Signal::SIGCONT) {
                        Ok(()) | Err(Errno::ESRCH) => return Ok(None),
                        Err(e) => return Err(JigError::sys("kill SIGCONT", e)),
                    }
                }
                Ok(status) => {
                    let state = ExitState::from_wait_status(status);
                    if let Some(state) = state {
                        debug!(pid = self.pid.as_raw(), ?state, "executor reaped");
                    }
                    return Ok(state);
                }
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(JigError::sys("waitpid", e)),
            }
        }
    }
}

/// Block until the child writes its readiness byte or closes the pipe.
fn wait_ready(ready_rx: &OwnedFd, child: Pid) {
    let mut byte = [0u8; 1];
    loop {
        match unistd::read(ready_rx.as_raw_fd(), &mut byte) {
            Ok(1) => return,
            Ok(_) => {
                warn!(pid = child.as_raw(), "executor exited before attaching to the pty");
                return;
            }
            Err(Errno::EINTR) => continue,
            Err(e) => {
                warn!(pid = child.as_raw(), error = %e, "readiness pipe failed");
                return;
            }
        }
    }
}

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
fn readiness_pipe() -> JigResult<(OwnedFd, OwnedFd)> {
    unistd::pipe2(OFlag::O_CLOEXEC).map_err(|e| JigError::Spawn(format!("pipe2: {e}")))
}

/// No `pipe2` here, so a fork racing in another thread may still inherit
/// the pipe without CLOEXEC.
#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
fn readiness_pipe() -> JigResult<(OwnedFd, OwnedFd)> {
    let (rx, tx) = unistd::pipe().map_err(|e| JigError::Spawn(format!("pipe: {e}")))?;
    for fd in [&rx, &tx] {
        fcntl::fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(fcntl::FdFlag::FD_CLOEXEC))
            .map_err(|e| JigError::Spawn(format!("fcntl FD_CLOEXEC: {e}")))?;
    }
    Ok((rx, tx))
}

/// What the forked child needs, prepared in the parent.
struct ChildSetup<'a> {
    slave: &'a CStr,
    /// NUL-terminated pointer array into the caller's `CString`s.
    argv: &'a [*const libc::c_char],
    /// `"{program}: "`, prefixed to the exec error.
    exec_context: &'a [u8],
    suppress_interrupts: bool,
}

impl ChildSetup<'_> {
    /// Body of the forked child. Never returns.
    fn run(&self, ready_tx: OwnedFd) -> ! {
        let saved = match save_std_fds() {
            Ok(saved) => saved,
            Err(errno) => child_fail(b"saving standard descriptors: ", errno),
        };

        if let Err((context, errno)) = attach_terminal(self.slave) {
            restore_std_fds(&saved);
            child_fail(context, errno);
        }

        // Safety: single-threaded child, no handlers are being replaced mid-call.
        unsafe {
            let _ = signal::signal(Signal::SIGPIPE, SigHandler::SigDfl);
            if self.suppress_interrupts {
                for sig in [Signal::SIGINT, Signal::SIGQUIT, Signal::SIGTSTP] {
                    let _ = signal::signal(sig, SigHandler::SigIgn);
                }
            }
        }

        let _ = unistd::write(&ready_tx, &[1]);
        drop(ready_tx);

        // nix's execvp builds its argument array on the heap; call libc with
        // the one built before fork instead.
        // Safety: argv is NUL-terminated and its strings outlive this call.
        unsafe { libc::execvp(self.argv[0], self.argv.as_ptr()) };
        let errno = Errno::last();

        restore_std_fds(&saved);
        child_fail(self.exec_context, errno);
    }
}

/// Report `"ptyjig: {context}{errno}"` on stderr and exit. Only raw writes of
/// preformatted bytes, so it is safe after fork.
fn child_fail(context: &[u8], errno: Errno) -> ! {
    for part in [b"ptyjig: ".as_slice(), context, errno.desc().as_bytes(), b"\n".as_slice()] {
        // Safety: writes a borrowed buffer to the stderr descriptor.
        let _ = unsafe { libc::write(libc::STDERR_FILENO, part.as_ptr().cast(), part.len()) };
    }
    // Safety: _exit skips atexit handlers and buffers owned by the parent.
    unsafe { libc::_exit(EXEC_FAILURE_STATUS) }
}

fn save_std_fds() -> nix::Result<[RawFd; 3]> {
    let mut saved = [-1; 3];
    for (slot, fd) in saved.iter_mut().zip(std_fds()) {
        *slot = fcntl::fcntl(fd, FcntlArg::F_DUPFD_CLOEXEC(3))?;
    }
    Ok(saved)
}

fn restore_std_fds(saved: &[RawFd; 3]) {
    for (&from, to) in saved.iter().zip(std_fds()) {
        let _ = unistd::dup2(from, to);
    }
}

fn std_fds() -> [RawFd; 3] {
    [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO]
}

/// New session, slave as controlling terminal and standard I/O.
fn attach_terminal(slave: &CStr) -> Result<(), (&'static [u8], Errno)> {
    unistd::setsid().map_err(|e| (b"setsid: ".as_slice(), e))?;

    let tty = fcntl::open(slave, OFlag::O_RDWR, Mode::empty())
        .map_err(|e| (b"opening pty slave: ".as_slice(), e))?;

    // Opening the slave already makes it the controlling terminal on Linux;
    // BSDs need the explicit ioctl.
    // Safety: tty is an open terminal descriptor.
    let _ = unsafe { tiocsctty(tty, 0) };

    for fd in std_fds() {
        unistd::dup2(tty, fd).map_err(|e| (b"dup2 onto standard descriptor: ".as_slice(), e))?;
    }
    if tty > libc::STDERR_FILENO {
        let _ = unistd::close(tty);
    }
    Ok(())
}
