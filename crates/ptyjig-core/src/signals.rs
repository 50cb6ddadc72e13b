//! Human-readable signal names.
//!
//! Keyed by [`Signal`] variant rather than raw number, so the table stays
//! correct on platforms that number signals differently.

use nix::sys::signal::Signal;

/// Short name and description of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalInfo {
    /// Name without the `SIG` prefix, e.g. `SEGV`.
    pub name: &'static str,
    /// Description as printed when a child dies, e.g. `Segmentation fault`.
    pub description: &'static str,
}

const fn info(name: &'static str, description: &'static str) -> SignalInfo {
    SignalInfo { name, description }
}

/// Look up the name and description of `signal`.
pub fn describe(signal: Signal) -> SignalInfo {
    match signal {
        Signal::SIGHUP => info("HUP", "Hangup"),
        Signal::SIGINT => info("INT", "Interrupt"),
        Signal::SIGQUIT => info("QUIT", "Quit"),
        Signal::SIGILL => info("ILL", "Illegal instruction"),
        Signal::SIGTRAP => info("TRAP", "Trace/BPT trap"),
        Signal::SIGABRT => info("ABRT", "Aborted"),
        Signal::SIGBUS => info("BUS", "Bus error"),
        Signal::SIGFPE => info("FPE", "Floating exception"),
        Signal::SIGKILL => info("KILL", "Killed"),
        Signal::SIGUSR1 => info("USR1", "User defined signal 1"),
        Signal::SIGSEGV => info("SEGV", "Segmentation fault"),
        Signal::SIGUSR2 => info("USR2", "User defined signal 2"),
        Signal::SIGPIPE => info("PIPE", "Broken pipe"),
        Signal::SIGALRM => info("ALRM", "Alarm clock"),
        Signal::SIGTERM => info("TERM", "Terminated"),
        Signal::SIGCHLD => info("CHLD", "Child exited"),
        Signal::SIGCONT => info("CONT", "Continued"),
        Signal::SIGSTOP => info("STOP", "Stopped (signal)"),
        Signal::SIGTSTP => info("TSTP", "Stopped"),
        Signal::SIGTTIN => info("TTIN", "Stopped (tty input)"),
        Signal::SIGTTOU => info("TTOU", "Stopped (tty output)"),
        Signal::SIGURG => info("URG", "Urgent I/O condition"),
        Signal::SIGXCPU => info("XCPU", "Cputime limit exceeded"),
        Signal::SIGXFSZ => info("XFSZ", "Filesize limit exceeded"),
        Signal::SIGVTALRM => info("VTALRM", "Virtual timer expired"),
        Signal::SIGPROF => info("PROF", "Profiling timer expired"),
        Signal::SIGWINCH => info("WINCH", "Window size changed"),
        Signal::SIGIO => info("IO", "I/O possible"),
        Signal::SIGSYS => info("SYS", "Bad system call"),
        #[cfg(any(target_os = "linux", target_os = "android"))]
        Signal::SIGPWR => info("PWR", "Power failure"),
        #[cfg(any(target_os = "linux", target_os = "android"))]
        Signal::SIGSTKFLT => info("STKFLT", "Stack fault"),
        #[cfg(any(
            target_os = "macos",
            target_os = "freebsd",
            target_os = "netbsd",
            target_os = "openbsd",
            target_os = "dragonfly"
        ))]
        Signal::SIGEMT => info("EMT", "EMT trap"),
        #[cfg(any(
            target_os = "macos",
            target_os = "freebsd",
            target_os = "netbsd",
            target_os = "openbsd",
            target_os = "dragonfly"
        ))]
        Signal::SIGINFO => info("INFO", "Information request"),
        #[allow(unreachable_patterns)]
        _ => info("?", "Unknown signal"),
    }
}

/// The line reported when the executor is terminated by a signal.
pub fn termination_message(program: &str, signal: Signal, core_dumped: bool) -> String {
    format!(
        "ptyjig: {program}: {}{}",
        describe(signal).description,
        if core_dumped { " (core dumped)" } else { "" }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segv_is_segmentation_fault() {
        let segv = describe(Signal::SIGSEGV);
        assert_eq!(segv.name, "SEGV");
        assert_eq!(segv.description, "Segmentation fault");
    }

    #[test]
    fn every_variant_has_a_description() {
        for signal in Signal::iterator() {
            let info = describe(signal);
            assert_ne!(info.description, "Unknown signal", "{signal:?}");
            assert_eq!(format!("SIG{}", info.name), signal.as_str());
        }
    }

    #[test]
    fn message_mentions_core_dump() {
        assert_eq!(
            termination_message("vi", Signal::SIGSEGV, true),
            "ptyjig: vi: Segmentation fault (core dumped)"
        );
        assert_eq!(
            termination_message("cat", Signal::SIGKILL, false),
            "ptyjig: cat: Killed"
        );
    }
}
