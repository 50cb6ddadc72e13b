//! Session configuration: timing, relay switches, capture paths.
//!
//! Everything here is plain data. The CLI layers its config file and flags
//! on top of [`SessionConfig::default`].

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{JigError, JigResult};

/// Default idle timeout after input is exhausted.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(2);

/// Time given to the executor to exit on its own once the reader is done.
pub const GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Timing knobs of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingConfig {
    /// Delay between executor readiness and the first byte sent to it.
    pub start_delay: Duration,
    /// Delay after every byte written to the pty.
    pub keystroke_delay: Duration,
    /// Silence tolerated after input exhaustion. `None` disables the timer.
    pub idle_timeout: Option<Duration>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            start_delay: Duration::ZERO,
            keystroke_delay: Duration::ZERO,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
        }
    }
}

impl TimingConfig {
    /// Idle timeout from whole seconds. Zero disables the timer.
    pub fn idle_timeout_secs(secs: u64) -> Option<Duration> {
        (secs > 0).then(|| Duration::from_secs(secs))
    }
}

/// Parse a fractional number of seconds into a [`Duration`].
pub fn seconds(value: f64) -> JigResult<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| JigError::Config(format!("invalid duration {value}: {e}")))
}

/// Where the writer takes its keystrokes from.
#[derive(Debug, Clone)]
pub enum InputSource {
    /// The harness's own standard input.
    Stdin,
    /// A fixed byte string.
    Bytes(Vec<u8>),
}

/// Full description of one harness run.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Target program followed by its arguments.
    pub command: Vec<String>,
    /// Keystroke source. `None` runs without a writer.
    pub input: Option<InputSource>,
    /// Send the terminal EOF character once input is exhausted.
    pub send_eof: bool,
    /// Ignore SIGINT, SIGQUIT and SIGTSTP in the executor.
    pub suppress_interrupts: bool,
    /// Copy pty output to standard output.
    pub mirror_output: bool,
    /// Record keystrokes here (CR translated to LF).
    pub input_capture: Option<PathBuf>,
    /// Record raw pty output here.
    pub output_capture: Option<PathBuf>,
    pub timing: TimingConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            input: Some(InputSource::Stdin),
            send_eof: true,
            suppress_interrupts: false,
            mirror_output: true,
            input_capture: None,
            output_capture: None,
            timing: TimingConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Config for `command` with every other setting at its default.
    pub fn new<I, S>(command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Name used in user-facing messages about the executor.
    pub fn program(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or("")
    }

    pub fn validate(&self) -> JigResult<()> {
        if self.command.is_empty() {
            return Err(JigError::Config("no command given".into()));
        }
        if self.command[0].is_empty() {
            return Err(JigError::Config("empty command name".into()));
        }
        if self.command.iter().any(|arg| arg.contains('\0')) {
            return Err(JigError::Config("command contains a NUL byte".into()));
        }
        Ok(())
    }
}
