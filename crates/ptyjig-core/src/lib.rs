//! ptyjig-core: run a command under a pseudo-terminal and script its input.
//!
//! Allocates a pty, starts the command as a session leader with the slave
//! as its controlling terminal, types input into it byte by byte, copies
//! its output to stdout and optional capture files, and reports how it
//! terminated.

pub mod capture;
pub mod config;
pub mod controller;
pub mod error;
pub mod executor;
pub mod pty;
pub mod relay;
pub mod session;
pub mod signals;

// Re-export commonly used items at crate root.
pub use config::{InputSource, SessionConfig, TimingConfig, DEFAULT_IDLE_TIMEOUT, GRACE_PERIOD};
pub use controller::Outcome;
pub use error::{JigError, JigResult};
pub use executor::ExitState;
pub use session::Session;
