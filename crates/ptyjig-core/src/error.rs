use thiserror::Error;

/// Errors produced by the pty harness.
#[derive(Debug, Error)]
pub enum JigError {
    /// No pseudo-terminal could be acquired or configured.
    #[error("pty allocation failed: {0}")]
    Allocation(String),

    /// The executor process could not be created.
    #[error("spawn failed: {0}")]
    Spawn(String),

    /// A system call failed outside of the allocation/spawn phases.
    #[error("{context}: {errno}")]
    Sys {
        context: &'static str,
        errno: nix::errno::Errno,
    },

    /// A relay lost its channel (pty, stdout, or capture file).
    #[error("{relay} relay: {source}")]
    Relay {
        relay: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl JigError {
    pub(crate) fn sys(context: &'static str, errno: nix::errno::Errno) -> Self {
        JigError::Sys { context, errno }
    }

    pub(crate) fn relay(relay: &'static str, source: std::io::Error) -> Self {
        JigError::Relay { relay, source }
    }
}

pub type JigResult<T> = Result<T, JigError>;
