//! Input and output relays between the harness and the pty master.
//!
//! Both run as tasks on the controller's runtime and report back over an
//! unbounded event channel; the controller is the only party that ends them.

pub mod reader;
pub mod writer;

pub use reader::{IdleTimer, ReaderContext, ReaderExit, ReaderState};
pub use writer::WriterContext;

use crate::error::JigError;

/// Notifications sent from the relays to the controller.
#[derive(Debug)]
pub enum RelayEvent {
    /// Input is exhausted (or the pty stopped accepting it).
    WriterFinished { bytes: u64 },
    /// The reader left its loop.
    ReaderFinished(ReaderExit),
    /// A relay lost a channel it cannot work without.
    Failed(JigError),
}
