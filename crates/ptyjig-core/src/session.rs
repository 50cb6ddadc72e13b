//! One harness run from allocation to exit status.
//!
//! [`Session::spawn`] does the synchronous part: capture files, pty, fork,
//! readiness wait. It must run before any runtime threads exist so the fork
//! happens in a single-threaded process. [`Session::run`] then builds a
//! current-thread runtime and hands over to the controller.

use std::io::Cursor;
use std::sync::Arc;

use nix::pty::Winsize;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::capture::CaptureFile;
use crate::config::{InputSource, SessionConfig};
use crate::controller::{Controller, Outcome, SignalStreams};
use crate::error::JigResult;
use crate::executor::Executor;
use crate::pty::{caller_window_size, AsyncPty, PtyPair};
use crate::relay::{reader, writer, ReaderContext, WriterContext};

/// A started session: the executor is running on the pty and ready for input.
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    pty: PtyPair,
    executor: Executor,
    input_capture: Option<CaptureFile>,
    output_capture: Option<CaptureFile>,
}

impl Session {
    /// Open the capture files, allocate the pty and start the executor.
    ///
    /// The executor is forked from the calling thread. The child only makes
    /// raw syscalls before exec, but other threads of the caller that hold
    /// locks (a logger mid-write, say) stay frozen in the child, so callers
    /// should not run this while other threads are busy.
    pub fn spawn(config: SessionConfig) -> JigResult<Self> {
        config.validate()?;

        let input_capture = config
            .input_capture
            .as_deref()
            .map(CaptureFile::create)
            .transpose()?;
        let output_capture = config
            .output_capture
            .as_deref()
            .map(CaptureFile::create)
            .transpose()?;

        let pty = PtyPair::open()?;
        if let Some(size) = caller_window_size() {
            if let Err(e) = pty.set_window_size(&size) {
                warn!(error = %e, "could not copy terminal size to pty");
            }
        }

        let executor = Executor::spawn(&pty, &config.command, config.suppress_interrupts)?;

        Ok(Self {
            config,
            pty,
            executor,
            input_capture,
            output_capture,
        })
    }

    pub fn pid(&self) -> Pid {
        self.executor.pid()
    }

    /// Set the pty's window size and notify the executor's group.
    pub fn resize(&self, size: &Winsize) -> JigResult<()> {
        self.pty.set_window_size(size)?;
        self.executor.kill_group(Signal::SIGWINCH)
    }

    /// Relay input and output until the session ends.
    pub fn run(self) -> JigResult<Outcome> {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                let _ = self.executor.kill_group(Signal::SIGKILL);
                return Err(e.into());
            }
        };
        let result = runtime.block_on(self.drive());
        // A stdin read may still be parked on the blocking pool.
        runtime.shutdown_background();
        result
    }

    async fn drive(self) -> JigResult<Outcome> {
        let Session {
            config,
            pty,
            executor,
            input_capture,
            output_capture,
        } = self;

        let eof = config.send_eof.then(|| pty.eof_char());
        let (signals, pty) = match prepare(pty) {
            Ok(prepared) => prepared,
            Err(e) => {
                let _ = executor.kill_group(Signal::SIGKILL);
                return Err(e);
            }
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut controller = Controller::new(executor, pty.clone(), events_rx);

        let (writer_ctx, writer_finished) = match config.input {
            Some(source) => {
                let (finished, finished_rx) = oneshot::channel();
                let ctx = WriterContext {
                    pty: pty.clone(),
                    input: open_input(source),
                    capture: input_capture,
                    start_delay: config.timing.start_delay,
                    keystroke_delay: config.timing.keystroke_delay,
                    eof,
                    finished,
                    events: events_tx.clone(),
                };
                (Some(ctx), Some(finished_rx))
            }
            None => (None, None),
        };

        let mirror: Option<Box<dyn AsyncWrite + Send + Unpin>> = if config.mirror_output {
            Some(Box::new(tokio::io::stdout()))
        } else {
            None
        };
        let reader_ctx = ReaderContext {
            pty,
            mirror,
            capture: output_capture,
            idle_timeout: config.timing.idle_timeout,
            writer_finished,
            events: events_tx,
        };

        controller.attach_reader(tokio::spawn(reader::run(reader_ctx)));
        if let Some(ctx) = writer_ctx {
            controller.attach_writer(tokio::spawn(writer::run(ctx)));
        }
        debug!("relays started");

        controller.run(signals).await
    }
}

fn prepare(pty: PtyPair) -> JigResult<(SignalStreams, Arc<AsyncPty>)> {
    let signals = SignalStreams::install()?;
    let pty = Arc::new(pty.into_async()?);
    Ok((signals, pty))
}

fn open_input(source: InputSource) -> Box<dyn AsyncRead + Send + Unpin> {
    match source {
        InputSource::Stdin => Box::new(tokio::io::stdin()),
        InputSource::Bytes(bytes) => Box::new(Cursor::new(bytes)),
    }
}
