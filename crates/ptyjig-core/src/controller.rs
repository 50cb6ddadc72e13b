//! Lifecycle controller.
//!
//! Signal handlers only queue notifications (tokio's signal streams); every
//! reaction to them happens in the single loop below: reaping the executor,
//! resizing the pty, arming the post-reader grace period, and tearing the
//! session down. Teardown is guarded so it runs at most once no matter how
//! many paths reach it.

use std::future::pending;
use std::io;
use std::sync::Arc;

use nix::sys::signal::{self, SigHandler, SigSet, Signal};
use tokio::signal::unix::{signal as unix_signal, Signal as SignalStream, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::GRACE_PERIOD;
use crate::error::JigResult;
use crate::executor::{Executor, ExitState};
use crate::pty::{caller_window_size, AsyncPty};
use crate::relay::RelayEvent;
use crate::signals;

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The executor terminated on its own or was killed by the harness.
    Executor(ExitState),
    /// The harness itself received a terminating signal.
    Interrupted(Signal),
}

impl Outcome {
    /// Exit code reported to the caller: the executor's status, or 128 plus
    /// the signal number for any signal death.
    pub fn exit_code(&self) -> i32 {
        match *self {
            Outcome::Executor(state) => state.exit_code(),
            Outcome::Interrupted(signal) => 128 + signal as i32,
        }
    }

    /// Line to print when the executor died by a signal.
    pub fn message(&self, program: &str) -> Option<String> {
        match *self {
            Outcome::Executor(ExitState::Signaled {
                signal,
                core_dumped,
            }) => Some(signals::termination_message(program, signal, core_dumped)),
            _ => None,
        }
    }

    /// End the process accordingly. An interrupted harness re-delivers the
    /// signal to itself with the default disposition so the calling shell
    /// sees a signal death.
    pub fn exit(&self) -> ! {
        if let Outcome::Interrupted(signal) = *self {
            reraise(signal);
        }
        std::process::exit(self.exit_code())
    }
}

fn reraise(signal: Signal) {
    // Safety: restoring SIG_DFL does not touch any state owned by a handler.
    unsafe {
        let _ = signal::signal(signal, SigHandler::SigDfl);
    }
    let mut mask = SigSet::empty();
    mask.add(signal);
    let _ = mask.thread_unblock();
    let _ = signal::raise(signal);
}

/// Queued signal notifications the controller reacts to.
pub(crate) struct SignalStreams {
    child: SignalStream,
    window: SignalStream,
    interrupt: SignalStream,
    quit: SignalStream,
    terminate: SignalStream,
}

impl SignalStreams {
    pub(crate) fn install() -> io::Result<Self> {
        Ok(Self {
            child: unix_signal(SignalKind::child())?,
            window: unix_signal(SignalKind::window_change())?,
            interrupt: unix_signal(SignalKind::interrupt())?,
            quit: unix_signal(SignalKind::quit())?,
            terminate: unix_signal(SignalKind::terminate())?,
        })
    }
}

pub(crate) struct Controller {
    executor: Executor,
    pty: Arc<AsyncPty>,
    events: mpsc::UnboundedReceiver<RelayEvent>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    /// When to kill the executor's group after the reader is done.
    grace: Option<Instant>,
    torn_down: bool,
}

impl Controller {
    pub(crate) fn new(
        executor: Executor,
        pty: Arc<AsyncPty>,
        events: mpsc::UnboundedReceiver<RelayEvent>,
    ) -> Self {
        Self {
            executor,
            pty,
            events,
            writer: None,
            reader: None,
            grace: None,
            torn_down: false,
        }
    }

    pub(crate) fn attach_writer(&mut self, handle: JoinHandle<()>) {
        self.writer = Some(handle);
    }

    pub(crate) fn attach_reader(&mut self, handle: JoinHandle<()>) {
        self.reader = Some(handle);
    }

    /// Drive the session to its end. The session is torn down before this
    /// returns, whatever the result.
    pub(crate) async fn run(mut self, mut signals: SignalStreams) -> JigResult<Outcome> {
        let result = self.event_loop(&mut signals).await;
        self.teardown().await;
        result
    }

    async fn event_loop(&mut self, signals: &mut SignalStreams) -> JigResult<Outcome> {
        // An executor that died before the SIGCHLD stream existed left no
        // notification behind.
        if let Some(state) = self.executor.try_reap()? {
            return self.executor_exited(state).await;
        }

        loop {
            tokio::select! {
                _ = signals.child.recv() => {
                    if let Some(state) = self.executor.try_reap()? {
                        return self.executor_exited(state).await;
                    }
                }
                Some(event) = self.events.recv() => self.handle_event(event)?,
                _ = signals.window.recv() => self.propagate_resize(),
                _ = signals.interrupt.recv() => return Ok(self.interrupted(Signal::SIGINT)),
                _ = signals.quit.recv() => return Ok(self.interrupted(Signal::SIGQUIT)),
                _ = signals.terminate.recv() => return Ok(self.interrupted(Signal::SIGTERM)),
                _ = until(self.grace) => {
                    self.grace = None;
                    info!(pid = self.executor.pid().as_raw(), "executor outlived the grace period, killing its group");
                    self.executor.kill_group(Signal::SIGKILL)?;
                }
            }
        }
    }

    fn handle_event(&mut self, event: RelayEvent) -> JigResult<()> {
        match event {
            RelayEvent::WriterFinished { bytes } => {
                debug!(bytes, "input relay finished");
            }
            RelayEvent::ReaderFinished(exit) => {
                debug!(?exit, grace = ?GRACE_PERIOD, "output relay finished");
                if self.grace.is_none() {
                    self.grace = Some(Instant::now() + GRACE_PERIOD);
                }
            }
            RelayEvent::Failed(e) => return Err(e),
        }
        Ok(())
    }

    async fn executor_exited(&mut self, state: ExitState) -> JigResult<Outcome> {
        info!(pid = self.executor.pid().as_raw(), ?state, "executor terminated");
        self.executor.kill_group(Signal::SIGKILL)?;
        self.drain_output().await?;
        Ok(Outcome::Executor(state))
    }

    /// Let the reader forward whatever the executor left in the pty buffer.
    async fn drain_output(&mut self) -> JigResult<()> {
        if let Some(reader) = self.reader.as_mut() {
            match tokio::time::timeout(GRACE_PERIOD, reader).await {
                Ok(_) => self.reader = None,
                Err(_) => warn!("pty still held open after executor exit, dropping remaining output"),
            }
        }
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event)?;
        }
        Ok(())
    }

    fn interrupted(&self, signal: Signal) -> Outcome {
        warn!(?signal, "harness interrupted");
        // Teardown follows up with SIGKILL.
        if let Err(e) = self.executor.kill_group(signal) {
            warn!(error = %e, "failed to forward signal to executor group");
        }
        Outcome::Interrupted(signal)
    }

    /// Copy the harness's terminal size onto the pty and tell the executor.
    fn propagate_resize(&self) {
        let Some(size) = caller_window_size() else {
            debug!("window change without a terminal to read the size from");
            return;
        };
        if let Err(e) = self.pty.set_window_size(&size) {
            warn!(error = %e, "failed to resize pty");
            return;
        }
        if let Err(e) = self.executor.kill_group(Signal::SIGWINCH) {
            warn!(error = %e, "failed to notify executor of resize");
        }
    }

    /// Kill the executor's group and stop both relays, closing the capture
    /// files they own. Runs once; later calls return immediately.
    async fn teardown(&mut self) {
        if std::mem::replace(&mut self.torn_down, true) {
            return;
        }
        if let Err(e) = self.executor.kill_group(Signal::SIGKILL) {
            warn!(error = %e, "failed to kill executor group");
        }
        for handle in [self.writer.take(), self.reader.take()].into_iter().flatten() {
            handle.abort();
            let _ = handle.await;
        }
        debug!("session torn down");
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}
