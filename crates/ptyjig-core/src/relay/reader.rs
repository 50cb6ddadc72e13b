//! Output relay: copies pty output to stdout and the output capture.
//!
//! Owns the idle timeout. While input is still flowing (`Active`) the timer
//! is off; once the writer reports exhaustion the reader moves to
//! `Draining` and arms it, and every chunk read from then on pushes the
//! deadline back. The loop ends on pty EOF or when the timer fires.

use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info};

use super::RelayEvent;
use crate::capture::CaptureFile;
use crate::error::{JigError, JigResult};
use crate::pty::AsyncPty;

/// Size of a single read from the pty master.
const CHUNK_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Active,
    Draining,
    Done,
}

/// Why the reader stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderExit {
    /// Every holder of the slave side is gone.
    Eof,
    /// Input was exhausted and the child stayed silent for the whole timeout.
    IdleTimeout,
}

/// A single resettable deadline.
#[derive(Debug)]
pub struct IdleTimer {
    timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl IdleTimer {
    /// A disarmed timer. `None` means the timer never fires.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            deadline: None,
        }
    }

    /// Start (or restart) the countdown. A timeout too large to represent
    /// as a deadline leaves the timer disarmed.
    pub fn arm(&mut self) {
        self.deadline = self
            .timeout
            .and_then(|timeout| Instant::now().checked_add(timeout));
    }

    /// Push an armed deadline back by a full timeout. No-op when disarmed.
    pub fn reset(&mut self) {
        if self.deadline.is_some() {
            self.arm();
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolves when the deadline passes; never resolves while disarmed.
    pub async fn expired(&self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => pending().await,
        }
    }
}

/// Everything the reader needs, and nothing more.
pub struct ReaderContext {
    pub pty: Arc<AsyncPty>,
    /// Standard output, unless mirroring is suppressed.
    pub mirror: Option<Box<dyn AsyncWrite + Send + Unpin>>,
    pub capture: Option<CaptureFile>,
    pub idle_timeout: Option<Duration>,
    /// Completes when the writer is done. `None` when there is no writer.
    pub writer_finished: Option<oneshot::Receiver<()>>,
    pub events: mpsc::UnboundedSender<RelayEvent>,
}

/// Run the reader to completion and report the result to the controller.
pub async fn run(mut ctx: ReaderContext) {
    let event = match relay_output(&mut ctx).await {
        Ok(exit) => {
            info!(?exit, "reader finished");
            RelayEvent::ReaderFinished(exit)
        }
        Err(e) => RelayEvent::Failed(e),
    };
    let _ = ctx.events.send(event);
}

async fn relay_output(ctx: &mut ReaderContext) -> JigResult<ReaderExit> {
    let mut timer = IdleTimer::new(ctx.idle_timeout);
    let mut writer_finished = ctx.writer_finished.take();
    let mut state = ReaderState::Active;
    if writer_finished.is_none() {
        state = ReaderState::Draining;
        timer.arm();
    }

    let pty = ctx.pty.clone();
    let mut buf = vec![0u8; CHUNK_SIZE];

    while state != ReaderState::Done {
        tokio::select! {
            biased;

            _ = wait_writer(&mut writer_finished), if state == ReaderState::Active => {
                debug!("input exhausted, draining");
                state = ReaderState::Draining;
                timer.arm();
            }
            _ = timer.expired() => {
                debug!(timeout = ?ctx.idle_timeout, "idle timeout fired");
                return Ok(ReaderExit::IdleTimeout);
            }
            read = pty.read(&mut buf) => {
                let n = read.map_err(|e| JigError::relay("pty", e))?;
                if n == 0 {
                    state = ReaderState::Done;
                    continue;
                }
                forward(ctx, &buf[..n]).await?;
                if state == ReaderState::Draining {
                    timer.reset();
                }
            }
        }
    }

    Ok(ReaderExit::Eof)
}

async fn wait_writer(finished: &mut Option<oneshot::Receiver<()>>) {
    match finished {
        // A dropped sender means the writer is gone, which is just as final.
        Some(rx) => {
            let _ = rx.await;
        }
        None => pending().await,
    }
}

async fn forward(ctx: &mut ReaderContext, chunk: &[u8]) -> JigResult<()> {
    if let Some(out) = ctx.mirror.as_mut() {
        out.write_all(chunk)
            .await
            .map_err(|e| JigError::relay("stdout", e))?;
        out.flush().await.map_err(|e| JigError::relay("stdout", e))?;
    }
    if let Some(capture) = ctx.capture.as_mut() {
        capture
            .write(chunk)
            .map_err(|e| JigError::relay("output capture", e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::PtyPair;
    use nix::fcntl::{self, OFlag};
    use nix::sys::stat::Mode;
    use nix::unistd;
    use std::os::fd::{FromRawFd, OwnedFd};

    fn open_pair() -> (Arc<AsyncPty>, OwnedFd) {
        let pair = PtyPair::open().expect("pty allocation");
        let slave = fcntl::open(
            pair.slave_path().as_c_str(),
            OFlag::O_RDWR | OFlag::O_NOCTTY,
            Mode::empty(),
        )
        .expect("open slave");
        // Safety: freshly opened descriptor owned by nobody else.
        let slave = unsafe { OwnedFd::from_raw_fd(slave) };
        (Arc::new(pair.into_async().unwrap()), slave)
    }

    fn context(
        pty: &Arc<AsyncPty>,
        capture: Option<CaptureFile>,
        idle_timeout: Option<Duration>,
        writer_finished: Option<oneshot::Receiver<()>>,
    ) -> (ReaderContext, mpsc::UnboundedReceiver<RelayEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let ctx = ReaderContext {
            pty: pty.clone(),
            mirror: None,
            capture,
            idle_timeout,
            writer_finished,
            events,
        };
        (ctx, events_rx)
    }

    #[test]
    fn timer_starts_disarmed_and_reset_requires_arming() {
        let mut timer = IdleTimer::new(Some(Duration::from_secs(2)));
        assert!(timer.deadline().is_none());
        timer.reset();
        assert!(timer.deadline().is_none());
        timer.arm();
        assert!(timer.deadline().is_some());
    }

    #[test]
    fn disabled_timer_never_arms() {
        let mut timer = IdleTimer::new(None);
        timer.arm();
        assert!(timer.deadline().is_none());
    }

    #[tokio::test]
    async fn unrepresentable_timeout_never_fires() {
        let mut timer = IdleTimer::new(Some(Duration::from_secs(u64::MAX)));
        timer.arm();
        assert!(timer.deadline().is_none());
        timer.reset();
        let fired = tokio::time::timeout(Duration::from_millis(50), timer.expired()).await;
        assert!(fired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_moves_the_deadline_forward() {
        let mut timer = IdleTimer::new(Some(Duration::from_secs(2)));
        timer.arm();
        let first = timer.deadline().unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        timer.reset();
        assert_eq!(timer.deadline().unwrap(), first + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn idle_timeout_fires_after_input_is_done() {
        let (pty, _slave) = open_pair();
        let (ctx, mut events) = context(&pty, None, Some(Duration::from_millis(200)), None);

        let started = Instant::now();
        tokio::spawn(run(ctx));
        match events.recv().await {
            Some(RelayEvent::ReaderFinished(exit)) => assert_eq!(exit, ReaderExit::IdleTimeout),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn no_timeout_while_input_is_active() {
        let (pty, _slave) = open_pair();
        let (finished_tx, finished_rx) = oneshot::channel();
        let (ctx, mut events) =
            context(&pty, None, Some(Duration::from_millis(100)), Some(finished_rx));
        tokio::spawn(run(ctx));

        let quiet = tokio::time::timeout(Duration::from_millis(400), events.recv()).await;
        assert!(quiet.is_err(), "reader timed out while input was active");

        finished_tx.send(()).unwrap();
        match events.recv().await {
            Some(RelayEvent::ReaderFinished(exit)) => assert_eq!(exit, ReaderExit::IdleTimeout),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn output_resets_the_idle_timer() {
        let (pty, slave) = open_pair();
        let (ctx, mut events) = context(&pty, None, Some(Duration::from_millis(300)), None);

        let started = Instant::now();
        tokio::spawn(run(ctx));
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            unistd::write(&slave, b".").unwrap();
        }

        match events.recv().await {
            Some(RelayEvent::ReaderFinished(exit)) => assert_eq!(exit, ReaderExit::IdleTimeout),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(started.elapsed() >= Duration::from_millis(800));
    }

    #[tokio::test]
    async fn copies_output_to_capture_until_eof() {
        let (pty, slave) = open_pair();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        let capture = CaptureFile::create(&path).unwrap();
        let (ctx, mut events) = context(&pty, Some(capture), None, None);
        tokio::spawn(run(ctx));

        unistd::write(&slave, b"hello\r\n").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(slave);

        match events.recv().await {
            Some(RelayEvent::ReaderFinished(exit)) => assert_eq!(exit, ReaderExit::Eof),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(std::fs::read(&path).unwrap(), b"hello\r\n");
    }
}
