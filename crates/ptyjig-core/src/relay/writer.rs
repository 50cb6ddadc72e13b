//! Input relay: types the harness's input into the pty one byte at a time.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::RelayEvent;
use crate::capture::CaptureFile;
use crate::error::{JigError, JigResult};
use crate::pty::AsyncPty;

/// Everything the writer needs, and nothing more.
pub struct WriterContext {
    pub pty: Arc<AsyncPty>,
    pub input: Box<dyn AsyncRead + Send + Unpin>,
    pub capture: Option<CaptureFile>,
    /// Wait before the first keystroke.
    pub start_delay: Duration,
    pub keystroke_delay: Duration,
    /// Byte written once input runs out.
    pub eof: Option<u8>,
    /// Tells the reader to start draining.
    pub finished: oneshot::Sender<()>,
    pub events: mpsc::UnboundedSender<RelayEvent>,
}

/// Why the typing loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputEnd {
    Exhausted,
    PtyClosed,
}

/// Run the writer. Never returns: once input is done the task parks until
/// the controller cancels it.
pub async fn run(mut ctx: WriterContext) {
    if !ctx.start_delay.is_zero() {
        debug!(delay = ?ctx.start_delay, "waiting before first keystroke");
        tokio::time::sleep(ctx.start_delay).await;
    }

    match type_input(&mut ctx).await {
        Ok((end, bytes)) => {
            debug!(?end, bytes, "writer finished");
            if let Some(eof) = ctx.eof {
                if let Err(e) = ctx.pty.write_all(&[eof]).await {
                    debug!(error = %e, "could not deliver EOF character");
                }
            }
            let _ = ctx.finished.send(());
            let _ = ctx.events.send(RelayEvent::WriterFinished { bytes });
        }
        Err(e) => {
            let _ = ctx.events.send(RelayEvent::Failed(e));
        }
    }

    std::future::pending::<()>().await;
}

async fn type_input(ctx: &mut WriterContext) -> JigResult<(InputEnd, u64)> {
    let mut byte = [0u8; 1];
    let mut sent = 0u64;

    loop {
        match ctx.input.read(&mut byte).await {
            Ok(0) => return Ok((InputEnd::Exhausted, sent)),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(error = %e, "input read failed, treating input as exhausted");
                return Ok((InputEnd::Exhausted, sent));
            }
        }

        // The child closing its terminal is how most sessions end; not an error.
        if let Err(e) = ctx.pty.write_all(&byte).await {
            debug!(error = %e, "pty stopped accepting input");
            return Ok((InputEnd::PtyClosed, sent));
        }
        sent += 1;

        if let Some(capture) = ctx.capture.as_mut() {
            capture
                .write_keystroke(byte[0])
                .map_err(|e| JigError::relay("input capture", e))?;
        }

        if !ctx.keystroke_delay.is_zero() {
            tokio::time::sleep(ctx.keystroke_delay).await;
        }
    }
}
