//! Ordered, back-pressured event sink for one request.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::stream_event::{StatusPhase, StreamEvent};

/// Writes `StreamEvent`s onto a bounded channel in emission order.
///
/// `emit` waits for room in the channel. When the receiving side is gone
/// (the client disconnected) the request's cancellation token is
/// cancelled and every later emit is a no-op. Long waits race
/// [`StreamEmitter::cancelled`], which also notices a disconnect that
/// happens while nothing is being sent.
#[derive(Clone)]
pub struct StreamEmitter {
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
}

impl StreamEmitter {
    pub fn new(tx: mpsc::Sender<StreamEvent>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    /// A fresh emitter plus the receiving end of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx, CancellationToken::new()), rx)
    }

    /// Send one event. Returns false if the stream is closed.
    pub async fn emit(&self, event: StreamEvent) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let kind = event.event_type();
        if self.tx.send(event).await.is_err() {
            debug!(event = kind, "Stream receiver dropped, cancelling request");
            self.cancel.cancel();
            return false;
        }
        true
    }

    pub async fn status(&self, phase: StatusPhase) -> bool {
        self.emit(StreamEvent::status(phase)).await
    }

    pub async fn text(&self, text: impl Into<String>) -> bool {
        self.emit(StreamEvent::TextDelta { text: text.into() }).await
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        if !self.cancel.is_cancelled() && self.tx.is_closed() {
            self.cancel.cancel();
        }
        self.cancel.is_cancelled()
    }

    /// Resolves once the request is cancelled or the receiver is dropped.
    /// A dropped receiver cancels the token.
    pub async fn cancelled(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.tx.closed() => {
                debug!("Stream receiver dropped while waiting, cancelling request");
                self.cancel.cancel();
            }
        }
    }
}
