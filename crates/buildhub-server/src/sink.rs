//! Event Stream Sink (component B) over axum's SSE response type,
//! grounded on the teacher's `routes::sse_logs`/`sse_task_stream`: bridge
//! an `mpsc::unbounded_channel` into a `Stream`, wrap in `Sse::keep_alive`.
//!
//! The one behavioral difference from the teacher's sinks: those are
//! fire-and-forget broadcasts with no caller watching for a closed
//! receiver. This sink's `emit` is the *only* place the spec allows
//! client-disconnect to be observed (§4.B) — a failed `tx.send` (the
//! receiver, i.e. the response body stream, was dropped by axum when the
//! connection closed) is reported as `StreamClosed`, not swallowed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::response::sse::Event;
use buildhub_core::error::StreamClosed;
use buildhub_core::sink::EventSink;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

pub struct SseSink {
    tx: mpsc::UnboundedSender<Event>,
    closed: Arc<AtomicBool>,
}

impl SseSink {
    /// Returns the sink plus the stream axum should hand to `Sse::new`.
    pub fn channel() -> (Self, UnboundedReceiverStream<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, closed: Arc::new(AtomicBool::new(false)) }, UnboundedReceiverStream::new(rx))
    }

    /// Whether the last `emit` observed a closed connection. The
    /// Orchestrator polls this right after every `emit` call to decide
    /// whether to trip the abort signal (spec §4.F "Cancellation").
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventSink for SseSink {
    async fn emit(&self, event: serde_json::Value) -> Result<(), StreamClosed> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StreamClosed);
        }
        let frame = Event::default().data(event.to_string());
        if self.tx.send(frame).is_err() {
            self.closed.store(true, Ordering::SeqCst);
            return Err(StreamClosed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn emit_succeeds_while_receiver_is_alive() {
        let (sink, stream) = SseSink::channel();
        sink.emit(json!({"phase": "waiting"})).await.unwrap();
        assert!(!sink.is_closed());
        drop(stream);
    }

    #[tokio::test]
    async fn emit_fails_once_receiver_drops() {
        let (sink, stream) = SseSink::channel();
        drop(stream);
        let err = sink.emit(json!({"phase": "waiting"})).await.unwrap_err();
        assert_eq!(err, StreamClosed);
        assert!(sink.is_closed());
    }
}
