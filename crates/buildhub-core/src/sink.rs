//! Event Stream Sink contract (component B, spec §4.B).
//!
//! The concrete SSE writer lives in `buildhub-server` (it needs axum's
//! response body); sessions in this crate only need something they can
//! push a JSON frame into and learn whether the client is still there.

use async_trait::async_trait;

use crate::error::StreamClosed;

#[async_trait]
pub trait EventSink: Send + Sync {
    /// Serialize and write one `data: <json>\n\n` frame.
    ///
    /// Fails with [`StreamClosed`] when the underlying connection is
    /// gone; per spec §4.B this must propagate to the Orchestrator as a
    /// cancellation signal, never as an ordinary application error.
    async fn emit(&self, event: serde_json::Value) -> Result<(), StreamClosed>;

    /// Emits one `{phase: failed, status_code, message}` frame. Safe to
    /// call without suspension elsewhere finishing first — the result is
    /// discarded, matching the source's `send_error` which "cannot be
    /// async" and never raises (spec §4.B).
    async fn send_error(&self, status_code: u16, message: &str) {
        let _ = self
            .emit(serde_json::json!({
                "phase": "failed",
                "status_code": status_code,
                "message": message,
            }))
            .await;
    }
}
