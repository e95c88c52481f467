//! Build Session state machine (component D, spec §4.D).

use std::time::Instant;

use serde_json::json;

use crate::error::StreamClosed;
use crate::metrics::{Metrics, Outcome};
use crate::sink::EventSink;
use crate::types::{PodPhase, ProgressItem, ProgressReceiver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildState {
    Waiting,
    Building,
}

/// Outcome of a completed Build Session. `Failed` carries the payload
/// already emitted to the client, so the orchestrator can log it without
/// re-serializing.
#[derive(Debug, Clone)]
pub enum BuildOutcome {
    Built,
    Failed(serde_json::Value),
}

pub struct BuildSession<'a> {
    image_name: String,
    metrics: &'a Metrics,
}

impl<'a> BuildSession<'a> {
    pub fn new(image_name: impl Into<String>, metrics: &'a Metrics) -> Self {
        Self { image_name: image_name.into(), metrics }
    }

    /// Drains `rx` to completion, emitting events to `sink` as the
    /// driver's progress items are consumed. `on_running` is called
    /// exactly once, the first time the session sees `PhaseChange{Running}`,
    /// so the caller can start the log-streaming half of the Build driver.
    ///
    /// A channel close with no preceding terminal item (driver crashed
    /// without reporting `Deleted`/`FailedUnrecoverable`) is treated as an
    /// unrecoverable failure — see DESIGN.md for this Open Question
    /// decision.
    pub async fn run(
        &self,
        mut rx: ProgressReceiver,
        sink: &dyn EventSink,
        mut on_running: impl FnMut(),
    ) -> Result<BuildOutcome, StreamClosed> {
        let mut state = BuildState::Waiting;
        let mut log_stream_started = false;
        let started_at = Instant::now();

        loop {
            let item = match rx.recv().await {
                Some(item) => item,
                None => {
                    let payload = json!({
                        "phase": "FailedUnrecoverable",
                        "message": "build channel closed without a terminal event\n",
                    });
                    self.metrics.observe_build(Outcome::Failure, started_at.elapsed());
                    sink.emit(payload.clone()).await?;
                    return Ok(BuildOutcome::Failed(payload));
                }
            };

            match item {
                ProgressItem::PhaseChange(PodPhase::Pending) => {
                    // Waiting -> Waiting: nothing to do yet.
                }
                ProgressItem::PhaseChange(PodPhase::Running) => {
                    state = BuildState::Building;
                    if !log_stream_started {
                        on_running();
                        log_stream_started = true;
                    }
                }
                ProgressItem::PhaseChange(PodPhase::Succeeded) => {
                    state = BuildState::Building;
                }
                ProgressItem::PhaseChange(PodPhase::Deleted) => {
                    self.metrics.observe_build(Outcome::Success, started_at.elapsed());
                    sink.emit(json!({
                        "phase": "built",
                        "imageName": self.image_name,
                        "message": "Built image, launching...\n",
                    }))
                    .await?;
                    return Ok(BuildOutcome::Built);
                }
                ProgressItem::PhaseChange(PodPhase::FailedUnrecoverable) => {
                    self.metrics.observe_build(Outcome::Failure, started_at.elapsed());
                    let payload = json!({ "phase": "FailedUnrecoverable" });
                    sink.emit(payload.clone()).await?;
                    return Ok(BuildOutcome::Failed(payload));
                }
                ProgressItem::PhaseChange(PodPhase::Unknown(phase)) => {
                    sink.emit(json!({ "phase": phase })).await?;
                }
                ProgressItem::LogLine(payload) => {
                    // Logs only flow once the driver is in `Running`, but
                    // forward defensively regardless of `state` — the
                    // table only specifies behavior from `Building`.
                    let _ = state;
                    let is_failure =
                        payload.get("phase").and_then(|v| v.as_str()) == Some("failure");
                    sink.emit(payload.clone()).await?;
                    if is_failure {
                        self.metrics.observe_build(Outcome::Failure, started_at.elapsed());
                        return Ok(BuildOutcome::Failed(payload));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::progress_channel;
    use std::sync::Mutex;

    struct RecordingSink {
        events: Mutex<Vec<serde_json::Value>>,
        fail_after: Option<usize>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self { events: Mutex::new(Vec::new()), fail_after: None }
        }

        fn closing_after(n: usize) -> Self {
            Self { events: Mutex::new(Vec::new()), fail_after: Some(n) }
        }

        fn events(&self) -> Vec<serde_json::Value> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl EventSink for RecordingSink {
        async fn emit(&self, event: serde_json::Value) -> Result<(), StreamClosed> {
            let mut events = self.events.lock().unwrap();
            if let Some(limit) = self.fail_after {
                if events.len() >= limit {
                    return Err(StreamClosed);
                }
            }
            events.push(event);
            Ok(())
        }
    }

    #[tokio::test]
    async fn success_path_emits_built_once() {
        let metrics = Metrics::new().unwrap();
        let session = BuildSession::new("registry/repo:ref", &metrics);
        let (tx, rx) = progress_channel();
        let sink = RecordingSink::new();
        let mut log_stream_calls = 0;

        tx.send(ProgressItem::PhaseChange(PodPhase::Pending)).unwrap();
        tx.send(ProgressItem::PhaseChange(PodPhase::Running)).unwrap();
        tx.send(ProgressItem::LogLine(json!({"line": "building..."}))).unwrap();
        tx.send(ProgressItem::PhaseChange(PodPhase::Succeeded)).unwrap();
        tx.send(ProgressItem::PhaseChange(PodPhase::Deleted)).unwrap();
        drop(tx);

        let outcome = session.run(rx, &sink, || log_stream_calls += 1).await.unwrap();
        assert!(matches!(outcome, BuildOutcome::Built));
        assert_eq!(log_stream_calls, 1);
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["line"], "building...");
        assert_eq!(events[1]["phase"], "built");
    }

    #[tokio::test]
    async fn failure_log_line_ends_session() {
        let metrics = Metrics::new().unwrap();
        let session = BuildSession::new("registry/repo:ref", &metrics);
        let (tx, rx) = progress_channel();
        let sink = RecordingSink::new();

        tx.send(ProgressItem::PhaseChange(PodPhase::Running)).unwrap();
        tx.send(ProgressItem::LogLine(json!({"phase": "failure", "message": "boom"}))).unwrap();
        // Never observed: session must stop at the failure line.
        tx.send(ProgressItem::PhaseChange(PodPhase::Deleted)).unwrap();

        let outcome = session.run(rx, &sink, || {}).await.unwrap();
        match outcome {
            BuildOutcome::Failed(payload) => assert_eq!(payload["message"], "boom"),
            BuildOutcome::Built => panic!("expected Failed"),
        }
    }

    #[tokio::test]
    async fn unrecognized_phase_is_forwarded_and_does_not_terminate() {
        let metrics = Metrics::new().unwrap();
        let session = BuildSession::new("registry/repo:ref", &metrics);
        let (tx, rx) = progress_channel();
        let sink = RecordingSink::new();

        tx.send(ProgressItem::PhaseChange(PodPhase::Unknown("ImagePullBackOff".into()))).unwrap();
        tx.send(ProgressItem::PhaseChange(PodPhase::Deleted)).unwrap();
        drop(tx);

        let outcome = session.run(rx, &sink, || {}).await.unwrap();
        assert!(matches!(outcome, BuildOutcome::Built));
        let events = sink.events();
        assert_eq!(events[0]["phase"], "ImagePullBackOff");
    }

    #[tokio::test]
    async fn stream_closed_propagates_from_emit() {
        let metrics = Metrics::new().unwrap();
        let session = BuildSession::new("registry/repo:ref", &metrics);
        let (tx, rx) = progress_channel();
        let sink = RecordingSink::closing_after(0);

        tx.send(ProgressItem::PhaseChange(PodPhase::Deleted)).unwrap();
        drop(tx);

        let err = session.run(rx, &sink, || {}).await.unwrap_err();
        assert_eq!(err, StreamClosed);
    }
}
