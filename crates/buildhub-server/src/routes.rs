//! HTTP handlers (spec §6 "External interfaces"), grounded on the
//! teacher's `routes::sse_logs`/`sse_task_stream` bridge-to-`Stream`
//! pattern and `routes::health`.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use tokio_stream::StreamExt;
use tracing::error;

use crate::orchestrator::RequestOrchestrator;
use crate::sink::SseSink;
use buildhub_core::metrics::Metrics;

/// Shared state handed to every handler. `Arc`-wrapped collaborators
/// only — the per-request state (sessions, sinks) is never stored here.
pub struct AppState {
    pub orchestrator: Arc<RequestOrchestrator>,
    pub metrics: Arc<Metrics>,
}

/// `GET /build/{provider_prefix}/{spec}` (spec §6). `spec` is a wildcard
/// capture since provider specs themselves contain `/` (e.g.
/// `owner/repo/ref`).
pub async fn build_stream(
    State(state): State<Arc<AppState>>,
    Path((provider_prefix, spec)): Path<(String, String)>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, std::convert::Infallible>>> {
    let (sink, stream) = SseSink::channel();
    let sink = Arc::new(sink);

    tokio::spawn(async move {
        state.orchestrator.run(provider_prefix, spec, sink).await;
    });

    Sse::new(stream.map(Ok::<_, std::convert::Infallible>)).keep_alive(
        KeepAlive::new().interval(Duration::from_secs(25)).text("keepalive"),
    )
}

/// `GET /healthz` (SPEC_FULL §6 [AMBIENT]) — readiness probe target for
/// the container orchestrator running this service itself.
pub async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /metrics` (spec §6), standard Prometheus text exposition format.
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let families = state.metrics.registry().gather();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buf) {
        error!("failed to encode metrics: {e}");
        return (StatusCode::INTERNAL_SERVER_ERROR, [(header::CONTENT_TYPE, "text/plain; version=0.0.4")], String::new());
    }
    let body = String::from_utf8(buf).unwrap_or_default();
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}
