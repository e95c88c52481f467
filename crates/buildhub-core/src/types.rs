//! Core data model (spec §3): `BuildRequest`, `ProgressItem`,
//! `OrchestratorState`, the abort signal, and the progress channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::Notify;

/// Phase a build pod has reported, or an unrecognized string forwarded
/// verbatim (spec §3, `ProgressItem::PhaseChange`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Deleted,
    FailedUnrecoverable,
    Unknown(String),
}

impl PodPhase {
    pub fn parse(s: &str) -> Self {
        match s {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Deleted" => Self::Deleted,
            "FailedUnrecoverable" => Self::FailedUnrecoverable,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// One record posted to the Progress Channel (component C) by a Build
/// driver: either a pod phase transition, or a structured log line that
/// may itself carry a `phase` field (used to detect in-build failures).
#[derive(Debug, Clone)]
pub enum ProgressItem {
    PhaseChange(PodPhase),
    LogLine(serde_json::Value),
}

pub type ProgressSender = mpsc::UnboundedSender<ProgressItem>;
pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressItem>;

/// Create the unbounded, single-consumer/multi-producer Progress Channel
/// (component C). The Build driver only ever sees the sender half.
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Per-request state machine (spec §3). `Ready`/`Failed`/`Aborted` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Resolving,
    Checking,
    Waiting,
    Building,
    Built,
    Launching,
    Ready,
    Failed,
    Aborted,
}

impl OrchestratorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Failed | Self::Aborted)
    }
}

/// Immutable request coordinates plus the fields resolved as the
/// orchestrator progresses (spec §3 `BuildRequest`). Each field is filled
/// in by exactly one pipeline step and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub provider_prefix: String,
    pub spec: String,
    pub repo_url: Option<String>,
    pub build_slug: Option<String>,
    pub git_ref: Option<String>,
    pub build_name: Option<String>,
    pub image_name: Option<String>,
}

impl BuildRequest {
    pub fn new(provider_prefix: impl Into<String>, spec: impl Into<String>) -> Self {
        Self {
            provider_prefix: provider_prefix.into(),
            spec: spec.into(),
            repo_url: None,
            build_slug: None,
            git_ref: None,
            build_name: None,
            image_name: None,
        }
    }

    /// `provider_prefix:spec`, used as a correlation key in logs.
    pub fn key(&self) -> String {
        format!("{}:{}", self.provider_prefix, self.spec)
    }
}

/// The fields a Launch Session threads from `create_user` through
/// teardown (spec §3 `LaunchContext`). `server_requested` only becomes
/// `true` once `start_server` has been called, which is exactly when
/// teardown must also delete the server, not just the user.
#[derive(Debug, Clone)]
pub struct LaunchContext {
    pub username: String,
    pub image: String,
    pub token: String,
    pub server_requested: bool,
    pub abort_signal: AbortSignal,
}

impl LaunchContext {
    pub fn new(username: impl Into<String>, image: impl Into<String>, abort_signal: AbortSignal) -> Self {
        Self {
            username: username.into(),
            image: image.into(),
            token: String::new(),
            server_requested: false,
            abort_signal,
        }
    }
}

/// One-shot signal shared between the Orchestrator and the Launch Session
/// (spec §3 ownership rules, §9 "cancellation via completed-future
/// sentinel"). Either side may observe it; only the Orchestrator sets it,
/// on client disconnect.
#[derive(Clone)]
pub struct AbortSignal(Arc<AbortInner>);

struct AbortInner {
    flag: AtomicBool,
    notify: Notify,
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortSignal {
    pub fn new() -> Self {
        Self(Arc::new(AbortInner {
            flag: AtomicBool::new(false),
            notify: Notify::new(),
        }))
    }

    pub fn trigger(&self) {
        self.0.flag.store(true, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }

    pub fn is_set(&self) -> bool {
        self.0.flag.load(Ordering::SeqCst)
    }

    /// Resolves once [`Self::trigger`] has been called, even if that
    /// happened before this call (no missed-wakeup window).
    pub async fn wait(&self) {
        loop {
            if self.is_set() {
                return;
            }
            let notified = self.0.notify.notified();
            if self.is_set() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(OrchestratorState::Ready.is_terminal());
        assert!(OrchestratorState::Failed.is_terminal());
        assert!(OrchestratorState::Aborted.is_terminal());
        assert!(!OrchestratorState::Building.is_terminal());
    }

    #[test]
    fn launch_context_starts_with_no_token_or_server() {
        let ctx = LaunchContext::new("alice", "registry/repo:ref", AbortSignal::new());
        assert_eq!(ctx.username, "alice");
        assert_eq!(ctx.image, "registry/repo:ref");
        assert!(ctx.token.is_empty());
        assert!(!ctx.server_requested);
        assert!(!ctx.abort_signal.is_set());
    }

    #[tokio::test]
    async fn abort_signal_wakes_waiters() {
        let signal = AbortSignal::new();
        let waiter = signal.clone();
        let handle = tokio::spawn(async move {
            waiter.wait().await;
        });
        assert!(!signal.is_set());
        signal.trigger();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("wait() did not return after trigger")
            .unwrap();
    }

    #[tokio::test]
    async fn abort_signal_wait_returns_immediately_if_already_set() {
        let signal = AbortSignal::new();
        signal.trigger();
        tokio::time::timeout(std::time::Duration::from_millis(50), signal.wait())
            .await
            .expect("wait() should return immediately once already triggered");
    }
}
