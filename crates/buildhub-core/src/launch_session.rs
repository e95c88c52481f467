//! Launch Session state machine (component E, spec §4.E).
//!
//! Replaces the original `launcher.py`'s nested `check()`/`wait_up()`
//! closures (declared sync but suspending — spec §9 design notes) with a
//! single `exponential_backoff` helper driving explicit async predicates,
//! and the `abort_future` sentinel with the shared [`AbortSignal`].

use std::future::Future;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use tracing::warn;

use crate::error::LaunchError;
use crate::metrics::{Metrics, Outcome};
use crate::traits::HubClient;
use crate::types::{AbortSignal, LaunchContext};

const BACKOFF_INITIAL: Duration = Duration::from_millis(500);
const BACKOFF_FACTOR: f64 = 2.0;
const BACKOFF_CAP: Duration = Duration::from_secs(10);

/// Successful result of a Launch Session (spec §3 "Return `{url, token}`").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchResult {
    pub url: String,
    pub token: String,
}

/// Either a completed launch, or an abort observed mid-flight after
/// teardown has already run — not an error, just nothing to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    Ready(LaunchResult),
    Aborted,
}

fn mint_token() -> String {
    let mut bytes = [0u8; 16]; // 128 random bits
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `poll_until`'s failure modes, kept distinguishable so a caller never has
/// to infer a deadline timeout by inspecting a hub error's message.
#[derive(Debug, thiserror::Error)]
enum PollError {
    #[error(transparent)]
    Hub(#[from] LaunchError),
    #[error("backoff deadline exceeded")]
    DeadlineExceeded,
}

/// Polls `check` with exponential backoff until it returns `true`, the
/// deadline passes, or `abort` fires. Returns `true` if `check` reported
/// done, `false` if it was the abort signal that ended the wait.
async fn poll_until<F, Fut>(
    mut check: F,
    abort: &AbortSignal,
    timeout: Duration,
) -> Result<bool, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, LaunchError>>,
{
    let deadline = Instant::now() + timeout;
    let mut delay = BACKOFF_INITIAL;
    loop {
        if check().await? {
            return Ok(true);
        }
        if abort.is_set() {
            return Ok(false);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(PollError::DeadlineExceeded);
        }
        let remaining = deadline - now;
        tokio::select! {
            _ = tokio::time::sleep(delay.min(BACKOFF_CAP).min(remaining)) => {}
            _ = abort.wait() => return Ok(false),
        }
        delay = Duration::from_secs_f64((delay.as_secs_f64() * BACKOFF_FACTOR).min(BACKOFF_CAP.as_secs_f64()));
    }
}

pub struct LaunchSession<'a> {
    hub: &'a dyn HubClient,
    metrics: &'a Metrics,
    launch_timeout: Duration,
}

impl<'a> LaunchSession<'a> {
    pub fn new(hub: &'a dyn HubClient, metrics: &'a Metrics, launch_timeout: Duration) -> Self {
        Self { hub, metrics, launch_timeout }
    }

    /// Runs the full launch algorithm (spec §4.E steps 1-7), recording
    /// `launch_time_seconds{status=...}` on every exit path.
    pub async fn run(&self, username: &str, image: &str, abort: &AbortSignal) -> Result<LaunchOutcome, LaunchError> {
        let started_at = Instant::now();
        let mut ctx = LaunchContext::new(username, image, abort.clone());

        let result = self.run_inner(&mut ctx).await;

        match &result {
            Ok(LaunchOutcome::Ready(_)) => {
                self.metrics.observe_launch(Outcome::Success, started_at.elapsed());
            }
            Ok(LaunchOutcome::Aborted) | Err(_) => {
                self.metrics.observe_launch(Outcome::Failure, started_at.elapsed());
            }
        }
        result
    }

    async fn run_inner(&self, ctx: &mut LaunchContext) -> Result<LaunchOutcome, LaunchError> {
        // 1. Create user.
        self.hub.create_user(&ctx.username).await?;

        // 2. Check abort before minting a token / starting a server.
        if ctx.abort_signal.is_set() {
            self.teardown(&ctx.username, ctx.server_requested).await;
            return Ok(LaunchOutcome::Aborted);
        }

        // 3. Mint token.
        ctx.token = mint_token();

        // 4. Request server. A hub-side failure here still leaves the user
        // created, so teardown is user-only (spec §7 `LaunchStartServer`).
        let accepted = match self.hub.start_server(&ctx.username, &ctx.token, &ctx.image).await {
            Ok(accepted) => accepted,
            Err(e) => {
                self.teardown(&ctx.username, ctx.server_requested).await;
                return Err(e);
            }
        };
        ctx.server_requested = true;

        // 5. Wait loop, only if the hub hasn't already finished synchronously.
        if accepted.accepted {
            let hub = self.hub;
            let username = ctx.username.clone();
            let done = poll_until(
                || async {
                    let status = hub.get_user(&username).await?;
                    Ok(status.server)
                },
                &ctx.abort_signal,
                self.launch_timeout,
            )
            .await;

            match done {
                Ok(_) => {}
                Err(PollError::DeadlineExceeded) => {
                    // Deadline exceeded: tear down user + server (§7 `LaunchTimeout`).
                    self.teardown(&ctx.username, ctx.server_requested).await;
                    return Err(LaunchError::Timeout { username: ctx.username.clone(), image: ctx.image.clone() });
                }
                Err(PollError::Hub(e)) => {
                    self.teardown(&ctx.username, ctx.server_requested).await;
                    return Err(e);
                }
            }
        }

        // 6. Check abort again.
        if ctx.abort_signal.is_set() {
            self.teardown(&ctx.username, ctx.server_requested).await;
            return Ok(LaunchOutcome::Aborted);
        }

        // 7. Return url + token.
        Ok(LaunchOutcome::Ready(LaunchResult {
            url: format!("{}user/{}/", self.hub.hub_url(), ctx.username),
            token: ctx.token.clone(),
        }))
    }

    /// Best-effort teardown (spec §4.E "Teardown"). Errors are logged,
    /// never re-raised — a half-torn-down user would otherwise strand
    /// the request with no way to retry.
    pub async fn teardown(&self, username: &str, server_requested: bool) {
        if server_requested {
            match self.hub.delete_server(username).await {
                Ok(accepted) if accepted.accepted => {
                    let hub = self.hub;
                    let stopped = poll_until(
                        || async {
                            let status = hub.get_user(username).await?;
                            Ok(!status.server && !status.pending)
                        },
                        &AbortSignal::new(), // teardown never aborts itself
                        self.launch_timeout,
                    )
                    .await;
                    if let Err(e) = stopped {
                        warn!("teardown: waiting for {username}'s server to stop: {e}");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("teardown: delete_server({username}) failed: {e}"),
            }
        }

        if let Err(e) = self.hub.delete_user(username).await {
            warn!("teardown: delete_user({username}) failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{HubAccepted, HubUserStatus};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeHub {
        hub_url: String,
        users_created: Mutex<Vec<String>>,
        servers_started: Mutex<Vec<String>>,
        servers_deleted: Mutex<Vec<String>>,
        users_deleted: Mutex<Vec<String>>,
        start_accepted: bool,
        poll_calls: AtomicUsize,
        ready_after_polls: usize,
        create_user_fails: bool,
        start_server_fails: bool,
    }

    #[async_trait]
    impl HubClient for FakeHub {
        fn hub_url(&self) -> &str {
            &self.hub_url
        }

        async fn create_user(&self, username: &str) -> Result<(), LaunchError> {
            if self.create_user_fails {
                return Err(LaunchError::CreateUser { username: username.into(), detail: "nope".into() });
            }
            self.users_created.lock().unwrap().push(username.to_string());
            Ok(())
        }

        async fn start_server(&self, username: &str, _token: &str, _image: &str) -> Result<HubAccepted, LaunchError> {
            if self.start_server_fails {
                return Err(LaunchError::StartServer { username: username.into(), detail: "nope".into() });
            }
            self.servers_started.lock().unwrap().push(username.to_string());
            Ok(HubAccepted { accepted: self.start_accepted })
        }

        async fn get_user(&self, _username: &str) -> Result<HubUserStatus, LaunchError> {
            let n = self.poll_calls.fetch_add(1, Ordering::SeqCst);
            Ok(HubUserStatus { server: n + 1 >= self.ready_after_polls, pending: false })
        }

        async fn delete_server(&self, username: &str) -> Result<HubAccepted, LaunchError> {
            self.servers_deleted.lock().unwrap().push(username.to_string());
            Ok(HubAccepted { accepted: false })
        }

        async fn delete_user(&self, username: &str) -> Result<(), LaunchError> {
            self.users_deleted.lock().unwrap().push(username.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn synchronous_start_skips_wait_loop() {
        let hub = FakeHub { start_accepted: false, ..Default::default() };
        let metrics = Metrics::new().unwrap();
        let session = LaunchSession::new(&hub, &metrics, Duration::from_secs(5));
        let abort = AbortSignal::new();

        let outcome = session.run("alice", "img:latest", &abort).await.unwrap();
        match outcome {
            LaunchOutcome::Ready(r) => {
                assert_eq!(r.url, "user/alice/");
                assert!(!r.token.is_empty());
            }
            LaunchOutcome::Aborted => panic!("expected Ready"),
        }
        assert_eq!(hub.poll_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn accepted_start_polls_until_server_is_up() {
        let hub = FakeHub { start_accepted: true, ready_after_polls: 3, ..Default::default() };
        let metrics = Metrics::new().unwrap();
        let session = LaunchSession::new(&hub, &metrics, Duration::from_secs(5));
        let abort = AbortSignal::new();

        let outcome = session.run("bob", "img:latest", &abort).await.unwrap();
        assert!(matches!(outcome, LaunchOutcome::Ready(_)));
        assert!(hub.poll_calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn abort_before_server_request_skips_create_server_call() {
        let hub = FakeHub::default();
        let metrics = Metrics::new().unwrap();
        let session = LaunchSession::new(&hub, &metrics, Duration::from_secs(5));
        let abort = AbortSignal::new();
        abort.trigger();

        let outcome = session.run("carol", "img:latest", &abort).await.unwrap();
        assert!(matches!(outcome, LaunchOutcome::Aborted));
        assert!(hub.servers_started.lock().unwrap().is_empty());
        assert_eq!(hub.users_deleted.lock().unwrap().as_slice(), ["carol"]);
    }

    #[tokio::test]
    async fn abort_after_server_requested_tears_down_server_too() {
        let hub = FakeHub { start_accepted: true, ready_after_polls: 1_000_000, ..Default::default() };
        let metrics = Metrics::new().unwrap();
        let session = LaunchSession::new(&hub, &metrics, Duration::from_secs(3));
        let abort = AbortSignal::new();

        let abort_clone = abort.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            abort_clone.trigger();
        });

        let outcome = session.run("dave", "img:latest", &abort).await.unwrap();
        assert!(matches!(outcome, LaunchOutcome::Aborted));
        assert_eq!(hub.servers_deleted.lock().unwrap().as_slice(), ["dave"]);
        assert_eq!(hub.users_deleted.lock().unwrap().as_slice(), ["dave"]);
    }

    #[tokio::test]
    async fn create_user_failure_runs_no_teardown() {
        let hub = FakeHub { create_user_fails: true, ..Default::default() };
        let metrics = Metrics::new().unwrap();
        let session = LaunchSession::new(&hub, &metrics, Duration::from_secs(5));
        let abort = AbortSignal::new();

        let err = session.run("erin", "img:latest", &abort).await.unwrap_err();
        assert!(matches!(err, LaunchError::CreateUser { .. }));
        assert!(hub.users_deleted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn wait_loop_times_out() {
        let hub = FakeHub { start_accepted: true, ready_after_polls: usize::MAX, ..Default::default() };
        let metrics = Metrics::new().unwrap();
        let session = LaunchSession::new(&hub, &metrics, Duration::from_millis(200));
        let abort = AbortSignal::new();

        let err = session.run("frank", "img:latest", &abort).await.unwrap_err();
        assert!(matches!(err, LaunchError::Timeout { .. }));
        // §7 LaunchTimeout: user + server teardown is expected on deadline exceeded.
        assert_eq!(hub.servers_deleted.lock().unwrap().as_slice(), ["frank"]);
        assert_eq!(hub.users_deleted.lock().unwrap().as_slice(), ["frank"]);
    }

    #[tokio::test]
    async fn start_server_failure_tears_down_user_only() {
        let hub = FakeHub { start_server_fails: true, ..Default::default() };
        let metrics = Metrics::new().unwrap();
        let session = LaunchSession::new(&hub, &metrics, Duration::from_secs(5));
        let abort = AbortSignal::new();

        let err = session.run("grace", "img:latest", &abort).await.unwrap_err();
        assert!(matches!(err, LaunchError::StartServer { .. }));
        // §7 LaunchStartServer: teardown is user-only — no server was ever requested.
        assert!(hub.servers_deleted.lock().unwrap().is_empty());
        assert_eq!(hub.users_deleted.lock().unwrap().as_slice(), ["grace"]);
    }
}
