//! A concrete `BuildDriver` (spec §6) that builds a git ref as a remote
//! Docker build context, grounded on the teacher's `sandbox.rs` docker
//! backend (same `Command::new("docker")` + arg-vector construction
//! style, ported to `tokio::process::Command` since the driver is
//! submitted onto the async worker pool rather than run synchronously).
//!
//! `submit()` and `stream_logs()` are specified as two independently
//! callable "blocking" operations over the same process (spec §6). To
//! let both make progress without deadlocking on a full stdout/stderr
//! pipe while `stream_logs` hasn't been called yet, `submit` drains the
//! child's output into an internal channel as soon as the process
//! spawns; `stream_logs` just relays that channel onto the shared
//! Progress Channel as `LogLine` items.

use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use buildhub_core::traits::{BuildDriver, BuildDriverConfig, BuildDriverFactory};
use buildhub_core::types::{PodPhase, ProgressItem, ProgressSender};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

pub struct DockerBuildDriverFactory;

impl BuildDriverFactory for DockerBuildDriverFactory {
    fn create(&self, cfg: BuildDriverConfig, progress: ProgressSender) -> Box<dyn BuildDriver> {
        Box::new(DockerBuildDriver::new(cfg, progress))
    }
}

pub struct DockerBuildDriver {
    cfg: BuildDriverConfig,
    progress: ProgressSender,
    log_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    log_tx: mpsc::UnboundedSender<String>,
}

impl DockerBuildDriver {
    pub fn new(cfg: BuildDriverConfig, progress: ProgressSender) -> Self {
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        Self { cfg, progress, log_rx: Mutex::new(Some(log_rx)), log_tx }
    }

    fn send_phase(&self, phase: PodPhase) {
        let _ = self.progress.send(ProgressItem::PhaseChange(phase));
    }

    fn spawn_line_reader<R>(&self, reader: R)
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
    {
        let tx = self.log_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if tx.send(line).is_err() {
                            return;
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        warn!("docker build: reading build log: {e}");
                        return;
                    }
                }
            }
        });
    }
}

#[async_trait]
impl BuildDriver for DockerBuildDriver {
    /// Submits `docker build <git_url>#<ref> -t <image_name>`, followed by
    /// `docker push` when a push secret is configured, reporting
    /// `PhaseChange` items that mirror the pod lifecycle a real cluster
    /// build job would report.
    async fn submit(&self) -> Result<()> {
        self.send_phase(PodPhase::Pending);

        let context = format!("{}#{}", self.cfg.git_url, self.cfg.git_ref);
        let mut cmd = Command::new("docker");
        cmd.args(["build", "--network", "host", "-t", &self.cfg.image_name, &context])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().with_context(|| {
            format!("spawning docker build for {}", self.cfg.image_name)
        })?;

        let stdout = child.stdout.take().context("docker build: no stdout pipe")?;
        let stderr = child.stderr.take().context("docker build: no stderr pipe")?;
        self.spawn_line_reader(stdout);
        self.spawn_line_reader(stderr);

        self.send_phase(PodPhase::Running);
        info!(image = %self.cfg.image_name, name = %self.cfg.name, "docker build started");

        let status = child.wait().await.context("waiting for docker build")?;
        if !status.success() {
            let _ = self.progress.send(ProgressItem::LogLine(json!({
                "phase": "failure",
                "message": format!("docker build exited with {status}\n"),
            })));
            self.send_phase(PodPhase::FailedUnrecoverable);
            return Ok(());
        }
        self.send_phase(PodPhase::Succeeded);

        if let Some(secret) = &self.cfg.push_secret {
            let mut push = Command::new("docker");
            push.args(["push", &self.cfg.image_name]);
            push.env("BUILDHUB_DOCKER_PUSH_SECRET", secret);
            match push.status().await {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    let _ = self.progress.send(ProgressItem::LogLine(json!({
                        "phase": "failure",
                        "message": format!("docker push exited with {status}\n"),
                    })));
                    self.send_phase(PodPhase::FailedUnrecoverable);
                    return Ok(());
                }
                Err(e) => {
                    let _ = self.progress.send(ProgressItem::LogLine(json!({
                        "phase": "failure",
                        "message": format!("docker push failed to start: {e}\n"),
                    })));
                    self.send_phase(PodPhase::FailedUnrecoverable);
                    return Ok(());
                }
            }
        }

        self.send_phase(PodPhase::Deleted);
        Ok(())
    }

    /// Relays build output collected by `submit`'s background readers onto
    /// the Progress Channel as `LogLine` items. Takes the internal receiver
    /// exactly once; a second call is a no-op (mirrors the once-per-session
    /// "start log stream" rule in spec §4.D).
    async fn stream_logs(&self) -> Result<()> {
        let Some(mut rx) = self.log_rx.lock().await.take() else {
            return Ok(());
        };
        while let Some(line) = rx.recv().await {
            let _ = self
                .progress
                .send(ProgressItem::LogLine(json!({ "message": line })));
        }
        Ok(())
    }
}
