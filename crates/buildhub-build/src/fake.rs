//! `FakeBuildDriver` — backs the `fake_build` config key (spec §6) for
//! exercising the orchestrator without a Docker daemon or a cluster.
//! Replays a fixed Pending/Running/log-lines/Succeeded/Deleted sequence
//! with small sleeps, the same shape scenario 3 of spec §8 exercises.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use buildhub_core::traits::{BuildDriver, BuildDriverConfig, BuildDriverFactory};
use buildhub_core::types::{PodPhase, ProgressItem, ProgressSender};
use serde_json::json;

pub struct FakeBuildDriverFactory;

impl BuildDriverFactory for FakeBuildDriverFactory {
    fn create(&self, cfg: BuildDriverConfig, progress: ProgressSender) -> Box<dyn BuildDriver> {
        Box::new(FakeBuildDriver::new(cfg, progress))
    }
}

pub struct FakeBuildDriver {
    cfg: BuildDriverConfig,
    progress: ProgressSender,
}

impl FakeBuildDriver {
    pub fn new(cfg: BuildDriverConfig, progress: ProgressSender) -> Self {
        Self { cfg, progress }
    }
}

#[async_trait]
impl BuildDriver for FakeBuildDriver {
    async fn submit(&self) -> Result<()> {
        let send_phase = |phase: PodPhase| {
            let _ = self.progress.send(ProgressItem::PhaseChange(phase));
        };

        send_phase(PodPhase::Pending);
        tokio::time::sleep(Duration::from_millis(50)).await;
        send_phase(PodPhase::Running);
        tokio::time::sleep(Duration::from_millis(50)).await;
        send_phase(PodPhase::Succeeded);
        tokio::time::sleep(Duration::from_millis(50)).await;
        send_phase(PodPhase::Deleted);
        Ok(())
    }

    async fn stream_logs(&self) -> Result<()> {
        let lines = [
            format!("Step 1/1 : FROM scratch # fake build of {}\n", self.cfg.git_url),
            format!("Successfully built {}\n", self.cfg.image_name),
        ];
        for line in lines {
            let _ = self
                .progress
                .send(ProgressItem::LogLine(json!({ "message": line })));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildhub_core::types::progress_channel;

    fn cfg() -> BuildDriverConfig {
        BuildDriverConfig {
            name: "test-build".into(),
            namespace: "build".into(),
            git_url: "https://example.com/a/b.git".into(),
            git_ref: "deadbeef".into(),
            image_name: "registry.example.com/a-b:deadbeef".into(),
            push_secret: None,
            builder_image: "builder:latest".into(),
        }
    }

    #[tokio::test]
    async fn submit_reports_full_lifecycle() {
        let (tx, mut rx) = progress_channel();
        let driver = FakeBuildDriver::new(cfg(), tx);
        driver.submit().await.unwrap();
        drop(driver);

        let mut phases = Vec::new();
        while let Ok(item) = rx.try_recv() {
            if let ProgressItem::PhaseChange(p) = item {
                phases.push(p);
            }
        }
        assert_eq!(
            phases,
            vec![PodPhase::Pending, PodPhase::Running, PodPhase::Succeeded, PodPhase::Deleted]
        );
    }

    #[tokio::test]
    async fn stream_logs_forwards_log_lines() {
        let (tx, mut rx) = progress_channel();
        let driver = FakeBuildDriver::new(cfg(), tx);
        driver.stream_logs().await.unwrap();
        drop(driver);

        let mut count = 0;
        while let Ok(ProgressItem::LogLine(_)) = rx.try_recv() {
            count += 1;
        }
        assert_eq!(count, 2);
    }
}
