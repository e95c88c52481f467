//! Collaborator contracts (spec §6). Concrete implementations live in
//! `buildhub-providers`, `buildhub-build`, and `buildhub-collab`; this
//! crate only names the shapes the orchestration pipeline depends on.

use async_trait::async_trait;

use crate::error::LaunchError;
use crate::types::ProgressSender;

/// Resolves a provider-scoped spec to an immutable ref and supplies the
/// naming inputs used by component A.
#[async_trait]
pub trait Provider: Send + Sync {
    fn repo_url(&self) -> &str;
    fn build_slug(&self) -> &str;
    /// `Ok(None)` and `Err` are both treated as `ProviderFailure` by the
    /// orchestrator (spec §4.F step 4) — `None` covers specs the
    /// provider understood but couldn't resolve (e.g. unknown ref).
    async fn resolved_ref(&self) -> anyhow::Result<Option<String>>;
}

/// Builds a concrete [`Provider`] for a spec string, scoped to one
/// `provider_prefix`. Registered per-prefix in `Config::repo_providers`.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, spec: &str) -> anyhow::Result<Box<dyn Provider>>;
}

/// Inputs the orchestrator passes when instantiating a Build driver
/// (spec §6 "Build driver contract").
#[derive(Debug, Clone)]
pub struct BuildDriverConfig {
    pub name: String,
    pub namespace: String,
    pub git_url: String,
    pub git_ref: String,
    pub image_name: String,
    pub push_secret: Option<String>,
    pub builder_image: String,
}

/// Drives a build job end to end, reporting [`crate::types::ProgressItem`]s
/// onto the shared queue. `submit` and `stream_logs` are each run once, on
/// the bounded worker pool (spec §5).
#[async_trait]
pub trait BuildDriver: Send + Sync {
    async fn submit(&self) -> anyhow::Result<()>;
    async fn stream_logs(&self) -> anyhow::Result<()>;
}

/// Constructs a [`BuildDriver`] bound to one progress queue.
pub trait BuildDriverFactory: Send + Sync {
    fn create(&self, cfg: BuildDriverConfig, progress: ProgressSender) -> Box<dyn BuildDriver>;
}

/// Container registry manifest lookup (spec §6 "Registry contract").
#[async_trait]
pub trait Registry: Send + Sync {
    /// `repository`/`tag` are passed separately, matching the original
    /// `get_image_manifest(repo, tag)` call (see SPEC_FULL §3 supplement).
    async fn get_image_manifest(
        &self,
        repository: &str,
        tag: &str,
    ) -> anyhow::Result<Option<serde_json::Value>>;
}

/// Response shape for the two state-changing hub calls that may answer
/// `202 Accepted` before the underlying work finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubAccepted {
    pub accepted: bool,
}

/// `GET users/{name}` response fields the Launch Session polls on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HubUserStatus {
    pub server: bool,
    pub pending: bool,
}

/// The per-user server manager the Launch Session drives (spec §6 "Hub
/// client contract"). Every method is bearer-token authenticated by the
/// implementation.
#[async_trait]
pub trait HubClient: Send + Sync {
    fn hub_url(&self) -> &str;

    async fn create_user(&self, username: &str) -> Result<(), LaunchError>;
    async fn start_server(
        &self,
        username: &str,
        token: &str,
        image: &str,
    ) -> Result<HubAccepted, LaunchError>;
    async fn get_user(&self, username: &str) -> Result<HubUserStatus, LaunchError>;
    async fn delete_server(&self, username: &str) -> Result<HubAccepted, LaunchError>;
    async fn delete_user(&self, username: &str) -> Result<(), LaunchError>;
}
