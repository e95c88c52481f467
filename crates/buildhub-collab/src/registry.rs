//! A `Registry` implementation (spec §6) over the Docker Registry HTTP
//! API v2, grounded on the teacher's `legal/clio.rs` client style: one
//! `reqwest::Client` field, one base URL, `bearer_auth` on every request,
//! terse one-expression-per-method bodies.

use anyhow::Result;
use async_trait::async_trait;
use buildhub_core::traits::Registry;
use reqwest::StatusCode;

/// Manifest accept headers a v2 registry expects when asked for either an
/// OCI image manifest or the older Docker v2 schema2 manifest.
const MANIFEST_ACCEPT: &str =
    "application/vnd.oci.image.manifest.v1+json, application/vnd.docker.distribution.manifest.v2+json";

pub struct RegistryClient {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl RegistryClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self { base_url, token, http: reqwest::Client::new() }
    }
}

#[async_trait]
impl Registry for RegistryClient {
    /// `Ok(None)` on a `404`; any other non-success status or transport
    /// failure is returned as `Err` so the orchestrator's §7
    /// `RegistryFailure` row (treat as a cache miss, proceed to build)
    /// can apply uniformly regardless of cause.
    async fn get_image_manifest(
        &self,
        repository: &str,
        tag: &str,
    ) -> Result<Option<serde_json::Value>> {
        let url = format!("{}v2/{repository}/manifests/{tag}", self.base_url);
        let mut req = self.http.get(url).header("Accept", MANIFEST_ACCEPT);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(resp.error_for_status()?.json().await?))
    }
}
