//! A `HubClient` implementation (spec §6) over a JupyterHub-shaped REST
//! API, grounded on the teacher's `legal/clio.rs` client style. Every
//! call is bearer-token authenticated and maps non-2xx responses onto
//! the `LaunchError` variant the caller needs to decide teardown (§7).

use async_trait::async_trait;
use buildhub_core::error::LaunchError;
use buildhub_core::traits::{HubAccepted, HubClient, HubUserStatus};
use reqwest::StatusCode;
use serde_json::json;

pub struct HubHttpClient {
    hub_url: String,
    api_token: String,
    http: reqwest::Client,
}

impl HubHttpClient {
    /// `hub_url` must end in `/` — it is both the API base and, per spec
    /// §4.E step 7, the prefix of the user-facing launch URL.
    pub fn new(hub_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        let mut hub_url = hub_url.into();
        if !hub_url.ends_with('/') {
            hub_url.push('/');
        }
        Self { hub_url, api_token: api_token.into(), http: reqwest::Client::new() }
    }

    fn users_url(&self, username: &str) -> String {
        format!("{}hub/api/users/{username}", self.hub_url)
    }
}

fn user_status_from_json(body: &serde_json::Value) -> HubUserStatus {
    let server = body
        .get("server")
        .map(|v| !v.is_null() && v != "")
        .unwrap_or(false);
    let pending = body.get("pending").map(|v| !v.is_null()).unwrap_or(false);
    HubUserStatus { server, pending }
}

#[async_trait]
impl HubClient for HubHttpClient {
    fn hub_url(&self) -> &str {
        &self.hub_url
    }

    async fn create_user(&self, username: &str) -> Result<(), LaunchError> {
        let resp = self
            .http
            .post(self.users_url(username))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| LaunchError::CreateUser { username: username.into(), detail: e.to_string() })?;
        if !resp.status().is_success() {
            return Err(LaunchError::CreateUser {
                username: username.into(),
                detail: format!("hub returned {}", resp.status()),
            });
        }
        Ok(())
    }

    async fn start_server(
        &self,
        username: &str,
        token: &str,
        image: &str,
    ) -> Result<HubAccepted, LaunchError> {
        let resp = self
            .http
            .post(format!("{}/server", self.users_url(username)))
            .bearer_auth(&self.api_token)
            .json(&json!({ "token": token, "image": image }))
            .send()
            .await
            .map_err(|e| LaunchError::StartServer { username: username.into(), detail: e.to_string() })?;
        let status = resp.status();
        if !status.is_success() && status != StatusCode::ACCEPTED {
            return Err(LaunchError::StartServer {
                username: username.into(),
                detail: format!("hub returned {status}"),
            });
        }
        Ok(HubAccepted { accepted: status == StatusCode::ACCEPTED })
    }

    async fn get_user(&self, username: &str) -> Result<HubUserStatus, LaunchError> {
        let resp = self
            .http
            .get(self.users_url(username))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| LaunchError::Hub(e.into()))?
            .error_for_status()
            .map_err(|e| LaunchError::Hub(e.into()))?;
        let body: serde_json::Value = resp.json().await.map_err(|e| LaunchError::Hub(e.into()))?;
        Ok(user_status_from_json(&body))
    }

    async fn delete_server(&self, username: &str) -> Result<HubAccepted, LaunchError> {
        let resp = self
            .http
            .delete(format!("{}/server", self.users_url(username)))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| LaunchError::Hub(e.into()))?;
        let status = resp.status();
        if !status.is_success() && status != StatusCode::ACCEPTED {
            return Err(LaunchError::Hub(anyhow::anyhow!("delete_server({username}): hub returned {status}")));
        }
        Ok(HubAccepted { accepted: status == StatusCode::ACCEPTED })
    }

    async fn delete_user(&self, username: &str) -> Result<(), LaunchError> {
        let resp = self
            .http
            .delete(self.users_url(username))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| LaunchError::Hub(e.into()))?;
        if !resp.status().is_success() {
            return Err(LaunchError::Hub(anyhow::anyhow!("delete_user({username}): hub returned {}", resp.status())));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_truthy_server_and_pending() {
        let status = user_status_from_json(&json!({ "server": "/user/alice/", "pending": null }));
        assert!(status.server);
        assert!(!status.pending);

        let status = user_status_from_json(&json!({ "server": null, "pending": "spawning" }));
        assert!(!status.server);
        assert!(status.pending);

        let status = user_status_from_json(&json!({}));
        assert!(!status.server);
        assert!(!status.pending);
    }
}
