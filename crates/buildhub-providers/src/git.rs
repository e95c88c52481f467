//! A concrete `Provider` (spec §6) that resolves `owner/repo/ref` specs
//! against a real git remote, grounded on the teacher's `git.rs` (same
//! `Command`-wrapping style, ported to `tokio::process::Command` since
//! `Provider::resolved_ref` is async).

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use buildhub_core::traits::{Provider, ProviderFactory};
use tokio::process::Command;

/// Resolves specs of the form `owner/repo/ref` against `https://{host}/owner/repo`.
pub struct GitProviderFactory {
    pub host: String,
}

impl GitProviderFactory {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl ProviderFactory for GitProviderFactory {
    fn create(&self, spec: &str) -> Result<Box<dyn Provider>> {
        let parts: Vec<&str> = spec.splitn(3, '/').collect();
        let [owner, repo, git_ref] = parts.as_slice() else {
            return Err(anyhow!("spec {spec:?} is not of the form owner/repo/ref"));
        };
        let repo = repo.strip_suffix(".git").unwrap_or(repo);
        let repo_url = format!("https://{}/{owner}/{repo}.git", self.host);
        let build_slug = format!("{owner}-{repo}");
        Ok(Box::new(GitProvider {
            repo_url,
            build_slug,
            git_ref: git_ref.to_string(),
        }))
    }
}

pub struct GitProvider {
    repo_url: String,
    build_slug: String,
    git_ref: String,
}

#[async_trait]
impl Provider for GitProvider {
    fn repo_url(&self) -> &str {
        &self.repo_url
    }

    fn build_slug(&self) -> &str {
        &self.build_slug
    }

    async fn resolved_ref(&self) -> Result<Option<String>> {
        // A ref that already looks like a full commit SHA needs no remote
        // round-trip.
        if self.git_ref.len() == 40 && self.git_ref.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(Some(self.git_ref.to_lowercase()));
        }

        let output = Command::new("git")
            .args(["ls-remote", &self.repo_url, &self.git_ref])
            .output()
            .await
            .with_context(|| format!("failed to spawn git ls-remote {}", self.repo_url))?;

        if !output.status.success() {
            return Err(anyhow!(
                "git ls-remote {} {} failed: {}",
                self.repo_url,
                self.git_ref,
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let sha = stdout.lines().next().and_then(|line| line.split_whitespace().next());
        Ok(sha.map(|s| s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_rejects_malformed_spec() {
        let factory = GitProviderFactory::new("github.com");
        assert!(factory.create("not-enough-parts").is_err());
    }

    #[test]
    fn factory_builds_https_url_and_slug() {
        let factory = GitProviderFactory::new("github.com");
        let provider = factory.create("minrk/binder-example/main").unwrap();
        assert_eq!(provider.repo_url(), "https://github.com/minrk/binder-example.git");
        assert_eq!(provider.build_slug(), "minrk-binder-example");
    }

    #[test]
    fn factory_strips_dot_git_suffix_from_repo() {
        let factory = GitProviderFactory::new("github.com");
        let provider = factory.create("minrk/binder-example.git/main").unwrap();
        assert_eq!(provider.repo_url(), "https://github.com/minrk/binder-example.git");
    }

    #[tokio::test]
    async fn full_sha_ref_resolves_without_network() {
        let factory = GitProviderFactory::new("github.com");
        let sha = "a".repeat(40);
        let provider = factory.create(&format!("minrk/binder-example/{sha}")).unwrap();
        assert_eq!(provider.resolved_ref().await.unwrap(), Some(sha));
    }
}
