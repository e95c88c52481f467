//! Process-wide configuration (spec §6 "Configuration keys consumed").
//!
//! Loaded once at startup from the environment (+ optional `.env` file),
//! following the teacher's `Config::from_env` accessor-function pattern —
//! but, unlike the teacher's single-operator bot, a missing *required* key
//! is a hard `ConfigInvalid` error raised before the server accepts any
//! requests (spec §7), not a silent default.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::OrchestratorError;

fn parse_dotenv() -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Ok(contents) = std::fs::read_to_string(".env") else {
        return map;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            map.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    map
}

fn get(key: &str, dotenv: &HashMap<String, String>) -> Option<String> {
    std::env::var(key).ok().or_else(|| dotenv.get(key).cloned())
}

fn require(key: &str, dotenv: &HashMap<String, String>) -> Result<String, OrchestratorError> {
    get(key, dotenv).filter(|v| !v.is_empty()).ok_or_else(|| {
        OrchestratorError::ConfigInvalid(format!("missing required configuration key {key}"))
    })
}

fn get_bool(key: &str, dotenv: &HashMap<String, String>, default: bool) -> bool {
    match get(key, dotenv).as_deref() {
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        _ => default,
    }
}

fn get_u64(key: &str, dotenv: &HashMap<String, String>, default: u64) -> u64 {
    get(key, dotenv).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn get_usize(key: &str, dotenv: &HashMap<String, String>, default: usize) -> usize {
    get(key, dotenv).and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Full application configuration for one orchestrator process.
#[derive(Debug, Clone)]
pub struct Config {
    /// Prefixes accepted in `GET /build/{provider_prefix}/{spec}` (spec §6
    /// `repo_providers`, the *names*; factories bound to them are wired in
    /// `main`, not carried as configuration data).
    pub repo_providers: Vec<String>,
    pub use_registry: bool,
    pub registry_url: Option<String>,
    pub docker_image_prefix: String,
    pub docker_push_secret: Option<String>,
    pub build_namespace: String,
    pub builder_image_spec: String,
    pub build_pool_capacity: usize,
    pub hub_url: String,
    pub hub_api_token: String,
    pub fake_build: bool,
    pub launch_timeout: Duration,
    pub bind_addr: String,
}

impl Config {
    pub fn from_env() -> Result<Self, OrchestratorError> {
        let dotenv = parse_dotenv();

        let repo_providers: Vec<String> = require("BUILDHUB_REPO_PROVIDERS", &dotenv)?
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if repo_providers.is_empty() {
            return Err(OrchestratorError::ConfigInvalid(
                "BUILDHUB_REPO_PROVIDERS must list at least one prefix".into(),
            ));
        }

        let use_registry = get_bool("BUILDHUB_USE_REGISTRY", &dotenv, false);
        let registry_url = get("BUILDHUB_REGISTRY_URL", &dotenv);
        if use_registry && registry_url.is_none() {
            return Err(OrchestratorError::ConfigInvalid(
                "BUILDHUB_REGISTRY_URL is required when BUILDHUB_USE_REGISTRY=true".into(),
            ));
        }

        Ok(Self {
            repo_providers,
            use_registry,
            registry_url,
            docker_image_prefix: require("BUILDHUB_DOCKER_IMAGE_PREFIX", &dotenv)?,
            docker_push_secret: get("BUILDHUB_DOCKER_PUSH_SECRET", &dotenv),
            build_namespace: require("BUILDHUB_BUILD_NAMESPACE", &dotenv)?,
            builder_image_spec: require("BUILDHUB_BUILDER_IMAGE_SPEC", &dotenv)?,
            build_pool_capacity: get_usize("BUILDHUB_BUILD_POOL_CAPACITY", &dotenv, 4),
            hub_url: require("BUILDHUB_HUB_URL", &dotenv)?,
            hub_api_token: require("BUILDHUB_HUB_API_TOKEN", &dotenv)?,
            fake_build: get_bool("BUILDHUB_FAKE_BUILD", &dotenv, false),
            launch_timeout: Duration::from_secs(get_u64("BUILDHUB_LAUNCH_TIMEOUT_SECS", &dotenv, 300)),
            bind_addr: get("BUILDHUB_BIND_ADDR", &dotenv).unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        })
    }
}
