//! Process entry point: load configuration, wire collaborators, serve.
//! Grounded on the teacher's `main.rs` (load config, build a `tracing`
//! subscriber from `EnvFilter`, construct the router, `axum::serve`) minus
//! its `BroadcastLayer` (SPEC_FULL §6 [AMBIENT] — no client-facing log
//! broadcast exists in this service; the SSE stream *is* the per-request
//! log).

mod build_pool;
mod orchestrator;
mod routes;
mod sink;

use std::collections::HashMap;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use buildhub_build::{DockerBuildDriverFactory, FakeBuildDriverFactory};
use buildhub_collab::{HubHttpClient, RegistryClient};
use buildhub_core::config::Config;
use buildhub_core::metrics::Metrics;
use buildhub_core::traits::{BuildDriverFactory, ProviderFactory, Registry};
use buildhub_providers::GitProviderFactory;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use build_pool::BuildPool;
use orchestrator::RequestOrchestrator;
use routes::AppState;

/// Maps a configured provider prefix to the git host it resolves specs
/// against. A prefix containing a `.` is taken as a literal host (so a
/// deployment can point `my-gitlab` at `git.example.com`); the two
/// well-known short prefixes cover the common case (SPEC_FULL §6).
fn host_for_prefix(prefix: &str) -> String {
    match prefix {
        "gh" => "github.com".to_string(),
        "gl" => "gitlab.com".to_string(),
        other => other.to_string(),
    }
}

fn build_providers(config: &Config) -> HashMap<String, Arc<dyn ProviderFactory>> {
    config
        .repo_providers
        .iter()
        .map(|prefix| {
            let factory: Arc<dyn ProviderFactory> = Arc::new(GitProviderFactory::new(host_for_prefix(prefix)));
            (prefix.clone(), factory)
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Arc::new(Config::from_env()?);
    let metrics = Arc::new(Metrics::new()?);

    let providers = Arc::new(build_providers(&config));

    let build_driver_factory: Arc<dyn BuildDriverFactory> = if config.fake_build {
        info!("BUILDHUB_FAKE_BUILD=true, using the in-memory build driver");
        Arc::new(FakeBuildDriverFactory)
    } else {
        Arc::new(DockerBuildDriverFactory)
    };

    let registry: Option<Arc<dyn Registry>> = if config.use_registry {
        let registry_url = config
            .registry_url
            .clone()
            .expect("use_registry implies registry_url per Config::from_env");
        Some(Arc::new(RegistryClient::new(registry_url, config.docker_push_secret.clone())))
    } else {
        None
    };

    let hub = Arc::new(HubHttpClient::new(config.hub_url.clone(), config.hub_api_token.clone()));
    let build_pool = BuildPool::new(config.build_pool_capacity);

    let orchestrator = Arc::new(RequestOrchestrator::new(
        Arc::clone(&config),
        Arc::clone(&metrics),
        providers,
        build_driver_factory,
        registry,
        hub,
        build_pool,
    ));

    let state = Arc::new(AppState { orchestrator, metrics: Arc::clone(&metrics) });

    let app = Router::new()
        .route("/build/:provider_prefix/*spec", get(routes::build_stream))
        .route("/healthz", get(routes::healthz))
        .route("/metrics", get(routes::metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "buildhub-server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
