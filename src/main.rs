mod config;
mod credentials;
mod error;
mod http;
mod logger;
mod proxy;
mod resolver;
mod translate;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use config::{Config, ProviderFile};
use credentials::CopilotCredentials;
use http::handlers::{chat_completions, healthz, list_models, messages, root};
use http::state::AppState;
use logger::TracingCallLogger;
use proxy::ProxyDispatcher;
use resolver::ModelResolver;
use tower_http::cors::CorsLayer;
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env();
    let providers = ProviderFile::load(&config.providers_path)
        .expect("failed to load provider configuration");

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
        .expect("failed to build http client");

    let resolver = Arc::new(ModelResolver::new(providers));
    let credentials = Arc::new(CopilotCredentials::new(
        client.clone(),
        config.copilot_github_token.clone(),
    ));
    let dispatcher = Arc::new(ProxyDispatcher::new(
        client,
        Arc::clone(&resolver),
        credentials,
        Arc::new(TracingCallLogger),
        config.copilot_account_tier.clone(),
    ));
    let state = AppState::new(dispatcher, resolver);

    let app = Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/v1/models", get(list_models))
        .route("/v1/messages", post(messages))
        .route("/v1/chat/completions", post(chat_completions))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = config.bind_addr();
    info!(%addr, "gateway listening");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind tcp listener");
    axum::serve(listener, app).await.expect("server failed");
}
