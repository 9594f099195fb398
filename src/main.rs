//! Process entry point: loads configuration, initialises logging, builds
//! the router, and serves it — the same `create_router` → `TcpListener` →
//! `axum::serve` sequence as `mira-chat/src/server.rs::run`.

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue, Method};
use clap::Parser;
use conduit::api::api_router;
use conduit::config::{Args, Config};
use conduit::state::AppState;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing_subscriber::{fmt, EnvFilter};
use tracing_subscriber::prelude::*;

/// stdout layer always runs; a rolling file layer (per `log_file_path`) is
/// added alongside it rather than replacing it.
fn init_logging(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::from_default_env());
    let stdout_layer = fmt::layer().with_target(true);

    if let Some(path) = &config.log_file_path {
        let directory = std::path::Path::new(path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "conduit.log".to_string());
        let file_appender = tracing_appender::rolling::never(directory, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Leaked deliberately: the guard must outlive the process for the
        // file layer to flush, and this only runs once at startup.
        std::mem::forget(guard);
        let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry().with(filter).with(stdout_layer).init();
    }
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins = &config.cors_origins;
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        AllowOrigin::list(parsed)
    };

    let allow_methods = if config.cors_methods.iter().any(|m| m == "*") {
        AllowMethods::any()
    } else {
        let parsed: Vec<Method> = config
            .cors_methods
            .iter()
            .filter_map(|m| m.parse().ok())
            .collect();
        AllowMethods::list(parsed)
    };

    let allow_headers = if config.cors_headers.iter().any(|h| h == "*") {
        AllowHeaders::any()
    } else {
        let parsed: Vec<HeaderName> = config
            .cors_headers
            .iter()
            .filter_map(|h| h.parse().ok())
            .collect();
        AllowHeaders::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(allow_methods)
        .allow_headers(allow_headers)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::from_env().apply_args(&args);
    init_logging(&config);

    tracing::info!(
        environment = %config.environment,
        api_host = %config.api_host,
        api_port = config.api_port,
        "starting conduit orchestrator"
    );

    let cors = cors_layer(&config);
    let bind_address = config.bind_address();
    let state = Arc::new(AppState::from_config(config));

    let app = api_router(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!(address = %bind_address, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
