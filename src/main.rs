use anyhow::{Context, Result};
use axum::Router;
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod auth;
mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use services::{
    backend::BackendSet, file_registry::FileRegistry, metadata_store::SqliteMetadataStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting filevault with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let pool = db::connect(&cfg.database_url).await?;
    db::run_migrations(&pool).await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize core service ---
    let backends = BackendSet::from_settings(&cfg.storage)
        .with_context(|| format!("initializing {} storage backend", cfg.storage.kind()))?;
    tracing::info!("Using {} storage backend for new uploads", cfg.storage.kind());

    let registry = FileRegistry::new(
        backends,
        Arc::new(SqliteMetadataStore::new(pool)),
        cfg.limits.clone(),
    );
    let state = state::AppState {
        registry,
        tokens: auth::TokenVerifier::new(&cfg.jwt_secret),
    };

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.limits.max_upload_bytes).with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err).with_context(|| format!("binding {addr}")),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
