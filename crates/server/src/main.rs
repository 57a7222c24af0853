use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

use studia_server::{
    api::ApiDeps,
    auth::jwt::IdentityTokenService,
    build_app,
    config::ServerConfig,
    db::{migrations, pool::{check_pool_health, create_pg_pool, PoolConfig}},
    storage::ObjectStore,
    ws::registry::ConnectionRegistry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.clone().into()),
        )
        .init();

    if config.is_dev_jwt_secret() {
        warn!("using the development JWT secret; set STUDIA_SERVER_JWT_SECRET in production");
    }

    let token_service =
        Arc::new(IdentityTokenService::new(&config.jwt_secret).context("invalid JWT secret")?);
    let registry = Arc::new(ConnectionRegistry::default());

    let object_store = match config.object_store_url.as_deref() {
        Some(base_url) => ObjectStore::http(base_url).context("invalid object store URL")?,
        None => {
            warn!("no object store configured; file uploads are kept in memory");
            ObjectStore::memory()
        }
    };

    let deps = match config.database_url.as_deref() {
        Some(database_url) => {
            let pool = create_pg_pool(database_url, PoolConfig::from_env())
                .await
                .context("failed to initialize PostgreSQL pool")?;
            check_pool_health(&pool).await.context("PostgreSQL health check failed")?;
            migrations::run_migrations(&pool).await?;
            ApiDeps::postgres(
                pool,
                Arc::clone(&registry),
                object_store,
                config.invite_link_base_url.clone(),
            )
        }
        None => {
            warn!("no database configured; running with in-memory stores");
            let mut deps = ApiDeps::memory(Arc::clone(&registry));
            deps.object_store = object_store;
            deps.invite_link_base_url = Arc::from(config.invite_link_base_url.as_str());
            deps
        }
    };

    let app = build_app(deps, registry, token_service, config.cors_origins.as_deref());

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting studia server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited unexpectedly")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
