mod api;
mod auth;
mod config;
mod db;
mod documents;
mod error;
mod lock;
mod store;
mod validation;

use anyhow::Context;
use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;
use crate::db::{
    migrations::run_migrations,
    pool::{check_pool_health, create_pg_pool, PoolConfig},
};
use crate::error::{
    attach_request_id_header, request_id_from_headers_or_generate, with_request_id_scope,
    ServerError, REQUEST_ID_HEADER,
};
use crate::lock::{spawn_lease_sweeper, LeaseLockManager, LockConfig};
use crate::store::Store;
use crate::validation::MAX_REST_BODY_BYTES;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();
    init_tracing(&config);

    let database_url =
        config.database_url.as_deref().context("NOTEE_DATABASE_URL must be set")?;
    let pool = create_pg_pool(database_url, PoolConfig::from_env()).await?;
    check_pool_health(&pool).await?;
    if config.skip_migrations {
        info!("skipping database migrations");
    } else {
        run_migrations(&pool).await?;
    }

    let store = Store::postgres(pool);
    let locks = LeaseLockManager::with_config(
        store.clone(),
        LockConfig { ttl: config.lock_ttl, ..LockConfig::default() },
    );
    let sweeper = spawn_lease_sweeper(locks.clone(), config.lock_sweep_interval);

    if config.allowed_origins.is_empty() {
        warn!("NOTEE_ALLOWED_ORIGINS is empty, browser requests to /api/auth will be rejected");
    }
    let app = build_app(api::build_router(
        store,
        locks,
        &config.session_cookie_name,
        config.allowed_origins.clone(),
    ));

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting notee server");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("notee server exited unexpectedly");
    sweeper.abort();
    served
}

fn init_tracing(config: &ServerConfig) {
    let builder = tracing_subscriber::fmt().with_env_filter(EnvFilter::new(&config.log_filter));
    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_app(api_router: Router) -> Router {
    apply_middleware(Router::new().route("/healthz", get(healthz)).merge(api_router))
}

fn apply_middleware(router: Router) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REST_BODY_BYTES))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!(?error, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                error!(?error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

/// Runs each request on its own task. A panicking handler becomes a 500, and
/// a dropped connection cannot cancel a handler halfway through a lease.
async fn panic_handler(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(request_id = %request_id, ?join_error, "request handling panicked");
            ServerError::from_status(StatusCode::INTERNAL_SERVER_ERROR, "request handling panicked")
                .with_request_id(request_id)
                .into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = request_id_from_headers_or_generate(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = with_request_id_scope(request_id.clone(), next.run(request)).await;
    attach_request_id_header(&mut response, &request_id);

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}
