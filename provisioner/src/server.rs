use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::get,
};
use owo_colors::OwoColorize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use urumi_common::rate_limit::{RateLimiter, RateLimiterConfig, middleware::RateLimitLayer};
use urumi_common::{access_log, cors, security_headers};

use crate::args::ServerArgs;
use crate::gateway::Gateway;
use crate::handlers;
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::{audit, db};

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Per-IP budget for store creation: 5 per 10 minutes.
const CREATE_LIMIT: (u32, Duration) = (5, Duration::from_secs(600));
/// Per-IP budget for deletions: 10 per 10 minutes.
const DELETE_LIMIT: (u32, Duration) = (10, Duration::from_secs(600));
/// Per-IP budget across all write endpoints: 100 per 15 minutes.
const GLOBAL_WRITE_LIMIT: (u32, Duration) = (100, Duration::from_secs(900));

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub create_limiter: RateLimiter,
    pub delete_limiter: RateLimiter,
}

pub async fn run_server(args: ServerArgs) -> Result<()> {
    let pool = urumi_common::postgres::create_pool(args.postgres.clone())?;
    db::init_schema(&pool)
        .await
        .context("failed to initialize store schema")?;
    audit::init_schema(&pool)
        .await
        .context("failed to initialize audit schema")?;

    let gateway = Gateway::connect(args.retry.clone().into())
        .await
        .context("failed to connect to the cluster")?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_shutdown().await;
            tracing::warn!(
                "shutdown requested; in-flight pipelines stop at their last committed checkpoint"
            );
            shutdown.cancel();
        });
    }

    if let Some(port) = args.metrics_port {
        urumi_common::metrics::spawn_metrics_server(port);
    }

    let orchestrator = Orchestrator::new(
        pool,
        gateway,
        OrchestratorConfig {
            store_domain: args.store_domain.clone(),
            ingress_class: args.ingress_class.clone(),
            db_ready_timeout: Duration::from_secs(args.db_ready_timeout_secs),
            app_ready_timeout: Duration::from_secs(args.app_ready_timeout_secs),
            db_storage_size: args.db_storage_size.clone(),
            app_storage_size: args.app_storage_size.clone(),
            max_active_stores: args.max_active_stores,
            provision_deadline: Duration::from_secs(args.provision_deadline_secs),
        },
        shutdown.clone(),
    );

    let state = AppState {
        orchestrator,
        create_limiter: RateLimiter::new(RateLimiterConfig::new(
            CREATE_LIMIT.0,
            CREATE_LIMIT.1,
            "create:",
        )),
        delete_limiter: RateLimiter::new(RateLimiterConfig::new(
            DELETE_LIMIT.0,
            DELETE_LIMIT.1,
            "delete:",
        )),
    };
    let global_limiter = RateLimiter::new(RateLimiterConfig::new(
        GLOBAL_WRITE_LIMIT.0,
        GLOBAL_WRITE_LIMIT.1,
        "write:",
    ));

    let cors = if args.environment == "production" {
        let origins: Vec<&str> = args.cors_origins.iter().map(String::as_str).collect();
        cors::prod(&origins)
    } else {
        cors::dev()
    };

    let app = Router::new()
        .route(
            "/api/stores",
            get(handlers::list_stores).post(handlers::create_store),
        )
        .route(
            "/api/stores/{id}",
            get(handlers::get_store).delete(handlers::delete_store),
        )
        .route("/api/audit", get(handlers::query_audit))
        .route("/health/live", get(handlers::health_live))
        .route("/health/ready", get(handlers::health_ready))
        .layer(axum::middleware::from_fn(access_log::request))
        .layer(axum::middleware::from_fn(security_headers::apply))
        .layer(RateLimitLayer::new(global_limiter))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(state);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    println!(
        "{}",
        format!("🏪 Urumi provisioner listening on http://{addr}").green()
    );
    tracing::info!(%addr, environment = %args.environment, "server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        })
        .await
        .context("server failed")?;

    tracing::info!("server stopped gracefully");
    Ok(())
}

/// Resolves on SIGINT or, under Kubernetes, the SIGTERM that precedes pod
/// eviction. Stores still `provisioning` at that point keep their last
/// checkpoint and are not resumed automatically.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .expect("install Ctrl+C handler");
}
