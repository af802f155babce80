use std::sync::Arc;

use http::{header, Method};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use sentinel_orchestrator::state::AppState;
use sentinel_orchestrator::{dispatcher, scheduler};

fn build_app(state: AppState) -> axum::Router {
    let cors = CorsLayer::new()
        .allow_origin(
            std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:5173".to_string())
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect::<Vec<_>>(),
        )
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(std::time::Duration::from_secs(86_400));

    // Per-route rate-limit tiers are already applied inside create_router;
    // this outer layer stack only adds cross-cutting HTTP concerns.
    sentinel_orchestrator::create_router(state)
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            header::HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            header::HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            header::HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().with_env_filter(env_filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).with_ansi(true).init();
    }

    dotenvy::dotenv().ok();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(std::time::Duration::from_secs(3))
        .idle_timeout(std::time::Duration::from_secs(600))
        .max_lifetime(std::time::Duration::from_secs(1800))
        .connect(&database_url)
        .await
        .expect("DB connection failed");

    // Skip migrations if schema already exists (avoids checksum mismatch).
    if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
        tracing::warn!("migration skipped (schema likely exists): {e}");
    }

    // Startup recovery (spec §4.F, §4.H): every target left in `processing`
    // and every scheduled task with a malformed trigger belongs to a process
    // that is, by definition, gone.
    match dispatcher::recover_orphaned_targets(&pool).await {
        Ok(n) if n > 0 => tracing::info!("startup recovery: restored {n} orphaned target(s) to pending"),
        Ok(_) => {}
        Err(e) => tracing::error!("startup recovery: failed to restore orphaned targets: {e}"),
    }
    if let Err(e) = scheduler::recover_invalid_tasks(&pool).await {
        tracing::error!("startup recovery: failed to sweep invalid scheduled tasks: {e}");
    }

    let state = Arc::new(AppState::new(pool));

    let job_scheduler = scheduler::Scheduler::new(Arc::downgrade(&state), state.db.clone())
        .await
        .expect("failed to build job scheduler");
    job_scheduler.bootstrap().await.expect("failed to bootstrap scheduled tasks");
    job_scheduler.start().await.expect("failed to start job scheduler");
    *state.scheduler.write().await = Some(Arc::new(job_scheduler));

    state.mark_ready();

    let app = build_app((*state).clone());

    let port: u16 = std::env::var("PORT").unwrap_or_else(|_| "8082".to_string()).parse()?;
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!("sentinel-orchestrator listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;

    Ok(())
}

async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    tracing::info!("shutdown signal received, stopping job scheduler");

    if let Some(scheduler_arc) = state.scheduler.write().await.take() {
        match Arc::try_unwrap(scheduler_arc) {
            Ok(job_scheduler) => {
                if let Err(e) = job_scheduler.shutdown().await {
                    tracing::warn!("job scheduler shutdown error: {e}");
                }
            }
            Err(_) => tracing::warn!("job scheduler still had outstanding references at shutdown"),
        }
    }
}
