use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use bugspotter_server::app::{build_router, AppState};
use bugspotter_server::config::load_app_config;
use bugspotter_server::db::audit_logs::PgAuditSink;
use bugspotter_server::db::{self, Database};
use bugspotter_server::metrics::ServerMetrics;
use bugspotter_server::queue::JobQueue;
use bugspotter_server::rate_limiter::{InMemoryRateLimiter, RateLimiterEngine, RedisRateLimiter};
use bugspotter_server::retention::{spawn_scheduler, RetentionEngine};
use bugspotter_server::{storage, workers};
use common_audit::{AuditPipeline, PipelineConfig};
use common_auth::{JwtConfig, JwtSigner, JwtVerifier};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,sqlx=warn".to_string()),
        )
        .init();

    match run().await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %format!("{err:#}"), "startup failed");
            ExitCode::from(1)
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let config = load_app_config().context("invalid configuration")?;
    info!(
        host = %config.host,
        port = config.port,
        storage = match &config.storage {
            bugspotter_server::config::StorageConfig::Local { .. } => "local",
            bugspotter_server::config::StorageConfig::S3 { .. } => "s3",
        },
        "loaded configuration"
    );

    let db = Database::connect(&config.database)
        .await
        .context("database unreachable")?;

    if let Err(err) = db::migrations::run(db.pool()).await {
        error!(error = %err, "migration failed");
        return Ok(ExitCode::from(2));
    }

    let storage = storage::from_config(&config.storage)
        .await
        .context("storage backend failed its probe")?;

    let queue = JobQueue::connect(&config.queue.redis_url, config.queue.default_max_attempts)
        .await
        .context("queue backend unreachable")?;

    // Instance settings hold the operator-tunable TTLs; environment
    // variables win when set.
    let settings = db::instance_settings::get(&db).await.context("settings row missing")?;
    let jwt_config = JwtConfig::new(config.jwt_secret.clone())
        .map_err(|err| anyhow::anyhow!("{err}"))?
        .with_access_ttl(
            config
                .jwt_access_ttl_secs
                .unwrap_or(settings.jwt_access_expiry_seconds as i64),
        )
        .with_refresh_ttl(
            config
                .jwt_refresh_ttl_secs
                .unwrap_or(settings.jwt_refresh_expiry_seconds as i64),
        );
    let jwt_signer = Arc::new(JwtSigner::new(&jwt_config));
    let jwt_verifier = Arc::new(JwtVerifier::new(&jwt_config));

    let rate_limiter: Arc<dyn RateLimiterEngine> = match RedisRateLimiter::new(
        &config.queue.redis_url,
        config.rate_limit.window_secs,
        "bugspotter:ratelimit".to_string(),
    )
    .await
    {
        Ok(limiter) => Arc::new(limiter),
        Err(err) => {
            warn!(error = %err, "redis rate limiter unavailable; using in-memory window");
            Arc::new(InMemoryRateLimiter::new(config.rate_limit.window_secs))
        }
    };

    let (audit, audit_drain) = AuditPipeline::spawn(
        Arc::new(PgAuditSink::new(db.clone())),
        PipelineConfig::default(),
    );

    let retention = Arc::new(RetentionEngine::new(
        db.clone(),
        storage.clone(),
        queue.clone(),
        audit.clone(),
        config.jwt_secret.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = spawn_scheduler(
        retention.clone(),
        db.clone(),
        config.retention_schedule.clone(),
        shutdown_rx,
    );

    let worker_pools = workers::spawn_all(&config, db.clone(), storage.clone(), queue.clone());

    let metrics = Arc::new(ServerMetrics::new().context("metrics registry")?);
    let state = AppState {
        db: db.clone(),
        storage,
        queue,
        jwt_verifier,
        jwt_signer,
        jwt_config: Arc::new(jwt_config),
        rate_limiter,
        audit: audit.clone(),
        retention,
        metrics,
        config: Arc::new(config.clone()),
        started_at: Instant::now(),
    };
    let app = build_router(state);

    let ip: std::net::IpAddr = config.host.parse().context("invalid HOST")?;
    let addr = SocketAddr::from((ip, config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    info!(%addr, "bugspotter-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Drain order: stop schedulers, let workers finish their current job,
    // flush the audit buffer, then close the pool.
    info!("shutting down");
    let _ = shutdown_tx.send(true);
    let grace = Duration::from_secs(config.shutdown_grace_secs);
    for pool in worker_pools {
        pool.shutdown(grace).await;
    }
    scheduler.abort();
    drop(audit);
    if tokio::time::timeout(Duration::from_secs(5), audit_drain)
        .await
        .is_err()
    {
        warn!("audit buffer flush timed out");
    }
    db.close().await;
    info!("shutdown complete");

    Ok(ExitCode::SUCCESS)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
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
}
