use std::sync::Arc;

use courier_common::config::AppConfig;
use courier_common::db;
use courier_common::redis_pool::create_redis_pool;
use courier_engine::DigestCoordinator;
use courier_engine::audit::PgExecutionAuditLog;
use courier_engine::flags::RedisFlagResolver;
use courier_engine::store::PgJobStore;
use courier_worker::queue::DigestWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier_worker=info,courier_engine=info".into()),
        )
        .json()
        .init();

    tracing::info!("Courier digest worker starting...");

    let config = AppConfig::from_env()?;

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;

    let redis = create_redis_pool(&config.redis_url).await?;

    let coordinator = DigestCoordinator::new(
        Arc::new(PgJobStore::new(pool.clone())),
        Arc::new(RedisFlagResolver::new(
            redis.clone(),
            config.use_merged_digest_id,
        )),
        Arc::new(PgExecutionAuditLog::new(pool)),
    );

    let mut worker = DigestWorker::new(
        Arc::new(coordinator),
        redis,
        config.digest_queue_key.clone(),
        config.digest_poll_interval_ms,
    );

    tracing::info!(queue = %config.digest_queue_key, "Consuming digest commands");

    // Run with graceful shutdown on Ctrl+C
    tokio::select! {
        result = worker.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Digest worker exited with error");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    tracing::info!("Courier digest worker stopped.");
    Ok(())
}
