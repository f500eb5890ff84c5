use std::sync::Arc;

use tutorflow::jobs::PgJobStore;
use tutorflow::{api, config, db, telemetry, JobQueue};

mod handlers;
use handlers::build_registry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::Config::from_env()?;
    telemetry::init(cfg.json_logs);

    let queue_cfg = cfg.queue_config();
    tracing::info!(
        worker_id = %cfg.worker_id,
        api = %cfg.api_addr.as_deref().unwrap_or("disabled"),
        poll_interval_ms = cfg.poll_interval_ms,
        poll_concurrency = cfg.poll_concurrency,
        lease_seconds = cfg.lease_seconds,
        execution_mode = ?cfg.execution_mode,
        migrate_on_startup = cfg.migrate_on_startup,
        "tutorflow worker starting"
    );

    let pool = db::make_pool(&cfg.database_url).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
    }

    let store = Arc::new(PgJobStore::new(pool.clone()));
    let queue = Arc::new(
        JobQueue::builder(store)
            .registry(build_registry())
            .config(queue_cfg)
            .build(),
    );

    let app = api::router(api::ApiState {
        queue: queue.clone(),
    });
    let api_addr = cfg.api_addr.clone();
    let api_handle = tokio::spawn(async move {
        if let Some(addr) = api_addr {
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            tracing::info!(%addr, "api listening");
            axum::serve(listener, app).await?;
        } else {
            std::future::pending::<()>().await;
        }
        Ok::<(), anyhow::Error>(())
    });

    queue.start().await;

    let result = tokio::select! {
        res = api_handle => res?,
        res = tokio::signal::ctrl_c() => {
            tracing::info!("ctrl-c received, draining");
            res.map_err(anyhow::Error::from)
        }
    };

    queue.stop().await;
    pool.close().await;
    result
}
