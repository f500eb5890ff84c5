use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

use crate::config::env_bool;

pub async fn make_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let max_connections = std::env::var("TUTORFLOW_DB_MAX_CONNECTIONS")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(8)
        .clamp(1, 64);

    let acquire_timeout_secs = std::env::var("TUTORFLOW_DB_ACQUIRE_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(10)
        .clamp(1, 60);

    let disable_jit = env_bool("TUTORFLOW_DB_DISABLE_JIT").unwrap_or(true);

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(acquire_timeout_secs))
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                if disable_jit {
                    sqlx::query("SET jit = OFF").execute(&mut *conn).await?;
                }
                Ok(())
            })
        })
        .connect(database_url)
        .await?;

    tracing::debug!(max_connections, acquire_timeout_secs, "database pool ready");
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
