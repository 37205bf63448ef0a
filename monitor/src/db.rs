use crate::errors::Result;
use crate::metrics::DB_FAILURES_TOTAL;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

const MAX_ATTEMPTS: u32 = 5;
const BASE_BACKOFF_MS: u64 = 100;

pub async fn make_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

/// Runs a store operation, retrying transient connection failures with
/// exponential backoff. Non-transient errors are returned immediately.
pub async fn with_retry<T, F, Fut>(operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;

    loop {
        attempts += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempts >= MAX_ATTEMPTS || !is_transient_error(&e) {
                    if is_transient_error(&e) {
                        error!(
                            "{} failed permanently after {} attempts: {}",
                            operation, attempts, e
                        );
                    }
                    return Err(e.into());
                }

                let wait_ms = backoff_ms(attempts);
                warn!(
                    "{} failed (attempt {}/{}), retrying in {}ms: {}",
                    operation, attempts, MAX_ATTEMPTS, wait_ms, e
                );
                DB_FAILURES_TOTAL.inc();
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
            }
        }
    }
}

fn backoff_ms(attempt: u32) -> u64 {
    BASE_BACKOFF_MS * 2_u64.pow(attempt.saturating_sub(1)).min(32)
}

pub fn is_transient_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db_err) => {
            // Check if it's a connection-related error
            db_err.code().is_some_and(|code| {
                code == "08000" || // connection_exception
                code == "08003" || // connection_does_not_exist
                code == "08006" || // connection_failure
                code == "57P03" || // cannot_connect_now
                code == "53300" // too_many_connections
            })
        }
        _ => false,
    }
}
