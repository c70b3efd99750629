//! Database connection pool management

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::executor::{ExecutorError, ExecutorResult};

/// Upper bound on the wait between connection attempts
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt - 1)`, capped
fn retry_delay(base: Duration, attempt: u32) -> Duration {
    2_u32
        .checked_pow(attempt.saturating_sub(1))
        .and_then(|factor| base.checked_mul(factor))
        .map_or(MAX_RETRY_DELAY, |delay| delay.min(MAX_RETRY_DELAY))
}

/// Create a SQLite connection pool with retry logic
///
/// Retries `config.max_retries` times with exponential backoff.
pub(crate) async fn create_pool(config: &DatabaseConfig) -> ExecutorResult<SqlitePool> {
    create_pool_with_retries(config, config.max_retries).await
}

async fn create_pool_with_retries(
    config: &DatabaseConfig,
    max_retries: u32,
) -> ExecutorResult<SqlitePool> {
    let mut attempt = 0;
    let base_delay = config.retry_delay();

    loop {
        match try_create_pool(config).await {
            Ok(pool) => {
                if attempt > 0 {
                    tracing::info!(
                        "Database connection established after {} attempt(s)",
                        attempt + 1
                    );
                } else {
                    tracing::info!(
                        "Database connection pool created: url={}, max={}",
                        sanitize_connection_url(&config.url),
                        pool.options().get_max_connections()
                    );
                }
                return Ok(pool);
            }
            Err(e) => {
                attempt += 1;

                if attempt > max_retries {
                    tracing::error!(
                        "Failed to connect to database after {} attempts: {}",
                        max_retries + 1,
                        e
                    );
                    return Err(e);
                }

                let delay = retry_delay(base_delay, attempt);

                tracing::warn!(
                    "Database connection attempt {} failed: {}. Retrying in {:?}...",
                    attempt,
                    e,
                    delay
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Attempt to create a pool (single try)
async fn try_create_pool(config: &DatabaseConfig) -> ExecutorResult<SqlitePool> {
    let url_safe = sanitize_connection_url(&config.url);
    let connect_error = |e: sqlx::Error| {
        ExecutorError::connection_failed(format!(
            "Failed to connect to database at '{}': {}: {}",
            url_safe,
            categorize_db_error(&e),
            e
        ))
    };

    let options = SqliteConnectOptions::from_str(&config.url)
        .map_err(connect_error)?
        .foreign_keys(true);

    let mut pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .min_connections(config.min_connections)
        .acquire_timeout(config.connection_timeout());

    // Every connection to a private in-memory database sees its own empty
    // database, so the pool must hold exactly one connection forever.
    if is_memory_url(&config.url) {
        pool = pool
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    }

    pool.connect_with(options).await.map_err(connect_error)
}

/// Whether a URL names an in-memory SQLite database
pub(crate) fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Sanitize connection URL for safe logging (remove password)
pub(crate) fn sanitize_connection_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(scheme_end) = url.find("://") {
            let scheme = &url[..scheme_end + 3];
            let after_at = &url[at_pos..];
            if scheme_end + 3 <= at_pos {
                if let Some(colon_pos) = url[scheme_end + 3..at_pos].find(':') {
                    let username = &url[scheme_end + 3..scheme_end + 3 + colon_pos];
                    return format!("{}{}:***{}", scheme, username, after_at);
                }
            }
        }
    }
    url.to_string()
}

/// Categorize database error for better user guidance
fn categorize_db_error(err: &sqlx::Error) -> &'static str {
    use sqlx::Error;
    match err {
        Error::Configuration(_) => "Configuration error - check the connection URL",
        Error::Database(_) => "Database error - check file permissions and mode",
        Error::Io(_) => "I/O error - check that the database path exists",
        Error::PoolTimedOut => "Connection pool timeout",
        Error::PoolClosed => "Connection pool closed",
        Error::WorkerCrashed => "Database worker crashed",
        _ => "Connection error",
    }
}
