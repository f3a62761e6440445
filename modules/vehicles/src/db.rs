use sqlx::migrate::MigrateError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Connect to the service database
///
/// Pool sizing is overridable per environment: tests cap connections with
/// `DB_MAX_CONNECTIONS` (1-2 is plenty) and may raise
/// `DB_ACQUIRE_TIMEOUT_SECS`; production keeps the 3s fast-fail default.
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(env_or("DB_MAX_CONNECTIONS", 10))
        .min_connections(env_or("DB_MIN_CONNECTIONS", 0))
        .acquire_timeout(Duration::from_secs(env_or("DB_ACQUIRE_TIMEOUT_SECS", 3)))
        .connect(database_url)
        .await
}

/// Apply the embedded `vehicles` / `failed_events` migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrateError> {
    sqlx::migrate!("./db/migrations").run(pool).await
}

/// Cheap liveness probe used by readiness
pub async fn ping(pool: &PgPool) -> bool {
    sqlx::query("SELECT 1").fetch_one(pool).await.is_ok()
}
