use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};

use crate::errors::{AppError, AppResult};

pub type DbPool = Pool<ConnectionManager<PgConnection>>;
pub type DbConn = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_size: u32,
    pub min_idle: u32,
    /// Upper bound on waiting for a free connection.
    pub checkout_timeout: Duration,
    /// Applied as `statement_timeout` on every connection the pool opens.
    pub statement_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 10,
            min_idle: 2,
            checkout_timeout: Duration::from_secs(3),
            statement_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
struct StatementTimeout(Duration);

impl CustomizeConnection<PgConnection, diesel::r2d2::Error> for StatementTimeout {
    fn on_acquire(&self, conn: &mut PgConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!("SET statement_timeout = {}", self.0.as_millis()))
            .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Build the Postgres pool. Connections are opened lazily, so a database
/// that is down at boot surfaces as `Unavailable` on first use rather than
/// blocking startup.
pub fn create_pool(database_url: &str, settings: &PoolSettings) -> DbPool {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = Pool::builder()
        .max_size(settings.max_size)
        .min_idle(Some(settings.min_idle))
        .connection_timeout(settings.checkout_timeout)
        .test_on_check_out(true)
        .connection_customizer(Box::new(StatementTimeout(settings.statement_timeout)))
        .build_unchecked(manager);

    tracing::info!(
        max_size = settings.max_size,
        statement_timeout_ms = settings.statement_timeout.as_millis() as u64,
        "database connection pool created"
    );
    pool
}

/// Check a connection out of the pool, mapping exhaustion to `Unavailable`.
pub fn checkout(pool: &DbPool) -> AppResult<DbConn> {
    pool.get().map_err(|e| {
        tracing::warn!(error = %e, "database pool checkout failed");
        AppError::unavailable("database unavailable")
    })
}
