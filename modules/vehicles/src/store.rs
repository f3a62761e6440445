//! Persistence seam for the USER_CREATED projection

use async_trait::async_trait;
use sqlx::PgPool;

use crate::dlq::FailedEvent;
use crate::repos::{failed_repo, vehicle_repo};

/// SQLSTATE classes worth retrying: connection exceptions, transaction
/// rollbacks (serialization failures, deadlocks), insufficient resources,
/// operator intervention and system errors.
const TRANSIENT_SQLSTATE_CLASSES: &[&str] = &["08", "40", "53", "57", "58"];

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached or gave up mid-operation
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store refused the write; retrying will not help
    #[error("store rejected write: {0}")]
    Rejected(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
            sqlx::Error::Database(db) => {
                let transient = db
                    .code()
                    .map(|code| TRANSIENT_SQLSTATE_CLASSES.iter().any(|c| code.starts_with(c)))
                    .unwrap_or(false);
                if transient {
                    StoreError::Unavailable(err.to_string())
                } else {
                    StoreError::Rejected(err.to_string())
                }
            }
            _ => StoreError::Rejected(err.to_string()),
        }
    }
}

#[async_trait]
pub trait VehicleStore: Send + Sync {
    /// Create the placeholder vehicle for `user_id` if the user has none.
    /// Returns whether a row was created.
    async fn ensure_placeholder(&self, user_id: i64) -> Result<bool, StoreError>;

    /// Record a delivery that will not be retried any further
    async fn record_failed(&self, failed: &FailedEvent) -> Result<(), StoreError>;
}

/// [`VehicleStore`] backed by the service's Postgres database
#[derive(Clone)]
pub struct PgVehicleStore {
    pool: PgPool,
}

impl PgVehicleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl VehicleStore for PgVehicleStore {
    async fn ensure_placeholder(&self, user_id: i64) -> Result<bool, StoreError> {
        Ok(vehicle_repo::insert_placeholder(&self.pool, user_id).await?)
    }

    async fn record_failed(&self, failed: &FailedEvent) -> Result<(), StoreError> {
        Ok(failed_repo::insert(&self.pool, failed).await?)
    }
}
