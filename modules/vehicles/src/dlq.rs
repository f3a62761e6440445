//! Dead letters for USER_CREATED deliveries
//!
//! A delivery whose projection failed permanently, or kept failing until its
//! attempts ran out, is written to the `failed_events` table and then acked.
//! If that write cannot be made either, the caller requeues the message.

use event_bus::consumer_retry::{retry_with_backoff, RetryConfig};
use event_bus::{BusMessage, EventEnvelope, UserCreated};
use serde_json::Value as JsonValue;
use std::time::Duration;
use uuid::Uuid;

use crate::store::{StoreError, VehicleStore};

/// In-process retries for the dead-letter write itself
fn dead_letter_write_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(50),
        max_backoff: Duration::from_millis(500),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedEvent {
    pub subject: String,
    pub event_id: Option<Uuid>,
    pub user_id: Option<i64>,
    /// Raw envelope as received
    pub envelope: JsonValue,
    pub error: String,
    /// Deliveries made before giving up
    pub attempts: i32,
}

impl FailedEvent {
    pub fn new(
        message: &BusMessage,
        envelope: &EventEnvelope<UserCreated>,
        error: impl Into<String>,
        attempts: u32,
    ) -> Self {
        let raw = serde_json::from_slice(&message.payload).unwrap_or_else(|_| {
            JsonValue::String(String::from_utf8_lossy(&message.payload).into_owned())
        });

        Self {
            subject: message.subject.clone(),
            event_id: envelope.event_id,
            user_id: Some(envelope.data.id),
            envelope: raw,
            error: error.into(),
            attempts: i32::try_from(attempts).unwrap_or(i32::MAX),
        }
    }
}

/// Write the dead letter, retrying briefly on failure
pub async fn dead_letter(store: &dyn VehicleStore, failed: &FailedEvent) -> Result<(), StoreError> {
    retry_with_backoff(
        || store.record_failed(failed),
        &dead_letter_write_retry(),
        "user_created_dead_letter",
    )
    .await?;

    tracing::error!(
        subject = %failed.subject,
        event_id = ?failed.event_id,
        user_id = ?failed.user_id,
        attempts = failed.attempts,
        error = %failed.error,
        "USER_CREATED moved to dead letters"
    );
    Ok(())
}
