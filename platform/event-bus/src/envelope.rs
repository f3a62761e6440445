//! # Event Envelope
//!
//! Wire format for cross-service fact notifications:
//!
//! ```json
//! {"type": "USER_CREATED", "data": {"id": 42, "email": "a@b.com"}}
//! ```
//!
//! ## Envelope Fields
//!
//! - `type`: discriminator; consumers ignore types they do not recognize
//! - `data`: event-specific payload (generic type parameter)
//! - `event_id`: optional unique identifier, used for log correlation
//! - `occurred_at`: optional timestamp of when the producer emitted the event

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discriminator of the "a user was created" fact
pub const USER_CREATED: &str = "USER_CREATED";

/// Self-describing event envelope
///
/// # Type Parameter
///
/// * `T` - The event-specific payload type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    #[serde(rename = "type")]
    pub event_type: String,

    pub data: T,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<Uuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<DateTime<Utc>>,
}

impl<T> EventEnvelope<T> {
    /// Create a new envelope with auto-generated event_id and occurred_at
    pub fn new(event_type: impl Into<String>, data: T) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            event_id: Some(Uuid::new_v4()),
            occurred_at: Some(Utc::now()),
        }
    }
}

/// Payload of `USER_CREATED`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCreated {
    pub id: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl EventEnvelope<UserCreated> {
    pub fn user_created(id: i64, email: Option<String>) -> Self {
        Self::new(USER_CREATED, UserCreated { id, email })
    }
}

/// Why a message body is not a usable `USER_CREATED` event
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("body is not a JSON envelope: {0}")]
    InvalidJson(String),

    #[error("unrecognized event type {0:?}")]
    UnknownType(String),

    #[error("invalid USER_CREATED payload: {0}")]
    InvalidPayload(String),
}

/// Body shape before validation; metadata stays untyped so a bad optional
/// field cannot sink an otherwise usable event
#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    data: serde_json::Value,
    #[serde(default)]
    event_id: serde_json::Value,
    #[serde(default)]
    occurred_at: serde_json::Value,
}

/// Decode and validate a message body as a `USER_CREATED` envelope
///
/// # Validation Rules
///
/// - body must be a JSON object with a string `type` and a `data` member
/// - `type` must be `USER_CREATED`
/// - `data.id` must be a non-negative integer that fits in an i64
///
/// `event_id`, `occurred_at` and `data.email` are best effort: a value that
/// does not parse is dropped (`None`) and the event is still accepted.
pub fn decode_user_created(body: &[u8]) -> Result<EventEnvelope<UserCreated>, DecodeError> {
    let raw: RawEnvelope =
        serde_json::from_slice(body).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

    if raw.event_type != USER_CREATED {
        return Err(DecodeError::UnknownType(raw.event_type));
    }

    let id = raw
        .data
        .get("id")
        .ok_or_else(|| DecodeError::InvalidPayload("missing data.id".to_string()))?;

    // as_u64 rejects negatives, fractions and non-numbers in one go
    let id = id
        .as_u64()
        .ok_or_else(|| DecodeError::InvalidPayload(format!("data.id must be a non-negative integer, got {id}")))?;
    let id = i64::try_from(id)
        .map_err(|_| DecodeError::InvalidPayload(format!("data.id {id} is out of range")))?;

    let email = raw.data.get("email").cloned().unwrap_or_default();

    Ok(EventEnvelope {
        event_type: raw.event_type,
        data: UserCreated {
            id,
            email: optional_field(email, "data.email"),
        },
        event_id: optional_field(raw.event_id, "event_id"),
        occurred_at: optional_field(raw.occurred_at, "occurred_at"),
    })
}

fn optional_field<T: DeserializeOwned>(value: serde_json::Value, field: &str) -> Option<T> {
    if value.is_null() {
        return None;
    }
    match serde_json::from_value(value) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::debug!(field, error = %e, "Ignoring unparseable optional envelope field");
            None
        }
    }
}
