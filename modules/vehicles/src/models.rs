use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// A row of the `vehicles` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Vehicle {
    pub id: i64,
    pub user_id: i64,
    pub make: String,
    pub model: String,
    pub year: Option<i32>,
    /// Filler record created from USER_CREATED, not entered by the user
    pub placeholder: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
