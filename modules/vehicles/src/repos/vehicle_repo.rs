use sqlx::PgPool;

use crate::models::Vehicle;

pub const PLACEHOLDER_MAKE: &str = "Unknown";
pub const PLACEHOLDER_MODEL: &str = "Unknown";

/// Insert the placeholder vehicle for `user_id` unless the user already has
/// any vehicle
///
/// Returns `true` only when this call created the row. Two concurrent calls
/// for the same user race on `vehicles_one_placeholder_per_user`; the loser
/// hits `ON CONFLICT DO NOTHING` and reports `false`.
pub async fn insert_placeholder(pool: &PgPool, user_id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO vehicles (user_id, make, model, placeholder)
        SELECT $1, $2, $3, TRUE
        WHERE NOT EXISTS (SELECT 1 FROM vehicles WHERE user_id = $1)
        ON CONFLICT (user_id) WHERE placeholder DO NOTHING
        "#,
    )
    .bind(user_id)
    .bind(PLACEHOLDER_MAKE)
    .bind(PLACEHOLDER_MODEL)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// All vehicles owned by a user, oldest first
pub async fn list_for_user(pool: &PgPool, user_id: i64) -> Result<Vec<Vehicle>, sqlx::Error> {
    sqlx::query_as::<_, Vehicle>(
        r#"
        SELECT id, user_id, make, model, year, placeholder, created_at, updated_at
        FROM vehicles
        WHERE user_id = $1
        ORDER BY id
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}
