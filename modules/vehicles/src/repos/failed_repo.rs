use sqlx::PgPool;

use crate::dlq::FailedEvent;

/// Persist a dead-lettered USER_CREATED delivery
pub async fn insert(pool: &PgPool, failed: &FailedEvent) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO failed_events (event_id, subject, user_id, envelope_json, error, retry_count)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(failed.event_id)
    .bind(&failed.subject)
    .bind(failed.user_id)
    .bind(&failed.envelope)
    .bind(&failed.error)
    .bind(failed.attempts)
    .execute(pool)
    .await?;

    Ok(())
}

/// Number of dead letters recorded for a user
pub async fn count_for_user(pool: &PgPool, user_id: i64) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM failed_events WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await
}
