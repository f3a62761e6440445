use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::watch;

use crate::consumer::ConsumerState;
use crate::db;

#[derive(Clone)]
pub struct HealthState {
    pub db: PgPool,
    pub consumer: watch::Receiver<ConsumerState>,
}

/// Liveness: the process is up
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "vehicles-rs",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Readiness: database reachable and the USER_CREATED consumer attached
pub async fn ready(State(state): State<Arc<HealthState>>) -> (StatusCode, Json<Value>) {
    let db_ok = db::ping(&state.db).await;
    let consumer = *state.consumer.borrow();
    readiness(db_ok, consumer)
}

fn readiness(db_ok: bool, consumer: ConsumerState) -> (StatusCode, Json<Value>) {
    let ready = db_ok && consumer == ConsumerState::Consuming;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if ready { "ready" } else { "not_ready" },
            "database": if db_ok { "connected" } else { "unavailable" },
            "consumer": consumer.as_str(),
        })),
    )
}
