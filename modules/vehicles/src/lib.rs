//! Vehicle service
//!
//! Consumes `USER_CREATED` events published by the users service and makes
//! sure every user owns at least one vehicle record. The projection is
//! idempotent: redelivered or duplicated events never create a second
//! placeholder, and a user who already registered a real vehicle is left
//! alone.

pub mod config;
pub mod consumer;
pub mod db;
pub mod dlq;
pub mod health;
pub mod models;
pub mod projection;
pub mod repos;
pub mod shutdown;
pub mod store;

pub use consumer::{
    start_user_created_consumer, ConsumerHandle, ConsumerSettings, ConsumerState, DeliveryHandler,
    Disposition,
};
pub use dlq::FailedEvent;
pub use projection::{apply_user_created, ProjectionOutcome};
pub use store::{PgVehicleStore, StoreError, VehicleStore};
