//! USER_CREATED consumer: connection management and per-delivery handling

mod delivery;
mod manager;

pub use delivery::{DeliveryHandler, Disposition};
pub use manager::{start_user_created_consumer, ConsumerHandle, ConsumerSettings, ConsumerState};
