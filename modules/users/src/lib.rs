//! Producing side of the user-created notification.
//!
//! The user CRUD layer calls [`UserCreatedNotifier::notify_user_created`]
//! after the user row is committed. A successful return means the event is
//! durably stored by the broker; the dependent placeholder vehicle shows up
//! later (eventual consistency), not before this call returns.

pub mod config;
pub mod notifier;

pub use notifier::{NotifyError, UserCreatedNotifier, UserEventsPublisher};
