//! USER_CREATED → placeholder vehicle

use event_bus::UserCreated;

use crate::store::{StoreError, VehicleStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionOutcome {
    /// A placeholder row was inserted by this call
    Created,
    /// The user already owns a vehicle (placeholder or real); nothing changed
    AlreadyPresent,
}

/// Apply one USER_CREATED event. Safe to call any number of times for the
/// same user, concurrently included.
pub async fn apply_user_created(
    store: &dyn VehicleStore,
    event: &UserCreated,
) -> Result<ProjectionOutcome, StoreError> {
    if store.ensure_placeholder(event.id).await? {
        Ok(ProjectionOutcome::Created)
    } else {
        Ok(ProjectionOutcome::AlreadyPresent)
    }
}
