//! USER_CREATED publisher
//!
//! One short-lived connection per notification: connect, declare the durable
//! queue, publish the persistent envelope, close. Failures are returned to the
//! caller as [`NotifyError::BrokerUnavailable`] instead of being swallowed.

use async_trait::async_trait;
use event_bus::{Broker, BusError, EventEnvelope, InMemoryBroker, NatsBroker, Topology, UserCreated};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(#[source] BusError),

    #[error("invalid user id {0}: must be non-negative")]
    InvalidUserId(i64),

    #[error("failed to encode event: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Collaborator interface for the user CRUD layer
#[async_trait]
pub trait UserCreatedNotifier: Send + Sync {
    /// Emit exactly one USER_CREATED event for a committed user
    async fn notify_user_created(&self, user_id: i64, email: Option<&str>)
        -> Result<(), NotifyError>;
}

#[derive(Clone)]
pub struct UserEventsPublisher {
    broker: Arc<dyn Broker>,
    topology: Topology,
}

impl UserEventsPublisher {
    pub fn new(broker: Arc<dyn Broker>, topology: Topology) -> Self {
        Self { broker, topology }
    }

    pub fn from_config(config: &Config) -> Result<Self, String> {
        let broker: Arc<dyn Broker> = match config.bus_type.to_lowercase().as_str() {
            "inmemory" => Arc::new(InMemoryBroker::new()),
            "nats" => Arc::new(NatsBroker::new(config.broker_url.clone())),
            other => {
                return Err(format!(
                    "Invalid BUS_TYPE: {}. Must be 'inmemory' or 'nats'",
                    other
                ))
            }
        };
        Ok(Self::new(broker, config.topology.clone()))
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    async fn publish(&self, envelope: &EventEnvelope<UserCreated>) -> Result<(), NotifyError> {
        let payload = serde_json::to_vec(envelope)?;
        let subject = self.topology.publish_subject();

        let connection = self
            .broker
            .connect()
            .await
            .map_err(NotifyError::BrokerUnavailable)?;

        let published = async {
            connection.declare(&self.topology).await?;
            connection.publish(&subject, payload).await
        }
        .await;

        if let Err(e) = connection.close().await {
            debug!(error = %e, "Ignoring error while closing publisher connection");
        }

        published.map_err(|e| {
            warn!(
                subject = %subject,
                user_id = envelope.data.id,
                error = %e,
                "Failed to publish USER_CREATED"
            );
            NotifyError::BrokerUnavailable(e)
        })?;

        info!(
            subject = %subject,
            user_id = envelope.data.id,
            event_id = ?envelope.event_id,
            "Published USER_CREATED"
        );
        Ok(())
    }
}

#[async_trait]
impl UserCreatedNotifier for UserEventsPublisher {
    async fn notify_user_created(
        &self,
        user_id: i64,
        email: Option<&str>,
    ) -> Result<(), NotifyError> {
        if user_id < 0 {
            return Err(NotifyError::InvalidUserId(user_id));
        }

        let envelope = EventEnvelope::user_created(user_id, email.map(str::to_string));
        self.publish(&envelope).await
    }
}
