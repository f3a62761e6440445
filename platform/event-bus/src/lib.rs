//! # Event Bus
//!
//! Cross-service plumbing for the "user created" notification: the wire
//! envelope, the durable topology both sides declare, and a small transport
//! seam the publisher and the consumer are written against.
//!
//! ## Implementations
//!
//! - **NatsBroker**: production transport on NATS JetStream
//! - **InMemoryBroker**: test/dev transport with the same ack semantics
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_bus::{Broker, InMemoryBroker, Topology};
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = InMemoryBroker::new();
//! let topology = Topology::default();
//!
//! let connection = broker.connect().await?;
//! connection.declare(&topology).await?;
//! connection
//!     .publish(&topology.publish_subject(), br#"{"type":"USER_CREATED","data":{"id":1}}"#.to_vec())
//!     .await?;
//!
//! let mut deliveries = connection.consume(&topology, 10).await?;
//! if let Some(Ok(delivery)) = deliveries.next().await {
//!     delivery.ack().await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod consumer_retry;
mod envelope;
mod inmemory_bus;
mod nats_bus;
mod topology;

pub use envelope::{
    decode_user_created, DecodeError, EventEnvelope, UserCreated, USER_CREATED,
};
pub use inmemory_bus::InMemoryBroker;
pub use nats_bus::{NatsBroker, NatsConnection};
pub use topology::Topology;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use std::time::Duration;

/// A message received from the broker
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// The subject the message was published to
    pub subject: String,
    /// The message body (raw bytes)
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(subject: String, payload: Vec<u8>) -> Self {
        Self { subject, payload }
    }
}

/// Errors that can occur when talking to the broker
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("failed to declare topology: {0}")]
    TopologyError(String),

    #[error("failed to publish message: {0}")]
    PublishError(String),

    #[error("failed to consume: {0}")]
    SubscribeError(String),

    #[error("failed to settle delivery: {0}")]
    AckError(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

/// Result type for event bus operations
pub type BusResult<T> = Result<T, BusError>;

/// How a delivery is settled with the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Remove the message from the queue
    Ack,
    /// Return the message to the queue; it is redelivered after the delay
    Requeue(Duration),
    /// Remove the message without redelivery
    Reject,
}

/// Broker-side handle used to settle one specific delivery
#[async_trait]
pub trait Acker: Send + Sync {
    async fn settle(&self, settlement: Settlement) -> BusResult<()>;
}

/// One message handed out by a consumer, not yet settled
pub struct Delivery {
    pub message: BusMessage,
    /// Delivery count for this message, 1 on first delivery
    pub attempt: u32,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(message: BusMessage, attempt: u32, acker: Box<dyn Acker>) -> Self {
        Self {
            message,
            attempt,
            acker,
        }
    }

    pub async fn ack(&self) -> BusResult<()> {
        self.acker.settle(Settlement::Ack).await
    }

    pub async fn requeue(&self, delay: Duration) -> BusResult<()> {
        self.acker.settle(Settlement::Requeue(delay)).await
    }

    pub async fn reject(&self) -> BusResult<()> {
        self.acker.settle(Settlement::Reject).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("subject", &self.message.subject)
            .field("bytes", &self.message.payload.len())
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// Stream of deliveries; an `Err` item or the end of the stream means the
/// connection is gone.
pub type DeliveryStream = BoxStream<'static, BusResult<Delivery>>;

/// Entry point to a broker: opens connections
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self) -> BusResult<Box<dyn BrokerConnection>>;
}

/// A live broker connection with its channel
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Declare the durable queue (and exchange binding, if configured).
    /// Declare-if-absent: safe to call on every connect.
    async fn declare(&self, topology: &Topology) -> BusResult<()>;

    /// Publish a persistent message; returns once the broker has stored it.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()>;

    /// Start consuming the topology's queue with at most `prefetch`
    /// unacknowledged deliveries in flight.
    async fn consume(&self, topology: &Topology, prefetch: usize) -> BusResult<DeliveryStream>;

    /// Close the connection. Tolerates an already closed connection.
    async fn close(&self) -> BusResult<()>;
}

impl fmt::Debug for dyn Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Broker")
    }
}
