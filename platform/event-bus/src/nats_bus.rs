//! NATS JetStream implementation of the broker seam

use crate::{
    Acker, Broker, BrokerConnection, BusError, BusMessage, BusResult, Delivery, DeliveryStream,
    Settlement, Topology,
};
use async_nats::jetstream::{
    self,
    consumer::{pull, AckPolicy},
    stream::{self, RetentionPolicy, StorageType},
    AckKind,
};
use async_nats::Client;
use async_trait::async_trait;
use futures::stream::StreamExt;
use std::time::Duration;

/// Idle heartbeat for pull requests; a missed heartbeat surfaces as a
/// stream error, which the consumer treats as a lost connection.
const PULL_HEARTBEAT: Duration = Duration::from_secs(5);

/// Broker backed by a NATS server with JetStream enabled
///
/// # Example
/// ```rust,no_run
/// use event_bus::{Broker, NatsBroker, Topology};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = NatsBroker::new("nats://localhost:4222");
/// let connection = broker.connect().await?;
/// connection.declare(&Topology::default()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct NatsBroker {
    url: String,
}

impl NatsBroker {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Broker for NatsBroker {
    async fn connect(&self) -> BusResult<Box<dyn BrokerConnection>> {
        let client = async_nats::connect(self.url.as_str())
            .await
            .map_err(|e| BusError::BrokerUnavailable(format!("{}: {}", self.url, e)))?;

        Ok(Box::new(NatsConnection::new(client)))
    }
}

/// One NATS client connection and its JetStream context
#[derive(Clone)]
pub struct NatsConnection {
    client: Client,
    jetstream: jetstream::Context,
}

impl NatsConnection {
    pub fn new(client: Client) -> Self {
        let jetstream = jetstream::new(client.clone());
        Self { client, jetstream }
    }

    /// Get a reference to the underlying NATS client
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl BrokerConnection for NatsConnection {
    async fn declare(&self, topology: &Topology) -> BusResult<()> {
        let config = stream::Config {
            name: topology.stream_name(),
            subjects: topology.subjects(),
            retention: RetentionPolicy::WorkQueue,
            storage: StorageType::File,
            ..Default::default()
        };

        self.jetstream
            .get_or_create_stream(config)
            .await
            .map_err(|e| BusError::TopologyError(format!("stream {}: {}", topology.stream_name(), e)))?;

        Ok(())
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        // First await sends, second waits for the stream's PubAck
        self.jetstream
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| BusError::PublishError(e.to_string()))?
            .await
            .map_err(|e| BusError::PublishError(format!("not stored: {}", e)))?;

        Ok(())
    }

    async fn consume(&self, topology: &Topology, prefetch: usize) -> BusResult<DeliveryStream> {
        let stream = self
            .jetstream
            .get_stream(topology.stream_name())
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        let durable = topology.durable_name();
        let consumer: jetstream::consumer::PullConsumer = stream
            .get_or_create_consumer(
                &durable,
                pull::Config {
                    durable_name: Some(durable.clone()),
                    ack_policy: AckPolicy::Explicit,
                    max_ack_pending: prefetch as i64,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BusError::SubscribeError(format!("consumer {}: {}", durable, e)))?;

        let messages = consumer
            .stream()
            .max_messages_per_batch(prefetch)
            .heartbeat(PULL_HEARTBEAT)
            .messages()
            .await
            .map_err(|e| BusError::SubscribeError(e.to_string()))?;

        let deliveries = messages.map(|item| match item {
            Ok(message) => {
                let attempt = message
                    .info()
                    .map(|info| info.delivered.max(1) as u32)
                    .unwrap_or(1);
                let bus_message =
                    BusMessage::new(message.subject.to_string(), message.payload.to_vec());
                Ok(Delivery::new(
                    bus_message,
                    attempt,
                    Box::new(NatsAcker { message }),
                ))
            }
            Err(e) => Err(BusError::ConnectionLost(e.to_string())),
        });

        Ok(deliveries.boxed())
    }

    async fn close(&self) -> BusResult<()> {
        // The socket closes once the last client handle is dropped; flushing
        // first makes sure pending acks reach the server.
        self.client
            .flush()
            .await
            .map_err(|e| BusError::ConnectionLost(e.to_string()))
    }
}

struct NatsAcker {
    message: jetstream::Message,
}

#[async_trait]
impl Acker for NatsAcker {
    async fn settle(&self, settlement: Settlement) -> BusResult<()> {
        let kind = match settlement {
            Settlement::Ack => AckKind::Ack,
            Settlement::Requeue(delay) => AckKind::Nak(Some(delay)),
            Settlement::Reject => AckKind::Term,
        };

        self.message
            .ack_with(kind)
            .await
            .map_err(|e| BusError::AckError(e.to_string()))
    }
}
