//! Connection lifecycle for the USER_CREATED consumer
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──declare──▶ Connected ──consume──▶ Consuming
//!      ▲                        │                      │                     │
//!      └──── wait interval ◀────┴───── any failure ────┴─────────────────────┘
//! ```
//!
//! Reconnects forever at a fixed interval. Each session declares the topology
//! again from scratch. At most `prefetch` deliveries are handled at once;
//! handlers still running when a session ends are awaited before the manager
//! reconnects or stops.

use event_bus::consumer_retry::RetryConfig;
use event_bus::{Broker, BrokerConnection, BusError, BusResult, Topology};
use futures::StreamExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};

use super::delivery::{DeliveryHandler, Disposition};
use crate::store::VehicleStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Not connected. `after_failure` is set once a session has failed and a
    /// reconnect is scheduled.
    Disconnected { after_failure: bool },
    Connecting,
    /// Connected and topology declared
    Connected,
    Consuming,
    Stopped,
}

impl ConsumerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumerState::Disconnected { after_failure: false } => "disconnected",
            ConsumerState::Disconnected { after_failure: true } => "reconnecting",
            ConsumerState::Connecting => "connecting",
            ConsumerState::Connected => "connected",
            ConsumerState::Consuming => "consuming",
            ConsumerState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Maximum unacknowledged deliveries, and maximum concurrent handlers
    pub prefetch: usize,
    /// Wait between a failed session and the next connect
    pub reconnect_interval: Duration,
    /// Redelivery policy for transient projection failures
    pub retry: RetryConfig,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            prefetch: 10,
            reconnect_interval: Duration::from_millis(3000),
            retry: RetryConfig::default(),
        }
    }
}

/// Handle to a running consumer
///
/// Dropping the handle without calling [`ConsumerHandle::shutdown`] also
/// stops the consumer, without waiting for it.
pub struct ConsumerHandle {
    state: watch::Receiver<ConsumerState>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition
    pub fn watch_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.clone()
    }

    /// Wait until the state satisfies `predicate`, returning that state
    pub async fn wait_for_state(
        &self,
        predicate: impl FnMut(&ConsumerState) -> bool,
    ) -> ConsumerState {
        let mut rx = self.state.clone();
        let reached = rx.wait_for(predicate).await.map(|state| *state);
        // Manager task is gone; report its last state
        reached.unwrap_or_else(|_| *rx.borrow())
    }

    /// Stop pulling, let in-flight deliveries settle, close the connection
    /// and wait for the manager to reach [`ConsumerState::Stopped`]
    pub async fn shutdown(self) {
        tracing::info!("Shutting down USER_CREATED consumer");
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "USER_CREATED consumer task failed");
        }
    }
}

/// Spawn the USER_CREATED consumer
///
/// Returns immediately; connecting happens in the background and the broker
/// does not need to be reachable yet.
pub fn start_user_created_consumer(
    broker: Arc<dyn Broker>,
    store: Arc<dyn VehicleStore>,
    topology: Topology,
    settings: ConsumerSettings,
) -> ConsumerHandle {
    let (state_tx, state_rx) = watch::channel(ConsumerState::Disconnected {
        after_failure: false,
    });
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let manager = ConsumerManager {
        broker,
        handler: Arc::new(DeliveryHandler::new(store, settings.retry.clone())),
        topology,
        settings,
        state: state_tx,
    };
    let task = tokio::spawn(manager.run(shutdown_rx));

    ConsumerHandle {
        state: state_rx,
        shutdown: shutdown_tx,
        task,
    }
}

struct ConsumerManager {
    broker: Arc<dyn Broker>,
    handler: Arc<DeliveryHandler>,
    topology: Topology,
    settings: ConsumerSettings,
    state: watch::Sender<ConsumerState>,
}

impl ConsumerManager {
    fn set_state(&self, next: ConsumerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(from = %previous, to = %next, "Consumer state changed");
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            queue = %self.topology.queue,
            prefetch = self.settings.prefetch,
            "Starting USER_CREATED consumer"
        );

        loop {
            self.set_state(ConsumerState::Connecting);

            match self.session(&mut shutdown).await {
                Ok(()) => break,
                Err(e) => {
                    self.set_state(ConsumerState::Disconnected {
                        after_failure: true,
                    });
                    tracing::error!(
                        error = %e,
                        retry_in_ms = self.settings.reconnect_interval.as_millis() as u64,
                        "USER_CREATED consumer connection failed"
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.reconnect_interval) => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }

        self.set_state(ConsumerState::Stopped);
        tracing::info!("USER_CREATED consumer stopped");
    }

    /// One connection's lifetime. `Ok` only when it ended because shutdown
    /// was requested.
    async fn session(&self, shutdown: &mut watch::Receiver<bool>) -> BusResult<()> {
        let connection = tokio::select! {
            connected = self.broker.connect() => connected?,
            _ = shutdown_requested(shutdown) => return Ok(()),
        };

        let result = self.consume(connection.as_ref(), shutdown).await;

        if let Err(e) = connection.close().await {
            tracing::debug!(error = %e, "Ignoring error while closing consumer connection");
        }
        result
    }

    async fn consume(
        &self,
        connection: &dyn BrokerConnection,
        shutdown: &mut watch::Receiver<bool>,
    ) -> BusResult<()> {
        connection.declare(&self.topology).await?;
        self.set_state(ConsumerState::Connected);

        let mut deliveries = connection
            .consume(&self.topology, self.settings.prefetch)
            .await?;
        self.set_state(ConsumerState::Consuming);
        tracing::info!(
            queue = %self.topology.queue,
            exchange = ?self.topology.exchange,
            routing_key = %self.topology.routing_key,
            "Consuming USER_CREATED"
        );

        let permits = Arc::new(Semaphore::new(self.settings.prefetch.max(1)));
        let mut in_flight = JoinSet::new();

        let ended = loop {
            let permit = tokio::select! {
                biased;
                _ = shutdown_requested(shutdown) => break Ok(()),
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break Ok(()),
                },
            };

            let next = tokio::select! {
                biased;
                _ = shutdown_requested(shutdown) => break Ok(()),
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    let handler = Arc::clone(&self.handler);
                    in_flight.spawn(async move {
                        let _permit = permit;
                        handler.handle(delivery).await
                    });
                }
                Some(Err(e)) => break Err(e),
                None => {
                    break Err(BusError::ConnectionLost(
                        "delivery stream ended".to_string(),
                    ))
                }
            }

            while let Some(joined) = in_flight.try_join_next() {
                log_handler_exit(joined);
            }
        };

        drop(deliveries);

        // A dead session must not look consumable while handlers drain
        if ended.is_err() {
            self.set_state(ConsumerState::Disconnected {
                after_failure: true,
            });
        }

        if !in_flight.is_empty() {
            tracing::info!(
                in_flight = in_flight.len(),
                "Waiting for in-flight deliveries to settle"
            );
        }
        while let Some(joined) = in_flight.join_next().await {
            log_handler_exit(joined);
        }

        ended
    }
}

/// Resolves once shutdown is requested or the handle is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn log_handler_exit(joined: Result<Disposition, JoinError>) {
    match joined {
        Ok(disposition) => tracing::trace!(?disposition, "Delivery handled"),
        // Panics are caught inside the handler; this is an aborted task
        Err(e) => tracing::error!(
            error = %e,
            "Delivery task aborted unsettled; redelivered once the session ends or the ack wait expires"
        ),
    }
}
