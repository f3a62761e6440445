//! In-memory implementation of the broker seam for testing and development

use crate::{
    Acker, Broker, BrokerConnection, BusError, BusMessage, BusResult, Delivery, DeliveryStream,
    Settlement, Topology,
};
use async_trait::async_trait;
use futures::stream::StreamExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Broker that keeps durable queues in process memory
///
/// Models the parts of a real broker the consumer depends on:
/// - declare-if-absent queues capturing one or more subjects
/// - per-session prefetch (unacked deliveries per consumer)
/// - ack / requeue-with-delay / reject per delivery, with delivery counters
/// - in-flight deliveries return to the queue when their session goes away
/// - an availability switch to simulate outages
///
/// Clones share the same broker state.
///
/// # Example
/// ```rust
/// use event_bus::{Broker, InMemoryBroker, Topology};
/// use futures::StreamExt;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = InMemoryBroker::new();
/// let topology = Topology::default();
/// let connection = broker.connect().await?;
/// connection.declare(&topology).await?;
/// connection.publish("user.created", b"hello".to_vec()).await?;
///
/// let mut deliveries = connection.consume(&topology, 1).await?;
/// let delivery = deliveries.next().await.unwrap()?;
/// assert_eq!(delivery.message.payload, b"hello");
/// delivery.ack().await?;
/// assert_eq!(broker.acked(&topology), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<State>,
    changed: Notify,
}

struct State {
    available: bool,
    next_session: u64,
    live_sessions: HashSet<u64>,
    connects: usize,
    queues: HashMap<String, Queue>,
}

#[derive(Default)]
struct Queue {
    subjects: Vec<String>,
    pending: VecDeque<Stored>,
    in_flight: HashMap<u64, InFlight>,
    delayed: usize,
    acked: usize,
    rejected: Vec<BusMessage>,
    next_id: u64,
    max_in_flight: usize,
}

struct Stored {
    id: u64,
    message: BusMessage,
    deliveries: u32,
}

struct InFlight {
    stored: Stored,
    session: u64,
}

enum Next {
    Deliver(Delivery),
    Idle,
    Closed(BusError),
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    available: true,
                    next_session: 0,
                    live_sessions: HashSet::new(),
                    connects: 0,
                    queues: HashMap::new(),
                }),
                changed: Notify::new(),
            }),
        }
    }

    /// Take the broker offline (severing every session) or bring it back
    pub fn set_available(&self, available: bool) {
        self.shared.lock().available = available;
        if !available {
            self.sever_connections();
        }
    }

    /// Drop every live session, as a network partition would. In-flight
    /// deliveries go back to the front of their queue.
    pub fn sever_connections(&self) {
        {
            let mut state = self.shared.lock();
            let sessions: Vec<u64> = state.live_sessions.drain().collect();
            for session in sessions {
                state.release_session(session);
            }
        }
        self.shared.changed.notify_waiters();
    }

    /// Number of successful connects so far
    pub fn connect_count(&self) -> usize {
        self.shared.lock().connects
    }

    /// Messages waiting to be delivered (delayed requeues included)
    pub fn pending(&self, topology: &Topology) -> usize {
        self.with_queue(topology, |q| q.pending.len() + q.delayed)
    }

    /// Delivered but not yet settled
    pub fn in_flight(&self, topology: &Topology) -> usize {
        self.with_queue(topology, |q| q.in_flight.len())
    }

    pub fn acked(&self, topology: &Topology) -> usize {
        self.with_queue(topology, |q| q.acked)
    }

    pub fn rejected(&self, topology: &Topology) -> Vec<BusMessage> {
        self.with_queue(topology, |q| q.rejected.clone())
    }

    /// High-water mark of unsettled deliveries on the queue
    pub fn max_in_flight(&self, topology: &Topology) -> usize {
        self.with_queue(topology, |q| q.max_in_flight)
    }

    /// True once nothing is pending, delayed or in flight
    pub fn is_drained(&self, topology: &Topology) -> bool {
        self.with_queue(topology, |q| {
            q.pending.is_empty() && q.delayed == 0 && q.in_flight.is_empty()
        })
    }

    fn with_queue<T: Default>(&self, topology: &Topology, f: impl FnOnce(&Queue) -> T) -> T {
        self.shared
            .lock()
            .queues
            .get(&topology.stream_name())
            .map(f)
            .unwrap_or_default()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_delivery(self: &Arc<Self>, queue_name: &str, session: u64, prefetch: usize) -> Next {
        let mut state = self.lock();
        if !state.live_sessions.contains(&session) {
            return Next::Closed(BusError::ConnectionLost("session closed".to_string()));
        }
        let Some(queue) = state.queues.get_mut(queue_name) else {
            return Next::Closed(BusError::ConnectionLost(format!("queue {queue_name} is gone")));
        };

        let held = queue
            .in_flight
            .values()
            .filter(|f| f.session == session)
            .count();
        if held >= prefetch {
            return Next::Idle;
        }
        let Some(mut stored) = queue.pending.pop_front() else {
            return Next::Idle;
        };

        stored.deliveries += 1;
        let id = stored.id;
        let attempt = stored.deliveries;
        let message = stored.message.clone();
        queue.in_flight.insert(id, InFlight { stored, session });
        queue.max_in_flight = queue.max_in_flight.max(queue.in_flight.len());

        let acker = InMemoryAcker {
            shared: self.clone(),
            queue: queue_name.to_string(),
            id,
            session,
        };
        Next::Deliver(Delivery::new(message, attempt, Box::new(acker)))
    }

    fn requeue_later(&self, queue_name: &str, stored: Stored) {
        {
            let mut state = self.lock();
            if let Some(queue) = state.queues.get_mut(queue_name) {
                queue.delayed = queue.delayed.saturating_sub(1);
                queue.pending.push_back(stored);
            }
        }
        self.changed.notify_waiters();
    }
}

impl State {
    fn release_session(&mut self, session: u64) {
        self.live_sessions.remove(&session);
        for queue in self.queues.values_mut() {
            let ids: Vec<u64> = queue
                .in_flight
                .iter()
                .filter(|(_, f)| f.session == session)
                .map(|(id, _)| *id)
                .collect();
            let mut returned: Vec<Stored> = ids
                .into_iter()
                .filter_map(|id| queue.in_flight.remove(&id))
                .map(|f| f.stored)
                .collect();
            returned.sort_by_key(|s| s.id);
            for stored in returned.into_iter().rev() {
                queue.pending.push_front(stored);
            }
        }
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn connect(&self) -> BusResult<Box<dyn BrokerConnection>> {
        let mut state = self.shared.lock();
        if !state.available {
            return Err(BusError::BrokerUnavailable(
                "in-memory broker is offline".to_string(),
            ));
        }

        state.next_session += 1;
        let session = state.next_session;
        state.live_sessions.insert(session);
        state.connects += 1;

        Ok(Box::new(InMemoryConnection {
            shared: self.shared.clone(),
            session,
        }))
    }
}

struct InMemoryConnection {
    shared: Arc<Shared>,
    session: u64,
}

impl InMemoryConnection {
    fn ensure_live(&self, state: &State) -> BusResult<()> {
        if state.live_sessions.contains(&self.session) {
            Ok(())
        } else {
            Err(BusError::ConnectionLost("session closed".to_string()))
        }
    }
}

#[async_trait]
impl BrokerConnection for InMemoryConnection {
    async fn declare(&self, topology: &Topology) -> BusResult<()> {
        let mut state = self.shared.lock();
        self.ensure_live(&state)?;

        let queue = state.queues.entry(topology.stream_name()).or_default();
        for subject in topology.subjects() {
            if !queue.subjects.contains(&subject) {
                queue.subjects.push(subject);
            }
        }
        Ok(())
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BusResult<()> {
        {
            let mut state = self.shared.lock();
            self.ensure_live(&state)?;

            let queue = state
                .queues
                .values_mut()
                .find(|q| q.subjects.iter().any(|s| s == subject))
                .ok_or_else(|| {
                    BusError::PublishError(format!("no queue captures subject {subject}"))
                })?;

            queue.next_id += 1;
            let id = queue.next_id;
            queue.pending.push_back(Stored {
                id,
                message: BusMessage::new(subject.to_string(), payload),
                deliveries: 0,
            });
        }
        self.shared.changed.notify_waiters();
        Ok(())
    }

    async fn consume(&self, topology: &Topology, prefetch: usize) -> BusResult<DeliveryStream> {
        let queue_name = topology.stream_name();
        {
            let state = self.shared.lock();
            self.ensure_live(&state)?;
            if !state.queues.contains_key(&queue_name) {
                return Err(BusError::SubscribeError(format!(
                    "queue {queue_name} is not declared"
                )));
            }
        }

        let shared = self.shared.clone();
        let session = self.session;
        let prefetch = prefetch.max(1);

        let stream = async_stream::stream! {
            loop {
                // Register interest before checking state so a wakeup between
                // the check and the await is not lost
                let notified = shared.changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                match shared.next_delivery(&queue_name, session, prefetch) {
                    Next::Deliver(delivery) => {
                        yield Ok(delivery);
                    }
                    Next::Closed(e) => {
                        yield Err(e);
                        break;
                    }
                    Next::Idle => notified.await,
                }
            }
        };

        Ok(stream.boxed())
    }

    async fn close(&self) -> BusResult<()> {
        self.shared.lock().release_session(self.session);
        self.shared.changed.notify_waiters();
        Ok(())
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        self.shared.lock().release_session(self.session);
        self.shared.changed.notify_waiters();
    }
}

struct InMemoryAcker {
    shared: Arc<Shared>,
    queue: String,
    id: u64,
    session: u64,
}

#[async_trait]
impl Acker for InMemoryAcker {
    async fn settle(&self, settlement: Settlement) -> BusResult<()> {
        {
            let mut state = self.shared.lock();
            if !state.live_sessions.contains(&self.session) {
                return Err(BusError::AckError("session closed".to_string()));
            }
            let queue = state
                .queues
                .get_mut(&self.queue)
                .ok_or_else(|| BusError::AckError(format!("queue {} is gone", self.queue)))?;
            let in_flight = queue.in_flight.remove(&self.id).ok_or_else(|| {
                BusError::AckError(format!("delivery {} is not in flight", self.id))
            })?;

            match settlement {
                Settlement::Ack => queue.acked += 1,
                Settlement::Reject => queue.rejected.push(in_flight.stored.message),
                Settlement::Requeue(delay) if delay.is_zero() => {
                    queue.pending.push_back(in_flight.stored)
                }
                Settlement::Requeue(delay) => {
                    queue.delayed += 1;
                    let shared = self.shared.clone();
                    let queue_name = self.queue.clone();
                    let stored = in_flight.stored;
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        shared.requeue_later(&queue_name, stored);
                    });
                }
            }
        }
        self.shared.changed.notify_waiters();
        Ok(())
    }
}
