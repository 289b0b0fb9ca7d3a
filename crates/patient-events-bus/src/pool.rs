//! Connection pool for transport clients.
//!
//! One [`BusPool`] serves the whole process. Each operation checks out a
//! [`BusConnection`]; the handle goes back to the pool when the `Object`
//! drops, whichever way the operation exits. A connection that saw a broken
//! link is discarded on recycle instead of being reused.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use deadpool::managed::{self, Metrics, RecycleError, RecycleResult};
use patient_events_core::BroadcastEvent;
use tracing::debug;

use crate::error::TransportError;
use crate::message::{LockToken, ReceivedMessage, TopicMessage};
use crate::transport::{BroadcastPublisher, SubscriptionReceiver, TopicSender};

/// The process-wide pool type.
pub type BusPool = managed::Pool<BusManager>;

/// A checked-out connection; returned to the pool on drop.
pub type PooledConnection = managed::Object<BusManager>;

/// The underlying transport clients a pool hands out connections to.
#[derive(Clone)]
pub struct BusClients {
    pub broadcast: Arc<dyn BroadcastPublisher>,
    pub sender: Arc<dyn TopicSender>,
    pub receiver: Arc<dyn SubscriptionReceiver>,
}

/// deadpool manager creating [`BusConnection`]s over shared clients.
pub struct BusManager {
    clients: BusClients,
    next_id: AtomicU64,
}

impl BusManager {
    pub fn new(clients: BusClients) -> Self {
        Self {
            clients,
            next_id: AtomicU64::new(1),
        }
    }
}

impl std::fmt::Debug for BusManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusManager")
            .field("created", &(self.next_id.load(Ordering::Relaxed) - 1))
            .finish()
    }
}

impl managed::Manager for BusManager {
    type Type = BusConnection;
    type Error = TransportError;

    async fn create(&self) -> Result<BusConnection, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(connection = id, "opening bus connection");
        Ok(BusConnection {
            id,
            clients: self.clients.clone(),
            broken: AtomicBool::new(false),
        })
    }

    async fn recycle(
        &self,
        conn: &mut BusConnection,
        _metrics: &Metrics,
    ) -> RecycleResult<TransportError> {
        if conn.is_broken() {
            debug!(connection = conn.id, "discarding broken bus connection");
            return Err(RecycleError::Message("connection marked broken".into()));
        }
        Ok(())
    }
}

/// Build the pool.
pub fn build_pool(clients: BusClients, max_size: usize) -> Result<BusPool, TransportError> {
    managed::Pool::builder(BusManager::new(clients))
        .max_size(max_size)
        .build()
        .map_err(|e| TransportError::Pool(e.to_string()))
}

/// One logical connection to the transport.
pub struct BusConnection {
    id: u64,
    clients: BusClients,
    broken: AtomicBool,
}

impl BusConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Relaxed)
    }

    fn observe<T>(&self, result: Result<T, TransportError>) -> Result<T, TransportError> {
        if let Err(e) = &result
            && e.is_connection_broken()
        {
            self.broken.store(true, Ordering::Relaxed);
        }
        result
    }
}

impl std::fmt::Debug for BusConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusConnection")
            .field("id", &self.id)
            .field("broken", &self.is_broken())
            .finish()
    }
}

#[async_trait]
impl BroadcastPublisher for BusConnection {
    async fn publish(&self, event: BroadcastEvent) -> Result<(), TransportError> {
        self.observe(self.clients.broadcast.publish(event).await)
    }
}

#[async_trait]
impl TopicSender for BusConnection {
    async fn send(&self, topic: &str, message: TopicMessage) -> Result<(), TransportError> {
        self.observe(self.clients.sender.send(topic, message).await)
    }
}

#[async_trait]
impl SubscriptionReceiver for BusConnection {
    async fn receive(
        &self,
        topic: &str,
        subscription: &str,
    ) -> Result<Option<ReceivedMessage>, TransportError> {
        self.observe(self.clients.receiver.receive(topic, subscription).await)
    }

    async fn complete(
        &self,
        topic: &str,
        subscription: &str,
        lock_token: &LockToken,
    ) -> Result<(), TransportError> {
        self.observe(
            self.clients
                .receiver
                .complete(topic, subscription, lock_token)
                .await,
        )
    }

    async fn abandon(
        &self,
        topic: &str,
        subscription: &str,
        lock_token: &LockToken,
    ) -> Result<(), TransportError> {
        self.observe(
            self.clients
                .receiver
                .abandon(topic, subscription, lock_token)
                .await,
        )
    }

    async fn dead_letter(
        &self,
        topic: &str,
        subscription: &str,
        lock_token: &LockToken,
        reason: &str,
        description: &str,
    ) -> Result<(), TransportError> {
        self.observe(
            self.clients
                .receiver
                .dead_letter(topic, subscription, lock_token, reason, description)
                .await,
        )
    }
}
