//! Transport client traits and their in-process implementations.

use std::sync::Arc;

use async_trait::async_trait;
use patient_events_core::{BroadcastEvent, EventBroadcaster};
use tracing::debug;

use crate::broker::InMemoryBroker;
use crate::error::TransportError;
use crate::message::{LockToken, ReceivedMessage, TopicMessage};

/// Publishes envelopes to the broadcast channel.
#[async_trait]
pub trait BroadcastPublisher: Send + Sync {
    async fn publish(&self, event: BroadcastEvent) -> Result<(), TransportError>;
}

/// Sends messages to a topic.
#[async_trait]
pub trait TopicSender: Send + Sync {
    async fn send(&self, topic: &str, message: TopicMessage) -> Result<(), TransportError>;
}

/// Receives and settles messages on a subscription.
#[async_trait]
pub trait SubscriptionReceiver: Send + Sync {
    /// Lock the next message, or `None` if the subscription is empty.
    async fn receive(
        &self,
        topic: &str,
        subscription: &str,
    ) -> Result<Option<ReceivedMessage>, TransportError>;

    async fn complete(
        &self,
        topic: &str,
        subscription: &str,
        lock_token: &LockToken,
    ) -> Result<(), TransportError>;

    async fn abandon(
        &self,
        topic: &str,
        subscription: &str,
        lock_token: &LockToken,
    ) -> Result<(), TransportError>;

    async fn dead_letter(
        &self,
        topic: &str,
        subscription: &str,
        lock_token: &LockToken,
        reason: &str,
        description: &str,
    ) -> Result<(), TransportError>;
}

#[async_trait]
impl TopicSender for InMemoryBroker {
    async fn send(&self, topic: &str, message: TopicMessage) -> Result<(), TransportError> {
        let message_id = message.message_id.clone();
        let accepted = InMemoryBroker::send(self, topic, message)?;
        debug!(topic, message_id = %message_id, subscriptions = accepted, "sent topic message");
        Ok(())
    }
}

#[async_trait]
impl SubscriptionReceiver for InMemoryBroker {
    async fn receive(
        &self,
        topic: &str,
        subscription: &str,
    ) -> Result<Option<ReceivedMessage>, TransportError> {
        InMemoryBroker::receive(self, topic, subscription)
    }

    async fn complete(
        &self,
        topic: &str,
        subscription: &str,
        lock_token: &LockToken,
    ) -> Result<(), TransportError> {
        InMemoryBroker::complete(self, topic, subscription, lock_token)
    }

    async fn abandon(
        &self,
        topic: &str,
        subscription: &str,
        lock_token: &LockToken,
    ) -> Result<(), TransportError> {
        InMemoryBroker::abandon(self, topic, subscription, lock_token)
    }

    async fn dead_letter(
        &self,
        topic: &str,
        subscription: &str,
        lock_token: &LockToken,
        reason: &str,
        description: &str,
    ) -> Result<(), TransportError> {
        InMemoryBroker::dead_letter(self, topic, subscription, lock_token, reason, Some(description))
    }
}

/// Broadcast publisher backed by the in-process [`EventBroadcaster`].
///
/// A send with no listeners succeeds; broadcast delivery is best-effort.
#[derive(Debug, Clone)]
pub struct LocalBroadcastPublisher {
    broadcaster: Arc<EventBroadcaster>,
}

impl LocalBroadcastPublisher {
    pub fn new(broadcaster: Arc<EventBroadcaster>) -> Self {
        Self { broadcaster }
    }

    pub fn broadcaster(&self) -> &Arc<EventBroadcaster> {
        &self.broadcaster
    }
}

#[async_trait]
impl BroadcastPublisher for LocalBroadcastPublisher {
    async fn publish(&self, event: BroadcastEvent) -> Result<(), TransportError> {
        let id = event.id.clone();
        let subscribers = self.broadcaster.send(event);
        debug!(event_id = %id, subscribers, "broadcast event");
        Ok(())
    }
}
