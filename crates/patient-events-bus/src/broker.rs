//! In-memory topic/subscription broker.
//!
//! Models the delivery contract of a durable pub/sub service:
//!
//! - every subscription on a topic gets its own copy of each matching message
//! - `receive` takes a peek-lock; the message stays invisible until it is
//!   settled or the lock expires
//! - an expired lock or an `abandon` makes the message visible again
//! - once `delivery_count` reaches `max_delivery_count`, a released message
//!   moves to the dead-letter queue with reason `MaxDeliveryCountExceeded`

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::message::{
    DeadLetteredMessage, LockToken, MAX_DELIVERY_COUNT_EXCEEDED, ReceivedMessage, TopicMessage,
};

// ============================================================================
// Subscription Options
// ============================================================================

/// Which messages a subscription accepts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionFilter {
    /// Every message
    #[default]
    All,
    /// Only messages whose `EventType` property is in the list
    EventTypes(Vec<String>),
}

impl SubscriptionFilter {
    pub fn matches(&self, message: &TopicMessage) -> bool {
        match self {
            Self::All => true,
            Self::EventTypes(types) => message
                .event_type()
                .is_some_and(|t| types.iter().any(|allowed| *allowed == t)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionOptions {
    pub max_delivery_count: u32,
    pub lock_duration: Duration,
    pub filter: SubscriptionFilter,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            max_delivery_count: 10,
            lock_duration: Duration::from_secs(30),
            filter: SubscriptionFilter::All,
        }
    }
}

/// Point-in-time counts for one subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Visible, waiting to be received
    pub active: usize,
    /// Currently locked by a receiver
    pub locked: usize,
    pub dead_lettered: usize,
}

// ============================================================================
// Broker
// ============================================================================

#[derive(Debug, Clone)]
struct Queued {
    message: TopicMessage,
    sequence_number: u64,
    delivery_count: u32,
    enqueued_at: OffsetDateTime,
}

#[derive(Debug)]
struct Locked {
    entry: Queued,
    locked_until: Instant,
}

#[derive(Debug)]
struct Subscription {
    options: SubscriptionOptions,
    queue: VecDeque<Queued>,
    locked: HashMap<LockToken, Locked>,
    dead_letters: Vec<DeadLetteredMessage>,
}

impl Subscription {
    fn new(options: SubscriptionOptions) -> Self {
        Self {
            options,
            queue: VecDeque::new(),
            locked: HashMap::new(),
            dead_letters: Vec::new(),
        }
    }

    /// Return a message to the queue, or dead-letter it if it has used up its deliveries.
    fn release(&mut self, entry: Queued) {
        if entry.delivery_count >= self.options.max_delivery_count {
            warn!(
                message_id = %entry.message.message_id,
                delivery_count = entry.delivery_count,
                "max delivery count reached, dead-lettering message"
            );
            let description = format!(
                "Message could not be processed after {} delivery attempts",
                self.options.max_delivery_count
            );
            self.push_dead_letter(entry, MAX_DELIVERY_COUNT_EXCEEDED, Some(description));
            return;
        }
        // keep the queue in sequence order so a released message is next
        let position = self
            .queue
            .iter()
            .position(|queued| queued.sequence_number > entry.sequence_number)
            .unwrap_or(self.queue.len());
        self.queue.insert(position, entry);
    }

    fn push_dead_letter(&mut self, entry: Queued, reason: &str, description: Option<String>) {
        self.dead_letters.push(DeadLetteredMessage {
            message: entry.message,
            reason: reason.to_string(),
            description,
            delivery_count: entry.delivery_count,
            sequence_number: entry.sequence_number,
            dead_lettered_at: OffsetDateTime::now_utc(),
        });
    }

    fn release_expired(&mut self, now: Instant) {
        let expired: Vec<LockToken> = self
            .locked
            .iter()
            .filter(|(_, locked)| locked.locked_until <= now)
            .map(|(token, _)| *token)
            .collect();
        for token in expired {
            if let Some(locked) = self.locked.remove(&token) {
                debug!(
                    message_id = %locked.entry.message.message_id,
                    "message lock expired"
                );
                self.release(locked.entry);
            }
        }
    }

    /// Take a live lock, or fail with `LockLost` if it expired or was already settled.
    fn take_lock(&mut self, token: &LockToken) -> Result<Queued, TransportError> {
        let locked = self
            .locked
            .remove(token)
            .ok_or_else(|| TransportError::LockLost(token.to_string()))?;
        if locked.locked_until <= Instant::now() {
            self.release(locked.entry);
            return Err(TransportError::LockLost(token.to_string()));
        }
        Ok(locked.entry)
    }
}

#[derive(Debug, Default)]
struct Topic {
    subscriptions: HashMap<String, Subscription>,
    next_sequence: u64,
}

/// In-process broker holding every topic and subscription.
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    topics: Mutex<HashMap<String, Topic>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a topic; a no-op if it exists.
    pub fn create_topic(&self, topic: &str) {
        self.topics.lock().entry(topic.to_string()).or_default();
    }

    /// Create a subscription, creating its topic if needed.
    ///
    /// An existing subscription keeps its original options and messages.
    pub fn create_subscription(&self, topic: &str, name: &str, options: SubscriptionOptions) {
        let mut topics = self.topics.lock();
        let topic = topics.entry(topic.to_string()).or_default();
        topic
            .subscriptions
            .entry(name.to_string())
            .or_insert_with(|| Subscription::new(options));
    }

    /// Copy a message into every matching subscription.
    ///
    /// Returns the number of subscriptions that accepted it.
    pub fn send(&self, topic_name: &str, message: TopicMessage) -> Result<usize, TransportError> {
        let mut topics = self.topics.lock();
        let topic = topics
            .get_mut(topic_name)
            .ok_or_else(|| TransportError::TopicNotFound(topic_name.to_string()))?;

        topic.next_sequence += 1;
        let sequence_number = topic.next_sequence;
        let enqueued_at = OffsetDateTime::now_utc();

        let mut accepted = 0;
        for subscription in topic.subscriptions.values_mut() {
            if !subscription.options.filter.matches(&message) {
                continue;
            }
            subscription.queue.push_back(Queued {
                message: message.clone(),
                sequence_number,
                delivery_count: 0,
                enqueued_at,
            });
            accepted += 1;
        }
        Ok(accepted)
    }

    /// Lock and return the next visible message.
    pub fn receive(
        &self,
        topic: &str,
        subscription: &str,
    ) -> Result<Option<ReceivedMessage>, TransportError> {
        self.with_subscription(topic, subscription, |sub| {
            let now = Instant::now();
            sub.release_expired(now);

            let Some(mut entry) = sub.queue.pop_front() else {
                return Ok(None);
            };
            entry.delivery_count += 1;

            let lock_token = LockToken::new();
            let received = ReceivedMessage {
                message: entry.message.clone(),
                lock_token,
                delivery_count: entry.delivery_count,
                sequence_number: entry.sequence_number,
                enqueued_at: entry.enqueued_at,
            };
            sub.locked.insert(
                lock_token,
                Locked {
                    entry,
                    locked_until: now + sub.options.lock_duration,
                },
            );
            Ok(Some(received))
        })
    }

    /// Remove a locked message for good.
    pub fn complete(
        &self,
        topic: &str,
        subscription: &str,
        lock_token: &LockToken,
    ) -> Result<(), TransportError> {
        self.with_subscription(topic, subscription, |sub| {
            sub.take_lock(lock_token).map(|_| ())
        })
    }

    /// Release a locked message for redelivery.
    pub fn abandon(
        &self,
        topic: &str,
        subscription: &str,
        lock_token: &LockToken,
    ) -> Result<(), TransportError> {
        self.with_subscription(topic, subscription, |sub| {
            let entry = sub.take_lock(lock_token)?;
            sub.release(entry);
            Ok(())
        })
    }

    /// Move a locked message to the dead-letter queue.
    pub fn dead_letter(
        &self,
        topic: &str,
        subscription: &str,
        lock_token: &LockToken,
        reason: &str,
        description: Option<&str>,
    ) -> Result<(), TransportError> {
        self.with_subscription(topic, subscription, |sub| {
            let entry = sub.take_lock(lock_token)?;
            sub.push_dead_letter(entry, reason, description.map(str::to_string));
            Ok(())
        })
    }

    /// Snapshot of a subscription's dead-letter queue, oldest first.
    pub fn dead_letters(
        &self,
        topic: &str,
        subscription: &str,
    ) -> Result<Vec<DeadLetteredMessage>, TransportError> {
        self.with_subscription(topic, subscription, |sub| Ok(sub.dead_letters.clone()))
    }

    pub fn stats(&self, topic: &str, subscription: &str) -> Result<SubscriptionStats, TransportError> {
        self.with_subscription(topic, subscription, |sub| {
            sub.release_expired(Instant::now());
            Ok(SubscriptionStats {
                active: sub.queue.len(),
                locked: sub.locked.len(),
                dead_lettered: sub.dead_letters.len(),
            })
        })
    }

    fn with_subscription<T>(
        &self,
        topic: &str,
        subscription: &str,
        f: impl FnOnce(&mut Subscription) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let mut topics = self.topics.lock();
        let sub = topics
            .get_mut(topic)
            .ok_or_else(|| TransportError::TopicNotFound(topic.to_string()))?
            .subscriptions
            .get_mut(subscription)
            .ok_or_else(|| TransportError::subscription_not_found(topic, subscription))?;
        f(sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::EVENT_TYPE_PROPERTY;

    const TOPIC: &str = "patient-events";

    fn message(id: &str, event_type: &str) -> TopicMessage {
        TopicMessage::new(id, b"{}".to_vec()).with_property(EVENT_TYPE_PROPERTY, event_type)
    }

    fn broker_with(subscriptions: &[(&str, SubscriptionOptions)]) -> InMemoryBroker {
        let broker = InMemoryBroker::new();
        broker.create_topic(TOPIC);
        for (name, options) in subscriptions {
            broker.create_subscription(TOPIC, name, options.clone());
        }
        broker
    }

    #[test]
    fn test_send_fans_out_to_every_subscription() {
        let broker = broker_with(&[
            ("audit-logs", SubscriptionOptions::default()),
            ("email-notifications", SubscriptionOptions::default()),
        ]);

        assert_eq!(broker.send(TOPIC, message("m-1", "PatientCreated")).unwrap(), 2);

        let a = broker.receive(TOPIC, "audit-logs").unwrap().unwrap();
        let b = broker.receive(TOPIC, "email-notifications").unwrap().unwrap();
        assert_eq!(a.message_id, "m-1");
        assert_eq!(b.message_id, "m-1");
        assert_eq!(a.delivery_count, 1);
    }

    #[test]
    fn test_send_to_missing_topic_fails() {
        let broker = InMemoryBroker::new();
        let err = broker.send("nope", message("m-1", "PatientCreated")).unwrap_err();
        assert!(matches!(err, TransportError::TopicNotFound(_)));
    }

    #[test]
    fn test_filter_limits_subscription() {
        let broker = broker_with(&[(
            "deletions",
            SubscriptionOptions {
                filter: SubscriptionFilter::EventTypes(vec!["PatientDeleted".into()]),
                ..Default::default()
            },
        )]);

        assert_eq!(broker.send(TOPIC, message("m-1", "PatientCreated")).unwrap(), 0);
        assert_eq!(broker.send(TOPIC, message("m-2", "PatientDeleted")).unwrap(), 1);
        let received = broker.receive(TOPIC, "deletions").unwrap().unwrap();
        assert_eq!(received.message_id, "m-2");
    }

    #[test]
    fn test_locked_message_is_invisible_until_settled() {
        let broker = broker_with(&[("audit-logs", SubscriptionOptions::default())]);
        broker.send(TOPIC, message("m-1", "PatientCreated")).unwrap();

        let received = broker.receive(TOPIC, "audit-logs").unwrap().unwrap();
        assert!(broker.receive(TOPIC, "audit-logs").unwrap().is_none());
        assert_eq!(broker.stats(TOPIC, "audit-logs").unwrap().locked, 1);

        broker.complete(TOPIC, "audit-logs", &received.lock_token).unwrap();
        let stats = broker.stats(TOPIC, "audit-logs").unwrap();
        assert_eq!(stats, SubscriptionStats::default());
    }

    #[test]
    fn test_settling_twice_is_lock_lost() {
        let broker = broker_with(&[("audit-logs", SubscriptionOptions::default())]);
        broker.send(TOPIC, message("m-1", "PatientCreated")).unwrap();

        let received = broker.receive(TOPIC, "audit-logs").unwrap().unwrap();
        broker.complete(TOPIC, "audit-logs", &received.lock_token).unwrap();
        let err = broker
            .complete(TOPIC, "audit-logs", &received.lock_token)
            .unwrap_err();
        assert!(err.is_lock_lost());
    }

    #[test]
    fn test_abandon_redelivers_then_dead_letters() {
        let broker = broker_with(&[(
            "audit-logs",
            SubscriptionOptions {
                max_delivery_count: 3,
                ..Default::default()
            },
        )]);
        broker.send(TOPIC, message("m-1", "PatientCreated")).unwrap();

        for attempt in 1..=3 {
            let received = broker.receive(TOPIC, "audit-logs").unwrap().unwrap();
            assert_eq!(received.delivery_count, attempt);
            broker.abandon(TOPIC, "audit-logs", &received.lock_token).unwrap();
        }

        assert!(broker.receive(TOPIC, "audit-logs").unwrap().is_none());
        let dead = broker.dead_letters(TOPIC, "audit-logs").unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].reason, MAX_DELIVERY_COUNT_EXCEEDED);
        assert_eq!(dead[0].delivery_count, 3);
    }

    #[test]
    fn test_explicit_dead_letter_keeps_reason() {
        let broker = broker_with(&[("audit-logs", SubscriptionOptions::default())]);
        broker.send(TOPIC, message("m-1", "PatientCreated")).unwrap();

        let received = broker.receive(TOPIC, "audit-logs").unwrap().unwrap();
        broker
            .dead_letter(
                TOPIC,
                "audit-logs",
                &received.lock_token,
                "AuditLoggingError",
                Some("bad body"),
            )
            .unwrap();

        let dead = broker.dead_letters(TOPIC, "audit-logs").unwrap();
        assert_eq!(dead[0].reason, "AuditLoggingError");
        assert_eq!(dead[0].description.as_deref(), Some("bad body"));
    }

    #[test]
    fn test_abandoned_message_keeps_its_place() {
        let broker = broker_with(&[("audit-logs", SubscriptionOptions::default())]);
        broker.send(TOPIC, message("m-1", "PatientCreated")).unwrap();
        broker.send(TOPIC, message("m-2", "PatientUpdated")).unwrap();

        let first = broker.receive(TOPIC, "audit-logs").unwrap().unwrap();
        broker.abandon(TOPIC, "audit-logs", &first.lock_token).unwrap();

        let again = broker.receive(TOPIC, "audit-logs").unwrap().unwrap();
        assert_eq!(again.message_id, "m-1");
        assert_eq!(again.delivery_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lock_is_redelivered() {
        let broker = broker_with(&[(
            "audit-logs",
            SubscriptionOptions {
                lock_duration: Duration::from_secs(5),
                ..Default::default()
            },
        )]);
        broker.send(TOPIC, message("m-1", "PatientCreated")).unwrap();

        let first = broker.receive(TOPIC, "audit-logs").unwrap().unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;

        let second = broker.receive(TOPIC, "audit-logs").unwrap().unwrap();
        assert_eq!(second.message_id, "m-1");
        assert_eq!(second.delivery_count, 2);

        let err = broker
            .complete(TOPIC, "audit-logs", &first.lock_token)
            .unwrap_err();
        assert!(err.is_lock_lost());
        broker.complete(TOPIC, "audit-logs", &second.lock_token).unwrap();
    }
}
