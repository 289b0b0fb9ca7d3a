//! Subscription consumers.
//!
//! [`SubscriptionConsumer`] owns the receive, dispatch and settle loop; the
//! [`MessageHandler`] plugged into it decides what a message means.

pub mod audit;
pub mod handler;
pub mod notify;

pub use audit::{AUDIT_DEAD_LETTER_REASON, AuditHandler};
pub use handler::{Handled, HandlerError, MessageHandler};
pub use notify::{NOTIFY_DEAD_LETTER_REASON, NotificationHandler};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use patient_events_bus::{
    BusPool, PooledConnection, ReceivedMessage, SubscriptionReceiver, TransportError,
};
use patient_events_core::{DomainEvent, PatientEventType};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics;

/// What happened to one received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Completed,
    /// Completed; the handler had already seen this event
    Duplicate,
    /// Completed through the fallback handler
    UnknownType(String),
    DeadLettered {
        reason: String,
        description: String,
    },
    /// Released for redelivery after a transient failure
    Abandoned {
        error: String,
    },
}

impl MessageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Duplicate => "duplicate",
            Self::UnknownType(_) => "unknown_type",
            Self::DeadLettered { .. } => "dead_lettered",
            Self::Abandoned { .. } => "abandoned",
        }
    }

    /// Returns `true` if the message was removed from the subscription
    /// without dead-lettering.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed | Self::Duplicate | Self::UnknownType(_))
    }
}

/// Snapshot of a consumer's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub completed: u64,
    pub duplicates: u64,
    pub unknown: u64,
    pub dead_lettered: u64,
    pub abandoned: u64,
}

impl ConsumerStats {
    pub fn total(&self) -> u64 {
        self.completed + self.duplicates + self.unknown + self.dead_lettered + self.abandoned
    }
}

#[derive(Default)]
struct StatsCounters {
    completed: AtomicU64,
    duplicates: AtomicU64,
    unknown: AtomicU64,
    dead_lettered: AtomicU64,
    abandoned: AtomicU64,
}

impl StatsCounters {
    fn record(&self, outcome: &MessageOutcome) {
        let counter = match outcome {
            MessageOutcome::Completed => &self.completed,
            MessageOutcome::Duplicate => &self.duplicates,
            MessageOutcome::UnknownType(_) => &self.unknown,
            MessageOutcome::DeadLettered { .. } => &self.dead_lettered,
            MessageOutcome::Abandoned { .. } => &self.abandoned,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ConsumerStats {
        ConsumerStats {
            completed: self.completed.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub topic: String,
    pub subscription: String,
    /// Receive loops run by [`SubscriptionConsumer::run`]
    pub concurrency: usize,
    pub idle_backoff: Duration,
}

/// Receives from one subscription and settles each message according to
/// what its handler returns.
pub struct SubscriptionConsumer<H> {
    pool: BusPool,
    handler: H,
    settings: ConsumerSettings,
    stats: StatsCounters,
}

impl<H: MessageHandler + 'static> SubscriptionConsumer<H> {
    pub fn new(pool: BusPool, handler: H, settings: ConsumerSettings) -> Self {
        Self {
            pool,
            handler,
            settings,
            stats: StatsCounters::default(),
        }
    }

    pub fn subscription(&self) -> &str {
        &self.settings.subscription
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats.snapshot()
    }

    /// Run `concurrency` receive loops until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            subscription = %self.settings.subscription,
            concurrency = self.settings.concurrency,
            "Subscription consumer started"
        );

        let mut loops = JoinSet::new();
        for worker in 0..self.settings.concurrency.max(1) {
            loops.spawn(self.clone().receive_loop(worker, cancel.clone()));
        }
        while let Some(result) = loops.join_next().await {
            if let Err(e) = result {
                error!(subscription = %self.settings.subscription, error = %e, "receive loop panicked");
            }
        }

        info!(subscription = %self.settings.subscription, "Subscription consumer shutting down");
    }

    async fn receive_loop(self: Arc<Self>, worker: usize, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            let idle = match self.process_one().await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(e) => {
                    error!(
                        subscription = %self.settings.subscription,
                        worker,
                        error = %e,
                        "receive failed"
                    );
                    true
                }
            };

            if idle {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.settings.idle_backoff) => {}
                }
            }
        }
    }

    /// Receive, dispatch and settle one message.
    ///
    /// Returns `Ok(None)` when the subscription is empty. The pooled
    /// connection is returned when this call ends, on every path.
    pub async fn process_one(&self) -> Result<Option<MessageOutcome>, TransportError> {
        let conn = self.pool.get().await?;
        let Some(received) = conn
            .receive(&self.settings.topic, &self.settings.subscription)
            .await?
        else {
            return Ok(None);
        };

        debug!(
            subscription = %self.settings.subscription,
            message_id = %received.message_id,
            delivery_count = received.delivery_count,
            "message received"
        );

        let outcome = self.dispatch(&received).await;
        self.settle(&conn, &received, &outcome).await?;

        self.stats.record(&outcome);
        metrics::record_consumer_message(&self.settings.subscription, outcome.as_str());
        Ok(Some(outcome))
    }

    async fn dispatch(&self, received: &ReceivedMessage) -> MessageOutcome {
        let type_name = received.event_type().unwrap_or_default();

        let Ok(event_type) = type_name.parse::<PatientEventType>() else {
            return self.dispatch_unknown(type_name, received).await;
        };

        let event = match DomainEvent::decode_as(event_type, &received.body) {
            Ok(event) => event,
            Err(e) => {
                return MessageOutcome::DeadLettered {
                    reason: self.handler.dead_letter_reason().to_string(),
                    description: format!("failed to decode {type_name} body: {e}"),
                };
            }
        };

        match self.handler.handle(event, &received.message).await {
            Ok(Handled::Processed) => MessageOutcome::Completed,
            Ok(Handled::Duplicate) => MessageOutcome::Duplicate,
            Err(HandlerError::Transient(error)) => MessageOutcome::Abandoned { error },
            Err(HandlerError::Permanent(description)) => MessageOutcome::DeadLettered {
                reason: self.handler.dead_letter_reason().to_string(),
                description,
            },
        }
    }

    async fn dispatch_unknown(&self, type_name: String, received: &ReceivedMessage) -> MessageOutcome {
        warn!(
            subscription = %self.settings.subscription,
            message_id = %received.message_id,
            "Unknown event type: {type_name}"
        );

        match self.handler.handle_unknown(&type_name, &received.message).await {
            Ok(()) => MessageOutcome::UnknownType(type_name),
            Err(HandlerError::Transient(error)) => MessageOutcome::Abandoned { error },
            Err(HandlerError::Permanent(error)) => {
                // Unknown types are never dead-lettered.
                error!(
                    subscription = %self.settings.subscription,
                    message_id = %received.message_id,
                    error = %error,
                    "fallback handler failed; completing anyway"
                );
                MessageOutcome::UnknownType(type_name)
            }
        }
    }

    async fn settle(
        &self,
        conn: &PooledConnection,
        received: &ReceivedMessage,
        outcome: &MessageOutcome,
    ) -> Result<(), TransportError> {
        let topic = &self.settings.topic;
        let subscription = &self.settings.subscription;
        let token = &received.lock_token;

        match outcome {
            MessageOutcome::Completed
            | MessageOutcome::Duplicate
            | MessageOutcome::UnknownType(_) => conn.complete(topic, subscription, token).await,
            MessageOutcome::DeadLettered {
                reason,
                description,
            } => {
                error!(
                    subscription = %subscription,
                    message_id = %received.message_id,
                    reason = %reason,
                    description = %description,
                    "dead-lettering message"
                );
                conn.dead_letter(topic, subscription, token, reason, description)
                    .await
            }
            MessageOutcome::Abandoned { error } => {
                warn!(
                    subscription = %subscription,
                    message_id = %received.message_id,
                    delivery_count = received.delivery_count,
                    error = %error,
                    "abandoning message for redelivery"
                );
                conn.abandon(topic, subscription, token).await
            }
        }
    }
}
