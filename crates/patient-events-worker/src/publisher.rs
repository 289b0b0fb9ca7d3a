//! Fan-out of domain events to the broadcast channel and the topic.

use std::fmt;

use patient_events_bus::{BroadcastPublisher, BusPool, TopicMessage, TopicSender, TransportError};
use patient_events_core::{BroadcastEvent, DomainEvent, PublishSink};
use tracing::{debug, warn};

use crate::metrics;

/// One sink that did not accept the event.
#[derive(Debug, Clone)]
pub struct SinkFailure {
    pub sink: PublishSink,
    pub error: TransportError,
}

impl fmt::Display for SinkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.sink, self.error)
    }
}

/// A publish that reached some sinks but not all of them.
#[derive(Debug, Clone, thiserror::Error)]
#[error("publish of event {event_id} failed on {}", describe(.failures))]
pub struct PublishError {
    pub event_id: String,
    pub failures: Vec<SinkFailure>,
}

impl PublishError {
    /// Sinks that still need the event.
    pub fn failed_sinks(&self) -> Vec<PublishSink> {
        let mut sinks: Vec<_> = self.failures.iter().map(|f| f.sink).collect();
        sinks.sort();
        sinks.dedup();
        sinks
    }

    /// Returns `true` if every failure is worth retrying.
    pub fn is_transient(&self) -> bool {
        self.failures.iter().all(|f| f.error.is_transient())
    }
}

fn describe(failures: &[SinkFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Publishes each event once per sink, checking a connection out of the pool
/// for every send.
pub struct EventPublisher {
    pool: BusPool,
    topic: String,
}

impl EventPublisher {
    pub fn new(pool: BusPool, topic: impl Into<String>) -> Self {
        Self {
            pool,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish to every sink.
    pub async fn publish(&self, event: &DomainEvent) -> Result<(), PublishError> {
        self.publish_to(event, &PublishSink::ALL).await
    }

    /// Publish to the given sinks only. Sends are independent: a failure on
    /// one sink does not stop the other.
    pub async fn publish_to(
        &self,
        event: &DomainEvent,
        sinks: &[PublishSink],
    ) -> Result<(), PublishError> {
        let mut failures = Vec::new();

        for &sink in sinks {
            let result = match sink {
                PublishSink::Broadcast => self.publish_broadcast(event).await,
                PublishSink::Topic => self.send_to_topic(event).await,
            };

            match result {
                Ok(()) => {
                    metrics::record_published(sink);
                    debug!(
                        event_id = %event.event_id(),
                        event_type = %event.event_type(),
                        patient_id = event.patient_id(),
                        sink = %sink,
                        "event published"
                    );
                }
                Err(error) => {
                    metrics::record_publish_failure(sink);
                    warn!(
                        event_id = %event.event_id(),
                        sink = %sink,
                        error = %error,
                        transient = error.is_transient(),
                        "event publish failed"
                    );
                    failures.push(SinkFailure { sink, error });
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(PublishError {
                event_id: event.event_id().to_string(),
                failures,
            })
        }
    }

    async fn publish_broadcast(&self, event: &DomainEvent) -> Result<(), TransportError> {
        let envelope = BroadcastEvent::from_event(event)?;
        let conn = self.pool.get().await?;
        conn.publish(envelope).await
    }

    async fn send_to_topic(&self, event: &DomainEvent) -> Result<(), TransportError> {
        let message = TopicMessage::for_event(event)?;
        let conn = self.pool.get().await?;
        conn.send(&self.topic, message).await
    }
}
