//! Outbox relay: retries the sinks an event did not reach.

use std::sync::Arc;
use std::time::Duration;

use patient_events_core::{DomainEvent, now_utc};
use patient_events_storage::{DynOutboxStore, OutboxEntry, StorageError};
use time::{OffsetDateTime, PrimitiveDateTime};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::OutboxConfig;
use crate::metrics;
use crate::publisher::{EventPublisher, PublishError};

/// Doubling retry delay, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn from_config(config: &OutboxConfig) -> Self {
        Self::new(config.base_backoff(), config.max_backoff())
    }

    /// `base * 2^attempts`, never more than `max`.
    pub fn delay(&self, attempts: u32) -> Duration {
        self.base
            .saturating_mul(2u32.checked_pow(attempts).unwrap_or(u32::MAX))
            .min(self.max)
    }

    /// When the next attempt is due after `attempts` failures.
    ///
    /// A delay past the end of the calendar pins the entry to the latest
    /// representable time.
    pub fn next_attempt_at(&self, now: OffsetDateTime, attempts: u32) -> OffsetDateTime {
        time::Duration::try_from(self.delay(attempts))
            .ok()
            .and_then(|delay| now.checked_add(delay))
            .unwrap_or_else(|| PrimitiveDateTime::MAX.assume_utc())
    }
}

/// Record a partially failed publish so the relay can finish it.
pub async fn defer(
    outbox: &DynOutboxStore,
    event: DomainEvent,
    failure: &PublishError,
    backoff: Backoff,
) -> Result<(), StorageError> {
    let pending = failure.failed_sinks();
    let entry = OutboxEntry::new(
        event,
        pending,
        failure.to_string(),
        backoff.next_attempt_at(now_utc(), 0),
    );
    let event_id = entry.id.clone();
    outbox.enqueue(entry).await?;
    metrics::record_outbox_enqueued();
    warn!(
        event_id = %event_id,
        sinks = ?failure.failed_sinks(),
        "event stored in outbox for retry"
    );
    Ok(())
}

/// Outcome of one relay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    /// Entries that reached every pending sink and were removed
    pub delivered: usize,
    /// Entries rescheduled after another failure
    pub retried: usize,
    /// Entries that ran out of attempts
    pub failed: usize,
}

impl RelayReport {
    pub fn is_empty(&self) -> bool {
        self.delivered == 0 && self.retried == 0 && self.failed == 0
    }
}

pub struct OutboxRelay {
    outbox: DynOutboxStore,
    publisher: Arc<EventPublisher>,
    backoff: Backoff,
    max_attempts: u32,
    poll_interval: Duration,
    batch_size: usize,
}

impl OutboxRelay {
    pub fn new(outbox: DynOutboxStore, publisher: Arc<EventPublisher>, config: &OutboxConfig) -> Self {
        Self {
            outbox,
            publisher,
            backoff: Backoff::from_config(config),
            max_attempts: config.max_attempts,
            poll_interval: config.poll_interval(),
            batch_size: config.batch_size,
        }
    }

    /// Poll for due entries until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            max_attempts = self.max_attempts,
            "Outbox relay started"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.process_due(self.batch_size).await {
                Ok(report) if !report.is_empty() => {
                    info!(
                        delivered = report.delivered,
                        retried = report.retried,
                        failed = report.failed,
                        "Outbox relay pass complete"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Outbox relay pass failed"),
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("Outbox relay shutting down");
    }

    /// Retry up to `limit` due entries once.
    pub async fn process_due(&self, limit: usize) -> Result<RelayReport, StorageError> {
        let due = self.outbox.due(now_utc(), limit).await?;
        let mut report = RelayReport::default();

        for mut entry in due {
            match self
                .publisher
                .publish_to(&entry.event, &entry.pending_sinks)
                .await
            {
                Ok(()) => {
                    self.outbox.remove(&entry.id).await?;
                    report.delivered += 1;
                    info!(
                        event_id = %entry.id,
                        attempts = entry.attempts + 1,
                        "outbox entry delivered"
                    );
                }
                Err(err) => {
                    let next_attempt_at = self
                        .backoff
                        .next_attempt_at(now_utc(), entry.attempts.saturating_add(1));
                    entry.record_failure(err.failed_sinks(), err.to_string(), next_attempt_at);

                    if entry.attempts >= self.max_attempts {
                        entry.mark_failed();
                        report.failed += 1;
                        metrics::record_outbox_exhausted();
                        error!(
                            event_id = %entry.id,
                            attempts = entry.attempts,
                            sinks = ?entry.pending_sinks,
                            error = %err,
                            "outbox entry exhausted its attempts; left for inspection"
                        );
                    } else {
                        report.retried += 1;
                        warn!(
                            event_id = %entry.id,
                            attempts = entry.attempts,
                            error = %err,
                            "outbox retry failed; rescheduled"
                        );
                    }
                    self.outbox.update(entry).await?;
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(60));
        assert_eq!(backoff.delay(0), Duration::from_millis(500));
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(3), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_is_capped() {
        let backoff = Backoff::new(Duration::from_secs(60), Duration::from_secs(300));
        assert_eq!(backoff.delay(2), Duration::from_secs(240));
        assert_eq!(backoff.delay(3), Duration::from_secs(300));
        assert_eq!(backoff.delay(40), Duration::from_secs(300));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(300));
        assert_eq!(Backoff::new(Duration::ZERO, Duration::ZERO).delay(10), Duration::ZERO);
    }

    #[test]
    fn test_late_attempts_schedule_without_overflow() {
        let now = now_utc();
        let backoff = Backoff::new(Duration::from_secs(60), Duration::from_secs(300));
        assert_eq!(
            backoff.next_attempt_at(now, 40),
            now + time::Duration::seconds(300)
        );

        let unbounded = Backoff::new(Duration::from_secs(60), Duration::MAX);
        let at = unbounded.next_attempt_at(now, 40);
        assert_eq!(at, PrimitiveDateTime::MAX.assume_utc());
        assert!(at > now);
    }

    #[test]
    fn test_backoff_from_config() {
        let config = OutboxConfig {
            base_backoff_ms: 250,
            max_backoff_ms: 1_000,
            ..OutboxConfig::default()
        };
        let backoff = Backoff::from_config(&config);
        assert_eq!(backoff.delay(1), Duration::from_millis(500));
        assert_eq!(backoff.delay(5), Duration::from_secs(1));
    }
}
