//! Counters for the event pipeline.
//!
//! Only the `metrics` facade is used; installing a recorder is left to the
//! embedding process.

use metrics::counter;
use patient_events_core::PublishSink;

/// Metric names as constants for consistency.
pub mod names {
    pub const PUBLISHED_TOTAL: &str = "patient_events_published_total";
    pub const PUBLISH_FAILURES_TOTAL: &str = "patient_events_publish_failures_total";
    pub const OUTBOX_ENQUEUED_TOTAL: &str = "patient_events_outbox_enqueued_total";
    pub const OUTBOX_EXHAUSTED_TOTAL: &str = "patient_events_outbox_exhausted_total";
    pub const CONSUMER_MESSAGES_TOTAL: &str = "patient_events_consumer_messages_total";
    pub const AUDIT_DUPLICATES_TOTAL: &str = "patient_events_audit_duplicates_total";
    pub const FEED_REJECTED_TOTAL: &str = "patient_events_feed_rejected_total";
}

pub fn record_published(sink: PublishSink) {
    counter!(names::PUBLISHED_TOTAL, "sink" => sink.as_str()).increment(1);
}

pub fn record_publish_failure(sink: PublishSink) {
    counter!(names::PUBLISH_FAILURES_TOTAL, "sink" => sink.as_str()).increment(1);
}

pub fn record_outbox_enqueued() {
    counter!(names::OUTBOX_ENQUEUED_TOTAL).increment(1);
}

pub fn record_outbox_exhausted() {
    counter!(names::OUTBOX_EXHAUSTED_TOTAL).increment(1);
}

pub fn record_consumer_message(subscription: &str, outcome: &'static str) {
    counter!(
        names::CONSUMER_MESSAGES_TOTAL,
        "subscription" => subscription.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_audit_duplicate() {
    counter!(names::AUDIT_DUPLICATES_TOTAL).increment(1);
}

pub fn record_feed_rejected(partition: &str) {
    counter!(names::FEED_REJECTED_TOTAL, "partition" => partition.to_string()).increment(1);
}
