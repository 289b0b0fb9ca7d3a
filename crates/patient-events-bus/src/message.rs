//! Topic messages and their received/dead-lettered forms.

use std::collections::BTreeMap;
use std::fmt;

use patient_events_core::DomainEvent;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Content type of every patient event body.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Routing property carrying the event type.
pub const EVENT_TYPE_PROPERTY: &str = "EventType";

/// Routing property carrying the patient id.
pub const PATIENT_ID_PROPERTY: &str = "PatientId";

/// Reason recorded when a message exhausts its delivery attempts.
pub const MAX_DELIVERY_COUNT_EXCEEDED: &str = "MaxDeliveryCountExceeded";

/// Application property value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Int(i64),
    String(String),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Int(_) => None,
        }
    }

    /// Integer value; numeric strings are accepted.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::String(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

/// A message sent to a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicMessage {
    pub message_id: String,
    pub subject: Option<String>,
    pub correlation_id: Option<String>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub properties: BTreeMap<String, PropertyValue>,
}

impl TopicMessage {
    pub fn new(message_id: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            message_id: message_id.into(),
            subject: None,
            correlation_id: None,
            content_type: None,
            body: body.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Build the topic message for a domain event.
    ///
    /// The body is the event JSON; `message_id` is the event id so that
    /// consumers can deduplicate redeliveries.
    pub fn for_event(event: &DomainEvent) -> patient_events_core::Result<Self> {
        let event_type = event.event_type().as_str();
        Ok(Self::new(event.event_id(), event.to_json()?)
            .with_subject(event_type)
            .with_correlation_id(event.patient_id().to_string())
            .with_content_type(JSON_CONTENT_TYPE)
            .with_property(EVENT_TYPE_PROPERTY, event_type)
            .with_property(PATIENT_ID_PROPERTY, event.patient_id()))
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// The `EventType` routing property rendered as a string, if present.
    pub fn event_type(&self) -> Option<String> {
        self.property(EVENT_TYPE_PROPERTY).map(ToString::to_string)
    }

    /// The `PatientId` routing property, if present and numeric.
    pub fn patient_id(&self) -> Option<i64> {
        self.property(PATIENT_ID_PROPERTY).and_then(PropertyValue::as_i64)
    }

    /// Body as UTF-8 text, lossily.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Opaque handle for a locked message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockToken(uuid::Uuid);

impl LockToken {
    pub(crate) fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message locked for processing by one receiver.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message: TopicMessage,
    pub lock_token: LockToken,
    /// 1 on first delivery, incremented on every redelivery.
    pub delivery_count: u32,
    pub sequence_number: u64,
    pub enqueued_at: OffsetDateTime,
}

impl std::ops::Deref for ReceivedMessage {
    type Target = TopicMessage;

    fn deref(&self) -> &Self::Target {
        &self.message
    }
}

/// A message moved to a subscription's dead-letter queue.
#[derive(Debug, Clone)]
pub struct DeadLetteredMessage {
    pub message: TopicMessage,
    pub reason: String,
    pub description: Option<String>,
    pub delivery_count: u32,
    pub sequence_number: u64,
    pub dead_lettered_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use patient_events_core::DomainEvent;
    use time::macros::{date, datetime};

    #[test]
    fn test_for_event_sets_envelope_fields() {
        let event = DomainEvent::created(
            1,
            "485 777 3456",
            "Sarah Johnson",
            date!(1985 - 03 - 15),
            "North Medical Centre",
            datetime!(2024-01-15 10:30:00 UTC),
        );

        let msg = TopicMessage::for_event(&event).unwrap();

        assert_eq!(msg.message_id, event.event_id());
        assert_eq!(msg.subject.as_deref(), Some("PatientCreated"));
        assert_eq!(msg.correlation_id.as_deref(), Some("1"));
        assert_eq!(msg.content_type.as_deref(), Some(JSON_CONTENT_TYPE));
        assert_eq!(msg.event_type().as_deref(), Some("PatientCreated"));
        assert_eq!(msg.patient_id(), Some(1));

        let body: serde_json::Value = serde_json::from_slice(&msg.body).unwrap();
        assert_eq!(body["EventId"], event.event_id());
    }

    #[test]
    fn test_property_values() {
        assert_eq!(PropertyValue::from("42").as_i64(), Some(42));
        assert_eq!(PropertyValue::from(42).to_string(), "42");
        assert_eq!(PropertyValue::from("x").as_i64(), None);
        assert_eq!(PropertyValue::from(7).as_str(), None);
    }

    #[test]
    fn test_missing_properties() {
        let msg = TopicMessage::new("m-1", b"{}".to_vec());
        assert_eq!(msg.event_type(), None);
        assert_eq!(msg.patient_id(), None);
        assert_eq!(msg.body_text(), "{}");
    }
}
