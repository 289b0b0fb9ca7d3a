//! Broadcast envelope for patient events.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::types::{DomainEvent, PatientEventType};
use crate::error::Result;

/// Schema version stamped on every broadcast envelope.
pub const DATA_VERSION: &str = "1.0";

/// Subject used for a patient's broadcast events.
pub fn patient_subject(patient_id: i64) -> String {
    format!("/patients/{patient_id}")
}

/// Event published on the broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastEvent {
    /// Same as the domain event's id
    pub id: String,
    pub subject: String,
    pub event_type: PatientEventType,
    pub data_version: String,
    /// The serialized domain event
    pub data: serde_json::Value,
    #[serde(with = "time::serde::rfc3339")]
    pub event_time: OffsetDateTime,
}

impl BroadcastEvent {
    pub fn from_event(event: &DomainEvent) -> Result<Self> {
        Ok(Self {
            id: event.event_id().to_string(),
            subject: patient_subject(event.patient_id()),
            event_type: event.event_type(),
            data_version: DATA_VERSION.to_string(),
            data: event.to_value()?,
            event_time: OffsetDateTime::now_utc(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    #[test]
    fn test_broadcast_envelope_mirrors_event() {
        let event = DomainEvent::updated(
            42,
            "943 476 5919",
            "Ada Lovelace",
            date!(1990 - 12 - 10),
            "Riverside Practice",
            datetime!(2024-03-01 08:15:00 UTC),
        );

        let envelope = BroadcastEvent::from_event(&event).unwrap();

        assert_eq!(envelope.id, event.event_id());
        assert_eq!(envelope.subject, "/patients/42");
        assert_eq!(envelope.event_type, PatientEventType::Updated);
        assert_eq!(envelope.data_version, "1.0");
        assert_eq!(envelope.data["PatientId"], 42);
    }

    #[test]
    fn test_broadcast_envelope_wire_names() {
        let event = DomainEvent::deleted(
            3,
            "123",
            "Name",
            "Practice",
            datetime!(2024-03-01 08:15:00 UTC),
        );
        let value = serde_json::to_value(BroadcastEvent::from_event(&event).unwrap()).unwrap();

        assert_eq!(value["eventType"], "PatientDeleted");
        assert_eq!(value["dataVersion"], "1.0");
        assert!(value.get("eventTime").is_some());
    }
}
