//! Mutation records read from the change feed, and their classification.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::{Date, OffsetDateTime};

use crate::datetime::{parse_date, parse_datetime};
use crate::error::DecodeError;
use crate::events::DomainEvent;

/// Outcome of classifying a mutation. Deletions never come from the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Created,
    Updated,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Updated => "updated",
        }
    }
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of a changed patient document.
///
/// Identity fields are decoded strictly. Timestamps are kept as `None` when
/// absent or malformed so that classification can fall back to `Updated`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub patient_id: i64,
    pub nhs_number: String,
    pub name: String,
    pub date_of_birth: Date,
    pub gp_practice: String,
    pub created_at: Option<OffsetDateTime>,
    pub updated_at: Option<OffsetDateTime>,
}

impl MutationRecord {
    /// Decode a raw change-feed document.
    pub fn decode(doc: &Value) -> Result<Self, DecodeError> {
        let obj = doc.as_object().ok_or(DecodeError::NotAnObject)?;

        let patient_id = match required(obj, "patientId")? {
            Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| DecodeError::invalid_field("patientId", "expected an integer"))?,
            _ => return Err(DecodeError::invalid_field("patientId", "expected an integer")),
        };

        let date_of_birth = parse_date(required_str(obj, "dateOfBirth")?)
            .map_err(|e| DecodeError::invalid_field("dateOfBirth", e.to_string()))?;

        Ok(Self {
            patient_id,
            nhs_number: required_str(obj, "nhsNumber")?.to_string(),
            name: required_str(obj, "name")?.to_string(),
            date_of_birth,
            gp_practice: required_str(obj, "gpPractice")?.to_string(),
            created_at: lenient_timestamp(obj, "createdAt", patient_id),
            updated_at: lenient_timestamp(obj, "updatedAt", patient_id),
        })
    }

    /// Classify the mutation.
    ///
    /// Equal createdAt and updatedAt means the document was just inserted.
    /// This cannot spot an update that left updatedAt untouched.
    pub fn classify(&self) -> ChangeKind {
        match (self.created_at, self.updated_at) {
            (Some(created), Some(updated)) if created == updated => ChangeKind::Created,
            _ => ChangeKind::Updated,
        }
    }

    /// Partition key of the source document.
    pub fn partition_key(&self) -> &str {
        &self.gp_practice
    }

    /// Build the domain event for this mutation, assigning a fresh event id.
    pub fn into_event(self, kind: ChangeKind) -> DomainEvent {
        match kind {
            ChangeKind::Created => {
                // classify() only yields Created when both timestamps are present
                let created_at = self
                    .created_at
                    .or(self.updated_at)
                    .unwrap_or_else(OffsetDateTime::now_utc);
                DomainEvent::created(
                    self.patient_id,
                    self.nhs_number,
                    self.name,
                    self.date_of_birth,
                    self.gp_practice,
                    created_at,
                )
            }
            ChangeKind::Updated => {
                let updated_at = self.updated_at.unwrap_or_else(|| {
                    tracing::warn!(
                        patient_id = self.patient_id,
                        "updatedAt missing or malformed, stamping update with current time"
                    );
                    OffsetDateTime::now_utc()
                });
                DomainEvent::updated(
                    self.patient_id,
                    self.nhs_number,
                    self.name,
                    self.date_of_birth,
                    self.gp_practice,
                    updated_at,
                )
            }
        }
    }
}

/// A patient removal, delivered outside the change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionNotice {
    pub patient_id: i64,
    pub nhs_number: String,
    pub name: String,
    pub gp_practice: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
}

impl DeletionNotice {
    /// Build the deletion event; `deleted_at` defaults to now.
    pub fn into_event(self) -> DomainEvent {
        DomainEvent::deleted(
            self.patient_id,
            self.nhs_number,
            self.name,
            self.gp_practice,
            self.deleted_at.unwrap_or_else(OffsetDateTime::now_utc),
        )
    }
}

fn required<'a>(obj: &'a Map<String, Value>, field: &str) -> Result<&'a Value, DecodeError> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(DecodeError::missing_field(field)),
        Some(value) => Ok(value),
    }
}

fn required_str<'a>(obj: &'a Map<String, Value>, field: &str) -> Result<&'a str, DecodeError> {
    required(obj, field)?
        .as_str()
        .ok_or_else(|| DecodeError::invalid_field(field, "expected a string"))
}

fn lenient_timestamp(obj: &Map<String, Value>, field: &str, patient_id: i64) -> Option<OffsetDateTime> {
    let raw = obj.get(field)?.as_str()?;
    match parse_datetime(raw) {
        Ok(dt) => Some(dt),
        Err(e) => {
            tracing::debug!(patient_id, field, error = %e, "ignoring malformed timestamp");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::PatientEventType;
    use serde_json::json;
    use time::macros::{date, datetime};

    fn document(created_at: &str, updated_at: &str) -> Value {
        json!({
            "id": "doc-1",
            "patientId": 1,
            "nhsNumber": "485 777 3456",
            "name": "Sarah Johnson",
            "dateOfBirth": "1985-03-15T00:00:00",
            "gpPractice": "North Medical Centre",
            "createdAt": created_at,
            "updatedAt": updated_at,
        })
    }

    #[test]
    fn test_decode_full_document() {
        let record =
            MutationRecord::decode(&document("2024-01-15T10:30:00Z", "2024-01-15T10:30:00Z"))
                .unwrap();

        assert_eq!(record.patient_id, 1);
        assert_eq!(record.nhs_number, "485 777 3456");
        assert_eq!(record.date_of_birth, date!(1985 - 03 - 15));
        assert_eq!(record.partition_key(), "North Medical Centre");
        assert_eq!(record.created_at, Some(datetime!(2024-01-15 10:30:00 UTC)));
    }

    #[test]
    fn test_equal_timestamps_classify_as_created() {
        let record =
            MutationRecord::decode(&document("2024-01-15T10:30:00", "2024-01-15T10:30:00Z"))
                .unwrap();
        assert_eq!(record.classify(), ChangeKind::Created);
    }

    #[test]
    fn test_different_timestamps_classify_as_updated() {
        let record =
            MutationRecord::decode(&document("2024-01-15T10:30:00Z", "2024-02-01T09:00:00Z"))
                .unwrap();
        assert_eq!(record.classify(), ChangeKind::Updated);

        // updatedAt earlier than createdAt is still just "not equal"
        let record =
            MutationRecord::decode(&document("2024-02-01T09:00:00Z", "2024-01-15T10:30:00Z"))
                .unwrap();
        assert_eq!(record.classify(), ChangeKind::Updated);
    }

    #[test]
    fn test_malformed_timestamp_defaults_to_updated() {
        let record = MutationRecord::decode(&document("not a date", "not a date")).unwrap();
        assert_eq!(record.created_at, None);
        assert_eq!(record.classify(), ChangeKind::Updated);

        let mut doc = document("2024-01-15T10:30:00Z", "2024-01-15T10:30:00Z");
        doc.as_object_mut().unwrap().remove("updatedAt");
        let record = MutationRecord::decode(&doc).unwrap();
        assert_eq!(record.classify(), ChangeKind::Updated);
    }

    #[test]
    fn test_decode_rejects_missing_identity_fields() {
        let mut doc = document("2024-01-15T10:30:00Z", "2024-01-15T10:30:00Z");
        doc.as_object_mut().unwrap().remove("nhsNumber");
        assert_eq!(
            MutationRecord::decode(&doc),
            Err(DecodeError::missing_field("nhsNumber"))
        );

        let mut doc = document("2024-01-15T10:30:00Z", "2024-01-15T10:30:00Z");
        doc["patientId"] = json!("one");
        assert!(matches!(
            MutationRecord::decode(&doc),
            Err(DecodeError::InvalidField { field, .. }) if field == "patientId"
        ));

        assert_eq!(
            MutationRecord::decode(&json!([1, 2, 3])),
            Err(DecodeError::NotAnObject)
        );
    }

    #[test]
    fn test_into_event_uses_variant_timestamp() {
        let record =
            MutationRecord::decode(&document("2024-01-15T10:30:00Z", "2024-02-01T09:00:00Z"))
                .unwrap();
        let kind = record.classify();
        let event = record.into_event(kind);

        assert_eq!(event.event_type(), PatientEventType::Updated);
        assert_eq!(event.timestamp(), datetime!(2024-02-01 09:00:00 UTC));
        assert_eq!(event.date_of_birth(), Some(date!(1985 - 03 - 15)));
    }

    #[test]
    fn test_deletion_notice_defaults_to_now() {
        let before = OffsetDateTime::now_utc();
        let notice: DeletionNotice = serde_json::from_value(json!({
            "patientId": 9,
            "nhsNumber": "999 999 9999",
            "name": "Jane Doe",
            "gpPractice": "East Clinic",
        }))
        .unwrap();
        let event = notice.into_event();

        assert_eq!(event.event_type(), PatientEventType::Deleted);
        assert!(event.timestamp() >= before);
    }
}
