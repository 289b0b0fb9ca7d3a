//! Domain event types for patient record changes.
//!
//! - `PatientCreated`, `PatientUpdated`, `PatientDeleted` - the event payloads
//! - `DomainEvent` - closed union of the three, tagged by `EventType`
//! - `PatientEventType` - the wire name of each variant

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use time::{Date, OffsetDateTime};

use crate::error::{CoreError, Result};
use crate::id::generate_id;

// ============================================================================
// Event Type
// ============================================================================

/// Wire name of a patient event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatientEventType {
    #[serde(rename = "PatientCreated")]
    Created,
    #[serde(rename = "PatientUpdated")]
    Updated,
    #[serde(rename = "PatientDeleted")]
    Deleted,
}

impl PatientEventType {
    pub const ALL: [PatientEventType; 3] = [Self::Created, Self::Updated, Self::Deleted];

    /// Returns the string representation of the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            PatientEventType::Created => "PatientCreated",
            PatientEventType::Updated => "PatientUpdated",
            PatientEventType::Deleted => "PatientDeleted",
        }
    }
}

impl std::fmt::Display for PatientEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PatientEventType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PatientCreated" => Ok(Self::Created),
            "PatientUpdated" => Ok(Self::Updated),
            "PatientDeleted" => Ok(Self::Deleted),
            other => Err(CoreError::unknown_event_type(other)),
        }
    }
}

// ============================================================================
// Event Payloads
// ============================================================================

/// A patient record was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PatientCreated {
    pub event_id: String,
    pub patient_id: i64,
    #[serde(rename = "NHSNumber")]
    pub nhs_number: String,
    pub name: String,
    #[serde(with = "crate::datetime::date_format")]
    pub date_of_birth: Date,
    #[serde(rename = "GPPractice")]
    pub gp_practice: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A patient record was updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PatientUpdated {
    pub event_id: String,
    pub patient_id: i64,
    #[serde(rename = "NHSNumber")]
    pub nhs_number: String,
    pub name: String,
    #[serde(with = "crate::datetime::date_format")]
    pub date_of_birth: Date,
    #[serde(rename = "GPPractice")]
    pub gp_practice: String,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// A patient record was removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PatientDeleted {
    pub event_id: String,
    pub patient_id: i64,
    #[serde(rename = "NHSNumber")]
    pub nhs_number: String,
    pub name: String,
    #[serde(rename = "GPPractice")]
    pub gp_practice: String,
    #[serde(with = "time::serde::rfc3339")]
    pub deleted_at: OffsetDateTime,
}

// ============================================================================
// Domain Event
// ============================================================================

/// A typed patient event.
///
/// `event_id` is assigned once at construction and travels with the value,
/// so a retried publish of the same event keeps its identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "EventType")]
pub enum DomainEvent {
    #[serde(rename = "PatientCreated")]
    Created(PatientCreated),
    #[serde(rename = "PatientUpdated")]
    Updated(PatientUpdated),
    #[serde(rename = "PatientDeleted")]
    Deleted(PatientDeleted),
}

impl DomainEvent {
    pub fn created(
        patient_id: i64,
        nhs_number: impl Into<String>,
        name: impl Into<String>,
        date_of_birth: Date,
        gp_practice: impl Into<String>,
        created_at: OffsetDateTime,
    ) -> Self {
        Self::Created(PatientCreated {
            event_id: generate_id(),
            patient_id,
            nhs_number: nhs_number.into(),
            name: name.into(),
            date_of_birth,
            gp_practice: gp_practice.into(),
            created_at,
        })
    }

    pub fn updated(
        patient_id: i64,
        nhs_number: impl Into<String>,
        name: impl Into<String>,
        date_of_birth: Date,
        gp_practice: impl Into<String>,
        updated_at: OffsetDateTime,
    ) -> Self {
        Self::Updated(PatientUpdated {
            event_id: generate_id(),
            patient_id,
            nhs_number: nhs_number.into(),
            name: name.into(),
            date_of_birth,
            gp_practice: gp_practice.into(),
            updated_at,
        })
    }

    pub fn deleted(
        patient_id: i64,
        nhs_number: impl Into<String>,
        name: impl Into<String>,
        gp_practice: impl Into<String>,
        deleted_at: OffsetDateTime,
    ) -> Self {
        Self::Deleted(PatientDeleted {
            event_id: generate_id(),
            patient_id,
            nhs_number: nhs_number.into(),
            name: name.into(),
            gp_practice: gp_practice.into(),
            deleted_at,
        })
    }

    pub fn event_type(&self) -> PatientEventType {
        match self {
            Self::Created(_) => PatientEventType::Created,
            Self::Updated(_) => PatientEventType::Updated,
            Self::Deleted(_) => PatientEventType::Deleted,
        }
    }

    pub fn event_id(&self) -> &str {
        match self {
            Self::Created(e) => &e.event_id,
            Self::Updated(e) => &e.event_id,
            Self::Deleted(e) => &e.event_id,
        }
    }

    pub fn patient_id(&self) -> i64 {
        match self {
            Self::Created(e) => e.patient_id,
            Self::Updated(e) => e.patient_id,
            Self::Deleted(e) => e.patient_id,
        }
    }

    pub fn nhs_number(&self) -> &str {
        match self {
            Self::Created(e) => &e.nhs_number,
            Self::Updated(e) => &e.nhs_number,
            Self::Deleted(e) => &e.nhs_number,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Created(e) => &e.name,
            Self::Updated(e) => &e.name,
            Self::Deleted(e) => &e.name,
        }
    }

    pub fn gp_practice(&self) -> &str {
        match self {
            Self::Created(e) => &e.gp_practice,
            Self::Updated(e) => &e.gp_practice,
            Self::Deleted(e) => &e.gp_practice,
        }
    }

    /// Deleted events carry no date of birth.
    pub fn date_of_birth(&self) -> Option<Date> {
        match self {
            Self::Created(e) => Some(e.date_of_birth),
            Self::Updated(e) => Some(e.date_of_birth),
            Self::Deleted(_) => None,
        }
    }

    /// createdAt, updatedAt or deletedAt depending on the variant.
    pub fn timestamp(&self) -> OffsetDateTime {
        match self {
            Self::Created(e) => e.created_at,
            Self::Updated(e) => e.updated_at,
            Self::Deleted(e) => e.deleted_at,
        }
    }

    /// Serialize to the JSON body carried on the topic.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decode a message body as the given event type.
    ///
    /// The routing property decides the variant; an `EventType` field inside
    /// the body is ignored.
    pub fn decode_as(event_type: PatientEventType, body: &[u8]) -> Result<Self> {
        let event = match event_type {
            PatientEventType::Created => Self::Created(serde_json::from_slice(body)?),
            PatientEventType::Updated => Self::Updated(serde_json::from_slice(body)?),
            PatientEventType::Deleted => Self::Deleted(serde_json::from_slice(body)?),
        };
        Ok(event)
    }
}
