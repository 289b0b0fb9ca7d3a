use crate::error::{CoreError, Result};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

const DATE_FORMAT: &[time::format_description::FormatItem<'static>] =
    format_description!("[year]-[month]-[day]");

const NAIVE_DATETIME_FORMAT: &[time::format_description::FormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second][optional [.[subsecond]]]"
);

pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Parse a document timestamp.
///
/// Accepts RFC 3339 with an offset, or a naive `YYYY-MM-DDTHH:MM:SS[.fff]`
/// value which is taken to be UTC (the form the document store writes).
pub fn parse_datetime(s: &str) -> Result<OffsetDateTime> {
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc3339) {
        return Ok(dt);
    }
    PrimitiveDateTime::parse(s, NAIVE_DATETIME_FORMAT)
        .map(PrimitiveDateTime::assume_utc)
        .map_err(|e| CoreError::invalid_date_time(format!("Failed to parse date/time '{s}': {e}")))
}

/// Parse a calendar date. A full timestamp is accepted and truncated to its date part.
pub fn parse_date(s: &str) -> Result<Date> {
    let head = s.get(..10).unwrap_or(s);
    Date::parse(head, DATE_FORMAT)
        .map_err(|e| CoreError::invalid_date_time(format!("Failed to parse date '{s}': {e}")))
}

pub fn format_rfc3339(dt: &OffsetDateTime) -> Result<String> {
    Ok(dt.format(&Rfc3339)?)
}

pub fn format_date(date: &Date) -> Result<String> {
    Ok(date.format(DATE_FORMAT)?)
}

/// Serde adapter for `YYYY-MM-DD` dates.
pub mod date_format {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    pub fn serialize<S>(date: &Date, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let formatted = super::format_date(date).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&formatted)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Date, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_date(&s).map_err(serde::de::Error::custom)
    }
}
