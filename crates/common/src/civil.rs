// Civil date/time handling for session scheduling.
//
// Session times are entered by members as a calendar date plus an `HH:MM`
// wall-clock time and carry no timezone; the whole group is assumed to share
// one ambient local time. Instants derived here are therefore
// `NaiveDateTime`s — comparable within a group, not across zones.
//
// Parsing is strict on purpose: the upstream inputs are free-form client
// strings, and a typo must surface as a rejection rather than propagate as a
// nonsense instant.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemporalError {
    #[error("date component is missing or empty")]
    MissingDate,
    #[error("time component is missing or empty")]
    MissingTime,
    #[error("invalid calendar date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("invalid time of day '{0}', expected HH:MM")]
    InvalidTime(String),
    #[error("session must end after it starts")]
    EmptyRange,
}

/// A calendar-date input: either a pre-formatted ISO string or an
/// already-structured date.
#[derive(Debug, Clone, Copy)]
pub enum DateInput<'a> {
    Iso(&'a str),
    Calendar(NaiveDate),
}

impl<'a> From<&'a str> for DateInput<'a> {
    fn from(value: &'a str) -> Self {
        Self::Iso(value)
    }
}

impl From<NaiveDate> for DateInput<'_> {
    fn from(value: NaiveDate) -> Self {
        Self::Calendar(value)
    }
}

/// Combine a calendar date and an `HH:MM` time-of-day into a civil instant.
///
/// Rejects absent or malformed components instead of letting them collapse
/// into a bogus timestamp downstream.
pub fn to_instant<'a>(
    date: impl Into<DateInput<'a>>,
    time: &str,
) -> Result<NaiveDateTime, TemporalError> {
    let date = match date.into() {
        DateInput::Iso(raw) => parse_date(raw)?,
        DateInput::Calendar(date) => date,
    };
    let time = parse_time(time)?;

    Ok(date.and_time(time))
}

/// Parse a strict `YYYY-MM-DD` calendar date.
pub fn parse_date(raw: &str) -> Result<NaiveDate, TemporalError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(TemporalError::MissingDate);
    }
    // chrono accepts unpadded fields; require the canonical 10-char form.
    if raw.len() != 10 {
        return Err(TemporalError::InvalidDate(raw.to_string()));
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| TemporalError::InvalidDate(raw.to_string()))
}

/// Parse a strict `HH:MM` time of day.
pub fn parse_time(raw: &str) -> Result<NaiveTime, TemporalError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(TemporalError::MissingTime);
    }

    let invalid = || TemporalError::InvalidTime(raw.to_string());

    let (hour, minute) = raw.split_once(':').ok_or_else(invalid)?;
    if hour.len() != 2 || minute.len() != 2 {
        return Err(invalid());
    }

    let hour: u32 = hour.parse().map_err(|_| invalid())?;
    let minute: u32 = minute.parse().map_err(|_| invalid())?;

    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid)
}
