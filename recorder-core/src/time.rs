//! Fixed timestamp format and half-open window arithmetic.
//!
//! Schedules are booked in local wall-clock time using `HH:mm dd/MM/yyyy`.
//! Windows are half-open: `[start, end)`.

use std::sync::OnceLock;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use regex::Regex;
use thiserror::Error;

pub const TIMESTAMP_FORMAT: &str = "%H:%M %d/%m/%Y";

fn timestamp_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[0-9]{2}:[0-9]{2} [0-9]{2}/[0-9]{2}/[0-9]{4}$").expect("valid regex")
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid timestamp {value:?}: expected HH:mm dd/MM/yyyy")]
pub struct TimestampError {
    pub value: String,
}

/// Parses a strictly zero-padded `HH:mm dd/MM/yyyy` value.
pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime, TimestampError> {
    if !timestamp_pattern().is_match(value) {
        return Err(TimestampError {
            value: value.to_string(),
        });
    }
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT).map_err(|_| TimestampError {
        value: value.to_string(),
    })
}

pub fn format_timestamp(value: NaiveDateTime) -> String {
    value.format(TIMESTAMP_FORMAT).to_string()
}

pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

pub fn to_chrono(duration: Duration) -> chrono::Duration {
    let millis = duration.as_millis().min(i64::MAX as u128) as i64;
    chrono::Duration::milliseconds(millis)
}

/// Whole seconds from `now` until `target`, floored at zero.
pub fn seconds_until(target: NaiveDateTime, now: NaiveDateTime) -> u64 {
    (target - now).num_seconds().max(0) as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Window {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, other: &Window) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Started strictly before `now` and not yet over.
    pub fn is_ongoing(&self, now: NaiveDateTime) -> bool {
        self.start < now && now < self.end
    }

    pub fn starts_within(&self, now: NaiveDateTime, lookahead: Duration) -> bool {
        now < self.start && self.start < now + to_chrono(lookahead)
    }

    pub fn has_ended(&self, now: NaiveDateTime) -> bool {
        now > self.end
    }

    pub fn ends_after(&self, instant: NaiveDateTime) -> bool {
        self.end > instant
    }
}

/// Serde adapter that renders `NaiveDateTime` in the schedule format.
pub mod schedule_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_timestamp(*value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}
