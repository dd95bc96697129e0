//! Wall-clock timestamps in UTC nanoseconds, as stored in the catalog

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const NANOS_PER_SEC: i64 = 1_000_000_000;
const NANOS_PER_MILLI: i64 = 1_000_000;
const SECS_PER_DAY: i64 = 24 * 3600;

/// Point in time with nanosecond precision (nanoseconds since Unix epoch)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp {
    nanos: i64,
}

impl Timestamp {
    /// Create a timestamp from nanoseconds since Unix epoch
    pub fn from_nanos(nanos: i64) -> Self {
        Self { nanos }
    }

    /// Create a timestamp from seconds since Unix epoch
    pub fn from_secs(secs: i64) -> Self {
        Self {
            nanos: secs.saturating_mul(NANOS_PER_SEC),
        }
    }

    /// Get current timestamp
    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    pub fn as_nanos(&self) -> i64 {
        self.nanos
    }

    pub fn as_secs(&self) -> i64 {
        self.nanos.div_euclid(NANOS_PER_SEC)
    }

    /// Timestamp `days` whole days before this one, saturating at the
    /// bottom of the representable range.
    pub fn days_before(&self, days: u32) -> Self {
        let span = i64::from(days)
            .saturating_mul(SECS_PER_DAY)
            .saturating_mul(NANOS_PER_SEC);
        Self {
            nanos: self.nanos.saturating_sub(span),
        }
    }

    /// Timestamp shifted forward by a duration in milliseconds
    pub fn add_millis(&self, millis: i64) -> Self {
        Self {
            nanos: self.nanos.saturating_add(millis.saturating_mul(NANOS_PER_MILLI)),
        }
    }

    /// Convert to chrono DateTime
    pub fn to_datetime(&self) -> DateTime<Utc> {
        let subsec = self.nanos.rem_euclid(NANOS_PER_SEC) as u32;
        DateTime::from_timestamp(self.as_secs(), subsec).unwrap_or_default()
    }

    /// UTC calendar day this timestamp falls on
    pub fn utc_day(&self) -> NaiveDate {
        self.to_datetime().date_naive()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime().to_rfc3339())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self {
            nanos: dt.timestamp_nanos_opt().unwrap_or(0),
        }
    }
}
