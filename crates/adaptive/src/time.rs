use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};

/// Number of ticks per second used by a representation's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timescale(u64);

impl Timescale {
    pub const MICROSECONDS: Timescale = Timescale(1_000_000);

    pub const fn new(ticks_per_second: u64) -> Self {
        if ticks_per_second == 0 {
            Self(1)
        } else {
            Self(ticks_per_second)
        }
    }

    pub fn ticks_per_second(&self) -> u64 {
        self.0
    }

    pub fn to_duration(&self, ticks: u64) -> Duration {
        let micros = ticks as u128 * 1_000_000 / self.0 as u128;
        Duration::from_micros(saturate(micros))
    }

    pub fn from_duration(&self, duration: Duration) -> u64 {
        saturate(duration.as_micros() * self.0 as u128 / 1_000_000)
    }

    pub fn from_secs_f64(&self, seconds: f64) -> u64 {
        if seconds <= 0.0 || !seconds.is_finite() {
            return 0;
        }
        (seconds * self.0 as f64).round() as u64
    }

    /// Rescales `ticks` of this clock into `other`.
    pub fn convert(&self, ticks: u64, other: Timescale) -> u64 {
        saturate(ticks as u128 * other.0 as u128 / self.0 as u128)
    }
}

fn saturate(value: u128) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

impl Default for Timescale {
    fn default() -> Self {
        Self(1)
    }
}

/// Parses an ISO 8601 date time. Values without a zone are taken as UTC.
pub(crate) fn parse_date_time(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|dt| dt.and_utc())
        })
}
