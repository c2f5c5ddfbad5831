//! Common types used across the platform

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Closed time interval for sensor history queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// From the start of the planting day up to `now`
    pub fn since_planting(planting_date: NaiveDate, now: DateTime<Utc>) -> Self {
        Self {
            start: start_of_day(planting_date),
            end: now,
        }
    }

    /// From the start of the planting day through the end of the harvest day
    pub fn planting_to_harvest(planting_date: NaiveDate, harvest_date: NaiveDate) -> Self {
        Self {
            start: start_of_day(planting_date),
            end: start_of_day(harvest_date) + Duration::days(1) - Duration::microseconds(1),
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}

/// Midnight UTC on the given date
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Opaque model version string with a natural ordering
///
/// `v2` < `v10`; versions without a `v<number>` shape compare as plain
/// strings and sort after numbered ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelVersion(pub String);

impl ModelVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn number(&self) -> Option<u64> {
        self.0
            .strip_prefix('v')
            .or_else(|| self.0.strip_prefix('V'))
            .and_then(|digits| digits.parse().ok())
    }
}

impl Ord for ModelVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.number(), other.number()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for ModelVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
