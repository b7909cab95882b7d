//! Domain records mirrored from the upstream event-management system.
//!
//! Everything crossing the ingestion boundary is converted into these
//! strongly-typed records; loosely-shaped upstream JSON never travels
//! further than the client module. Timestamps are UTC throughout, and
//! datapoints on the query surface use epoch milliseconds.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Kind of an upstream metric definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Numeric metrics participate in aggregation
    Numeric,
    /// Categorical metrics are mirrored but never aggregated
    Categorical,
}

impl MetricKind {
    /// Parse the upstream kind string; unknown kinds are rejected at the
    /// ingestion boundary.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "numeric" => Some(MetricKind::Numeric),
            "categorical" => Some(MetricKind::Categorical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Numeric => "numeric",
            MetricKind::Categorical => "categorical",
        }
    }
}

/// A metric definition, identified by its upstream-assigned id.
///
/// Definitions are written only by sync and are never deleted; upstream
/// ids are assumed durable across syncs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    /// Upstream-assigned identifier, stable across syncs
    pub id: i64,
    /// Technical name
    pub name: String,
    /// Translated display name, used for series labels
    pub translated_name: String,
    /// Numeric or categorical
    pub kind: MetricKind,
    /// Optional unit string, parenthesized in series labels
    pub unit: Option<String>,
    /// Upstream sort order for discovery listings
    pub sort_key: i64,
}

/// A dated upstream event record that samples attach to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    /// Upstream-assigned identifier
    pub id: i64,
    /// Display name
    pub name: String,
    /// Start timestamp; drives all calendar bucketing
    pub start: DateTime<Utc>,
    /// Optional end timestamp
    pub end: Option<DateTime<Utc>>,
    /// Optional category label derived from the upstream calendar reference
    pub category: Option<String>,
}

/// The value of one metric for one occurrence.
///
/// Numeric and text values are mutually exclusive; the incoming value's
/// JSON type decides which side is populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleValue {
    Number(f64),
    Text(String),
}

impl SampleValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            SampleValue::Number(v) => Some(*v),
            SampleValue::Text(_) => None,
        }
    }
}

/// One metric sample, identified by the (occurrence, metric) pair.
///
/// The store enforces at most one sample per pair; a later sync for the
/// same pair overwrites the prior value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub occurrence_id: i64,
    pub metric_id: i64,
    pub value: SampleValue,
    /// Occurrence category label, denormalized at write time so filter
    /// queries never need the occurrence row
    pub category: Option<String>,
    /// Upstream last-modified timestamp, when provided
    pub modified: Option<DateTime<Utc>>,
}

/// A closed timestamp range, boundaries inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// The whole calendar year `year`, first to last instant.
    pub fn calendar_year(year: i32) -> Self {
        Self {
            from: year_start(year),
            to: year_start(year + 1) - chrono::Duration::milliseconds(1),
        }
    }

    /// A rolling window of whole calendar months around `now`:
    /// `before` months back through `after` months ahead.
    pub fn rolling_months(now: DateTime<Utc>, before: u32, after: u32) -> Self {
        let (from_y, from_m) = shift_month(now.year(), now.month(), -(before as i32));
        let (to_y, to_m) = shift_month(now.year(), now.month(), after as i32 + 1);
        Self {
            from: month_start(from_y, from_m),
            to: month_start(to_y, to_m) - chrono::Duration::milliseconds(1),
        }
    }

    /// Every calendar year overlapping this range.
    pub fn years(&self) -> std::ops::RangeInclusive<i32> {
        self.from.year()..=self.to.year()
    }

    pub fn from_ms(&self) -> i64 {
        self.from.timestamp_millis()
    }

    pub fn to_ms(&self) -> i64 {
        self.to.timestamp_millis()
    }
}

/// First instant of a calendar month, UTC.
pub fn month_start(year: i32, month: u32) -> DateTime<Utc> {
    // Day 1 of a valid month always resolves in UTC
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single().unwrap()
}

/// First instant of a calendar year, UTC.
pub fn year_start(year: i32) -> DateTime<Utc> {
    month_start(year, 1)
}

/// Shift a (year, month) pair by `delta` months.
fn shift_month(year: i32, month: u32, delta: i32) -> (i32, u32) {
    let zero_based = year * 12 + month as i32 - 1 + delta;
    (zero_based.div_euclid(12), (zero_based.rem_euclid(12) + 1) as u32)
}
