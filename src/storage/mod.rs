//! Persistent store for mirrored event metrics.
//!
//! This module provides the `MetricStore` trait, the storage seam between
//! the sync orchestrator (writer) and the aggregation engine (reader):
//! - idempotent upserts for metric definitions, occurrences and samples
//! - discovery reads (numeric definitions, observed category labels)
//! - range/filter sample reads and monthly/yearly aggregates
//! - the sync watermark used by the startup freshness policy
//!
//! The `duckdb` backend is the only implementation; everything above the
//! trait stays backend-agnostic.

pub mod duckdb;

pub use self::duckdb::DuckDbStore;

use crate::error::Result;
use crate::models::{MetricDefinition, MetricSample, Occurrence, TimeRange};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One numeric sample read back for aggregation: the value and the start
/// timestamp of its occurrence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplePoint {
    pub value: f64,
    pub start_ms: i64,
}

/// Sum of numeric samples within one calendar month.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonthlySum {
    pub year: i32,
    pub month: u32,
    pub total: f64,
}

/// Storage seam for mirrored records and their aggregates.
///
/// All upserts replace any existing row with the same identity; applying
/// the same input twice is a no-op on stored state. Reads considering
/// numeric aggregation ignore samples that only carry a text value.
#[async_trait]
pub trait MetricStore: Send + Sync + 'static {
    /// Insert or replace a metric definition.
    async fn upsert_metric_definition(&self, definition: &MetricDefinition) -> Result<()>;

    /// Insert or replace an occurrence. The locally recorded creation
    /// timestamp of an existing row is preserved.
    async fn upsert_occurrence(&self, occurrence: &Occurrence) -> Result<()>;

    /// Insert or replace the sample for one (occurrence, metric) pair.
    async fn upsert_sample(&self, sample: &MetricSample) -> Result<()>;

    /// All numeric metric definitions, ordered by their upstream sort key.
    async fn numeric_metric_definitions(&self) -> Result<Vec<MetricDefinition>>;

    /// Look up a single metric definition.
    async fn metric_definition(&self, id: i64) -> Result<Option<MetricDefinition>>;

    /// Distinct category labels observed across stored samples.
    async fn distinct_categories(&self) -> Result<Vec<String>>;

    /// Numeric samples of a metric whose occurrence start falls in `range`,
    /// optionally restricted to a category label set, ordered by start
    /// timestamp ascending. An empty `categories` slice means no filtering.
    async fn numeric_samples(
        &self,
        metric_id: i64,
        range: &TimeRange,
        categories: &[String],
    ) -> Result<Vec<SamplePoint>>;

    /// Per-calendar-month sums of numeric samples in `range`, ordered by
    /// month. Months without matching samples produce no entry.
    async fn monthly_sums(
        &self,
        metric_id: i64,
        range: &TimeRange,
        categories: &[String],
    ) -> Result<Vec<MonthlySum>>;

    /// Sum of a metric's numeric samples within one calendar year, or
    /// `None` when the year has no matching sample.
    async fn yearly_sum(
        &self,
        metric_id: i64,
        year: i32,
        categories: &[String],
    ) -> Result<Option<f64>>;

    /// Arithmetic mean of a metric's numeric samples within one calendar
    /// year, or `None` when the year has no matching sample.
    async fn yearly_mean(
        &self,
        metric_id: i64,
        year: i32,
        categories: &[String],
    ) -> Result<Option<f64>>;

    /// Latest local creation timestamp across persisted occurrences, or
    /// `None` before the first successful sync.
    async fn sync_watermark(&self) -> Result<Option<DateTime<Utc>>>;
}
