//! Aggregation engine for mirrored metric samples.
//!
//! Turns stored per-occurrence samples into the four series shapes the
//! query surface serves:
//! - raw values ordered by occurrence start
//! - calendar-month sums
//! - calendar-year sums and means
//!
//! Only samples with a numeric value participate; text-valued samples are
//! excluded entirely. Yearly series omit years without a matching sample
//! instead of emitting zero-valued points.

use crate::error::Result;
use crate::models::{month_start, year_start, MetricDefinition, TimeRange};
use crate::storage::MetricStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The four supported aggregation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationKind {
    Raw,
    MonthlySum,
    YearlySum,
    YearlyMean,
}

impl AggregationKind {
    pub const ALL: [AggregationKind; 4] = [
        AggregationKind::Raw,
        AggregationKind::MonthlySum,
        AggregationKind::YearlySum,
        AggregationKind::YearlyMean,
    ];

    /// Suffix used in composite target keys.
    pub fn key_suffix(&self) -> &'static str {
        match self {
            AggregationKind::Raw => "raw",
            AggregationKind::MonthlySum => "monthly",
            AggregationKind::YearlySum => "yearly_sum",
            AggregationKind::YearlyMean => "yearly_mean",
        }
    }

    /// Parse a composite-key suffix.
    pub fn parse_key(s: &str) -> Option<Self> {
        match s {
            "raw" => Some(AggregationKind::Raw),
            "monthly" => Some(AggregationKind::MonthlySum),
            "yearly_sum" => Some(AggregationKind::YearlySum),
            "yearly_mean" => Some(AggregationKind::YearlyMean),
            _ => None,
        }
    }

    /// Human-readable fragment used in composed series labels.
    pub fn label(&self) -> &'static str {
        match self {
            AggregationKind::Raw => "raw",
            AggregationKind::MonthlySum => "monthly sum",
            AggregationKind::YearlySum => "yearly sum",
            AggregationKind::YearlyMean => "yearly mean",
        }
    }
}

impl fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key_suffix())
    }
}

/// One datapoint of an aggregated series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub value: f64,
    pub timestamp_ms: i64,
}

/// Computes aggregated series from the metric store.
#[derive(Clone)]
pub struct AggregationEngine {
    store: Arc<dyn MetricStore>,
}

impl AggregationEngine {
    pub fn new(store: Arc<dyn MetricStore>) -> Self {
        Self { store }
    }

    /// The datapoints of one series, ascending by timestamp.
    pub async fn datapoints(
        &self,
        metric: &MetricDefinition,
        kind: AggregationKind,
        range: &TimeRange,
        categories: &[String],
    ) -> Result<Vec<DataPoint>> {
        match kind {
            AggregationKind::Raw => self.raw(metric.id, range, categories).await,
            AggregationKind::MonthlySum => self.monthly(metric.id, range, categories).await,
            AggregationKind::YearlySum | AggregationKind::YearlyMean => {
                self.yearly(metric.id, kind, range, categories).await
            }
        }
    }

    /// Deterministic series label: display name, aggregation kind, the
    /// unit in parentheses when present, the filter set bracketed when
    /// non-empty.
    pub fn compose_label(
        metric: &MetricDefinition,
        kind: AggregationKind,
        categories: &[String],
    ) -> String {
        let mut label = format!("{} {}", metric.translated_name, kind.label());
        if let Some(unit) = &metric.unit {
            label.push_str(&format!(" ({unit})"));
        }
        if !categories.is_empty() {
            label.push_str(&format!(" [{}]", categories.join(", ")));
        }
        label
    }

    async fn raw(
        &self,
        metric_id: i64,
        range: &TimeRange,
        categories: &[String],
    ) -> Result<Vec<DataPoint>> {
        let points = self.store.numeric_samples(metric_id, range, categories).await?;
        Ok(points
            .into_iter()
            .map(|p| DataPoint {
                value: p.value,
                timestamp_ms: p.start_ms,
            })
            .collect())
    }

    async fn monthly(
        &self,
        metric_id: i64,
        range: &TimeRange,
        categories: &[String],
    ) -> Result<Vec<DataPoint>> {
        let sums = self.store.monthly_sums(metric_id, range, categories).await?;
        Ok(sums
            .into_iter()
            .map(|m| DataPoint {
                value: m.total,
                timestamp_ms: month_start(m.year, m.month).timestamp_millis(),
            })
            .collect())
    }

    async fn yearly(
        &self,
        metric_id: i64,
        kind: AggregationKind,
        range: &TimeRange,
        categories: &[String],
    ) -> Result<Vec<DataPoint>> {
        let mut points = Vec::new();
        for year in range.years() {
            let value = match kind {
                AggregationKind::YearlyMean => {
                    self.store.yearly_mean(metric_id, year, categories).await?
                }
                _ => self.store.yearly_sum(metric_id, year, categories).await?,
            };
            // Years without a matching sample contribute no point
            if let Some(value) = value {
                points.push(DataPoint {
                    value,
                    timestamp_ms: year_start(year).timestamp_millis(),
                });
            }
        }
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetricKind;

    fn attendance() -> MetricDefinition {
        MetricDefinition {
            id: 5,
            name: "attendance".into(),
            translated_name: "Attendance".into(),
            kind: MetricKind::Numeric,
            unit: Some("people".into()),
            sort_key: 1,
        }
    }

    #[test]
    fn test_key_suffix_roundtrip() {
        for kind in AggregationKind::ALL {
            assert_eq!(AggregationKind::parse_key(kind.key_suffix()), Some(kind));
        }
        assert_eq!(AggregationKind::parse_key("weekly"), None);
        assert_eq!(AggregationKind::parse_key("yearly"), None);
    }

    #[test]
    fn test_compose_label_with_unit_and_filter() {
        let label = AggregationEngine::compose_label(
            &attendance(),
            AggregationKind::MonthlySum,
            &["X".to_owned(), "Y".to_owned()],
        );
        assert_eq!(label, "Attendance monthly sum (people) [X, Y]");
    }

    #[test]
    fn test_compose_label_without_unit() {
        let mut metric = attendance();
        metric.unit = None;
        let label = AggregationEngine::compose_label(&metric, AggregationKind::Raw, &[]);
        assert_eq!(label, "Attendance raw");
    }

    #[test]
    fn test_compose_label_is_deterministic() {
        let filter = vec!["B".to_owned(), "A".to_owned()];
        let first = AggregationEngine::compose_label(&attendance(), AggregationKind::YearlySum, &filter);
        let second = AggregationEngine::compose_label(&attendance(), AggregationKind::YearlySum, &filter);
        assert_eq!(first, second);
    }
}
