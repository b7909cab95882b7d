//! Query façade translating the external query protocol into aggregation
//! calls.
//!
//! Two operations face the visualization client:
//! - discovery: every numeric metric definition is listed as four
//!   composite targets (one per aggregation kind), each carrying a
//!   selectable category filter built from the observed labels
//! - query: a list of composite target keys plus one shared time range;
//!   keys that do not match the composite pattern are silently skipped,
//!   and targets that produce no datapoints are omitted from the response
//!
//! HTTP routing and request parsing live outside this crate; the wire
//! types here are the ready-to-serialize request/response shapes.

use crate::aggregation::{AggregationEngine, AggregationKind};
use crate::constants::protocol::{CATEGORY_FILTER_PAYLOAD, TARGET_PREFIX};
use crate::error::Result;
use crate::models::{MetricKind, TimeRange};
use crate::storage::MetricStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// External query request: target specs plus one shared time range.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub targets: Vec<TargetSpec>,
    pub range: QueryRange,
}

/// One requested series, addressed by its composite key.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetSpec {
    pub target: String,
    /// Optional category-label filter; empty means unfiltered
    #[serde(default)]
    pub filter: Vec<String>,
}

/// Shared ISO-8601 time range of a query request.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct QueryRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl From<QueryRange> for TimeRange {
    fn from(range: QueryRange) -> Self {
        TimeRange::new(range.from, range.to)
    }
}

/// One series of the query response; `datapoints` entries serialize as
/// `[value, epochMillis]` pairs.
#[derive(Debug, Clone, Serialize)]
pub struct SeriesResponse {
    pub target: String,
    pub datapoints: Vec<(f64, i64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// One selectable target of the discovery response.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryEntry {
    pub label: String,
    pub value: String,
    pub payloads: Vec<FilterPayload>,
}

/// A multi-value payload attached to a discovery entry.
#[derive(Debug, Clone, Serialize)]
pub struct FilterPayload {
    pub name: String,
    pub options: Vec<FilterOption>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterOption {
    pub label: String,
    pub value: String,
}

/// Query façade over the store and the aggregation engine.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn MetricStore>,
    engine: AggregationEngine,
}

impl QueryService {
    pub fn new(store: Arc<dyn MetricStore>) -> Self {
        let engine = AggregationEngine::new(store.clone());
        Self { store, engine }
    }

    /// Discovery listing: four composite targets per numeric metric.
    pub async fn search(&self) -> Result<Vec<DiscoveryEntry>> {
        let definitions = self.store.numeric_metric_definitions().await?;
        let categories = self.store.distinct_categories().await?;
        let options: Vec<FilterOption> = categories
            .into_iter()
            .map(|category| FilterOption {
                label: category.clone(),
                value: category,
            })
            .collect();

        let mut entries = Vec::with_capacity(definitions.len() * AggregationKind::ALL.len());
        for definition in &definitions {
            for kind in AggregationKind::ALL {
                entries.push(DiscoveryEntry {
                    label: AggregationEngine::compose_label(definition, kind, &[]),
                    value: compose_target_key(definition.id, kind),
                    payloads: vec![FilterPayload {
                        name: CATEGORY_FILTER_PAYLOAD.to_owned(),
                        options: options.clone(),
                    }],
                });
            }
        }
        Ok(entries)
    }

    /// Execute a query request. Targets with malformed keys contribute
    /// nothing; targets without datapoints are omitted.
    pub async fn query(&self, request: &QueryRequest) -> Result<Vec<SeriesResponse>> {
        let range: TimeRange = request.range.into();
        let mut series = Vec::new();

        for spec in &request.targets {
            let Some((metric_id, kind)) = parse_target_key(&spec.target) else {
                debug!(key = %spec.target, "Skipping target with malformed key");
                continue;
            };
            let Some(definition) = self.store.metric_definition(metric_id).await? else {
                debug!(metric_id, "Skipping target for unknown metric");
                continue;
            };
            if definition.kind != MetricKind::Numeric {
                debug!(metric_id, "Skipping target for non-numeric metric");
                continue;
            }

            let datapoints = self
                .engine
                .datapoints(&definition, kind, &range, &spec.filter)
                .await?;
            if datapoints.is_empty() {
                continue;
            }

            series.push(SeriesResponse {
                target: AggregationEngine::compose_label(&definition, kind, &spec.filter),
                datapoints: datapoints
                    .into_iter()
                    .map(|p| (p.value, p.timestamp_ms))
                    .collect(),
                unit: definition.unit.clone(),
            });
        }
        Ok(series)
    }
}

/// Build the composite key `<prefix>_<metricId>_<kind>` for one series.
pub fn compose_target_key(metric_id: i64, kind: AggregationKind) -> String {
    format!("{TARGET_PREFIX}_{metric_id}_{}", kind.key_suffix())
}

/// Parse a composite key; anything that does not match the exact pattern
/// yields `None`.
pub fn parse_target_key(key: &str) -> Option<(i64, AggregationKind)> {
    let rest = key.strip_prefix(TARGET_PREFIX)?.strip_prefix('_')?;
    let (id, kind) = rest.split_once('_')?;
    Some((id.parse().ok()?, AggregationKind::parse_key(kind)?))
}
