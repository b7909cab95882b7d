#![allow(dead_code)]

//! Shared fixtures for the integration tests: a canned `EventSource` and
//! store seeding helpers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eventstream_core::error::{Error, Result};
use eventstream_core::ingest::EventSource;
use eventstream_core::models::{
    MetricDefinition, MetricKind, MetricSample, Occurrence, SampleValue, TimeRange,
};
use eventstream_core::storage::{DuckDbStore, MetricStore};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Canned in-memory event source with configurable failures.
#[derive(Default)]
pub struct StaticSource {
    pub definitions: Vec<MetricDefinition>,
    pub occurrences: Vec<Occurrence>,
    pub samples: HashMap<i64, Vec<MetricSample>>,
    pub fail_definitions: bool,
    pub fail_occurrences: bool,
    pub fail_samples_for: HashSet<i64>,
    pub auth_fail_samples_for: HashSet<i64>,
    pub definitions_delay: Option<Duration>,
    pub calls: Mutex<Vec<String>>,
    pub last_range: Mutex<Option<TimeRange>>,
}

impl StaticSource {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn last_range(&self) -> Option<TimeRange> {
        *self.last_range.lock()
    }
}

#[async_trait]
impl EventSource for StaticSource {
    async fn fetch_metric_definitions(&self) -> Result<Vec<MetricDefinition>> {
        self.calls.lock().push("definitions".to_owned());
        if let Some(delay) = self.definitions_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_definitions {
            return Err(Error::UpstreamFetch("definitions unavailable".into()));
        }
        Ok(self.definitions.clone())
    }

    async fn fetch_occurrences(&self, range: &TimeRange) -> Result<Vec<Occurrence>> {
        self.calls.lock().push("occurrences".to_owned());
        *self.last_range.lock() = Some(*range);
        if self.fail_occurrences {
            return Err(Error::UpstreamFetch("occurrences unavailable".into()));
        }
        Ok(self
            .occurrences
            .iter()
            .filter(|occ| occ.start >= range.from && occ.start <= range.to)
            .cloned()
            .collect())
    }

    async fn fetch_samples(&self, occurrence_id: i64) -> Result<Vec<MetricSample>> {
        self.calls.lock().push(format!("samples:{occurrence_id}"));
        if self.auth_fail_samples_for.contains(&occurrence_id) {
            return Err(Error::Authentication("session expired".into()));
        }
        if self.fail_samples_for.contains(&occurrence_id) {
            return Err(Error::UpstreamFetch("samples unavailable".into()));
        }
        Ok(self.samples.get(&occurrence_id).cloned().unwrap_or_default())
    }
}

pub fn numeric_definition(id: i64, name: &str, unit: Option<&str>, sort_key: i64) -> MetricDefinition {
    MetricDefinition {
        id,
        name: name.to_lowercase(),
        translated_name: name.to_owned(),
        kind: MetricKind::Numeric,
        unit: unit.map(str::to_owned),
        sort_key,
    }
}

pub fn categorical_definition(id: i64, name: &str) -> MetricDefinition {
    MetricDefinition {
        id,
        name: name.to_lowercase(),
        translated_name: name.to_owned(),
        kind: MetricKind::Categorical,
        unit: None,
        sort_key: 99,
    }
}

pub fn occurrence(id: i64, start: &str, category: Option<&str>) -> Occurrence {
    Occurrence {
        id,
        name: format!("occurrence {id}"),
        start: timestamp(start),
        end: None,
        category: category.map(str::to_owned),
    }
}

pub fn number_sample(occurrence_id: i64, metric_id: i64, value: f64) -> MetricSample {
    MetricSample {
        occurrence_id,
        metric_id,
        value: SampleValue::Number(value),
        category: None,
        modified: None,
    }
}

pub fn text_sample(occurrence_id: i64, metric_id: i64, value: &str) -> MetricSample {
    MetricSample {
        occurrence_id,
        metric_id,
        value: SampleValue::Text(value.to_owned()),
        category: None,
        modified: None,
    }
}

pub fn timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .unwrap_or_else(|_| panic!("invalid test timestamp: {s}"))
        .with_timezone(&Utc)
}

pub fn range(from: &str, to: &str) -> TimeRange {
    TimeRange::new(timestamp(from), timestamp(to))
}

/// Shared fixture: metric 5 "Attendance" (people) with one January
/// sample labeled "X" and one February sample labeled "Y".
pub async fn seed_attendance_scenario(store: &DuckDbStore) {
    store
        .upsert_metric_definition(&numeric_definition(5, "Attendance", Some("people"), 1))
        .await
        .unwrap();

    let jan = occurrence(101, "2024-01-15T10:00:00Z", Some("X"));
    let feb = occurrence(102, "2024-02-20T10:00:00Z", Some("Y"));
    store.upsert_occurrence(&jan).await.unwrap();
    store.upsert_occurrence(&feb).await.unwrap();

    let mut first = number_sample(101, 5, 10.0);
    first.category = jan.category.clone();
    let mut second = number_sample(102, 5, 20.0);
    second.category = feb.category.clone();
    store.upsert_sample(&first).await.unwrap();
    store.upsert_sample(&second).await.unwrap();
}

/// Upsert a sample with the category label of its occurrence, the way the
/// orchestrator denormalizes at write time.
pub async fn put_sample(
    store: &DuckDbStore,
    occurrence: &Occurrence,
    mut sample: MetricSample,
) {
    sample.category = occurrence.category.clone();
    store.upsert_sample(&sample).await.unwrap();
}

pub fn in_memory_store() -> Arc<DuckDbStore> {
    Arc::new(DuckDbStore::new_in_memory().unwrap())
}
