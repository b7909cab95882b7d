mod common;

use chrono::{Datelike, Utc};
use common::*;
use eventstream_core::error::Error;
use eventstream_core::models::TimeRange;
use eventstream_core::storage::MetricStore;
use eventstream_core::sync::{SyncOrchestrator, SyncSettings};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

fn fast_settings() -> SyncSettings {
    SyncSettings {
        sample_batch_size: 2,
        backfill_delay: Duration::from_millis(1),
        startup_freshness: Duration::from_secs(3600),
    }
}

/// A source holding this month's occurrences plus a 2023 backlog.
fn seeded_source() -> StaticSource {
    let now = Utc::now();
    let current_month = format!("{:04}-{:02}-15T10:00:00Z", now.year(), now.month());

    let mut samples = HashMap::new();
    samples.insert(101, vec![number_sample(101, 5, 10.0)]);
    samples.insert(102, vec![number_sample(102, 5, 20.0), text_sample(102, 6, "sunny")]);
    samples.insert(103, vec![number_sample(103, 5, 30.0)]);

    StaticSource {
        definitions: vec![
            numeric_definition(5, "Attendance", Some("people"), 1),
            categorical_definition(6, "Weather"),
        ],
        occurrences: vec![
            occurrence(101, &current_month, Some("X")),
            occurrence(102, &current_month, Some("Y")),
            occurrence(103, "2023-06-10T10:00:00Z", Some("X")),
        ],
        samples,
        ..StaticSource::default()
    }
}

fn orchestrator(source: StaticSource) -> (Arc<StaticSource>, Arc<SyncOrchestrator>) {
    let source = Arc::new(source);
    let store = in_memory_store();
    let orchestrator = Arc::new(SyncOrchestrator::new(
        source.clone(),
        store,
        fast_settings(),
    ));
    (source, orchestrator)
}

fn orchestrator_with_store(
    source: StaticSource,
) -> (Arc<StaticSource>, Arc<eventstream_core::DuckDbStore>, Arc<SyncOrchestrator>) {
    let source = Arc::new(source);
    let store = in_memory_store();
    let orchestrator = Arc::new(SyncOrchestrator::new(
        source.clone(),
        store.clone(),
        fast_settings(),
    ));
    (source, store, orchestrator)
}

#[tokio::test]
async fn test_window_sync_mirrors_current_window() {
    let (source, store, orchestrator) = orchestrator_with_store(seeded_source());

    let report = orchestrator.sync_window().await.unwrap();
    // The 2023 occurrence is outside the rolling window
    assert_eq!(report.occurrences, 2);
    assert_eq!(report.samples, 3);

    // The requested window covers the previous through the next month
    let requested = source.last_range().unwrap();
    let expected = TimeRange::rolling_months(Utc::now(), 1, 1);
    assert_eq!(requested.from, expected.from);

    // Samples landed with their occurrence labels denormalized
    let mut labels = store.distinct_categories().await.unwrap();
    labels.sort();
    assert_eq!(labels, vec!["X", "Y"]);

    let window = TimeRange::rolling_months(Utc::now(), 1, 1);
    let filtered = store
        .numeric_samples(5, &window, &["Y".to_owned()])
        .await
        .unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].value, 20.0);
}

#[tokio::test]
async fn test_sync_writes_definitions_then_occurrences_then_samples() {
    let (source, orchestrator) = orchestrator(seeded_source());
    orchestrator.sync_window().await.unwrap();

    let calls = source.calls();
    assert_eq!(calls[0], "definitions");
    assert_eq!(calls[1], "occurrences");
    assert!(calls[2..].iter().all(|call| call.starts_with("samples:")));
}

#[tokio::test]
async fn test_double_sync_is_idempotent() {
    let (_source, store, orchestrator) = orchestrator_with_store(seeded_source());

    orchestrator.sync_window().await.unwrap();
    let mark = store.sync_watermark().await.unwrap().unwrap();
    let window = TimeRange::rolling_months(Utc::now(), 1, 1);
    let before = store.numeric_samples(5, &window, &[]).await.unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    orchestrator.sync_window().await.unwrap();

    assert_eq!(store.sync_watermark().await.unwrap().unwrap(), mark);
    assert_eq!(store.numeric_samples(5, &window, &[]).await.unwrap(), before);
}

#[tokio::test]
async fn test_single_flight_rejects_concurrent_trigger() {
    let mut source = seeded_source();
    source.definitions_delay = Some(Duration::from_millis(200));
    let (_source, orchestrator) = orchestrator(source);

    let (first, second) = tokio::join!(orchestrator.sync_window(), orchestrator.sync_window());
    let outcomes = [first.is_ok(), second.is_ok()];
    assert_eq!(
        outcomes.iter().filter(|ok| **ok).count(),
        1,
        "exactly one of two concurrent triggers may run"
    );
    let rejected = if outcomes[0] { second } else { first };
    assert!(matches!(rejected, Err(Error::SyncInProgress)));

    // The flag is released afterwards and a new sync may start
    assert!(!orchestrator.is_running());
    assert!(orchestrator.sync_window().await.is_ok());
}

#[tokio::test]
async fn test_per_occurrence_fetch_failure_degrades() {
    let mut source = seeded_source();
    source.fail_samples_for = HashSet::from([101]);
    let (_source, store, orchestrator) = orchestrator_with_store(source);

    let report = orchestrator.sync_window().await.unwrap();
    assert_eq!(report.occurrences, 2);
    // Occurrence 101 degraded to an empty sample list
    assert_eq!(report.samples, 2);

    let window = TimeRange::rolling_months(Utc::now(), 1, 1);
    let points = store.numeric_samples(5, &window, &[]).await.unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].value, 20.0);
}

#[tokio::test]
async fn test_definitions_fetch_failure_aborts_pass() {
    let mut source = seeded_source();
    source.fail_definitions = true;
    let (_source, store, orchestrator) = orchestrator_with_store(source);

    let result = orchestrator.sync_window().await;
    assert!(matches!(result, Err(Error::UpstreamFetch(_))));
    assert_eq!(store.sync_watermark().await.unwrap(), None);
    assert!(store.numeric_metric_definitions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_occurrences_fetch_failure_aborts_pass() {
    let mut source = seeded_source();
    source.fail_occurrences = true;
    let (_source, store, orchestrator) = orchestrator_with_store(source);

    assert!(orchestrator.sync_window().await.is_err());
    // Definitions had already landed; the watermark did not advance
    assert_eq!(store.sync_watermark().await.unwrap(), None);
    assert!(!orchestrator.is_running());
}

#[tokio::test]
async fn test_auth_failure_during_samples_is_fatal() {
    let mut source = seeded_source();
    source.auth_fail_samples_for = HashSet::from([102]);
    let (_source, orchestrator) = orchestrator(source);

    let result = orchestrator.sync_window().await;
    assert!(matches!(result, Err(Error::Authentication(_))));
    assert!(!orchestrator.is_running());
}

#[tokio::test]
async fn test_backfill_year_counts_and_pacing_path() {
    let (source, store, orchestrator) = orchestrator_with_store(seeded_source());

    let report = orchestrator.backfill_year(2023).await.unwrap();
    assert_eq!(report.occurrences, 1);
    assert_eq!(report.samples, 1);

    let requested = source.last_range().unwrap();
    assert_eq!(requested, TimeRange::calendar_year(2023));

    let year = TimeRange::calendar_year(2023);
    let points = store.numeric_samples(5, &year, &[]).await.unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].value, 30.0);
}

#[tokio::test]
async fn test_startup_syncs_empty_store_then_skips() {
    let (_source, orchestrator) = orchestrator(seeded_source());

    // No watermark: the startup sync runs
    let first = orchestrator.run_startup().await.unwrap();
    assert!(first.is_some());

    // The watermark is now fresh: nothing to do
    let second = orchestrator.run_startup().await.unwrap();
    assert!(second.is_none());
}

#[tokio::test]
async fn test_startup_syncs_stale_store() {
    let source = Arc::new(seeded_source());
    let store = in_memory_store();
    let mut settings = fast_settings();
    settings.startup_freshness = Duration::from_secs(0);
    let orchestrator = Arc::new(SyncOrchestrator::new(source, store, settings));

    assert!(orchestrator.run_startup().await.unwrap().is_some());
    tokio::time::sleep(Duration::from_millis(10)).await;
    // Zero freshness: every startup re-syncs
    assert!(orchestrator.run_startup().await.unwrap().is_some());
}

#[tokio::test]
async fn test_status_reports_flag_and_watermark() {
    let (_source, orchestrator) = orchestrator(seeded_source());

    let status = orchestrator.status().await.unwrap();
    assert!(!status.sync_running);
    assert!(status.last_watermark.is_none());
    assert!(orchestrator.last_completed().is_none());

    orchestrator.sync_window().await.unwrap();

    let status = orchestrator.status().await.unwrap();
    assert!(!status.sync_running);
    assert!(status.last_watermark.is_some());
    assert!(orchestrator.last_completed().is_some());
}
