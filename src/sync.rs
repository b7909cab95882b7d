//! Sync orchestration between the upstream source and the local store.
//!
//! One orchestrator instance owns the process-wide single-flight state:
//! while a sync runs, any further trigger is rejected immediately instead
//! of queued or merged. Two entry points exist: the rolling three-month
//! window sync used by the scheduler and the startup policy, and the
//! paced full-year backfill for historical data.
//!
//! Write sequencing per pass: metric definitions, then occurrences, then
//! samples, so samples always reference rows that already landed.

use crate::constants::sync::{BACKFILL_REQUEST_DELAY, SAMPLE_BATCH_SIZE, STARTUP_FRESHNESS};
use crate::error::{Error, Result};
use crate::ingest::{fetch_samples_for, EventSource, FetchPacing};
use crate::models::TimeRange;
use crate::storage::MetricStore;
use chrono::{DateTime, Timelike, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Pacing and freshness knobs of the orchestrator.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Occurrences per concurrent sample-fetch batch on the window path
    pub sample_batch_size: usize,
    /// Pause between sample fetches on the backfill path
    pub backfill_delay: Duration,
    /// Watermark age beyond which startup runs a window sync
    pub startup_freshness: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            sample_batch_size: SAMPLE_BATCH_SIZE,
            backfill_delay: BACKFILL_REQUEST_DELAY,
            startup_freshness: STARTUP_FRESHNESS,
        }
    }
}

/// Counts of what one sync pass processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub occurrences: usize,
    pub samples: usize,
}

/// Health surface: the single-flight state and the last sync watermark.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub sync_running: bool,
    pub last_watermark: Option<DateTime<Utc>>,
}

/// Coordinates full and incremental refresh cycles.
pub struct SyncOrchestrator {
    source: Arc<dyn EventSource>,
    store: Arc<dyn MetricStore>,
    settings: SyncSettings,
    running: AtomicBool,
    last_completed: RwLock<Option<DateTime<Utc>>>,
}

/// Releases the single-flight flag when the sync pass ends, whether it
/// finished or failed.
struct SyncGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl SyncOrchestrator {
    pub fn new(
        source: Arc<dyn EventSource>,
        store: Arc<dyn MetricStore>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            source,
            store,
            settings,
            running: AtomicBool::new(false),
            last_completed: RwLock::new(None),
        }
    }

    /// Atomically claim the single-flight flag. Two near-simultaneous
    /// triggers can never both observe "idle".
    fn try_begin(&self) -> Result<SyncGuard<'_>> {
        match self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => Ok(SyncGuard { flag: &self.running }),
            Err(_) => Err(Error::SyncInProgress),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Completion time of the last successful sync in this process.
    pub fn last_completed(&self) -> Option<DateTime<Utc>> {
        *self.last_completed.read()
    }

    /// Health surface for an embedding server.
    pub async fn status(&self) -> Result<SyncStatus> {
        Ok(SyncStatus {
            sync_running: self.is_running(),
            last_watermark: self.store.sync_watermark().await?,
        })
    }

    /// Re-sync the previous, current and next calendar month with
    /// concurrent batched sample fetching.
    pub async fn sync_window(&self) -> Result<SyncReport> {
        let _guard = self.try_begin()?;
        let range = TimeRange::rolling_months(Utc::now(), 1, 1);
        info!(from = %range.from, to = %range.to, "Starting window sync");
        let report = self
            .sync_range(
                &range,
                FetchPacing::Batched {
                    batch_size: self.settings.sample_batch_size,
                },
            )
            .await?;
        *self.last_completed.write() = Some(Utc::now());
        info!(
            occurrences = report.occurrences,
            samples = report.samples,
            "Window sync finished"
        );
        Ok(report)
    }

    /// Re-sync one explicit calendar year end-to-end, serially paced to
    /// respect upstream rate limits.
    pub async fn backfill_year(&self, year: i32) -> Result<SyncReport> {
        let _guard = self.try_begin()?;
        let range = TimeRange::calendar_year(year);
        info!(year, "Starting year backfill");
        let report = self
            .sync_range(
                &range,
                FetchPacing::Paced {
                    delay: self.settings.backfill_delay,
                },
            )
            .await?;
        *self.last_completed.write() = Some(Utc::now());
        info!(
            year,
            occurrences = report.occurrences,
            samples = report.samples,
            "Year backfill finished"
        );
        Ok(report)
    }

    /// Startup policy: run a window sync when no watermark exists or the
    /// watermark is older than the freshness threshold; otherwise skip.
    pub async fn run_startup(&self) -> Result<Option<SyncReport>> {
        let stale = match self.store.sync_watermark().await? {
            None => true,
            Some(mark) => match Utc::now().signed_duration_since(mark).to_std() {
                Ok(age) => age > self.settings.startup_freshness,
                // A future-dated watermark counts as fresh
                Err(_) => false,
            },
        };
        if !stale {
            info!("Local store is fresh, skipping startup sync");
            return Ok(None);
        }
        self.sync_window().await.map(Some)
    }

    /// Trigger a window sync at the top of every hour. Failures are
    /// logged; the next tick always fires.
    pub fn spawn_scheduler(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let orchestrator = self;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(duration_until_next_hour(Utc::now())).await;
                match orchestrator.sync_window().await {
                    Ok(report) => info!(
                        occurrences = report.occurrences,
                        samples = report.samples,
                        "Scheduled sync finished"
                    ),
                    Err(Error::SyncInProgress) => {
                        info!("Scheduled sync skipped, another sync is running")
                    }
                    Err(err) => error!(error = %err, "Scheduled sync failed"),
                }
            }
        })
    }

    async fn sync_range(&self, range: &TimeRange, pacing: FetchPacing) -> Result<SyncReport> {
        let definitions = self.source.fetch_metric_definitions().await?;
        for definition in &definitions {
            self.store.upsert_metric_definition(definition).await?;
        }

        let occurrences = self.source.fetch_occurrences(range).await?;
        for occurrence in &occurrences {
            self.store.upsert_occurrence(occurrence).await?;
        }

        let sample_lists = fetch_samples_for(self.source.as_ref(), &occurrences, pacing).await?;
        let mut samples = 0usize;
        for (occurrence, list) in occurrences.iter().zip(sample_lists) {
            for mut sample in list {
                // Denormalize the occurrence label onto the sample so
                // filter queries never need the occurrence row
                sample.category = occurrence.category.clone();
                self.store.upsert_sample(&sample).await?;
                samples += 1;
            }
        }

        Ok(SyncReport {
            occurrences: occurrences.len(),
            samples,
        })
    }
}

fn duration_until_next_hour(now: DateTime<Utc>) -> Duration {
    let next = (now + chrono::Duration::hours(1))
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now + chrono::Duration::hours(1));
    next.signed_duration_since(now)
        .to_std()
        .unwrap_or(Duration::from_secs(3600))
}
