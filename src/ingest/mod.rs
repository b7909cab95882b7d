//! Upstream ingestion for the sync orchestrator.
//!
//! This module provides:
//! - `EventSource`: the data-source seam the orchestrator pulls from,
//!   substitutable in tests
//! - batched or paced retrieval of per-occurrence samples with
//!   partial-failure isolation
//!
//! No persistence and no aggregation happen here.

pub mod client;

pub use client::{UpstreamClient, UpstreamCredentials};

use crate::error::{Error, Result};
use crate::models::{MetricDefinition, MetricSample, Occurrence, TimeRange};
use async_trait::async_trait;
use futures::future::join_all;
use std::time::Duration;
use tracing::warn;

/// Upstream data source abstraction.
///
/// A failure from `fetch_metric_definitions` or `fetch_occurrences` aborts
/// the sync pass; per-occurrence sample failures are degraded by the
/// fan-out helpers below.
#[async_trait]
pub trait EventSource: Send + Sync + 'static {
    /// Full snapshot of upstream metric definitions.
    async fn fetch_metric_definitions(&self) -> Result<Vec<MetricDefinition>>;

    /// Occurrences whose start timestamp falls in `range`.
    async fn fetch_occurrences(&self, range: &TimeRange) -> Result<Vec<Occurrence>>;

    /// Samples attached to one occurrence.
    async fn fetch_samples(&self, occurrence_id: i64) -> Result<Vec<MetricSample>>;
}

/// How sample fetches are spread over time.
#[derive(Debug, Clone, Copy)]
pub enum FetchPacing {
    /// Fixed-size batches fetched concurrently; caps peak upstream load
    Batched { batch_size: usize },
    /// Strictly serial with a pause between requests; used for backfills
    Paced { delay: Duration },
}

/// Fetch samples for every occurrence, one result vector per occurrence in
/// input order.
///
/// A failed fetch for a single occurrence degrades to an empty sample list
/// and the run continues; authentication failures stay fatal.
pub async fn fetch_samples_for(
    source: &dyn EventSource,
    occurrences: &[Occurrence],
    pacing: FetchPacing,
) -> Result<Vec<Vec<MetricSample>>> {
    let mut all = Vec::with_capacity(occurrences.len());
    match pacing {
        FetchPacing::Batched { batch_size } => {
            for chunk in occurrences.chunks(batch_size.max(1)) {
                let fetches = chunk.iter().map(|occ| source.fetch_samples(occ.id));
                for (occurrence, result) in chunk.iter().zip(join_all(fetches).await) {
                    all.push(degrade(occurrence, result)?);
                }
            }
        }
        FetchPacing::Paced { delay } => {
            for (i, occurrence) in occurrences.iter().enumerate() {
                if i > 0 {
                    tokio::time::sleep(delay).await;
                }
                let result = source.fetch_samples(occurrence.id).await;
                all.push(degrade(occurrence, result)?);
            }
        }
    }
    Ok(all)
}

fn degrade(occurrence: &Occurrence, result: Result<Vec<MetricSample>>) -> Result<Vec<MetricSample>> {
    match result {
        Ok(samples) => Ok(samples),
        Err(err @ Error::Authentication(_)) => Err(err),
        Err(err) => {
            warn!(
                occurrence_id = occurrence.id,
                error = %err,
                "Sample fetch failed, continuing with empty result"
            );
            Ok(Vec::new())
        }
    }
}
