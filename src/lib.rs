//! Core library for mirroring event metrics and serving pre-aggregated
//! time series.
//!
//! This crate provides the core functionality for:
//! - Synchronizing metric definitions, occurrences and samples from an
//!   upstream event-management system under rate limits
//! - Idempotent local storage with range and category-filter queries
//! - Raw, monthly-sum, yearly-sum and yearly-mean aggregation
//! - The query/discovery façade consumed by a visualization client

pub mod aggregation;
pub mod config;
pub mod constants;
pub mod error;
pub mod ingest;
pub mod models;
pub mod service;
pub mod storage;
pub mod sync;

// Re-export commonly used types
pub use aggregation::{AggregationEngine, AggregationKind, DataPoint};
pub use error::{Error, Result};
pub use ingest::{EventSource, UpstreamClient};
pub use service::QueryService;
pub use storage::{DuckDbStore, MetricStore};
pub use sync::{SyncOrchestrator, SyncReport, SyncSettings, SyncStatus};
