//! Shared constants for the eventstream application.
//!
//! Centralizes sync pacing and protocol constants to maintain consistency
//! and avoid duplication across the codebase.

/// Synchronization pacing
pub mod sync {
    use std::time::Duration;

    /// Number of occurrences whose samples are fetched concurrently
    /// in one batch during a window sync
    pub const SAMPLE_BATCH_SIZE: usize = 10;

    /// Pause between consecutive sample fetches on the backfill path,
    /// keeping the steady request rate acceptable to the upstream system
    pub const BACKFILL_REQUEST_DELAY: Duration = Duration::from_millis(500);

    /// A watermark older than this triggers a window sync at startup
    pub const STARTUP_FRESHNESS: Duration = Duration::from_secs(3600);
}

/// Query protocol constants
pub mod protocol {
    /// Prefix of composite target keys (`<prefix>_<metricId>_<kind>`)
    pub const TARGET_PREFIX: &str = "metric";

    /// Name of the selectable category filter payload in discovery entries
    pub const CATEGORY_FILTER_PAYLOAD: &str = "category filter";
}
