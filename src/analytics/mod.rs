//! Analytics data-retrieval core.
//!
//! # Module structure
//!
//! - [`types`]: query identity, tables, device matrix, error types
//! - [`backend`]: the backing-store seam and the SQLite implementation
//! - [`cache`]: session-scoped memoization by query identity
//! - [`fetch`]: concurrent batch execution with per-slot failures
//! - [`pivot`]: long-to-wide device/event reshape
//! - [`query`]: query builders and the cached fetcher
//! - [`derive`]: derived session-duration metrics

pub mod backend;
pub mod cache;
pub mod derive;
pub mod fetch;
pub mod pivot;
pub mod query;
pub mod types;

// Re-export the most commonly used items at the crate::analytics level.
pub use backend::{QueryBackend, SqliteBackend};
pub use cache::{CacheStats, QueryCache};
pub use derive::{DailyAverage, DurationMetrics, daily_average_durations, duration_metrics};
pub use fetch::{
    Batch, BoundQueryTask, QueryTask, SlotError, SlotFailure, SlotResult, run_batch,
    run_batch_with,
};
pub use pivot::pivot_device_events;
pub use query::{Environment, EventFetcher, EventQueries, validate_environment};
pub use types::{
    AnalyticsError, AnalyticsResult, DeviceMatrix, DeviceRow, FetchError, Query, QuerySource,
    Value,
};
