//! MetricStore - time-series storage for host metrics
//!
//! Append-only samples with windowed reads, bucketed aggregation, and
//! retention-based eviction. Backed by SQLite so the daemon can restart
//! without losing history.

mod store;

pub use store::{AggregateFn, AggregatePoint, MetricSample, MetricStore, StoreError};

/// Default retention window in days
pub const DEFAULT_RETENTION_DAYS: i64 = 30;
