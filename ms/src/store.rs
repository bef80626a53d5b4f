//! Core MetricStore implementation

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur during metric store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

/// A single time-series sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// When the sample was taken
    pub timestamp: DateTime<Utc>,
    /// Host the sample was taken on
    pub host: String,
    /// Metric name, e.g. `cpu_pct`
    pub name: String,
    /// Sample value
    pub value: f64,
    /// Unit label, e.g. `%` or `load`
    pub unit: String,
    /// Free-form tags
    pub tags: BTreeMap<String, String>,
}

impl MetricSample {
    /// Create a sample stamped with the current time
    pub fn now(host: impl Into<String>, name: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            host: host.into(),
            name: name.into(),
            value,
            unit: unit.into(),
            tags: BTreeMap::new(),
        }
    }
}

/// Aggregation function for bucketed queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Avg,
    Min,
    Max,
    Last,
}

/// One aggregated bucket
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatePoint {
    /// Start of the bucket
    pub bucket: DateTime<Utc>,
    /// Aggregated value
    pub value: f64,
    /// Number of samples in the bucket
    pub count: usize,
}

/// Time-series store over a single SQLite database
///
/// The connection is guarded by a mutex; callers across tasks share one
/// store behind an `Arc`. No lock is held across any await point because
/// every operation here is synchronous.
pub struct MetricStore {
    conn: Mutex<Connection>,
}

impl MetricStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        debug!(path = %path.as_ref().display(), "MetricStore::open: called");
        let conn = Connection::open(path.as_ref())?;
        Self::init_schema(&conn)?;
        info!(path = %path.as_ref().display(), "Opened metric store");
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open an in-memory store (tests)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS samples (
                ts    INTEGER NOT NULL,
                host  TEXT NOT NULL,
                name  TEXT NOT NULL,
                value REAL NOT NULL,
                unit  TEXT NOT NULL,
                tags  TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_samples_name_host_ts
                ON samples (name, host, ts);",
        )?;
        Ok(())
    }

    /// Append a sample
    pub fn insert_sample(&self, sample: &MetricSample) -> Result<(), StoreError> {
        debug!(name = %sample.name, value = sample.value, "MetricStore::insert_sample: called");
        let tags = serde_json::to_string(&sample.tags)?;
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            "INSERT INTO samples (ts, host, name, value, unit, tags) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                sample.timestamp.timestamp_millis(),
                sample.host,
                sample.name,
                sample.value,
                sample.unit,
                tags,
            ],
        )?;
        Ok(())
    }

    /// Read samples for a metric within `[from, to)`, oldest first
    pub fn query_range(
        &self,
        name: &str,
        host: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<MetricSample>, StoreError> {
        debug!(%name, %host, "MetricStore::query_range: called");
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare(
            "SELECT ts, host, name, value, unit, tags FROM samples
             WHERE name = ?1 AND host = ?2 AND ts >= ?3 AND ts < ?4
             ORDER BY ts ASC",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![name, host, from.timestamp_millis(), to.timestamp_millis()],
            row_to_sample,
        )?;

        let mut samples = Vec::new();
        for row in rows {
            samples.push(row?);
        }
        Ok(samples)
    }

    /// The most recent sample for a metric, if any
    pub fn latest(&self, name: &str, host: &str) -> Result<Option<MetricSample>, StoreError> {
        debug!(%name, %host, "MetricStore::latest: called");
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare(
            "SELECT ts, host, name, value, unit, tags FROM samples
             WHERE name = ?1 AND host = ?2
             ORDER BY ts DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map(rusqlite::params![name, host], row_to_sample)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Aggregate samples into fixed-width buckets
    ///
    /// Buckets are aligned to `from`; empty buckets are omitted.
    pub fn aggregate(
        &self,
        name: &str,
        host: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        step: Duration,
        agg: AggregateFn,
    ) -> Result<Vec<AggregatePoint>, StoreError> {
        debug!(%name, %host, ?agg, "MetricStore::aggregate: called");
        let step_ms = step.num_milliseconds().max(1);
        let samples = self.query_range(name, host, from, to)?;

        let mut points: Vec<AggregatePoint> = Vec::new();
        let mut current: Option<(i64, Vec<f64>)> = None;

        for sample in &samples {
            let offset = sample.timestamp.timestamp_millis() - from.timestamp_millis();
            let bucket_idx = offset / step_ms;

            match &mut current {
                Some((idx, values)) if *idx == bucket_idx => values.push(sample.value),
                _ => {
                    if let Some((idx, values)) = current.take() {
                        points.push(finish_bucket(from, idx, step_ms, &values, agg));
                    }
                    current = Some((bucket_idx, vec![sample.value]));
                }
            }
        }
        if let Some((idx, values)) = current {
            points.push(finish_bucket(from, idx, step_ms, &values, agg));
        }

        Ok(points)
    }

    /// Delete samples older than the retention window
    ///
    /// Returns the number of rows removed.
    pub fn evict_older_than(&self, retention: Duration) -> Result<usize, StoreError> {
        let cutoff = Utc::now() - retention;
        debug!(%cutoff, "MetricStore::evict_older_than: called");
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let removed = conn.execute(
            "DELETE FROM samples WHERE ts < ?1",
            rusqlite::params![cutoff.timestamp_millis()],
        )?;
        if removed > 0 {
            info!(removed, "Evicted expired metric samples");
        }
        Ok(removed)
    }
}

fn row_to_sample(row: &rusqlite::Row<'_>) -> rusqlite::Result<MetricSample> {
    let ts_ms: i64 = row.get(0)?;
    let tags_json: String = row.get(5)?;
    Ok(MetricSample {
        timestamp: DateTime::from_timestamp_millis(ts_ms).unwrap_or_default(),
        host: row.get(1)?,
        name: row.get(2)?,
        value: row.get(3)?,
        unit: row.get(4)?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
    })
}

fn finish_bucket(from: DateTime<Utc>, idx: i64, step_ms: i64, values: &[f64], agg: AggregateFn) -> AggregatePoint {
    let value = match agg {
        AggregateFn::Avg => values.iter().sum::<f64>() / values.len() as f64,
        AggregateFn::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        AggregateFn::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        AggregateFn::Last => *values.last().expect("bucket has at least one sample"),
    };
    AggregatePoint {
        bucket: from + Duration::milliseconds(idx * step_ms),
        value,
        count: values.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_at(ts: DateTime<Utc>, name: &str, value: f64) -> MetricSample {
        MetricSample {
            timestamp: ts,
            host: "testhost".to_string(),
            name: name.to_string(),
            value,
            unit: "%".to_string(),
            tags: BTreeMap::new(),
        }
    }

    #[test]
    fn test_insert_and_query_range() {
        let store = MetricStore::open_in_memory().unwrap();
        let base = Utc::now() - Duration::minutes(10);

        for i in 0..5 {
            store
                .insert_sample(&sample_at(base + Duration::minutes(i), "cpu_pct", i as f64 * 10.0))
                .unwrap();
        }

        let samples = store
            .query_range("cpu_pct", "testhost", base, base + Duration::minutes(3))
            .unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].value, 0.0);
        assert_eq!(samples[2].value, 20.0);
    }

    #[test]
    fn test_query_range_excludes_other_metrics() {
        let store = MetricStore::open_in_memory().unwrap();
        let base = Utc::now() - Duration::minutes(10);

        store.insert_sample(&sample_at(base, "cpu_pct", 50.0)).unwrap();
        store.insert_sample(&sample_at(base, "mem_pct", 70.0)).unwrap();

        let samples = store
            .query_range("cpu_pct", "testhost", base - Duration::minutes(1), Utc::now())
            .unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].name, "cpu_pct");
    }

    #[test]
    fn test_latest() {
        let store = MetricStore::open_in_memory().unwrap();
        let base = Utc::now() - Duration::minutes(10);

        assert!(store.latest("cpu_pct", "testhost").unwrap().is_none());

        store.insert_sample(&sample_at(base, "cpu_pct", 10.0)).unwrap();
        store
            .insert_sample(&sample_at(base + Duration::minutes(5), "cpu_pct", 90.0))
            .unwrap();

        let latest = store.latest("cpu_pct", "testhost").unwrap().unwrap();
        assert_eq!(latest.value, 90.0);
    }

    #[test]
    fn test_aggregate_avg() {
        let store = MetricStore::open_in_memory().unwrap();
        let base = Utc::now() - Duration::minutes(10);

        // Two samples in the first minute bucket, one in the third
        store.insert_sample(&sample_at(base, "cpu_pct", 10.0)).unwrap();
        store
            .insert_sample(&sample_at(base + Duration::seconds(30), "cpu_pct", 30.0))
            .unwrap();
        store
            .insert_sample(&sample_at(base + Duration::minutes(2), "cpu_pct", 50.0))
            .unwrap();

        let points = store
            .aggregate(
                "cpu_pct",
                "testhost",
                base,
                base + Duration::minutes(5),
                Duration::minutes(1),
                AggregateFn::Avg,
            )
            .unwrap();

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].value, 20.0);
        assert_eq!(points[0].count, 2);
        assert_eq!(points[1].value, 50.0);
        assert_eq!(points[1].bucket, base + Duration::minutes(2));
    }

    #[test]
    fn test_aggregate_min_max_last() {
        let store = MetricStore::open_in_memory().unwrap();
        let base = Utc::now() - Duration::minutes(10);

        for (i, v) in [30.0, 10.0, 20.0].iter().enumerate() {
            store
                .insert_sample(&sample_at(base + Duration::seconds(i as i64 * 10), "load1", *v))
                .unwrap();
        }

        let range = (base, base + Duration::minutes(1));
        let min = store
            .aggregate("load1", "testhost", range.0, range.1, Duration::minutes(1), AggregateFn::Min)
            .unwrap();
        let max = store
            .aggregate("load1", "testhost", range.0, range.1, Duration::minutes(1), AggregateFn::Max)
            .unwrap();
        let last = store
            .aggregate("load1", "testhost", range.0, range.1, Duration::minutes(1), AggregateFn::Last)
            .unwrap();

        assert_eq!(min[0].value, 10.0);
        assert_eq!(max[0].value, 30.0);
        assert_eq!(last[0].value, 20.0);
    }

    #[test]
    fn test_evict_older_than() {
        let store = MetricStore::open_in_memory().unwrap();

        store
            .insert_sample(&sample_at(Utc::now() - Duration::days(40), "cpu_pct", 1.0))
            .unwrap();
        store
            .insert_sample(&sample_at(Utc::now() - Duration::minutes(1), "cpu_pct", 2.0))
            .unwrap();

        let removed = store.evict_older_than(Duration::days(30)).unwrap();
        assert_eq!(removed, 1);

        let latest = store.latest("cpu_pct", "testhost").unwrap().unwrap();
        assert_eq!(latest.value, 2.0);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("metrics.db");

        {
            let store = MetricStore::open(&path).unwrap();
            store.insert_sample(&MetricSample::now("h1", "cpu_pct", 42.0, "%")).unwrap();
        }

        let store = MetricStore::open(&path).unwrap();
        let latest = store.latest("cpu_pct", "h1").unwrap().unwrap();
        assert_eq!(latest.value, 42.0);
    }

    #[test]
    fn test_tags_round_trip() {
        let store = MetricStore::open_in_memory().unwrap();
        let mut sample = MetricSample::now("h1", "svc_active", 1.0, "bool");
        sample.tags.insert("service".to_string(), "nginx.service".to_string());
        store.insert_sample(&sample).unwrap();

        let latest = store.latest("svc_active", "h1").unwrap().unwrap();
        assert_eq!(latest.tags.get("service").map(String::as_str), Some("nginx.service"));
    }
}
