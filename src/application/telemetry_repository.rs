// Repository traits for the time-series history store
use crate::domain::telemetry::TimeSeriesPoint;
use async_trait::async_trait;
use std::sync::Arc;

/// Inclusive time window in Unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeRange {
    pub fn new(start_ms: i64, end_ms: i64) -> Self {
        Self { start_ms, end_ms }
    }
}

#[async_trait]
pub trait HistoryConnector: Send + Sync {
    /// Open a connection to the archive at `host`, using database `db`
    async fn connect(&self, host: &str, db: &str) -> anyhow::Result<Arc<dyn TelemetryRepository>>;
}

#[async_trait]
pub trait TelemetryRepository: Send + Sync {
    /// Persist one sample keyed by dictionary key + measurement name + timestamp
    async fn write(
        &self,
        dictionary_key: &str,
        measurement: &str,
        timestamp_ms: i64,
        value: f64,
    ) -> anyhow::Result<()>;

    /// Read back samples of one measurement, oldest first
    async fn query(
        &self,
        dictionary_key: &str,
        measurement: &str,
        range: TimeRange,
    ) -> anyhow::Result<Vec<TimeSeriesPoint>>;

    async fn close(&self) -> anyhow::Result<()>;
}
