// Catalog service - dictionary listing and history reads for the HTTP surface
use crate::application::telemetry_repository::{TelemetryRepository, TimeRange};
use crate::domain::dictionary::Dictionary;
use crate::domain::telemetry::TimeSeriesPoint;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unknown dictionary '{0}'")]
    UnknownDictionary(String),

    #[error("dictionary '{dictionary}' has no measurement '{measurement}'")]
    UnknownMeasurement {
        dictionary: String,
        measurement: String,
    },

    #[error("invalid time range: start {start} is after end {end}")]
    InvalidRange { start: i64, end: i64 },

    #[error("history store is not connected")]
    HistoryUnavailable,

    #[error("history query failed: {0}")]
    History(#[from] anyhow::Error),
}

#[derive(Clone)]
pub struct TelemetryCatalog {
    dictionaries: Arc<Vec<Arc<Dictionary>>>,
    history: Arc<OnceLock<Arc<dyn TelemetryRepository>>>,
}

impl TelemetryCatalog {
    pub fn new(dictionaries: Vec<Arc<Dictionary>>) -> Self {
        Self {
            dictionaries: Arc::new(dictionaries),
            history: Arc::new(OnceLock::new()),
        }
    }

    /// Make history reads available. The store connects after the HTTP listener
    /// binds, so reads answer `HistoryUnavailable` until this is called.
    pub fn attach_history(&self, repository: Arc<dyn TelemetryRepository>) {
        if self.history.set(repository).is_err() {
            tracing::warn!("History store already attached to catalog");
        }
    }

    pub fn dictionaries(&self) -> &[Arc<Dictionary>] {
        &self.dictionaries
    }

    pub fn dictionary(&self, key: &str) -> Option<&Arc<Dictionary>> {
        self.dictionaries.iter().find(|d| d.key() == key)
    }

    pub async fn history(
        &self,
        dictionary_key: &str,
        measurement: &str,
        range: TimeRange,
        max_points: Option<usize>,
    ) -> Result<Vec<TimeSeriesPoint>, CatalogError> {
        if range.start_ms > range.end_ms {
            return Err(CatalogError::InvalidRange {
                start: range.start_ms,
                end: range.end_ms,
            });
        }
        let dictionary = self
            .dictionary(dictionary_key)
            .ok_or_else(|| CatalogError::UnknownDictionary(dictionary_key.to_string()))?;
        dictionary
            .lookup(measurement)
            .map_err(|_| CatalogError::UnknownMeasurement {
                dictionary: dictionary_key.to_string(),
                measurement: measurement.to_string(),
            })?;

        let repository = self.history.get().ok_or(CatalogError::HistoryUnavailable)?;
        let points = repository.query(dictionary_key, measurement, range).await?;

        match max_points {
            Some(max) if max > 0 && points.len() > max => Ok(downsample_points(points, max)),
            _ => Ok(points),
        }
    }
}

/// Downsample time series points using bucket averaging
pub fn downsample_points(points: Vec<TimeSeriesPoint>, max_points: usize) -> Vec<TimeSeriesPoint> {
    if points.is_empty() || max_points == 0 || points.len() <= max_points {
        return points;
    }

    let bucket_size = (points.len() as f64 / max_points as f64).ceil() as usize;
    let mut downsampled = Vec::with_capacity(max_points);

    for chunk in points.chunks(bucket_size) {
        // Use middle point's timestamp and average value
        let mid_idx = chunk.len() / 2;
        let avg_value = chunk.iter().map(|p| p.value).sum::<f64>() / chunk.len() as f64;

        downsampled.push(TimeSeriesPoint::new(chunk[mid_idx].time_ms, avg_value));
    }

    downsampled
}
