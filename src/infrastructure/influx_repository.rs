// InfluxDB repository implementation
use crate::application::telemetry_repository::{HistoryConnector, TelemetryRepository, TimeRange};
use crate::domain::telemetry::TimeSeriesPoint;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct InfluxRepository {
    client: reqwest::Client,
    host: String,
    database: String,
}

#[derive(Debug, Deserialize)]
struct InfluxQLResponse {
    results: Vec<InfluxQLResult>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLResult {
    #[serde(default)]
    series: Option<Vec<InfluxQLSeries>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InfluxQLSeries {
    columns: Vec<String>,
    values: Vec<Vec<serde_json::Value>>,
}

impl InfluxRepository {
    pub fn new(host: &str, database: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: host.trim_end_matches('/').to_string(),
            database: database.to_string(),
        }
    }

    fn build_query_url(&self, query: &str) -> String {
        let encoded_query = urlencoding::encode(query);
        format!(
            "{}/query?db={}&epoch=ms&q={}",
            self.host,
            urlencoding::encode(&self.database),
            encoded_query
        )
    }

    fn build_write_url(&self) -> String {
        format!(
            "{}/write?db={}&precision=ms",
            self.host,
            urlencoding::encode(&self.database)
        )
    }

    /// Fails unless the server answers its health endpoint.
    pub async fn ping(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/ping", self.host))
            .send()
            .await
            .context("Failed to reach InfluxDB")?;

        if !response.status().is_success() {
            anyhow::bail!("InfluxDB ping failed with status {}", response.status());
        }
        Ok(())
    }

    async fn execute_query(&self, query: &str) -> Result<InfluxQLResponse> {
        let url = self.build_query_url(query);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .context("Failed to send request to InfluxDB")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("InfluxDB query failed with status {}: {}", status, body);
        }

        let data = response
            .json::<InfluxQLResponse>()
            .await
            .context("Failed to parse InfluxDB response")?;

        // Check for errors in the response
        if let Some(result) = data.results.first() {
            if let Some(error) = &result.error {
                anyhow::bail!("InfluxDB query error: {}", error);
            }
        }

        Ok(data)
    }
}

#[async_trait]
impl TelemetryRepository for InfluxRepository {
    async fn write(
        &self,
        dictionary_key: &str,
        measurement: &str,
        timestamp_ms: i64,
        value: f64,
    ) -> Result<()> {
        let line = line_protocol(dictionary_key, measurement, timestamp_ms, value);

        let response = self
            .client
            .post(self.build_write_url())
            .body(line)
            .send()
            .await
            .context("Failed to send write to InfluxDB")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("InfluxDB write failed with status {}: {}", status, body);
        }

        Ok(())
    }

    async fn query(
        &self,
        dictionary_key: &str,
        measurement: &str,
        range: TimeRange,
    ) -> Result<Vec<TimeSeriesPoint>> {
        let query = history_query(dictionary_key, measurement, range);
        tracing::debug!("Executing history query: {}", query);
        let response = self.execute_query(&query).await?;

        let mut points = Vec::new();
        if let Some(result) = response.results.first() {
            if let Some(series) = &result.series {
                for s in series {
                    let time_idx = s.columns.iter().position(|c| c == "time").unwrap_or(0);
                    let value_idx = s.columns.iter().position(|c| c == "value").unwrap_or(1);

                    for value_row in &s.values {
                        if let (Some(time), Some(value)) = (
                            value_row.get(time_idx).and_then(|v| v.as_i64()),
                            value_row.get(value_idx).and_then(|v| v.as_f64()),
                        ) {
                            points.push(TimeSeriesPoint::new(time, value));
                        }
                    }
                }
            }
        }

        Ok(points)
    }

    async fn close(&self) -> Result<()> {
        // Plain HTTP, nothing held open beyond the client's idle pool.
        Ok(())
    }
}

pub struct InfluxConnector;

#[async_trait]
impl HistoryConnector for InfluxConnector {
    async fn connect(&self, host: &str, db: &str) -> Result<Arc<dyn TelemetryRepository>> {
        let repository = InfluxRepository::new(host, db);
        repository.ping().await?;
        tracing::info!(host, db, "Connected to InfluxDB");
        Ok(Arc::new(repository))
    }
}

/// `<dictionary>,measurement=<name> value=<value> <timestamp>`
pub fn line_protocol(dictionary_key: &str, measurement: &str, timestamp_ms: i64, value: f64) -> String {
    format!(
        "{},measurement={} value={} {}",
        escape_measurement(dictionary_key),
        escape_tag(measurement),
        value,
        timestamp_ms
    )
}

fn escape_measurement(raw: &str) -> String {
    raw.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_tag(raw: &str) -> String {
    raw.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

fn history_query(dictionary_key: &str, measurement: &str, range: TimeRange) -> String {
    format!(
        "SELECT value FROM \"{}\" WHERE \"measurement\" = '{}' AND time >= {}ms AND time <= {}ms ORDER BY time ASC",
        dictionary_key.replace('\\', "\\\\").replace('"', "\\\""),
        measurement.replace('\\', "\\\\").replace('\'', "\\'"),
        range.start_ms,
        range.end_ms
    )
}
