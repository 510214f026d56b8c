// HTTP request handlers
use crate::application::catalog::CatalogError;
use crate::application::telemetry_repository::TimeRange;
use crate::presentation::app_state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DEFAULT_HISTORY_WINDOW_MS: i64 = 60 * 60 * 1000;

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub max_points: Option<usize>,
}

#[derive(Serialize)]
pub struct DictionarySummary {
    pub name: String,
    pub key: String,
}

impl IntoResponse for CatalogError {
    fn into_response(self) -> Response {
        let status = match &self {
            CatalogError::UnknownDictionary(_) | CatalogError::UnknownMeasurement { .. } => {
                StatusCode::NOT_FOUND
            }
            CatalogError::InvalidRange { .. } => StatusCode::BAD_REQUEST,
            CatalogError::HistoryUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            CatalogError::History(e) => {
                tracing::error!(error = %e, "History query failed");
                StatusCode::BAD_GATEWAY
            }
        };
        (status, self.to_string()).into_response()
    }
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// List registered dictionaries
pub async fn list_dictionaries(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let summaries: Vec<DictionarySummary> = state
        .catalog
        .dictionaries()
        .iter()
        .map(|d| DictionarySummary {
            name: d.display_name().to_string(),
            key: d.key().to_string(),
        })
        .collect();
    Json(summaries)
}

/// Full dictionary document with every measurement and its encodings
pub async fn get_dictionary(
    Path(key): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, CatalogError> {
    let dictionary = state
        .catalog
        .dictionary(&key)
        .ok_or(CatalogError::UnknownDictionary(key))?;
    Ok(Json(dictionary.as_ref()).into_response())
}

/// Archived samples for one measurement; defaults to the last hour
pub async fn get_history(
    Path((key, measurement)): Path<(String, String)>,
    Query(query): Query<HistoryQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, CatalogError> {
    let end = query
        .end
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
    let start = query
        .start
        .unwrap_or_else(|| end.saturating_sub(DEFAULT_HISTORY_WINDOW_MS));

    let points = state
        .catalog
        .history(&key, &measurement, TimeRange::new(start, end), query.max_points)
        .await?;
    Ok(Json(points).into_response())
}
