use std::sync::Arc;

use axum::{
    extract::State,
    http::HeaderValue,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::{PerformanceDataPoint, Subject};
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateInsightsRequest {
    pub subject: Subject,
    /// Inline data; when absent the dataset source is queried.
    #[serde(default)]
    pub dataset: Option<Vec<PerformanceDataPoint>>,
    #[serde(default)]
    pub model: Option<String>,
}

/// POST /api/v1/insights
///
/// Every insight outcome (generated, cached, fallback, rate limited,
/// superseded) is a 200 with a non-empty list; only bad input and dataset
/// lookup failures are errors.
pub async fn generate_insights(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerateInsightsRequest>,
) -> Result<Response, AppError> {
    let has_id = |id: &Option<String>| id.as_deref().is_some_and(|s| !s.trim().is_empty());
    if !has_id(&req.subject.athlete_id) && !has_id(&req.subject.team_id) {
        return Err(AppError::InvalidRequest(
            "subject needs an athleteId or a teamId".into(),
        ));
    }

    let dataset = match req.dataset {
        Some(dataset) => dataset,
        None => state.datasets.fetch_subject_data(&req.subject).await?,
    };

    let model = req
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| state.default_model.clone());

    let insights = state
        .insights
        .generate_insights(&req.subject, &dataset, &model)
        .await;

    let retry_after = insights.retry_after_secs;
    let mut response = Json(insights).into_response();
    if let Some(secs) = retry_after {
        if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
            response.headers_mut().insert("retry-after", value);
        }
    }
    Ok(response)
}
