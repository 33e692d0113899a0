use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::contact_extractor::ContactExtractor;
use crate::errors::AppError;
use crate::kpi::{extract_kpis, EngagementCategory, SocialKpis};
use crate::models::{leads_to_csv, ContactInfo, SourcePlatform};
use crate::orchestrator::RunRequest;
use crate::scoring::LeadScorer;
use crate::task_manager::{TaskManager, TaskSnapshot, TaskState};

/// Upper bound on `max_results` accepted over HTTP.
pub const MAX_RESULTS_LIMIT: usize = 200;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Background enrichment runs.
    pub tasks: TaskManager,
    pub extractor: ContactExtractor,
    pub scorer: LeadScorer,
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rust-leadgen-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// POST /api/v1/campaigns/:id/runs
///
/// Body is a run request without `campaign_id`; omitted fields take their defaults.
/// Responds 202 with the task id to poll.
pub async fn start_run(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<String>,
    Json(mut body): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    if campaign_id.trim().is_empty() {
        return Err(AppError::BadRequest("Campaign id cannot be empty".to_string()));
    }
    let fields = body
        .as_object_mut()
        .ok_or_else(|| AppError::BadRequest("Body must be a JSON object".to_string()))?;
    fields.insert("campaign_id".to_string(), json!(campaign_id));
    if !fields.contains_key("query") {
        fields.insert("query".to_string(), json!(""));
    }

    let request: RunRequest = serde_json::from_value(body)
        .map_err(|e| AppError::BadRequest(format!("Invalid run request: {}", e)))?;

    if request.stages.extract && request.query.trim().is_empty() {
        return Err(AppError::BadRequest(
            "'query' is required when the extract stage is enabled".to_string(),
        ));
    }
    if request.max_results == 0 || request.max_results > MAX_RESULTS_LIMIT {
        return Err(AppError::BadRequest(format!(
            "'max_results' must be between 1 and {}",
            MAX_RESULTS_LIMIT
        )));
    }

    let task_id = state.tasks.start(request).await;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "task_id": task_id,
            "status_url": format!("/api/v1/tasks/{}", task_id),
        })),
    ))
}

/// GET /api/v1/tasks/:id
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<TaskSnapshot>, AppError> {
    state
        .tasks
        .get(task_id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Task {} not found", task_id)))
}

/// POST /api/v1/tasks/:id/cancel
///
/// Cooperative: the run stops after the item currently in flight.
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let snapshot = state
        .tasks
        .get(task_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Task {} not found", task_id)))?;

    if snapshot.state != TaskState::Running || !state.tasks.cancel(task_id).await {
        return Err(AppError::BadRequest(format!(
            "Task {} is not running",
            task_id
        )));
    }

    Ok(Json(json!({ "task_id": task_id, "cancel_requested": true })))
}

/// GET /api/v1/tasks/:id/leads.csv
pub async fn export_leads_csv(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let snapshot = state
        .tasks
        .get(task_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Task {} not found", task_id)))?;
    if snapshot.state == TaskState::Running {
        return Err(AppError::BadRequest(format!(
            "Task {} is still running",
            task_id
        )));
    }

    let leads = state.tasks.leads(task_id).await.unwrap_or_default();
    let csv = leads_to_csv(&leads);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"leads-{}.csv\"", task_id),
            ),
        ],
        csv,
    ))
}

#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    pub text: String,
    #[serde(default)]
    pub platform: Option<SourcePlatform>,
}

#[derive(Debug, Serialize)]
pub struct ExtractResponse {
    pub contacts: ContactInfo,
    pub kpis: SocialKpis,
    pub engagement: EngagementCategory,
    pub score: u8,
}

/// POST /api/v1/extract
///
/// Runs contact extraction, KPI parsing and scoring over posted text. Never fails
/// on content; bad text yields empty collections.
pub async fn extract_text(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ExtractRequest>,
) -> Json<ExtractResponse> {
    let platform = payload.platform.unwrap_or(SourcePlatform::Generic);
    let contacts = state.extractor.extract(&payload.text, platform);
    let kpis = extract_kpis(&payload.text);

    Json(ExtractResponse {
        contacts,
        engagement: kpis.engagement_category(),
        kpis,
        score: state.scorer.score(&payload.text),
    })
}
