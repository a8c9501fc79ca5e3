use axum::extract::{Path, Query, State};
use axum::Json;
use immunity_core::{BuildFilter, BuildState, NewBuild, PipelineEvent, StatusPayload};
use serde::Deserialize;
use serde_json::Value;

use super::blocking;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub repo: Option<String>,
    pub region: Option<String>,
    pub state: Option<String>,
    pub limit: Option<usize>,
}

/// GET /builds: newest first, optionally filtered.
pub async fn list_builds(
    State(app): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Value>, AppError> {
    let state = q.state.as_deref().map(str::parse::<BuildState>).transpose()?;
    let filter = BuildFilter {
        repo: q.repo,
        region: q.region,
        state,
        limit: q.limit,
    };
    let builds = blocking(&app, move |p| p.list_builds(&filter)).await?;
    Ok(Json(serde_json::json!(builds)))
}

fn required_str(body: &Value, key: &str) -> Result<String, AppError> {
    match body.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(AppError::bad_request(format!("'{key}' must be a string"))),
        None => Err(AppError::bad_request(format!("missing required key '{key}'"))),
    }
}

/// POST /builds: create a build and start deploying it.
pub async fn create_build(
    State(app): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let mut new = NewBuild::new(
        required_str(&body, "repo")?,
        required_str(&body, "commit")?,
        required_str(&body, "current_region")?,
    );
    new.is_test_build = match body.get("is_test_build") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => return Err(AppError::bad_request("'is_test_build' must be a boolean")),
    };
    let build = blocking(&app, move |p| p.create_build(new)).await?;
    Ok(Json(serde_json::json!(build)))
}

/// GET /builds/:id
pub async fn get_build(
    State(app): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Value>, AppError> {
    let build = blocking(&app, move |p| p.get_build(id)).await?;
    Ok(Json(serde_json::json!(build)))
}

/// DELETE /builds/:id
pub async fn delete_build(
    State(app): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Value>, AppError> {
    blocking(&app, move |p| p.delete_build(id)).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

/// DELETE /builds/test_builds
pub async fn delete_test_builds(State(app): State<AppState>) -> Result<Json<Value>, AppError> {
    let count = blocking(&app, |p| p.delete_test_builds()).await?;
    Ok(Json(serde_json::json!({ "deleted": count })))
}

/// Body of the deploy and test status reports: `{"status": .., "log": ..}`.
#[derive(Debug)]
pub struct StatusReport {
    pub status: String,
    pub log: String,
}

impl StatusReport {
    fn from_body(body: &Value) -> Result<Self, AppError> {
        Ok(Self {
            status: required_str(body, "status")?,
            log: required_str(body, "log")?,
        })
    }

    fn payload(&self) -> StatusPayload {
        StatusPayload::default().with_log(self.log.clone())
    }
}

/// PUT /builds/:id/deploy_status: deploy agent reports `success` or `failed`.
pub async fn put_deploy_status(
    State(app): State<AppState>,
    Path(id): Path<u64>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let report = StatusReport::from_body(&body)?;
    let (event, then) = match report.status.as_str() {
        "success" => (PipelineEvent::DeploySucceeded, Some(PipelineEvent::BeginTesting)),
        "failed" => (PipelineEvent::DeployFailed, None),
        other => return Err(AppError::bad_request(format!("unknown status '{other}'"))),
    };
    let payload = report.payload();
    let chain = blocking(&app, move |p| p.apply_then(id, event, payload, then)).await?;
    Ok(Json(serde_json::json!(chain.applied.status)))
}

/// PUT /builds/:id/test_status: test agent reports `success` or `failed`.
pub async fn put_test_status(
    State(app): State<AppState>,
    Path(id): Path<u64>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let report = StatusReport::from_body(&body)?;
    let success = match report.status.as_str() {
        "success" => true,
        "failed" => false,
        other => return Err(AppError::bad_request(format!("unknown status '{other}'"))),
    };
    let payload = report.payload();
    let chain = blocking(&app, move |p| {
        if success {
            p.apply_then(id, PipelineEvent::TestingSucceeded, payload, p.auto_deploy())
        } else {
            p.apply_then(id, PipelineEvent::TestingFailed, payload, None)
        }
    })
    .await?;
    Ok(Json(serde_json::json!(chain.applied.status)))
}

/// POST /builds/:id/events: apply one named event, no continuation.
///
/// Body is `{"event": .., "message"?, "stdout"?, "stderr"?, "region"?}`.
pub async fn post_event(
    State(app): State<AppState>,
    Path(id): Path<u64>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let event: PipelineEvent = required_str(&body, "event")?.parse()?;
    let payload: StatusPayload = serde_json::from_value(body)
        .map_err(|e| AppError::bad_request(format!("invalid event payload: {e}")))?;
    let applied = blocking(&app, move |p| p.apply(id, event, payload)).await?;
    Ok(Json(serde_json::json!(applied)))
}

/// GET /builds/:id/statuses: ledger for one build, newest first.
pub async fn list_statuses(
    State(app): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Value>, AppError> {
    let statuses = blocking(&app, move |p| p.statuses_for_build(id)).await?;
    Ok(Json(serde_json::json!(statuses)))
}

/// GET /build_status/:build_id/:region: latest ledger entry.
pub async fn get_build_status(
    State(app): State<AppState>,
    Path((build_id, region)): Path<(u64, String)>,
) -> Result<Json<Value>, AppError> {
    let status = blocking(&app, move |p| p.latest_status(build_id, &region)).await?;
    Ok(Json(serde_json::json!(status)))
}
