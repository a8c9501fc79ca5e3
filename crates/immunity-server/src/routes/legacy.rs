//! Form-encoded callbacks used by older deploy and test agents.
//!
//! Each endpoint maps one-to-one onto a pipeline event and answers with the
//! build as left by the event and any continuation.

use std::collections::HashMap;

use axum::extract::State;
use axum::{Form, Json};
use immunity_core::{PipelineEvent, StatusPayload};
use serde_json::Value;

use super::blocking;
use crate::error::AppError;
use crate::state::AppState;

/// Fields shared by every callback. Only `build_id` is required.
#[derive(Debug)]
pub struct CallbackForm {
    pub build_id: u64,
    pub payload: StatusPayload,
}

impl CallbackForm {
    fn parse(mut fields: HashMap<String, String>) -> Result<Self, AppError> {
        let build_id = match fields.remove("build_id") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|_| AppError::bad_request(format!("invalid build_id '{raw}'")))?,
            None => return Err(AppError::bad_request("missing required key 'build_id'")),
        };
        let mut take = |key: &str| fields.remove(key).filter(|v| !v.is_empty());
        let payload = StatusPayload {
            message: take("message"),
            stdout: take("stdout"),
            stderr: take("stderr"),
            region: take("region"),
        };
        Ok(Self { build_id, payload })
    }
}

#[derive(Debug, Clone, Copy)]
enum Continue {
    Never,
    Always(PipelineEvent),
    /// Only with `pipeline.auto_advance`.
    AutoDeploy,
}

async fn fire(
    app: AppState,
    fields: HashMap<String, String>,
    event: PipelineEvent,
    then: Continue,
) -> Result<Json<Value>, AppError> {
    let CallbackForm {
        build_id: id,
        payload,
    } = CallbackForm::parse(fields)?;
    let chain = blocking(&app, move |p| {
        let then = match then {
            Continue::Never => None,
            Continue::Always(next) => Some(next),
            Continue::AutoDeploy => p.auto_deploy(),
        };
        p.apply_then(id, event, payload, then)
    })
    .await?;
    Ok(Json(serde_json::json!(chain.build())))
}

/// POST /deploy_succeed
pub async fn deploy_succeed(
    State(app): State<AppState>,
    Form(form): Form<HashMap<String, String>>,
) -> Result<Json<Value>, AppError> {
    fire(
        app,
        form,
        PipelineEvent::DeploySucceeded,
        Continue::Always(PipelineEvent::BeginTesting),
    )
    .await
}

/// POST /deploy_failed
pub async fn deploy_failed(
    State(app): State<AppState>,
    Form(form): Form<HashMap<String, String>>,
) -> Result<Json<Value>, AppError> {
    fire(app, form, PipelineEvent::DeployFailed, Continue::Never).await
}

/// POST /test_succeed
pub async fn test_succeed(
    State(app): State<AppState>,
    Form(form): Form<HashMap<String, String>>,
) -> Result<Json<Value>, AppError> {
    fire(app, form, PipelineEvent::TestingSucceeded, Continue::AutoDeploy).await
}

/// POST /test_failed
pub async fn test_failed(
    State(app): State<AppState>,
    Form(form): Form<HashMap<String, String>>,
) -> Result<Json<Value>, AppError> {
    fire(app, form, PipelineEvent::TestingFailed, Continue::Never).await
}

/// POST /monitor_succeed
pub async fn monitor_succeed(
    State(app): State<AppState>,
    Form(form): Form<HashMap<String, String>>,
) -> Result<Json<Value>, AppError> {
    fire(app, form, PipelineEvent::MonitoringSucceeded, Continue::AutoDeploy).await
}

/// POST /monitor_failed
pub async fn monitor_failed(
    State(app): State<AppState>,
    Form(form): Form<HashMap<String, String>>,
) -> Result<Json<Value>, AppError> {
    fire(app, form, PipelineEvent::MonitoringFailed, Continue::Never).await
}

/// POST /manual_deploy_confirmed
pub async fn manual_deploy_confirmed(
    State(app): State<AppState>,
    Form(form): Form<HashMap<String, String>>,
) -> Result<Json<Value>, AppError> {
    fire(
        app,
        form,
        PipelineEvent::ManualDeployConfirmed,
        Continue::AutoDeploy,
    )
    .await
}
