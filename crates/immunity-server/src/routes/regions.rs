use axum::extract::{Path, Query, State};
use axum::Json;
use immunity_core::config::RegionConfig;
use serde::Deserialize;
use serde_json::Value;

use super::blocking;
use crate::error::AppError;
use crate::state::AppState;

/// GET /regions: every region with its policy and occupancy.
pub async fn list_regions(State(app): State<AppState>) -> Result<Json<Value>, AppError> {
    let list = blocking(&app, |p| {
        let mut list = Vec::new();
        for r in p.regions() {
            list.push(serde_json::json!({
                "name": r.name,
                "application": r.application,
                "ordinal": r.ordinal,
                "requires_manual_approval": r.requires_manual_approval,
                "requires_monitoring": r.requires_monitoring,
                "in_progress_build": p.in_progress_build(&r.name)?,
                "next_build": p.next_build(&r.name)?,
            }));
        }
        Ok(list)
    })
    .await?;
    Ok(Json(serde_json::json!(list)))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// GET /regions/:name/history: ledger entries in the region, newest first.
pub async fn region_history(
    State(app): State<AppState>,
    Path(name): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<Value>, AppError> {
    let limit = q.limit.unwrap_or(10);
    let history = blocking(&app, move |p| p.build_history(&name, limit)).await?;
    Ok(Json(serde_json::json!(history)))
}

/// DELETE /regions/:name: remove the region, its builds and their ledgers.
pub async fn delete_region(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, AppError> {
    let region = name.clone();
    let removed = blocking(&app, move |p| p.remove_region(&region)).await?;
    Ok(Json(serde_json::json!({
        "region": name,
        "deleted_builds": removed,
    })))
}

/// GET /applications/:name/regions: regions in pipeline order.
pub async fn application_regions(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, AppError> {
    let regions = blocking(&app, move |p| p.regions_for(&name)).await?;
    Ok(Json(serde_json::json!(regions)))
}

#[derive(Debug, Deserialize)]
pub struct RegionBody {
    pub ordinal: u32,
    #[serde(default)]
    pub requires_manual_approval: bool,
    #[serde(default)]
    pub requires_monitoring: bool,
}

/// PUT /applications/:app/regions/:name: add or replace a region.
pub async fn put_region(
    State(app): State<AppState>,
    Path((application, name)): Path<(String, String)>,
    Json(body): Json<RegionBody>,
) -> Result<Json<Value>, AppError> {
    let region = RegionConfig {
        name,
        ordinal: body.ordinal,
        requires_manual_approval: body.requires_manual_approval,
        requires_monitoring: body.requires_monitoring,
    };
    let saved = blocking(&app, move |p| p.upsert_region(&application, region)).await?;
    Ok(Json(serde_json::json!(saved)))
}
