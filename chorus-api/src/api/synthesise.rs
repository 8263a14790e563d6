//! POST /api/synthesise/:problem_id

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};

use super::Identity;
use crate::error::ApiResult;
use crate::AppState;

/// Manually trigger synthesis for a problem
///
/// Runs inline: the response reports the outcome of the run.
pub async fn trigger_synthesis(
    State(state): State<AppState>,
    Path(problem_id): Path<String>,
    identity: Identity,
) -> ApiResult<Json<Value>> {
    state
        .orchestrator
        .trigger(&problem_id, identity.synthesis_caller())
        .await?;

    Ok(Json(json!({ "success": true })))
}
