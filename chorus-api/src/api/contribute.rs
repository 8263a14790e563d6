//! POST /api/contribute

use axum::{extract::rejection::JsonRejection, extract::State, Json};
use serde::Serialize;
use tracing::debug;

use super::Identity;
use crate::error::ApiResult;
use crate::intake::ContributionSubmission;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributeResponse {
    pub success: bool,
    pub flagged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag_reason: Option<String>,
}

/// Submit one contribution
///
/// An unreadable body is treated as empty so identity and rate-limit
/// checks still run first.
pub async fn submit_contribution(
    State(state): State<AppState>,
    identity: Identity,
    body: Result<Json<ContributionSubmission>, JsonRejection>,
) -> ApiResult<Json<ContributeResponse>> {
    let submission = match body {
        Ok(Json(submission)) => submission,
        Err(rejection) => {
            debug!("Unreadable contribution body: {}", rejection);
            ContributionSubmission::default()
        }
    };

    let receipt = state.intake.submit(identity.user_id, submission).await?;

    // Synthesis keeps running on its own task
    drop(receipt.synthesis);

    Ok(Json(ContributeResponse {
        success: true,
        flagged: receipt.flagged,
        flag_reason: receipt.flag_reason,
    }))
}
