//! Problem submission and aggregate reads
//!
//! Read endpoints never expose contributions or the owner.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use chorus_common::db::{CommonTheme, DivergentView, Problem, ProblemStatus, ProblemType, Synthesis};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::Identity;
use crate::db::problems::{self as problem_store, NewProblem};
use crate::db::{profiles, syntheses};
use crate::error::{ApiError, ApiResult};
use crate::rate_limit::RateLimitAction;
use crate::AppState;

pub const MAX_TITLE_CHARS: usize = 100;
pub const MAX_FIELD_CHARS: usize = 10_000;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateProblemRequest {
    #[serde(default)]
    pub problem_type: Option<ProblemType>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub situation: Option<String>,
    #[serde(default)]
    pub tried_already: Option<String>,
    #[serde(default)]
    pub desired_outcome: Option<String>,
    #[serde(default)]
    pub constraints: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateProblemResponse {
    pub id: Uuid,
    pub status: ProblemStatus,
    pub contribution_threshold: i64,
}

/// Public projection of a problem
#[derive(Debug, Serialize)]
pub struct ProblemView {
    pub id: Uuid,
    pub problem_type: ProblemType,
    pub title: String,
    pub category: Option<String>,
    pub status: ProblemStatus,
    pub contribution_count: i64,
    pub contribution_threshold: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Problem> for ProblemView {
    fn from(p: Problem) -> Self {
        Self {
            id: p.id,
            problem_type: p.problem_type,
            title: p.title,
            category: p.category,
            status: p.status,
            contribution_count: p.contribution_count,
            contribution_threshold: p.contribution_threshold,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SynthesisView {
    pub summary: String,
    pub common_themes: Vec<CommonTheme>,
    pub divergent_views: Vec<DivergentView>,
    pub considerations: Vec<String>,
    pub warnings: Vec<String>,
    pub contribution_count: i64,
    pub helpful_count: i64,
    pub created_at: DateTime<Utc>,
}

impl From<Synthesis> for SynthesisView {
    fn from(s: Synthesis) -> Self {
        Self {
            summary: s.summary,
            common_themes: s.common_themes,
            divergent_views: s.divergent_views,
            considerations: s.considerations,
            warnings: s.warnings,
            contribution_count: s.contribution_count,
            helpful_count: s.helpful_count,
            created_at: s.created_at,
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Validate a submission into storable fields
pub fn validate_new_problem(
    request: CreateProblemRequest,
    owner: Uuid,
    threshold: i64,
) -> ApiResult<NewProblem> {
    let problem_type = request.problem_type.unwrap_or_default();

    let title = non_blank(request.title)
        .ok_or_else(|| ApiError::InvalidInput("Title is required".to_string()))?;
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(ApiError::InvalidInput(format!(
            "Title must not exceed {} characters",
            MAX_TITLE_CHARS
        )));
    }

    let situation = non_blank(request.situation);
    if problem_type == ProblemType::Advice && situation.is_none() {
        return Err(ApiError::InvalidInput(
            "Situation is required for advice requests".to_string(),
        ));
    }

    let new = NewProblem {
        user_id: owner,
        problem_type,
        title,
        category: non_blank(request.category),
        situation: situation.unwrap_or_default(),
        tried_already: non_blank(request.tried_already),
        desired_outcome: non_blank(request.desired_outcome),
        constraints: non_blank(request.constraints),
        contribution_threshold: threshold,
    };

    let free_text = [
        ("situation", Some(&new.situation)),
        ("tried_already", new.tried_already.as_ref()),
        ("desired_outcome", new.desired_outcome.as_ref()),
        ("constraints", new.constraints.as_ref()),
    ];
    for (field, value) in free_text {
        if value.map_or(0, |v| v.chars().count()) > MAX_FIELD_CHARS {
            return Err(ApiError::InvalidInput(format!(
                "{} must not exceed {} characters",
                field, MAX_FIELD_CHARS
            )));
        }
    }

    Ok(new)
}

/// POST /api/problems
pub async fn create_problem(
    State(state): State<AppState>,
    identity: Identity,
    body: Result<Json<CreateProblemRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<CreateProblemResponse>)> {
    let owner = identity.user_id.ok_or(ApiError::Unauthorized)?;

    let decision = state
        .rate_limiter
        .check_action(RateLimitAction::Submit, owner)
        .await;
    if !decision.allowed {
        return Err(ApiError::RateLimited {
            retry_after: decision.reset_in,
        });
    }

    let Json(request) = body.map_err(|e| ApiError::InvalidInput(e.body_text()))?;
    let new = validate_new_problem(request, owner, state.default_threshold)?;

    let problem = problem_store::create_problem(&state.db, &new).await?;
    profiles::increment_problems_submitted(&state.db, owner).await?;

    info!(problem_id = %problem.id, problem_type = problem.problem_type.as_str(), "Problem submitted");

    Ok((
        StatusCode::CREATED,
        Json(CreateProblemResponse {
            id: problem.id,
            status: problem.status,
            contribution_threshold: problem.contribution_threshold,
        }),
    ))
}

fn parse_problem_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::NotFound("Problem not found".to_string()))
}

/// GET /api/problems/:id
pub async fn get_problem(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProblemView>> {
    let problem = problem_store::get_problem(&state.db, parse_problem_id(&id)?)
        .await?
        .ok_or_else(|| ApiError::NotFound("Problem not found".to_string()))?;

    Ok(Json(problem.into()))
}

/// GET /api/problems/:id/synthesis
pub async fn get_problem_synthesis(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SynthesisView>> {
    let synthesis = syntheses::get_synthesis_for_problem(&state.db, parse_problem_id(&id)?)
        .await?
        .ok_or_else(|| ApiError::NotFound("Synthesis not found".to_string()))?;

    Ok(Json(synthesis.into()))
}
