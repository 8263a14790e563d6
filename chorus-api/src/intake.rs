//! Contribution intake
//!
//! Admits one contribution: validates, consults the safety gate, then
//! stores the row and (for safe content) its counters in one transaction.
//! When the problem reaches its threshold the intake claims it and
//! dispatches synthesis on a detached task.

use chorus_common::db::ProblemStatus;
use chorus_common::events::{ChorusEvent, EventBus};
use serde::Deserialize;
use serde_json::Value;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::contributions::{self, ContributionInsert, NewContribution};
use crate::db::problems;
use crate::error::{ApiError, ApiResult};
use crate::rate_limit::{RateLimitAction, RateLimiter};
use crate::safety::{ContentSafetyGate, SafetyFailurePolicy, SafetyVerdict};
use crate::synthesis::orchestrator::SynthesisOutcome;
use crate::synthesis::SynthesisOrchestrator;

/// Minimum contribution length after trimming, in characters
pub const MIN_CONTENT_CHARS: usize = 10;
/// Maximum raw contribution length, in characters
pub const MAX_CONTENT_CHARS: usize = 10_000;

/// Retry guidance when the safety gate is unavailable
const SAFETY_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Raw request body; fields are checked by [`ContributionIntake::submit`]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContributionSubmission {
    #[serde(default)]
    pub problem_id: Option<Value>,
    #[serde(default)]
    pub content: Option<Value>,
}

/// What the contributor learns about their submission
#[derive(Debug)]
pub struct ContributionReceipt {
    pub contribution_id: Uuid,
    pub flagged: bool,
    pub flag_reason: Option<String>,
    /// Present when this contribution claimed the problem for synthesis
    pub synthesis: Option<JoinHandle<ApiResult<SynthesisOutcome>>>,
}

pub struct ContributionIntake {
    db: SqlitePool,
    rate_limiter: Arc<RateLimiter>,
    safety_gate: Arc<dyn ContentSafetyGate>,
    safety_policy: SafetyFailurePolicy,
    orchestrator: Arc<SynthesisOrchestrator>,
    event_bus: EventBus,
}

impl ContributionIntake {
    pub fn new(
        db: SqlitePool,
        rate_limiter: Arc<RateLimiter>,
        safety_gate: Arc<dyn ContentSafetyGate>,
        safety_policy: SafetyFailurePolicy,
        orchestrator: Arc<SynthesisOrchestrator>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            db,
            rate_limiter,
            safety_gate,
            safety_policy,
            orchestrator,
            event_bus,
        }
    }

    /// Admit one contribution from `actor`
    ///
    /// Validation and authorization failures return before any write.
    pub async fn submit(
        &self,
        actor: Option<Uuid>,
        submission: ContributionSubmission,
    ) -> ApiResult<ContributionReceipt> {
        let actor = actor.ok_or(ApiError::Unauthorized)?;

        let decision = self
            .rate_limiter
            .check_action(RateLimitAction::Contribute, actor)
            .await;
        if !decision.allowed {
            debug!(user_id = %actor, "Contribution rate limited");
            return Err(ApiError::RateLimited {
                retry_after: decision.reset_in,
            });
        }

        let (problem_id, content) = required_fields(&submission)?;
        let content = validate_content(content)?;

        let problem_id = Uuid::parse_str(problem_id.trim())
            .map_err(|_| ApiError::NotFound("Problem not found".to_string()))?;
        let problem = problems::get_problem(&self.db, problem_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Problem not found".to_string()))?;

        if problem.status != ProblemStatus::Gathering {
            return Err(not_accepting());
        }
        if problem.user_id == actor {
            return Err(ApiError::Forbidden(
                "You cannot contribute to your own problem".to_string(),
            ));
        }
        // Saves a safety call; the UNIQUE constraint below is authoritative
        if contributions::has_contributed(&self.db, problem_id, actor).await? {
            return Err(ApiError::DuplicateContribution);
        }

        let verdict = self.evaluate(content).await?;

        let inserted = contributions::record_contribution(
            &self.db,
            &NewContribution {
                problem_id,
                user_id: actor,
                content,
                flagged_harmful: !verdict.safe,
            },
        )
        .await
        .map_err(|e| {
            if e.is_unique_violation() {
                ApiError::DuplicateContribution
            } else {
                ApiError::from(e)
            }
        })?;

        let contribution_id = match inserted {
            ContributionInsert::Inserted(id) => id,
            ContributionInsert::ProblemNotGathering => return Err(not_accepting()),
        };

        if !verdict.safe {
            info!(problem_id = %problem_id, "Contribution flagged by safety gate");
            return Ok(ContributionReceipt {
                contribution_id,
                flagged: true,
                flag_reason: verdict.reason,
                synthesis: None,
            });
        }

        // The contribution is committed; a failed trigger is logged, never returned
        let synthesis = match self.maybe_trigger_synthesis(problem_id).await {
            Ok(handle) => handle,
            Err(e) => {
                error!(problem_id = %problem_id, "Synthesis trigger check failed: {}", e);
                None
            }
        };

        Ok(ContributionReceipt {
            contribution_id,
            flagged: false,
            flag_reason: None,
            synthesis,
        })
    }

    /// Consult the gate, applying the failure policy
    async fn evaluate(&self, content: &str) -> ApiResult<SafetyVerdict> {
        match self.safety_gate.check(content).await {
            Ok(verdict) => Ok(verdict),
            Err(e) => match self.safety_policy {
                SafetyFailurePolicy::FailOpen => {
                    warn!("Safety gate failed, admitting content as safe: {}", e);
                    Ok(SafetyVerdict::safe())
                }
                SafetyFailurePolicy::FailClosed => {
                    warn!("Safety gate failed, rejecting contribution: {}", e);
                    Err(ApiError::SafetyUnavailable {
                        reason: e.to_string(),
                        retry_after: SAFETY_RETRY_AFTER,
                    })
                }
            },
        }
    }

    /// Re-read the problem and claim it if the threshold is reached
    ///
    /// Only the caller whose conditional update wins gets a handle; every
    /// other concurrent caller is a silent no-op.
    async fn maybe_trigger_synthesis(
        &self,
        problem_id: Uuid,
    ) -> ApiResult<Option<JoinHandle<ApiResult<SynthesisOutcome>>>> {
        let Some(problem) = problems::get_problem(&self.db, problem_id).await? else {
            return Ok(None);
        };

        self.event_bus.emit_lossy(ChorusEvent::ProblemUpdated {
            problem_id,
            status: problem.status.to_string(),
            contribution_count: problem.contribution_count,
            timestamp: chorus_common::time::now(),
        });

        if !problem.threshold_reached() || problem.status != ProblemStatus::Gathering {
            return Ok(None);
        }

        if !self.orchestrator.claim(&problem).await? {
            debug!(problem_id = %problem_id, "Threshold reached but another request claimed synthesis");
            return Ok(None);
        }

        info!(
            problem_id = %problem_id,
            count = problem.contribution_count,
            threshold = problem.contribution_threshold,
            "Threshold reached, dispatching synthesis"
        );
        Ok(Some(self.orchestrator.spawn_claimed(problem)))
    }
}

fn not_accepting() -> ApiError {
    ApiError::InvalidState("This problem is no longer accepting contributions".to_string())
}

fn missing_fields() -> ApiError {
    ApiError::InvalidInput("Missing required fields".to_string())
}

/// Both fields present and non-empty; `problem_id` must be a string
fn required_fields(submission: &ContributionSubmission) -> ApiResult<(&str, &Value)> {
    let problem_id = match &submission.problem_id {
        None | Some(Value::Null) => return Err(missing_fields()),
        Some(Value::String(s)) if s.trim().is_empty() => return Err(missing_fields()),
        Some(Value::String(s)) => s.as_str(),
        Some(_) => return Err(ApiError::InvalidInput("problem_id must be a string".to_string())),
    };

    let content = match &submission.content {
        None | Some(Value::Null) => return Err(missing_fields()),
        Some(Value::String(s)) if s.is_empty() => return Err(missing_fields()),
        Some(value) => value,
    };

    Ok((problem_id, content))
}

/// Content must be a string of 10..=10000 characters (minimum after trim)
pub fn validate_content(content: &Value) -> ApiResult<&str> {
    let text = content
        .as_str()
        .ok_or_else(|| ApiError::InvalidInput("Content must be a string".to_string()))?;

    if text.chars().count() > MAX_CONTENT_CHARS {
        return Err(ApiError::InvalidInput(format!(
            "Contribution must not exceed {} characters",
            MAX_CONTENT_CHARS
        )));
    }
    if text.trim().chars().count() < MIN_CONTENT_CHARS {
        return Err(ApiError::InvalidInput(format!(
            "Contribution must be at least {} characters",
            MIN_CONTENT_CHARS
        )));
    }

    Ok(text)
}
