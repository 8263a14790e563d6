//! Synthesis orchestrator
//!
//! Owns one problem's synthesis lifecycle:
//!
//! ```text
//! gathering ──claim──▶ synthesising ──stored──▶ complete
//!     ▲                     │
//!     └──────rollback───────┘  (no contributions, generator or storage failure)
//! ```
//!
//! The claim is a conditional update, so at most one caller ever runs the
//! generator for a problem at a time. Every run that starts in
//! `synthesising` ends in `complete` or back in `gathering`.

use chorus_common::db::{Problem, ProblemStatus, Synthesis};
use chorus_common::events::{ChorusEvent, EventBus};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{GeneratedSynthesis, ProblemContext, SynthesisGenerator};
use crate::db::{contributions, problems, profiles, syntheses};
use crate::error::{ApiError, ApiResult};
use crate::rate_limit::{RateLimitAction, RateLimiter};

const NOT_GATHERING: &str = "Problem is not in gathering phase";
const NOT_FOUND: &str = "Problem not found";

/// Who is asking for a manual synthesis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisCaller {
    /// Presented the internal secret; exempt from rate limit and ownership
    Internal,
    /// Authenticated end user
    User(Uuid),
}

/// Result of a completed run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthesisOutcome {
    pub synthesis_id: Uuid,
    /// Non-flagged contributions fed to the generator
    pub contribution_count: i64,
}

pub struct SynthesisOrchestrator {
    db: SqlitePool,
    generator: Arc<dyn SynthesisGenerator>,
    rate_limiter: Arc<RateLimiter>,
    event_bus: EventBus,
    generator_timeout: Duration,
}

impl SynthesisOrchestrator {
    pub fn new(
        db: SqlitePool,
        generator: Arc<dyn SynthesisGenerator>,
        rate_limiter: Arc<RateLimiter>,
        event_bus: EventBus,
        generator_timeout: Duration,
    ) -> Self {
        Self {
            db,
            generator,
            rate_limiter,
            event_bus,
            generator_timeout,
        }
    }

    /// Manual trigger
    ///
    /// Checks in order: identity, rate limit (users only), existence,
    /// permission (owner or admin), status. Then claims and runs inline.
    pub async fn trigger(
        &self,
        problem_id: &str,
        caller: Option<SynthesisCaller>,
    ) -> ApiResult<SynthesisOutcome> {
        let caller = caller.ok_or(ApiError::Unauthorized)?;

        if let SynthesisCaller::User(user_id) = caller {
            let decision = self
                .rate_limiter
                .check_action(RateLimitAction::Synthesise, user_id)
                .await;
            if !decision.allowed {
                return Err(ApiError::RateLimited {
                    retry_after: decision.reset_in,
                });
            }
        }

        let problem_id =
            Uuid::parse_str(problem_id).map_err(|_| ApiError::NotFound(NOT_FOUND.to_string()))?;
        let problem = problems::get_problem(&self.db, problem_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(NOT_FOUND.to_string()))?;

        if let SynthesisCaller::User(user_id) = caller {
            if problem.user_id != user_id && !profiles::is_admin(&self.db, user_id).await? {
                return Err(ApiError::Forbidden(
                    "Only the problem owner can request synthesis".to_string(),
                ));
            }
        }

        if problem.status != ProblemStatus::Gathering {
            return Err(ApiError::InvalidState(NOT_GATHERING.to_string()));
        }

        // The read above may already be stale
        if !self.claim(&problem).await? {
            return Err(ApiError::InvalidState(NOT_GATHERING.to_string()));
        }

        info!(problem_id = %problem.id, ?caller, "Manual synthesis claimed");
        self.run_claimed(&problem).await
    }

    /// Try to move `problem` from gathering to synthesising
    ///
    /// Returns true only for the caller whose update changed the row.
    pub async fn claim(&self, problem: &Problem) -> ApiResult<bool> {
        let claimed = problems::claim_transition(
            &self.db,
            problem.id,
            ProblemStatus::Gathering,
            ProblemStatus::Synthesising,
        )
        .await?;

        if claimed {
            self.emit_status(problem, ProblemStatus::Synthesising).await;
        }
        Ok(claimed)
    }

    /// Run a claimed problem on a detached task
    ///
    /// Failures are logged here; the handle lets callers await the result
    /// if they want it.
    pub fn spawn_claimed(self: &Arc<Self>, problem: Problem) -> JoinHandle<ApiResult<SynthesisOutcome>> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let result = this.run_claimed(&problem).await;
            if let Err(e) = &result {
                error!(problem_id = %problem.id, "Background synthesis failed: {}", e);
            }
            result
        })
    }

    /// Generate and store the synthesis for a problem already in
    /// `synthesising`
    ///
    /// On any failure the problem is returned to `gathering` before the
    /// error is surfaced.
    pub async fn run_claimed(&self, problem: &Problem) -> ApiResult<SynthesisOutcome> {
        match self.generate_and_store(problem).await {
            Ok(outcome) => {
                info!(
                    problem_id = %problem.id,
                    synthesis_id = %outcome.synthesis_id,
                    contributions = outcome.contribution_count,
                    "Synthesis complete"
                );
                self.emit_status(problem, ProblemStatus::Complete).await;
                self.event_bus.emit_lossy(ChorusEvent::SynthesisCompleted {
                    problem_id: problem.id,
                    synthesis_id: outcome.synthesis_id,
                    contribution_count: outcome.contribution_count,
                    timestamp: chorus_common::time::now(),
                });
                Ok(outcome)
            }
            Err(err) => {
                self.rollback(problem, &err).await;
                Err(err)
            }
        }
    }

    async fn generate_and_store(&self, problem: &Problem) -> ApiResult<SynthesisOutcome> {
        let contents = contributions::list_counted_contents(&self.db, problem.id).await?;
        if contents.is_empty() {
            return Err(ApiError::NoContributions);
        }
        let contribution_count = i64::try_from(contents.len())
            .map_err(|e| ApiError::SynthesisFailed(e.to_string()))?;

        let context = ProblemContext::from(problem);
        let generated = match tokio::time::timeout(
            self.generator_timeout,
            self.generator.generate(&context, &contents),
        )
        .await
        {
            Ok(Ok(generated)) => generated,
            Ok(Err(e)) => return Err(ApiError::SynthesisFailed(e.to_string())),
            Err(_) => {
                return Err(ApiError::SynthesisFailed(format!(
                    "generator timed out after {:?}",
                    self.generator_timeout
                )))
            }
        };

        if generated.summary.trim().is_empty() {
            return Err(ApiError::SynthesisFailed("empty summary".to_string()));
        }

        let synthesis = build_synthesis(problem.id, generated, contribution_count);
        self.store(&synthesis)
            .await
            .map_err(|e| ApiError::SynthesisFailed(format!("persisting synthesis: {}", e)))?;

        Ok(SynthesisOutcome {
            synthesis_id: synthesis.id,
            contribution_count,
        })
    }

    /// Insert the synthesis and mark the problem complete in one
    /// transaction
    async fn store(&self, synthesis: &Synthesis) -> chorus_common::Result<()> {
        let mut tx = self.db.begin().await?;

        syntheses::insert_synthesis(&mut *tx, synthesis).await?;

        let completed = problems::transition_status(
            &mut *tx,
            synthesis.problem_id,
            ProblemStatus::Synthesising,
            ProblemStatus::Complete,
        )
        .await?;
        if !completed {
            // Dropping `tx` rolls back the insert
            return Err(chorus_common::Error::Internal(
                "problem left synthesising during generation".to_string(),
            ));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&self, problem: &Problem, cause: &ApiError) {
        warn!(problem_id = %problem.id, "Synthesis failed, returning problem to gathering: {}", cause);

        match problems::claim_transition(
            &self.db,
            problem.id,
            ProblemStatus::Synthesising,
            ProblemStatus::Gathering,
        )
        .await
        {
            Ok(true) => self.emit_status(problem, ProblemStatus::Gathering).await,
            Ok(false) => warn!(problem_id = %problem.id, "Problem was no longer synthesising at rollback"),
            Err(e) => error!(problem_id = %problem.id, "Rollback to gathering failed: {}", e),
        }

        self.event_bus.emit_lossy(ChorusEvent::SynthesisFailed {
            problem_id: problem.id,
            reason: match cause {
                ApiError::NoContributions => cause.to_string(),
                _ => "Failed to synthesise contributions".to_string(),
            },
            timestamp: chorus_common::time::now(),
        });
    }

    /// Announce a transition this orchestrator just made
    ///
    /// The count is re-read so the event matches the stored row.
    async fn emit_status(&self, problem: &Problem, status: ProblemStatus) {
        let contribution_count = match problems::get_problem(&self.db, problem.id).await {
            Ok(Some(current)) => current.contribution_count,
            Ok(None) => problem.contribution_count,
            Err(e) => {
                warn!(problem_id = %problem.id, "Re-reading problem for event failed: {}", e);
                problem.contribution_count
            }
        };

        self.event_bus.emit_lossy(ChorusEvent::ProblemUpdated {
            problem_id: problem.id,
            status: status.to_string(),
            contribution_count,
            timestamp: chorus_common::time::now(),
        });
    }
}

fn build_synthesis(problem_id: Uuid, generated: GeneratedSynthesis, contribution_count: i64) -> Synthesis {
    Synthesis {
        id: Uuid::new_v4(),
        problem_id,
        summary: generated.summary,
        common_themes: generated.common_themes,
        divergent_views: generated.divergent_views,
        considerations: generated.considerations,
        warnings: generated.warnings,
        contribution_count,
        helpful_count: 0,
        created_at: chorus_common::time::now(),
    }
}
