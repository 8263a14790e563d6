//! Problem persistence

use chorus_common::db::{Problem, ProblemStatus, ProblemType};
use chorus_common::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteExecutor, SqlitePool};
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

/// Fields supplied by the owner at submission
#[derive(Debug, Clone)]
pub struct NewProblem {
    pub user_id: Uuid,
    pub problem_type: ProblemType,
    pub title: String,
    pub category: Option<String>,
    pub situation: String,
    pub tried_already: Option<String>,
    pub desired_outcome: Option<String>,
    pub constraints: Option<String>,
    pub contribution_threshold: i64,
}

const PROBLEM_COLUMNS: &str = "id, user_id, problem_type, title, category, situation, \
     tried_already, desired_outcome, constraints, status, contribution_count, \
     contribution_threshold, created_at, updated_at";

fn problem_from_row(row: &SqliteRow) -> Result<Problem> {
    Ok(Problem {
        id: parse_uuid(&row.get::<String, _>("id"), "problems.id")?,
        user_id: parse_uuid(&row.get::<String, _>("user_id"), "problems.user_id")?,
        problem_type: row.get::<String, _>("problem_type").parse()?,
        title: row.get("title"),
        category: row.get("category"),
        situation: row.get("situation"),
        tried_already: row.get("tried_already"),
        desired_outcome: row.get("desired_outcome"),
        constraints: row.get("constraints"),
        status: row.get::<String, _>("status").parse()?,
        contribution_count: row.get("contribution_count"),
        contribution_threshold: row.get("contribution_threshold"),
        created_at: parse_timestamp(&row.get::<String, _>("created_at"), "problems.created_at")?,
        updated_at: parse_timestamp(&row.get::<String, _>("updated_at"), "problems.updated_at")?,
    })
}

/// Insert a problem in `gathering` with a zero count
pub async fn create_problem(pool: &SqlitePool, new: &NewProblem) -> Result<Problem> {
    let id = Uuid::new_v4();
    let now = chorus_common::time::now();

    sqlx::query(
        r#"
        INSERT INTO problems (
            id, user_id, problem_type, title, category, situation,
            tried_already, desired_outcome, constraints, status,
            contribution_count, contribution_threshold, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 'gathering', 0, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(new.user_id.to_string())
    .bind(new.problem_type.as_str())
    .bind(&new.title)
    .bind(&new.category)
    .bind(&new.situation)
    .bind(&new.tried_already)
    .bind(&new.desired_outcome)
    .bind(&new.constraints)
    .bind(new.contribution_threshold)
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(Problem {
        id,
        user_id: new.user_id,
        problem_type: new.problem_type,
        title: new.title.clone(),
        category: new.category.clone(),
        situation: new.situation.clone(),
        tried_already: new.tried_already.clone(),
        desired_outcome: new.desired_outcome.clone(),
        constraints: new.constraints.clone(),
        status: ProblemStatus::Gathering,
        contribution_count: 0,
        contribution_threshold: new.contribution_threshold,
        created_at: now,
        updated_at: now,
    })
}

pub async fn get_problem(pool: &SqlitePool, id: Uuid) -> Result<Option<Problem>> {
    let row = sqlx::query(&format!("SELECT {} FROM problems WHERE id = ?", PROBLEM_COLUMNS))
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(problem_from_row).transpose()
}

/// Atomically add one to `contribution_count`
///
/// Callers run this inside the contribution transaction.
pub async fn increment_contribution_count<'e, E>(executor: E, id: Uuid) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query(
        "UPDATE problems SET contribution_count = contribution_count + 1, updated_at = ? WHERE id = ?",
    )
    .bind(chorus_common::time::now().to_rfc3339())
    .bind(id.to_string())
    .execute(executor)
    .await?;
    Ok(())
}

/// Move `id` from `from` to `to` only if it is still in `from`
///
/// Returns true when this call made the change. Generic over the
/// executor so it can run inside a transaction.
pub async fn transition_status<'e, E>(
    executor: E,
    id: Uuid,
    from: ProblemStatus,
    to: ProblemStatus,
) -> Result<bool>
where
    E: SqliteExecutor<'e>,
{
    let result =
        sqlx::query("UPDATE problems SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
            .bind(to.as_str())
            .bind(chorus_common::time::now().to_rfc3339())
            .bind(id.to_string())
            .bind(from.as_str())
            .execute(executor)
            .await?;

    Ok(result.rows_affected() == 1)
}

/// [`transition_status`] on the pool with lock retry
pub async fn claim_transition(
    pool: &SqlitePool,
    id: Uuid,
    from: ProblemStatus,
    to: ProblemStatus,
) -> Result<bool> {
    retry_on_lock("transition_status", DEFAULT_MAX_LOCK_WAIT_MS, || {
        transition_status(pool, id, from, to)
    })
    .await
}
