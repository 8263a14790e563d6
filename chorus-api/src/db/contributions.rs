//! Contribution persistence
//!
//! Contents are only ever read in aggregate for synthesis.

use chorus_common::Result;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{problems, profiles};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

#[derive(Debug, Clone)]
pub struct NewContribution<'a> {
    pub problem_id: Uuid,
    pub user_id: Uuid,
    pub content: &'a str,
    pub flagged_harmful: bool,
}

/// Outcome of [`record_contribution`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContributionInsert {
    Inserted(Uuid),
    /// The problem left `gathering` before the row could be written
    ProblemNotGathering,
}

/// Store a contribution and, unless flagged, count it
///
/// The row, the problem's `contribution_count` and the author's
/// `contributions_count` commit together or not at all. A second
/// contribution by the same user surfaces as a UNIQUE violation
/// (`Error::is_unique_violation`).
pub async fn record_contribution(
    pool: &SqlitePool,
    new: &NewContribution<'_>,
) -> Result<ContributionInsert> {
    retry_on_lock("record_contribution", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let mut tx = pool.begin().await?;

        let inserted = insert_if_gathering(&mut *tx, new).await?;
        if matches!(inserted, ContributionInsert::Inserted(_)) && !new.flagged_harmful {
            problems::increment_contribution_count(&mut *tx, new.problem_id).await?;
            profiles::increment_contributions_count(&mut *tx, new.user_id).await?;
        }

        tx.commit().await?;
        Ok(inserted)
    })
    .await
}

async fn insert_if_gathering(
    conn: &mut SqliteConnection,
    new: &NewContribution<'_>,
) -> Result<ContributionInsert> {
    let id = Uuid::new_v4();
    let problem_id = new.problem_id.to_string();

    let result = sqlx::query(
        r#"
        INSERT INTO contributions (id, problem_id, user_id, content, flagged_harmful, created_at)
        SELECT ?, ?, ?, ?, ?, ?
        WHERE EXISTS (SELECT 1 FROM problems WHERE id = ? AND status = 'gathering')
        "#,
    )
    .bind(id.to_string())
    .bind(&problem_id)
    .bind(new.user_id.to_string())
    .bind(new.content)
    .bind(new.flagged_harmful)
    .bind(chorus_common::time::now().to_rfc3339())
    .bind(&problem_id)
    .execute(conn)
    .await?;

    Ok(if result.rows_affected() == 1 {
        ContributionInsert::Inserted(id)
    } else {
        ContributionInsert::ProblemNotGathering
    })
}

/// Contents of every non-flagged contribution, oldest first
pub async fn list_counted_contents(pool: &SqlitePool, problem_id: Uuid) -> Result<Vec<String>> {
    let contents = sqlx::query_scalar(
        "SELECT content FROM contributions WHERE problem_id = ? AND flagged_harmful = 0 ORDER BY created_at, id",
    )
    .bind(problem_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(contents)
}

/// Whether `user_id` has already contributed to `problem_id`
pub async fn has_contributed(pool: &SqlitePool, problem_id: Uuid, user_id: Uuid) -> Result<bool> {
    let exists: i64 = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM contributions WHERE problem_id = ? AND user_id = ?)",
    )
    .bind(problem_id.to_string())
    .bind(user_id.to_string())
    .fetch_one(pool)
    .await?;

    Ok(exists == 1)
}
