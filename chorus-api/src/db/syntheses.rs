//! Synthesis persistence
//!
//! List fields are stored as JSON text.

use chorus_common::db::Synthesis;
use chorus_common::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid};

fn to_json<T: Serialize>(value: &T, field: &str) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| Error::Internal(format!("Failed to serialize {}: {}", field, e)))
}

fn from_json<T: DeserializeOwned>(text: &str, field: &str) -> Result<T> {
    serde_json::from_str(text)
        .map_err(|e| Error::Internal(format!("Failed to deserialize {}: {}", field, e)))
}

/// Insert on the given connection, typically inside a transaction
pub async fn insert_synthesis(conn: &mut SqliteConnection, synthesis: &Synthesis) -> Result<()> {
    // Prepare all data before touching the connection
    let common_themes = to_json(&synthesis.common_themes, "common_themes")?;
    let divergent_views = to_json(&synthesis.divergent_views, "divergent_views")?;
    let considerations = to_json(&synthesis.considerations, "considerations")?;
    let warnings = to_json(&synthesis.warnings, "warnings")?;

    sqlx::query(
        r#"
        INSERT INTO syntheses (
            id, problem_id, summary, common_themes, divergent_views,
            considerations, warnings, contribution_count, helpful_count, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(synthesis.id.to_string())
    .bind(synthesis.problem_id.to_string())
    .bind(&synthesis.summary)
    .bind(common_themes)
    .bind(divergent_views)
    .bind(considerations)
    .bind(warnings)
    .bind(synthesis.contribution_count)
    .bind(synthesis.helpful_count)
    .bind(synthesis.created_at.to_rfc3339())
    .execute(conn)
    .await?;

    Ok(())
}

pub async fn get_synthesis_for_problem(
    pool: &SqlitePool,
    problem_id: Uuid,
) -> Result<Option<Synthesis>> {
    let Some(row) = sqlx::query(
        r#"
        SELECT id, problem_id, summary, common_themes, divergent_views, considerations,
               warnings, contribution_count, helpful_count, created_at
        FROM syntheses WHERE problem_id = ?
        "#,
    )
    .bind(problem_id.to_string())
    .fetch_optional(pool)
    .await?
    else {
        return Ok(None);
    };

    Ok(Some(Synthesis {
        id: parse_uuid(&row.get::<String, _>("id"), "syntheses.id")?,
        problem_id: parse_uuid(&row.get::<String, _>("problem_id"), "syntheses.problem_id")?,
        summary: row.get("summary"),
        common_themes: from_json(&row.get::<String, _>("common_themes"), "common_themes")?,
        divergent_views: from_json(&row.get::<String, _>("divergent_views"), "divergent_views")?,
        considerations: from_json(&row.get::<String, _>("considerations"), "considerations")?,
        warnings: from_json(&row.get::<String, _>("warnings"), "warnings")?,
        contribution_count: row.get("contribution_count"),
        helpful_count: row.get("helpful_count"),
        created_at: parse_timestamp(&row.get::<String, _>("created_at"), "syntheses.created_at")?,
    }))
}

/// Number of synthesis rows for a problem (0 or 1)
pub async fn count_for_problem(pool: &SqlitePool, problem_id: Uuid) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM syntheses WHERE problem_id = ?")
        .bind(problem_id.to_string())
        .fetch_one(pool)
        .await?;
    Ok(count)
}
