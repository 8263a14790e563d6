//! Profile persistence

use chorus_common::db::Profile;
use chorus_common::Result;
use sqlx::{Row, SqliteExecutor, SqlitePool};
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

/// Create the profile if it does not exist
pub async fn ensure_profile(pool: &SqlitePool, id: Uuid, display_name: Option<&str>) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO profiles (id, display_name, created_at) VALUES (?, ?, ?)")
        .bind(id.to_string())
        .bind(display_name)
        .bind(chorus_common::time::now().to_rfc3339())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_profile(pool: &SqlitePool, id: Uuid) -> Result<Option<Profile>> {
    let Some(row) = sqlx::query(
        "SELECT id, display_name, contributions_count, problems_submitted, is_admin, created_at \
         FROM profiles WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?
    else {
        return Ok(None);
    };

    Ok(Some(Profile {
        id: parse_uuid(&row.get::<String, _>("id"), "profiles.id")?,
        display_name: row.get("display_name"),
        contributions_count: row.get("contributions_count"),
        problems_submitted: row.get("problems_submitted"),
        is_admin: row.get("is_admin"),
        created_at: parse_timestamp(&row.get::<String, _>("created_at"), "profiles.created_at")?,
    }))
}

pub async fn is_admin(pool: &SqlitePool, id: Uuid) -> Result<bool> {
    let admin: Option<bool> = sqlx::query_scalar("SELECT is_admin FROM profiles WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?;
    Ok(admin.unwrap_or(false))
}

pub async fn set_admin(pool: &SqlitePool, id: Uuid, admin: bool) -> Result<()> {
    sqlx::query("UPDATE profiles SET is_admin = ? WHERE id = ?")
        .bind(admin)
        .bind(id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Atomically add one to `column`, creating the profile if needed
async fn bump_counter<'e, E>(executor: E, id: Uuid, column: &'static str) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    let sql = format!(
        "INSERT INTO profiles (id, {col}, created_at) VALUES (?, 1, ?) \
         ON CONFLICT(id) DO UPDATE SET {col} = {col} + 1",
        col = column
    );

    sqlx::query(&sql)
        .bind(id.to_string())
        .bind(chorus_common::time::now().to_rfc3339())
        .execute(executor)
        .await?;
    Ok(())
}

/// Runs inside the contribution transaction
pub async fn increment_contributions_count<'e, E>(executor: E, id: Uuid) -> Result<()>
where
    E: SqliteExecutor<'e>,
{
    bump_counter(executor, id, "contributions_count").await
}

pub async fn increment_problems_submitted(pool: &SqlitePool, id: Uuid) -> Result<()> {
    retry_on_lock("problems_submitted", DEFAULT_MAX_LOCK_WAIT_MS, || {
        bump_counter(pool, id, "problems_submitted")
    })
    .await
}
