//! Tests for database initialization and schema constraints

use chorus_common::api::auth::{create_session, load_internal_secret, lookup_session};
use chorus_common::db::init::init_database;
use sqlx::Row;
use uuid::Uuid;

async fn insert_profile(pool: &sqlx::SqlitePool) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO profiles (id, created_at) VALUES (?, ?)")
        .bind(id.to_string())
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(pool)
        .await
        .unwrap();
    id
}

async fn insert_problem(pool: &sqlx::SqlitePool, owner: Uuid) -> Uuid {
    let id = Uuid::new_v4();
    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO problems (id, user_id, title, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id.to_string())
    .bind(owner.to_string())
    .bind("How do I ask for a raise?")
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .unwrap();
    id
}

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("chorus.db");

    let result = init_database(&db_path).await;
    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("chorus.db");

    let pool1 = init_database(&db_path).await.unwrap();
    let owner = insert_profile(&pool1).await;
    drop(pool1);

    // Reopen: schema creation is idempotent and data survives
    let pool2 = init_database(&db_path).await.unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM profiles WHERE id = ?")
        .bind(owner.to_string())
        .fetch_one(&pool2)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_all_tables_created() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("chorus.db")).await.unwrap();

    for table in [
        "schema_version",
        "settings",
        "profiles",
        "sessions",
        "problems",
        "contributions",
        "syntheses",
    ] {
        let exists: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(table)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(exists, 1, "table {} missing", table);
    }
}

#[tokio::test]
async fn test_new_problem_defaults_to_gathering() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("chorus.db")).await.unwrap();
    let owner = insert_profile(&pool).await;
    let problem = insert_problem(&pool, owner).await;

    let row = sqlx::query(
        "SELECT status, problem_type, contribution_count, contribution_threshold FROM problems WHERE id = ?",
    )
    .bind(problem.to_string())
    .fetch_one(&pool)
    .await
    .unwrap();

    assert_eq!(row.get::<String, _>("status"), "gathering");
    assert_eq!(row.get::<String, _>("problem_type"), "advice");
    assert_eq!(row.get::<i64, _>("contribution_count"), 0);
    assert_eq!(row.get::<i64, _>("contribution_threshold"), 5);
}

#[tokio::test]
async fn test_unknown_status_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("chorus.db")).await.unwrap();
    let owner = insert_profile(&pool).await;
    let problem = insert_problem(&pool, owner).await;

    let result = sqlx::query("UPDATE problems SET status = 'archived' WHERE id = ?")
        .bind(problem.to_string())
        .execute(&pool)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_one_contribution_per_user_per_problem() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("chorus.db")).await.unwrap();
    let owner = insert_profile(&pool).await;
    let contributor = insert_profile(&pool).await;
    let problem = insert_problem(&pool, owner).await;

    let insert = |id: Uuid| {
        sqlx::query(
            "INSERT INTO contributions (id, problem_id, user_id, content, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(problem.to_string())
        .bind(contributor.to_string())
        .bind("Have you tried talking to them directly?")
        .bind(chrono::Utc::now().to_rfc3339())
    };

    insert(Uuid::new_v4()).execute(&pool).await.unwrap();
    let err = insert(Uuid::new_v4()).execute(&pool).await.unwrap_err();
    let chorus_err = chorus_common::Error::from(err);
    assert!(chorus_err.is_unique_violation());
}

#[tokio::test]
async fn test_one_synthesis_per_problem() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("chorus.db")).await.unwrap();
    let owner = insert_profile(&pool).await;
    let problem = insert_problem(&pool, owner).await;

    let insert = || {
        sqlx::query(
            "INSERT INTO syntheses (id, problem_id, summary, contribution_count, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(problem.to_string())
        .bind("Most people suggested preparing evidence.")
        .bind(3_i64)
        .bind(chrono::Utc::now().to_rfc3339())
    };

    insert().execute(&pool).await.unwrap();
    assert!(insert().execute(&pool).await.is_err());
}

#[tokio::test]
async fn test_internal_secret_generated_once() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("chorus.db")).await.unwrap();

    let first = load_internal_secret(&pool).await.unwrap();
    let second = load_internal_secret(&pool).await.unwrap();
    assert!(!first.is_empty());
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_sessions_resolve_and_expire() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("chorus.db")).await.unwrap();
    let user = insert_profile(&pool).await;

    let token = create_session(&pool, user, None).await.unwrap();
    assert_eq!(lookup_session(&pool, &token).await.unwrap(), Some(user));
    assert_eq!(lookup_session(&pool, "bogus").await.unwrap(), None);

    let expired = create_session(
        &pool,
        user,
        Some(chrono::Utc::now() - chrono::Duration::minutes(1)),
    )
    .await
    .unwrap();
    assert_eq!(lookup_session(&pool, &expired).await.unwrap(), None);
}
