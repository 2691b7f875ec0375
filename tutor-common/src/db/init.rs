//! Database initialization
//!
//! Creates the SQLite database on first run and applies the schema
//! idempotently (safe to call on every startup).

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection pool and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL allows concurrent readers while a pipeline task writes
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// In-memory database with full schema, for tests
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
    create_schema(&pool).await?;
    Ok(pool)
}

/// Apply the schema (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_students_table(pool).await?;
    create_history_table(pool).await?;
    create_problem_bank_table(pool).await?;
    Ok(())
}

async fn create_students_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS students (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            grade INTEGER NOT NULL DEFAULT 4,
            curriculum_style TEXT NOT NULL DEFAULT 'common_core',
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_history_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER NOT NULL,
            problem_id INTEGER,
            question TEXT NOT NULL,
            correct_answer TEXT,
            student_answer TEXT,
            is_correct INTEGER NOT NULL DEFAULT 0,
            topic TEXT,
            requested_topic TEXT,
            feedback TEXT,
            weakness TEXT,
            misconception_type TEXT,
            misconception_detail TEXT,
            scaffold_level INTEGER NOT NULL DEFAULT 0,
            scaffold_parent_id INTEGER,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (student_id) REFERENCES students(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_history_student ON history (student_id, id)",
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn create_problem_bank_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS problem_bank (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            grade INTEGER NOT NULL,
            curriculum_style TEXT NOT NULL DEFAULT 'common_core',
            topic TEXT NOT NULL,
            variant TEXT NOT NULL DEFAULT 'standard',
            question TEXT NOT NULL,
            answer TEXT NOT NULL,
            hint TEXT NOT NULL,
            times_served INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_bank_lookup \
         ON problem_bank (grade, curriculum_style, topic, variant)",
    )
    .execute(pool)
    .await?;
    Ok(())
}
