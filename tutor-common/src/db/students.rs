//! Student profile queries

use crate::curriculum::CurriculumStyle;
use crate::db::models::Student;
use crate::error::{Error, Result};
use sqlx::{Row, SqlitePool};

fn student_from_row(row: &sqlx::sqlite::SqliteRow) -> Student {
    let style = row
        .get::<Option<String>, _>("curriculum_style")
        .and_then(|s| CurriculumStyle::from_str(&s))
        .unwrap_or(CurriculumStyle::CommonCore);
    Student {
        id: row.get("id"),
        name: row.get("name"),
        grade: row.get("grade"),
        curriculum_style: style,
        created_at: row.get("created_at"),
    }
}

/// List all students, ordered by name
pub async fn list_students(pool: &SqlitePool) -> Result<Vec<Student>> {
    let rows = sqlx::query(
        "SELECT id, name, grade, curriculum_style, created_at FROM students ORDER BY name",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(student_from_row).collect())
}

/// Get a student by id
pub async fn get_student(pool: &SqlitePool, student_id: i64) -> Result<Student> {
    let row = sqlx::query(
        "SELECT id, name, grade, curriculum_style, created_at FROM students WHERE id = ?",
    )
    .bind(student_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("student {}", student_id)))?;
    Ok(student_from_row(&row))
}

/// Create a student, returning the new row id
pub async fn create_student(
    pool: &SqlitePool,
    name: &str,
    grade: i64,
    style: CurriculumStyle,
) -> Result<i64> {
    if name.trim().is_empty() {
        return Err(Error::InvalidInput("name required".to_string()));
    }
    if !(1..=6).contains(&grade) {
        return Err(Error::InvalidInput("grade must be 1-6".to_string()));
    }
    let result = sqlx::query(
        "INSERT INTO students (name, grade, curriculum_style) VALUES (?, ?, ?)",
    )
    .bind(name.trim())
    .bind(grade)
    .bind(style.as_str())
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}
