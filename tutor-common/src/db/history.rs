//! Learning history queries
//!
//! Read side feeds direction analysis (summary text), the problem bank
//! dedup window (recent problem ids), and dashboards; write side records
//! graded turns and misconception diagnoses.

use crate::db::models::{HistoryEntry, StatsSummary, TopicStats, TurnResult, UndiagnosedMiss};
use crate::Result;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

/// Persist one graded (or skipped) turn, returning the history row id
pub async fn persist_turn_result(pool: &SqlitePool, turn: &TurnResult) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO history
            (student_id, problem_id, question, correct_answer, student_answer,
             is_correct, topic, requested_topic, weakness,
             scaffold_level, scaffold_parent_id)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(turn.student_id)
    .bind(turn.problem_id)
    .bind(&turn.question)
    .bind(&turn.correct_answer)
    .bind(&turn.student_answer)
    .bind(turn.is_correct as i64)
    .bind(&turn.topic)
    .bind(&turn.requested_topic)
    .bind(&turn.weakness)
    .bind(turn.scaffold_level)
    .bind(turn.scaffold_parent_id)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Attach generated feedback text to a history row
pub async fn update_feedback(pool: &SqlitePool, history_id: i64, feedback: &str) -> Result<()> {
    sqlx::query("UPDATE history SET feedback = ? WHERE id = ?")
        .bind(feedback)
        .bind(history_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record the misconception diagnosis for a wrong answer
pub async fn update_misconception(
    pool: &SqlitePool,
    history_id: i64,
    misconception_type: &str,
    misconception_detail: &str,
) -> Result<()> {
    sqlx::query("UPDATE history SET misconception_type = ?, misconception_detail = ? WHERE id = ?")
        .bind(misconception_type)
        .bind(misconception_detail)
        .bind(history_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Bank row ids of the learner's most recently served problems
///
/// This is the dedup window handed to the problem bank as `exclude_ids`;
/// turns served from an uncached artifact have no problem id and do not
/// contribute.
pub async fn recent_problem_ids(
    pool: &SqlitePool,
    student_id: i64,
    limit: i64,
) -> Result<Vec<i64>> {
    let rows = sqlx::query(
        "SELECT problem_id FROM history \
         WHERE student_id = ? AND problem_id IS NOT NULL \
         ORDER BY id DESC LIMIT ?",
    )
    .bind(student_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(|r| r.get::<i64, _>("problem_id")).collect())
}

/// Most recent wrong answer that has no misconception classification yet
pub async fn latest_undiagnosed_miss(
    pool: &SqlitePool,
    student_id: i64,
) -> Result<Option<UndiagnosedMiss>> {
    let row = sqlx::query(
        "SELECT id, question, correct_answer, student_answer, topic FROM history \
         WHERE student_id = ? AND is_correct = 0 AND misconception_type IS NULL \
               AND weakness != 'skipped' \
         ORDER BY id DESC LIMIT 1",
    )
    .bind(student_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| UndiagnosedMiss {
        history_id: r.get("id"),
        question: r.get("question"),
        correct_answer: r.get("correct_answer"),
        student_answer: r.get("student_answer"),
        topic: r.get("topic"),
    }))
}

/// Misconception type counts across a learner's wrong answers
pub async fn misconception_stats(
    pool: &SqlitePool,
    student_id: i64,
) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query(
        "SELECT misconception_type, COUNT(*) as cnt FROM history \
         WHERE student_id = ? AND is_correct = 0 AND misconception_type IS NOT NULL \
         GROUP BY misconception_type ORDER BY cnt DESC",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|r| (r.get::<String, _>("misconception_type"), r.get::<i64, _>("cnt")))
        .collect())
}

/// Plain-text learning history summary for direction-analysis prompts
pub async fn history_summary_text(
    pool: &SqlitePool,
    student_id: i64,
    limit: i64,
) -> Result<String> {
    let rows = sqlx::query(
        "SELECT question, student_answer, correct_answer, is_correct, weakness, \
                misconception_type, misconception_detail, scaffold_level \
         FROM history WHERE student_id = ? ORDER BY id DESC LIMIT ?",
    )
    .bind(student_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        return Ok("No history yet. This is the first problem.".to_string());
    }

    let rows: Vec<_> = rows.into_iter().rev().collect();
    let total = rows.len();
    let correct = rows
        .iter()
        .filter(|r| r.get::<i64, _>("is_correct") != 0)
        .count();
    let mut lines = vec![format!(
        "Total: {}/{} correct ({}%)",
        correct,
        total,
        correct * 100 / total
    )];
    for r in &rows {
        let is_correct = r.get::<i64, _>("is_correct") != 0;
        let mark = if is_correct { "correct" } else { "wrong" };
        let scaffold_level: i64 = r.get("scaffold_level");
        let scaffold_tag = if scaffold_level > 0 {
            format!(" [scaffold Lv{}]", scaffold_level)
        } else {
            String::new()
        };
        lines.push(format!(
            "  {} Q: {} | Student answered: {} | Correct: {}{}",
            mark,
            r.get::<String, _>("question"),
            r.get::<Option<String>, _>("student_answer").unwrap_or_default(),
            r.get::<Option<String>, _>("correct_answer").unwrap_or_default(),
            scaffold_tag,
        ));
        if !is_correct {
            if let Some(mtype) = r.get::<Option<String>, _>("misconception_type") {
                lines.push(format!(
                    "     Misconception: {} - {}",
                    mtype,
                    r.get::<Option<String>, _>("misconception_detail").unwrap_or_default(),
                ));
            } else if let Some(weakness) = r.get::<Option<String>, _>("weakness") {
                lines.push(format!("     Weakness: {}", weakness));
            }
        }
    }
    Ok(lines.join("\n"))
}

/// Recent history rows for the dashboard, newest first
pub async fn get_history(
    pool: &SqlitePool,
    student_id: i64,
    limit: i64,
) -> Result<Vec<HistoryEntry>> {
    let rows = sqlx::query(
        "SELECT * FROM history WHERE student_id = ? ORDER BY id DESC LIMIT ?",
    )
    .bind(student_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|r| HistoryEntry {
            id: r.get("id"),
            problem_id: r.get("problem_id"),
            question: r.get("question"),
            correct_answer: r.get("correct_answer"),
            student_answer: r.get("student_answer"),
            is_correct: r.get::<i64, _>("is_correct") != 0,
            topic: r.get("topic"),
            requested_topic: r.get("requested_topic"),
            feedback: r.get("feedback"),
            weakness: r.get("weakness"),
            misconception_type: r.get("misconception_type"),
            misconception_detail: r.get("misconception_detail"),
            scaffold_level: r.get("scaffold_level"),
            scaffold_parent_id: r.get("scaffold_parent_id"),
            created_at: r.get("created_at"),
        })
        .collect())
}

/// Overall and per-topic accuracy
pub async fn get_stats(pool: &SqlitePool, student_id: i64) -> Result<StatsSummary> {
    let total: i64 = sqlx::query("SELECT COUNT(*) as c FROM history WHERE student_id = ?")
        .bind(student_id)
        .fetch_one(pool)
        .await?
        .get("c");
    let correct: i64 =
        sqlx::query("SELECT COUNT(*) as c FROM history WHERE student_id = ? AND is_correct = 1")
            .bind(student_id)
            .fetch_one(pool)
            .await?
            .get("c");

    let topic_rows = sqlx::query(
        "SELECT topic, COUNT(*) as total, SUM(is_correct) as correct \
         FROM history WHERE student_id = ? AND topic IS NOT NULL GROUP BY topic",
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    let mut topics = BTreeMap::new();
    for r in &topic_rows {
        let t_total: i64 = r.get("total");
        let t_correct: i64 = r.get::<Option<i64>, _>("correct").unwrap_or(0);
        topics.insert(
            r.get::<String, _>("topic"),
            TopicStats {
                total: t_total,
                correct: t_correct,
                pct: if t_total > 0 { t_correct * 100 / t_total } else { 0 },
            },
        );
    }

    Ok(StatsSummary {
        total,
        correct,
        pct: if total > 0 { correct * 100 / total } else { 0 },
        topics,
    })
}
