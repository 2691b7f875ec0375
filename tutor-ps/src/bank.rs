//! Problem bank cache
//!
//! Maps request fingerprints to pools of previously generated problems.
//! Lookup is recency-aware: the caller passes the learner's recent
//! window as exclusions, and selection favors least-served artifacts so
//! reuse spreads across the pool instead of hammering one row.

use crate::error::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::debug;
use tutor_common::curriculum::CurriculumStyle;
use tutor_common::db::models::{Fingerprint, ProblemArtifact};
use tutor_common::events::ProblemVariant;

/// Shared problem bank over the service database
///
/// The tie-break RNG sits behind its own mutex so concurrent pipeline
/// runs can look up problems without serializing on anything wider.
pub struct ProblemBank {
    pool: SqlitePool,
    rng: Mutex<StdRng>,
}

impl ProblemBank {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic tie-break RNG, for tests
    pub fn with_seed(pool: SqlitePool, seed: u64) -> Self {
        Self {
            pool,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Select a reusable artifact for the fingerprint.
    ///
    /// Candidates in `exclude_ids` (the learner's recent window) are
    /// never returned. Among the remainder, only the least-served tier
    /// is eligible and one row is picked uniformly at random from it.
    /// `Ok(None)` is the cache-miss path, not an error.
    pub async fn lookup(
        &self,
        fingerprint: &Fingerprint,
        exclude_ids: &HashSet<i64>,
    ) -> Result<Option<ProblemArtifact>> {
        let rows = sqlx::query(
            "SELECT id, grade, curriculum_style, topic, variant, question, answer, hint, \
                    times_served, created_at \
             FROM problem_bank \
             WHERE grade = ? AND curriculum_style = ? AND topic = ? AND variant = ? \
             ORDER BY times_served ASC",
        )
        .bind(fingerprint.grade)
        .bind(fingerprint.style.as_str())
        .bind(&fingerprint.topic)
        .bind(fingerprint.variant.as_str())
        .fetch_all(&self.pool)
        .await?;

        let candidates: Vec<ProblemArtifact> = rows
            .iter()
            .map(artifact_from_row)
            .filter(|a| !exclude_ids.contains(&a.id))
            .collect();

        let Some(min_served) = candidates.first().map(|a| a.times_served) else {
            debug!(
                topic = %fingerprint.topic,
                variant = fingerprint.variant.as_str(),
                "bank miss: no candidates after exclusion"
            );
            return Ok(None);
        };

        // Rows arrive ordered by times_served, so the least-served tier
        // is a prefix of the candidate list.
        let tier: Vec<&ProblemArtifact> = candidates
            .iter()
            .take_while(|a| a.times_served == min_served)
            .collect();

        let index = {
            let mut rng = self.rng.lock().expect("bank rng poisoned");
            rng.gen_range(0..tier.len())
        };
        debug!(
            topic = %fingerprint.topic,
            pool = candidates.len(),
            tier = tier.len(),
            "bank hit"
        );
        Ok(Some(tier[index].clone()))
    }

    /// Count one serving of an artifact
    pub async fn record_hit(&self, artifact_id: i64) -> Result<()> {
        sqlx::query("UPDATE problem_bank SET times_served = times_served + 1 WHERE id = ?")
            .bind(artifact_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Persist a newly generated problem with `times_served = 0`.
    ///
    /// Always appends a new row; the bank never deduplicates by content,
    /// only by exclusion at lookup time.
    pub async fn insert(
        &self,
        fingerprint: &Fingerprint,
        question: &str,
        answer: &str,
        hint: &str,
    ) -> Result<ProblemArtifact> {
        let result = sqlx::query(
            "INSERT INTO problem_bank \
                 (grade, curriculum_style, topic, variant, question, answer, hint) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(fingerprint.grade)
        .bind(fingerprint.style.as_str())
        .bind(&fingerprint.topic)
        .bind(fingerprint.variant.as_str())
        .bind(question)
        .bind(answer)
        .bind(hint)
        .execute(&self.pool)
        .await?;
        let id = result.last_insert_rowid();

        let row = sqlx::query(
            "SELECT id, grade, curriculum_style, topic, variant, question, answer, hint, \
                    times_served, created_at \
             FROM problem_bank WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(artifact_from_row(&row))
    }
}

fn artifact_from_row(row: &sqlx::sqlite::SqliteRow) -> ProblemArtifact {
    let style = row
        .get::<Option<String>, _>("curriculum_style")
        .and_then(|s| CurriculumStyle::from_str(&s))
        .unwrap_or(CurriculumStyle::CommonCore);
    let variant = row
        .get::<Option<String>, _>("variant")
        .and_then(|s| ProblemVariant::from_str(&s))
        .unwrap_or(ProblemVariant::Standard);
    ProblemArtifact {
        id: row.get("id"),
        fingerprint: Fingerprint {
            grade: row.get("grade"),
            style,
            topic: row.get("topic"),
            variant,
        },
        question: row.get("question"),
        answer: row.get("answer"),
        hint: row.get("hint"),
        times_served: row.get("times_served"),
        created_at: row.get("created_at"),
    }
}
