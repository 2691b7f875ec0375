//! Shared database row models

use crate::curriculum::CurriculumStyle;
use crate::events::ProblemVariant;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A learner profile row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: i64,
    pub name: String,
    pub grade: i64,
    pub curriculum_style: CurriculumStyle,
    pub created_at: String,
}

/// Problem request fingerprint: the key identifying interchangeable
/// problem requests in the bank
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub grade: i64,
    pub style: CurriculumStyle,
    pub topic: String,
    pub variant: ProblemVariant,
}

/// A persisted problem bank artifact
///
/// Owned by the problem bank; `times_served` is monotonically
/// non-decreasing and only mutated through `record_hit`.
#[derive(Debug, Clone)]
pub struct ProblemArtifact {
    pub id: i64,
    pub fingerprint: Fingerprint,
    pub question: String,
    /// Canonical comparable form (numeric text)
    pub answer: String,
    pub hint: String,
    pub times_served: i64,
    pub created_at: String,
}

/// One graded (or skipped) turn, ready to persist
#[derive(Debug, Clone)]
pub struct TurnResult {
    pub student_id: i64,
    /// Bank row the served problem came from, when it was cached
    pub problem_id: Option<i64>,
    pub question: String,
    pub correct_answer: Option<String>,
    pub student_answer: String,
    pub is_correct: bool,
    pub topic: Option<String>,
    pub requested_topic: Option<String>,
    pub weakness: Option<String>,
    pub scaffold_level: i64,
    pub scaffold_parent_id: Option<i64>,
}

/// A history row as returned to dashboards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub problem_id: Option<i64>,
    pub question: String,
    pub correct_answer: Option<String>,
    pub student_answer: Option<String>,
    pub is_correct: bool,
    pub topic: Option<String>,
    pub requested_topic: Option<String>,
    pub feedback: Option<String>,
    pub weakness: Option<String>,
    pub misconception_type: Option<String>,
    pub misconception_detail: Option<String>,
    pub scaffold_level: i64,
    pub scaffold_parent_id: Option<i64>,
    pub created_at: String,
}

/// A wrong answer whose misconception has not been classified yet
#[derive(Debug, Clone)]
pub struct UndiagnosedMiss {
    pub history_id: i64,
    pub question: String,
    pub correct_answer: Option<String>,
    pub student_answer: Option<String>,
    pub topic: Option<String>,
}

/// Per-topic accuracy breakdown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicStats {
    pub total: i64,
    pub correct: i64,
    pub pct: i64,
}

/// Learner accuracy summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSummary {
    pub total: i64,
    pub correct: i64,
    pub pct: i64,
    pub topics: BTreeMap<String, TopicStats>,
}
