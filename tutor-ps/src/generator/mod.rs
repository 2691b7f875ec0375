//! Problem generation backend
//!
//! The pipeline talks to the language-model backend through the
//! [`Generator`] trait so tests can substitute a deterministic
//! implementation. The production implementation is [`HttpGenerator`],
//! an OpenAI-compatible chat-completions client.

use async_trait::async_trait;
use serde::Deserialize;
use tutor_common::curriculum::CurriculumStyle;
use tutor_common::db::models::{Student, UndiagnosedMiss};
use tutor_common::events::ProblemVariant;

use crate::error::Result;

mod http;
mod sanitize;

pub use http::HttpGenerator;
pub use sanitize::{clean_latex, parse_json_lenient};

/// Outcome of direction analysis: which topic to work next and why
#[derive(Debug, Clone)]
pub struct DirectionPlan {
    pub topic: String,
    pub guidance: Option<String>,
}

/// Everything the backend needs to produce one problem
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub grade: i64,
    pub style: CurriculumStyle,
    pub topic: String,
    pub variant: ProblemVariant,
    /// Direction guidance for standard problems
    pub guidance: Option<String>,
    /// Remediation hint carried from the misconception diagnosis
    pub scaffold_hint: Option<String>,
    pub misconception_detail: Option<String>,
}

/// A freshly generated problem, answer included
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedProblem {
    pub question: String,
    #[serde(default, deserialize_with = "sanitize::answer_text")]
    pub answer: Option<String>,
    #[serde(default)]
    pub hint: String,
    #[serde(default)]
    pub topic: Option<String>,
}

/// Diagnosis of why a student got a problem wrong
#[derive(Debug, Clone, Deserialize)]
pub struct Misconception {
    pub misconception_type: String,
    #[serde(default)]
    pub misconception_detail: Option<String>,
    #[serde(default)]
    pub scaffold_topic: Option<String>,
    #[serde(default)]
    pub scaffold_hint: Option<String>,
}

/// Language-model backend for the tutoring pipeline
#[async_trait]
pub trait Generator: Send + Sync {
    /// Pick the next topic for this student from their record
    async fn analyze_direction(
        &self,
        student: &Student,
        history_summary: &str,
        requested_topic: Option<&str>,
    ) -> Result<DirectionPlan>;

    /// Produce one new problem for the request
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedProblem>;

    /// Compose a student-facing solution walkthrough for a served problem
    async fn compose_walkthrough(
        &self,
        grade: i64,
        style: CurriculumStyle,
        question: &str,
        answer: Option<&str>,
        hint: &str,
    ) -> Result<String>;

    /// Diagnose the misconception behind a wrong answer
    async fn diagnose(
        &self,
        grade: i64,
        style: CurriculumStyle,
        miss: &UndiagnosedMiss,
    ) -> Result<Misconception>;

    /// Short encouraging feedback on a graded answer
    async fn explain_result(
        &self,
        grade: i64,
        question: &str,
        correct_answer: Option<&str>,
        student_answer: &str,
        is_correct: bool,
    ) -> Result<String>;
}
