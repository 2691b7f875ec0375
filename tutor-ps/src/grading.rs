//! Answer grading and misconception follow-up
//!
//! Grading is numeric and server-side: the served problem's answer
//! never leaves the service before the student commits theirs. A wrong
//! answer triggers a diagnosis pass that stores the misconception and
//! arms the session's scaffold context, capped at the configured
//! scaffold depth.

use chrono::Utc;
use tracing::{info, warn};
use tutor_common::db::history;
use tutor_common::db::models::{Student, TurnResult, UndiagnosedMiss};
use tutor_common::events::{ProblemVariant, SessionEvent};

use crate::error::{Error, Result};
use crate::pipeline::PipelineDeps;
use crate::registry::{PipelineRun, ScaffoldContext, ServedProblem};

/// Grade a submitted answer against the session's current problem.
///
/// Fails fast when the session has no completed run to grade against;
/// the grading itself runs as a spawned task and reports through the
/// session's event channel.
pub fn start_grading(
    deps: PipelineDeps,
    session_id: String,
    student: Student,
    answer: String,
) -> Result<()> {
    let (run, problem) = deps
        .registry
        .current_problem(&session_id)
        .ok_or_else(|| Error::InvalidState("no active problem for this session".to_string()))?;
    tokio::spawn(async move {
        grade_task(deps, session_id, student, run, problem, answer).await;
    });
    Ok(())
}

/// Record the current problem as skipped, without grading.
///
/// Also cancels any in-flight pipeline run for the session. Skipped
/// turns are marked so the analysis pass never tries to diagnose them.
pub async fn record_skip(deps: &PipelineDeps, session_id: &str, student: &Student) -> Result<()> {
    deps.registry.cancel(session_id);

    if let Some((run, problem)) = deps.registry.current_problem(session_id) {
        let turn = TurnResult {
            student_id: student.id,
            problem_id: problem.artifact_id,
            question: problem.question.clone(),
            correct_answer: problem.answer.clone(),
            student_answer: "skipped".to_string(),
            is_correct: false,
            topic: Some(problem.fingerprint.topic.clone()),
            requested_topic: run.requested_topic.clone(),
            weakness: Some("skipped".to_string()),
            scaffold_level: 0,
            scaffold_parent_id: None,
        };
        history::persist_turn_result(&deps.pool, &turn).await?;
        info!(session_id, student_id = student.id, "problem skipped");
    }
    Ok(())
}

/// Parse an answer the way students type them: integer first, then
/// decimal
fn parse_numeric(text: &str) -> Option<f64> {
    let text = text.trim();
    text.parse::<i64>()
        .map(|n| n as f64)
        .or_else(|_| text.parse::<f64>())
        .ok()
}

async fn grade_task(
    deps: PipelineDeps,
    session_id: String,
    student: Student,
    run: PipelineRun,
    problem: ServedProblem,
    answer: String,
) {
    let Some(student_value) = parse_numeric(&answer) else {
        deps.channel.publish(
            &session_id,
            SessionEvent::ErrorMessage {
                message: "Please enter a number".to_string(),
            },
        );
        return;
    };

    // An unparseable generated answer grades as wrong rather than
    // blocking the student
    let is_correct = problem
        .answer
        .as_deref()
        .and_then(parse_numeric)
        .map(|correct| (correct - student_value).abs() < 1e-9)
        .unwrap_or(false);

    let scaffold_ctx = deps.registry.scaffold_of(&session_id);
    let answered_level = match run.variant {
        ProblemVariant::Scaffold => scaffold_ctx.as_ref().map(|c| c.level).unwrap_or(1),
        ProblemVariant::Standard => 0,
    };
    let parent_history_id = scaffold_ctx.as_ref().and_then(|c| c.parent_history_id);

    let turn = TurnResult {
        student_id: student.id,
        problem_id: problem.artifact_id,
        question: problem.question.clone(),
        correct_answer: problem.answer.clone(),
        student_answer: student_value.to_string(),
        is_correct,
        topic: Some(problem.fingerprint.topic.clone()),
        requested_topic: run.requested_topic.clone(),
        weakness: if is_correct {
            None
        } else {
            Some("needs review".to_string())
        },
        scaffold_level: answered_level,
        scaffold_parent_id: parent_history_id,
    };
    let history_id = match history::persist_turn_result(&deps.pool, &turn).await {
        Ok(id) => Some(id),
        Err(e) => {
            warn!(%e, %session_id, "turn result not persisted");
            None
        }
    };

    let correct_answer = problem.answer.clone().unwrap_or_default();
    let feedback = match deps
        .generator
        .explain_result(
            student.grade,
            &problem.question,
            problem.answer.as_deref(),
            &answer,
            is_correct,
        )
        .await
    {
        Ok(text) => text,
        Err(e) => {
            warn!(%e, %session_id, "feedback generation failed, using canned text");
            if is_correct {
                "Great job! That's exactly right.".to_string()
            } else {
                format!("Not quite — the answer was {correct_answer}. Let's try a similar one!")
            }
        }
    };
    if let Some(id) = history_id {
        if let Err(e) = history::update_feedback(&deps.pool, id, &feedback).await {
            warn!(%e, history_id = id, "feedback not persisted");
        }
    }

    let scaffold_maxed = answered_level >= deps.config.max_scaffold_level;
    let scaffold_complete = is_correct && run.variant == ProblemVariant::Scaffold;
    if scaffold_complete || (is_correct && scaffold_ctx.is_some()) {
        deps.registry.clear_scaffold(&session_id);
    }

    info!(
        %session_id,
        student_id = student.id,
        is_correct,
        level = answered_level,
        "answer graded"
    );
    deps.channel.publish(
        &session_id,
        SessionEvent::Graded {
            is_correct,
            correct_answer,
            feedback,
            scaffold_available: !is_correct && !scaffold_maxed,
            scaffold_complete,
            timestamp: Utc::now(),
        },
    );

    if is_correct || scaffold_maxed {
        if scaffold_maxed {
            // Depth limit reached; stop the remediation chain here
            deps.registry.clear_scaffold(&session_id);
        }
        return;
    }

    diagnose_and_arm(
        &deps,
        &session_id,
        &student,
        &problem,
        history_id,
        parent_history_id,
        answered_level,
        student_value,
    )
    .await;
}

/// Classify the miss and store scaffold context so the next scaffold
/// request can run without re-diagnosing
#[allow(clippy::too_many_arguments)]
async fn diagnose_and_arm(
    deps: &PipelineDeps,
    session_id: &str,
    student: &Student,
    problem: &ServedProblem,
    history_id: Option<i64>,
    parent_history_id: Option<i64>,
    answered_level: i64,
    student_value: f64,
) {
    let miss = UndiagnosedMiss {
        history_id: history_id.unwrap_or(0),
        question: problem.question.clone(),
        correct_answer: problem.answer.clone(),
        student_answer: Some(student_value.to_string()),
        topic: Some(problem.fingerprint.topic.clone()),
    };
    let diagnosis = match deps
        .generator
        .diagnose(student.grade, student.curriculum_style, &miss)
        .await
    {
        Ok(diagnosis) => diagnosis,
        Err(e) => {
            // The Graded event already offered a follow-up; retract it
            // so the client does not request a scaffold that will 400
            warn!(%e, session_id, "diagnosis failed, scaffold not armed");
            deps.channel.publish(
                session_id,
                SessionEvent::ErrorMessage {
                    message: "We couldn't work out what went wrong there. \
                              Ask for a new problem to keep practicing!"
                        .to_string(),
                },
            );
            return;
        }
    };

    if let Some(id) = history_id {
        if let Err(e) = history::update_misconception(
            &deps.pool,
            id,
            &diagnosis.misconception_type,
            diagnosis.misconception_detail.as_deref().unwrap_or(""),
        )
        .await
        {
            warn!(%e, history_id = id, "misconception not persisted");
        }
    }

    let next_level = answered_level + 1;
    let scaffold_topic = diagnosis
        .scaffold_topic
        .clone()
        .unwrap_or_else(|| problem.fingerprint.topic.clone());
    deps.registry.set_scaffold(
        session_id,
        ScaffoldContext {
            topic: problem.fingerprint.topic.clone(),
            misconception_type: Some(diagnosis.misconception_type.clone()),
            misconception_detail: diagnosis.misconception_detail.clone(),
            scaffold_hint: diagnosis.scaffold_hint.clone(),
            level: next_level,
            parent_history_id: parent_history_id.or(history_id),
            original_question: problem.question.clone(),
        },
    );

    deps.channel.publish(
        session_id,
        SessionEvent::ScaffoldReady {
            misconception_type: diagnosis.misconception_type,
            misconception_detail: diagnosis
                .misconception_detail
                .unwrap_or_else(|| "Could not determine the specific error".to_string()),
            scaffold_topic,
            scaffold_hint: diagnosis
                .scaffold_hint
                .unwrap_or_else(|| "Think step by step!".to_string()),
            scaffold_level: next_level,
            timestamp: Utc::now(),
        },
    );
}

#[cfg(test)]
mod tests {
    use super::parse_numeric;

    #[test]
    fn parses_integers_and_decimals() {
        assert_eq!(parse_numeric("42"), Some(42.0));
        assert_eq!(parse_numeric(" 3.5 "), Some(3.5));
        assert_eq!(parse_numeric("-7"), Some(-7.0));
        assert_eq!(parse_numeric("seven"), None);
        assert_eq!(parse_numeric(""), None);
    }
}
