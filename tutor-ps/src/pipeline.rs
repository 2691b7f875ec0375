//! Pipeline orchestration
//!
//! One spawned task per admitted run drives the stages in order:
//! Direction (standard runs only), Acquisition, Feedback, then a
//! best-effort Analysis pass, ending in exactly one terminal event.
//! The task is the sole writer of the run's event sequence, so numbers
//! are gapless and the terminal event is always last. Cancellation is
//! observed at stage boundaries and at generator suspension points.

use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;
use tutor_common::curriculum;
use tutor_common::db::history;
use tutor_common::db::models::{Fingerprint, Student};
use tutor_common::events::{
    ErrorKind, EventPayload, ProblemVariant, ProgressEvent, SessionEvent, Stage,
};

use crate::bank::ProblemBank;
use crate::channel::EventChannel;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::generator::{GenerationRequest, Generator};
use crate::registry::{PipelineRun, RunHandle, ScaffoldContext, ServedProblem, SessionRegistry};

/// Shared services a pipeline run operates on
#[derive(Clone)]
pub struct PipelineDeps {
    pub pool: SqlitePool,
    pub bank: Arc<ProblemBank>,
    pub registry: Arc<SessionRegistry>,
    pub channel: Arc<EventChannel>,
    pub generator: Arc<dyn Generator>,
    pub config: Arc<Config>,
}

/// Admit and spawn a pipeline run for the session.
///
/// Returns the run id immediately; progress is delivered on the
/// session's event channel. Fails with `PipelineBusy` while another run
/// is in flight for the same session.
pub fn start_run(
    deps: PipelineDeps,
    session_id: &str,
    student: Student,
    variant: ProblemVariant,
    requested_topic: Option<String>,
    scaffold: Option<ScaffoldContext>,
) -> Result<Uuid> {
    let initial = PipelineRun::new(session_id, student.id, variant, requested_topic.clone());
    let run_id = initial.run_id;
    let handle = deps.registry.try_start(initial)?;
    if variant == ProblemVariant::Standard {
        // A fresh problem abandons any armed remediation chain; a
        // rejected admission must leave it intact
        deps.registry.clear_scaffold(session_id);
    }
    info!(
        session_id,
        %run_id,
        variant = variant.as_str(),
        "pipeline run admitted"
    );

    let task = RunTask {
        deps,
        handle,
        session_id: session_id.to_string(),
        run_id,
        student,
        variant,
        requested_topic,
        scaffold,
        sequence: 0,
    };
    tokio::spawn(task.run());
    Ok(run_id)
}

/// Result of racing a stage against cancellation and the stage timeout
enum StageOutcome<T> {
    Ok(T),
    Cancelled,
    TimedOut,
}

async fn bounded<T>(
    cancel: &mut watch::Receiver<bool>,
    limit: Duration,
    work: impl std::future::Future<Output = T>,
) -> StageOutcome<T> {
    if *cancel.borrow() {
        return StageOutcome::Cancelled;
    }
    tokio::select! {
        // A closed sender means the slot was torn down; treat it the
        // same as an explicit skip
        _ = cancel.changed() => StageOutcome::Cancelled,
        result = tokio::time::timeout(limit, work) => match result {
            Ok(value) => StageOutcome::Ok(value),
            Err(_) => StageOutcome::TimedOut,
        },
    }
}

struct RunTask {
    deps: PipelineDeps,
    handle: RunHandle,
    session_id: String,
    run_id: Uuid,
    student: Student,
    variant: ProblemVariant,
    requested_topic: Option<String>,
    scaffold: Option<ScaffoldContext>,
    sequence: u64,
}

impl RunTask {
    async fn run(mut self) {
        let limit = self.deps.config.stage_timeout();

        // --- Direction ---------------------------------------------------
        let (topic, guidance) = match self.variant {
            ProblemVariant::Scaffold => {
                // Remedial runs reuse the diagnosed context instead of a
                // fresh direction analysis
                let ctx = match self.scaffold.clone() {
                    Some(ctx) => ctx,
                    None => {
                        return self.fail(
                            Stage::Acquisition,
                            ErrorKind::GenerationFailure,
                            "no scaffold context for this session".to_string(),
                        );
                    }
                };
                (ctx.topic.clone(), None)
            }
            ProblemVariant::Standard => {
                let summary = match history::history_summary_text(
                    &self.deps.pool,
                    self.student.id,
                    10,
                )
                .await
                {
                    Ok(summary) => summary,
                    Err(e) => {
                        warn!(%e, "history summary unavailable, directing without it");
                        String::new()
                    }
                };

                let requested = self.requested_topic.clone();
                let outcome = bounded(
                    &mut self.handle.cancel,
                    limit,
                    self.deps.generator.analyze_direction(
                        &self.student,
                        &summary,
                        requested.as_deref(),
                    ),
                )
                .await;
                let plan = match outcome {
                    StageOutcome::Cancelled => return self.cancelled(),
                    StageOutcome::TimedOut => {
                        return self.timed_out(Stage::Direction, limit);
                    }
                    StageOutcome::Ok(Err(e)) => {
                        return self.fail_with_error(Stage::Direction, e);
                    }
                    StageOutcome::Ok(Ok(plan)) => plan,
                };
                self.advance(Stage::Acquisition);
                self.emit(Stage::Direction, EventPayload::StageCompleted { cache_hit: None });
                (plan.topic, plan.guidance)
            }
        };

        // --- Acquisition -------------------------------------------------
        let fingerprint = Fingerprint {
            grade: self.student.grade,
            style: self.student.curriculum_style,
            topic: curriculum::canonical_topic(&topic),
            variant: self.variant,
        };

        let exclude: HashSet<i64> = match history::recent_problem_ids(
            &self.deps.pool,
            self.student.id,
            self.deps.config.recent_window,
        )
        .await
        {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                warn!(%e, "recent-problem window unavailable, serving without dedup");
                HashSet::new()
            }
        };

        let cached = match self.deps.bank.lookup(&fingerprint, &exclude).await {
            Ok(artifact) => artifact,
            Err(e) => {
                warn!(%e, "bank lookup failed, falling back to generation");
                None
            }
        };

        let served = match cached {
            Some(artifact) => {
                if let Err(e) = self.deps.bank.record_hit(artifact.id).await {
                    warn!(%e, artifact_id = artifact.id, "serve count not recorded");
                }
                debug!(
                    session_id = %self.session_id,
                    artifact_id = artifact.id,
                    times_served = artifact.times_served,
                    "serving cached problem"
                );
                ServedProblem {
                    artifact_id: Some(artifact.id),
                    fingerprint: fingerprint.clone(),
                    question: artifact.question,
                    answer: Some(artifact.answer),
                    hint: artifact.hint,
                    cache_hit: true,
                }
            }
            None => {
                let request = GenerationRequest {
                    grade: self.student.grade,
                    style: self.student.curriculum_style,
                    topic: fingerprint.topic.clone(),
                    variant: self.variant,
                    guidance,
                    scaffold_hint: self
                        .scaffold
                        .as_ref()
                        .and_then(|c| c.scaffold_hint.clone()),
                    misconception_detail: self
                        .scaffold
                        .as_ref()
                        .and_then(|c| c.misconception_detail.clone()),
                };
                let outcome = bounded(
                    &mut self.handle.cancel,
                    limit,
                    self.deps.generator.generate(&request),
                )
                .await;
                let generated = match outcome {
                    StageOutcome::Cancelled => return self.cancelled(),
                    StageOutcome::TimedOut => {
                        return self.timed_out(Stage::Acquisition, limit);
                    }
                    StageOutcome::Ok(Err(e)) => {
                        return self.fail_with_error(Stage::Acquisition, e);
                    }
                    StageOutcome::Ok(Ok(problem)) => problem,
                };

                // Only answerable problems enter the bank
                let artifact_id = match &generated.answer {
                    Some(answer) => {
                        match self
                            .deps
                            .bank
                            .insert(&fingerprint, &generated.question, answer, &generated.hint)
                            .await
                        {
                            Ok(artifact) => Some(artifact.id),
                            Err(e) => {
                                warn!(%e, "bank insert failed, serving uncached");
                                None
                            }
                        }
                    }
                    None => None,
                };
                ServedProblem {
                    artifact_id,
                    fingerprint: fingerprint.clone(),
                    question: generated.question,
                    answer: generated.answer,
                    hint: generated.hint,
                    cache_hit: false,
                }
            }
        };

        let cache_hit = served.cache_hit;
        self.update(|run| run.problem = Some(served.clone()));
        self.advance(Stage::Feedback);
        self.emit(
            Stage::Acquisition,
            EventPayload::StageCompleted {
                cache_hit: Some(cache_hit),
            },
        );

        // --- Feedback ----------------------------------------------------
        let outcome = bounded(
            &mut self.handle.cancel,
            limit,
            self.deps.generator.compose_walkthrough(
                self.student.grade,
                self.student.curriculum_style,
                &served.question,
                served.answer.as_deref(),
                &served.hint,
            ),
        )
        .await;
        let walkthrough = match outcome {
            StageOutcome::Cancelled => return self.cancelled(),
            StageOutcome::TimedOut => return self.timed_out(Stage::Feedback, limit),
            StageOutcome::Ok(Err(e)) => return self.fail_with_error(Stage::Feedback, e),
            StageOutcome::Ok(Ok(text)) => text,
        };
        self.update(|run| run.walkthrough = Some(walkthrough.clone()));
        self.advance(Stage::Analysis);
        self.emit(Stage::Feedback, EventPayload::StageCompleted { cache_hit: None });

        // --- Analysis (best-effort) --------------------------------------
        let focus_note = self.analysis_pass(limit).await;
        if *self.handle.cancel.borrow() {
            return self.cancelled();
        }

        // --- Done --------------------------------------------------------
        let mut terminal = self.snapshot();
        terminal.stage = Stage::Done;
        terminal.problem = Some(served.clone());
        terminal.walkthrough = Some(walkthrough.clone());
        terminal.focus_note = focus_note.clone();
        terminal.error = None;
        if !self.deps.registry.finish(&self.handle, terminal) {
            return self.cancelled();
        }
        info!(
            session_id = %self.session_id,
            run_id = %self.run_id,
            cache_hit,
            "pipeline run complete"
        );
        self.emit(
            Stage::Done,
            EventPayload::Completed {
                problem: served.view(),
                walkthrough: Some(walkthrough),
                focus_note,
            },
        );
    }

    /// Diagnose the latest unexplained miss and derive a focus note.
    ///
    /// Everything here degrades: a generator or storage error costs the
    /// focus note, never the run.
    async fn analysis_pass(&mut self, limit: Duration) -> Option<String> {
        let miss = match history::latest_undiagnosed_miss(&self.deps.pool, self.student.id).await {
            Ok(miss) => miss,
            Err(e) => {
                warn!(%e, "miss lookup failed, skipping analysis");
                None
            }
        };

        if let Some(miss) = miss {
            let outcome = bounded(
                &mut self.handle.cancel,
                limit,
                self.deps.generator.diagnose(
                    self.student.grade,
                    self.student.curriculum_style,
                    &miss,
                ),
            )
            .await;
            match outcome {
                StageOutcome::Ok(Ok(diagnosis)) => {
                    if let Err(e) = history::update_misconception(
                        &self.deps.pool,
                        miss.history_id,
                        &diagnosis.misconception_type,
                        diagnosis.misconception_detail.as_deref().unwrap_or(""),
                    )
                    .await
                    {
                        warn!(%e, history_id = miss.history_id, "diagnosis not persisted");
                    }
                }
                StageOutcome::Ok(Err(e)) => warn!(%e, "diagnosis failed, continuing"),
                StageOutcome::TimedOut => warn!("diagnosis timed out, continuing"),
                StageOutcome::Cancelled => return None,
            }
        }

        match history::misconception_stats(&self.deps.pool, self.student.id).await {
            Ok(stats) => stats.first().filter(|(_, count)| *count >= 2).map(
                |(misconception, count)| {
                    format!(
                        "Heads up: {misconception} errors have come up {count} times. \
                         Slow down on those steps!"
                    )
                },
            ),
            Err(e) => {
                warn!(%e, "misconception stats unavailable");
                None
            }
        }
    }

    // --- snapshot and event plumbing -------------------------------------

    fn snapshot(&self) -> PipelineRun {
        self.handle.run.read().expect("run lock poisoned").clone()
    }

    fn update(&self, f: impl FnOnce(&mut PipelineRun)) {
        let mut run = self.handle.run.write().expect("run lock poisoned");
        if !run.is_terminal() {
            f(&mut run);
        }
    }

    fn advance(&self, stage: Stage) {
        self.update(|run| run.stage = stage);
    }

    fn emit(&mut self, stage: Stage, payload: EventPayload) {
        self.sequence += 1;
        let event = ProgressEvent {
            session_id: self.session_id.clone(),
            sequence: self.sequence,
            stage,
            payload,
            timestamp: Utc::now(),
        };
        self.deps
            .channel
            .publish(&self.session_id, SessionEvent::Pipeline { event });
    }

    fn timed_out(self, stage: Stage, limit: Duration) {
        let message = format!(
            "{} stage exceeded {}s",
            stage.as_str(),
            limit.as_secs()
        );
        self.fail(stage, ErrorKind::Timeout, message);
    }

    fn fail_with_error(self, stage: Stage, error: Error) {
        let kind = error.error_kind().unwrap_or(ErrorKind::GenerationFailure);
        self.fail(stage, kind, error.to_string());
    }

    /// Commit a failed terminal snapshot and emit the terminal event.
    ///
    /// A lost commit means the run was skipped from under us, in which
    /// case the skip is what gets reported.
    fn fail(mut self, stage: Stage, kind: ErrorKind, message: String) {
        let mut terminal = self.snapshot();
        terminal.stage = Stage::Failed;
        terminal.error = Some(kind);
        if !self.deps.registry.finish(&self.handle, terminal) {
            return self.cancelled();
        }
        warn!(
            session_id = %self.session_id,
            run_id = %self.run_id,
            stage = stage.as_str(),
            kind = kind.as_str(),
            detail = %message,
            "pipeline run failed"
        );
        self.emit(Stage::Failed, EventPayload::Failed { kind, message });
    }

    /// The terminal event for a skipped run; the registry already holds
    /// the `Failed`/`Skipped` snapshot
    fn cancelled(mut self) {
        debug!(
            session_id = %self.session_id,
            run_id = %self.run_id,
            "pipeline run observed skip"
        );
        self.emit(
            Stage::Failed,
            EventPayload::Failed {
                kind: ErrorKind::Skipped,
                message: "problem request skipped".to_string(),
            },
        );
    }
}
