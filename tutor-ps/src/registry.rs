//! Session pipeline registry
//!
//! Tracks at most one in-flight pipeline run per session (single-flight
//! admission is a compare-and-set under one lock), exposes run snapshots
//! to reconnecting clients, and handles skip-cancellation. Also owns the
//! per-session scaffold context captured after a wrong answer.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;
use tutor_common::db::models::Fingerprint;
use tutor_common::events::{ErrorKind, ProblemVariant, ProblemView, Stage};

use crate::error::{Error, Result};

/// A problem as held by a pipeline run
///
/// Carries the answer for server-side grading; `view()` strips it for
/// anything client-facing.
#[derive(Debug, Clone)]
pub struct ServedProblem {
    /// Bank row id; `None` when caching the generated problem failed
    pub artifact_id: Option<i64>,
    pub fingerprint: Fingerprint,
    pub question: String,
    /// Canonical numeric text; `None` when generator output had no
    /// usable answer (the problem is served but graded as wrong)
    pub answer: Option<String>,
    pub hint: String,
    pub cache_hit: bool,
}

impl ServedProblem {
    pub fn view(&self) -> ProblemView {
        ProblemView {
            problem_id: self.artifact_id,
            question: self.question.clone(),
            hint: self.hint.clone(),
            topic: self.fingerprint.topic.clone(),
            variant: self.fingerprint.variant,
            cache_hit: self.cache_hit,
        }
    }
}

/// Snapshot of one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub session_id: String,
    pub student_id: i64,
    pub variant: ProblemVariant,
    pub requested_topic: Option<String>,
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
    pub problem: Option<ServedProblem>,
    pub walkthrough: Option<String>,
    pub focus_note: Option<String>,
    pub error: Option<ErrorKind>,
}

impl PipelineRun {
    pub fn new(
        session_id: &str,
        student_id: i64,
        variant: ProblemVariant,
        requested_topic: Option<String>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            student_id,
            variant,
            requested_topic,
            // Scaffold runs skip direction analysis entirely
            stage: match variant {
                ProblemVariant::Standard => Stage::Direction,
                ProblemVariant::Scaffold => Stage::Acquisition,
            },
            started_at: Utc::now(),
            problem: None,
            walkthrough: None,
            focus_note: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

/// Misconception context for a remedial follow-up problem
#[derive(Debug, Clone)]
pub struct ScaffoldContext {
    pub topic: String,
    pub misconception_type: Option<String>,
    pub misconception_detail: Option<String>,
    pub scaffold_hint: Option<String>,
    pub level: i64,
    pub parent_history_id: Option<i64>,
    pub original_question: String,
}

/// Handle held by a spawned pipeline task
pub struct RunHandle {
    pub run: Arc<RwLock<PipelineRun>>,
    pub cancel: watch::Receiver<bool>,
}

struct RunSlot {
    run: Arc<RwLock<PipelineRun>>,
    cancel_tx: watch::Sender<bool>,
}

#[derive(Default)]
struct SessionState {
    slot: Option<RunSlot>,
    scaffold: Option<ScaffoldContext>,
}

/// Registry of per-session pipeline state
///
/// One lock guards the session map; run snapshots have their own locks
/// so pipeline tasks never hold the map lock across a stage.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Admit a new pipeline run for the session.
    ///
    /// Fails fast with `PipelineBusy` while a non-terminal run holds the
    /// slot. A terminal run in the slot is superseded (that is the
    /// eviction path for finished runs).
    pub fn try_start(&self, initial: PipelineRun) -> Result<RunHandle> {
        let session_id = initial.session_id.clone();
        let mut sessions = self.sessions.lock().expect("registry poisoned");
        let state = sessions.entry(session_id.clone()).or_default();

        if let Some(slot) = &state.slot {
            if !slot.run.read().expect("run lock poisoned").is_terminal() {
                debug!(%session_id, "admission rejected: run in flight");
                return Err(Error::PipelineBusy(session_id));
            }
        }

        let run = Arc::new(RwLock::new(initial));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        state.slot = Some(RunSlot {
            run: Arc::clone(&run),
            cancel_tx,
        });
        Ok(RunHandle {
            run,
            cancel: cancel_rx,
        })
    }

    /// Point-in-time snapshot of the session's current run (active or
    /// last terminal), for reconnecting clients
    pub fn status_of(&self, session_id: &str) -> Option<PipelineRun> {
        let sessions = self.sessions.lock().expect("registry poisoned");
        sessions
            .get(session_id)
            .and_then(|s| s.slot.as_ref())
            .map(|slot| slot.run.read().expect("run lock poisoned").clone())
    }

    /// The session's currently served problem, when the last run is Done
    pub fn current_problem(&self, session_id: &str) -> Option<(PipelineRun, ServedProblem)> {
        self.status_of(session_id).and_then(|run| {
            if run.stage == Stage::Done {
                run.problem.clone().map(|p| (run, p))
            } else {
                None
            }
        })
    }

    /// Cancel the session's non-terminal run, if any.
    ///
    /// The snapshot is marked `Failed`/`Skipped` synchronously so the
    /// slot is immediately re-admittable; the running task observes the
    /// signal at its next suspension point, emits the terminal event
    /// itself, and exits.
    pub fn cancel(&self, session_id: &str) -> bool {
        let sessions = self.sessions.lock().expect("registry poisoned");
        let Some(slot) = sessions.get(session_id).and_then(|s| s.slot.as_ref()) else {
            return false;
        };
        {
            let mut run = slot.run.write().expect("run lock poisoned");
            if run.is_terminal() {
                return false;
            }
            run.stage = Stage::Failed;
            run.error = Some(ErrorKind::Skipped);
        }
        let _ = slot.cancel_tx.send(true);
        info!(session_id, "pipeline run cancelled");
        true
    }

    /// Commit a terminal snapshot from the pipeline task.
    ///
    /// Returns false when the run was already terminal (cancelled from
    /// under the task); the cancelled state wins in that case.
    pub fn finish(&self, handle: &RunHandle, terminal: PipelineRun) -> bool {
        debug_assert!(terminal.is_terminal());
        let mut run = handle.run.write().expect("run lock poisoned");
        if run.is_terminal() {
            return false;
        }
        *run = terminal;
        true
    }

    // --- scaffold context -------------------------------------------------

    pub fn set_scaffold(&self, session_id: &str, context: ScaffoldContext) {
        let mut sessions = self.sessions.lock().expect("registry poisoned");
        sessions.entry(session_id.to_string()).or_default().scaffold = Some(context);
    }

    pub fn scaffold_of(&self, session_id: &str) -> Option<ScaffoldContext> {
        let sessions = self.sessions.lock().expect("registry poisoned");
        sessions.get(session_id).and_then(|s| s.scaffold.clone())
    }

    pub fn clear_scaffold(&self, session_id: &str) {
        let mut sessions = self.sessions.lock().expect("registry poisoned");
        if let Some(state) = sessions.get_mut(session_id) {
            state.scaffold = None;
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standard_run(session: &str) -> PipelineRun {
        PipelineRun::new(session, 1, ProblemVariant::Standard, None)
    }

    #[test]
    fn second_start_is_busy_until_terminal() {
        let registry = SessionRegistry::new();
        let handle = registry.try_start(standard_run("s1")).unwrap();
        assert!(matches!(
            registry.try_start(standard_run("s1")),
            Err(Error::PipelineBusy(_))
        ));

        let mut terminal = handle.run.read().unwrap().clone();
        terminal.stage = Stage::Done;
        assert!(registry.finish(&handle, terminal));

        // Terminal slot is superseded by the next admission
        registry.try_start(standard_run("s1")).unwrap();
    }

    #[test]
    fn sessions_are_independent() {
        let registry = SessionRegistry::new();
        registry.try_start(standard_run("s1")).unwrap();
        registry.try_start(standard_run("s2")).unwrap();
    }

    #[test]
    fn cancel_marks_skipped_and_readmits() {
        let registry = SessionRegistry::new();
        let handle = registry.try_start(standard_run("s1")).unwrap();
        assert!(registry.cancel("s1"));
        assert!(*handle.cancel.borrow());

        let snapshot = registry.status_of("s1").unwrap();
        assert_eq!(snapshot.stage, Stage::Failed);
        assert_eq!(snapshot.error, Some(ErrorKind::Skipped));

        // Slot is immediately free for the next run
        registry.try_start(standard_run("s1")).unwrap();
    }

    #[test]
    fn cancel_without_active_run_is_noop() {
        let registry = SessionRegistry::new();
        assert!(!registry.cancel("s1"));

        let handle = registry.try_start(standard_run("s1")).unwrap();
        let mut terminal = handle.run.read().unwrap().clone();
        terminal.stage = Stage::Done;
        registry.finish(&handle, terminal);
        assert!(!registry.cancel("s1"));
    }

    #[test]
    fn finish_does_not_overwrite_cancellation() {
        let registry = SessionRegistry::new();
        let handle = registry.try_start(standard_run("s1")).unwrap();
        registry.cancel("s1");

        let mut done = handle.run.read().unwrap().clone();
        done.stage = Stage::Done;
        done.error = None;
        assert!(!registry.finish(&handle, done));
        assert_eq!(registry.status_of("s1").unwrap().error, Some(ErrorKind::Skipped));
    }

    #[test]
    fn scaffold_context_round_trip() {
        let registry = SessionRegistry::new();
        registry.set_scaffold(
            "s1",
            ScaffoldContext {
                topic: "Fractions".to_string(),
                misconception_type: Some("conceptual".to_string()),
                misconception_detail: None,
                scaffold_hint: None,
                level: 1,
                parent_history_id: Some(7),
                original_question: "q".to_string(),
            },
        );
        assert_eq!(registry.scaffold_of("s1").unwrap().topic, "Fractions");
        registry.clear_scaffold("s1");
        assert!(registry.scaffold_of("s1").is_none());
    }
}
