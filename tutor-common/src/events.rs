//! Event types for the tutor progress event system
//!
//! Events are published per session by the pipeline orchestrator and the
//! grading follow-up, and serialized for SSE transmission. All events use
//! these central enums for type safety and exhaustive matching.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline stages, in execution order
///
/// `Done` and `Failed` are terminal. A standard run enters at
/// `Direction`; a scaffold run enters at `Acquisition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Direction,
    Acquisition,
    Feedback,
    Analysis,
    Done,
    Failed,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Direction => "Direction",
            Stage::Acquisition => "Acquisition",
            Stage::Feedback => "Feedback",
            Stage::Analysis => "Analysis",
            Stage::Done => "Done",
            Stage::Failed => "Failed",
        }
    }
}

/// Terminal failure reasons, surfaced to clients as stable strings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Problem bank or history storage unreachable
    StorageUnavailable,
    /// Generator backend rejected or errored
    GenerationFailure,
    /// Admission rejected: a run is already in flight for the session
    PipelineBusy,
    /// A stage exceeded its configured time bound
    Timeout,
    /// Explicit cancellation via the skip action
    Skipped,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::StorageUnavailable => "StorageUnavailable",
            ErrorKind::GenerationFailure => "GenerationFailure",
            ErrorKind::PipelineBusy => "PipelineBusy",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Skipped => "Skipped",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a problem request is a fresh problem or a remedial follow-up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemVariant {
    Standard,
    Scaffold,
}

impl ProblemVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProblemVariant::Standard => "standard",
            ProblemVariant::Scaffold => "scaffold",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "standard" => Some(ProblemVariant::Standard),
            "scaffold" => Some(ProblemVariant::Scaffold),
            _ => None,
        }
    }
}

/// Client-facing view of a served problem
///
/// Never carries the answer; grading is server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemView {
    /// Problem bank row id; `None` when the artifact could not be cached
    pub problem_id: Option<i64>,
    pub question: String,
    pub hint: String,
    pub topic: String,
    pub variant: ProblemVariant,
    /// Whether the problem came from the bank rather than fresh generation
    pub cache_hit: bool,
}

/// Payload of a pipeline progress event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventPayload {
    /// A non-terminal stage finished; the run is moving to the next stage
    StageCompleted {
        /// Set on Acquisition completion: bank hit or generator fallback
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_hit: Option<bool>,
    },
    /// Terminal: the run produced a problem
    Completed {
        problem: ProblemView,
        #[serde(skip_serializing_if = "Option::is_none")]
        walkthrough: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        focus_note: Option<String>,
    },
    /// Terminal: the run failed
    Failed { kind: ErrorKind, message: String },
}

/// Ordered progress event for one pipeline run
///
/// Sequence numbers are strictly increasing with no gaps within a run;
/// the orchestrator is the sole writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub session_id: String,
    pub sequence: u64,
    /// Stage the event reports on; terminal events use `Done`/`Failed`
    pub stage: Stage,
    #[serde(flatten)]
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
}

/// All events delivered on a session's channel
///
/// Pipeline progress carries run-ordered sequence numbers; grading
/// notices are best-effort session notifications with no ordering
/// contract beyond channel FIFO.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    /// Pipeline stage progress / terminal result
    Pipeline { event: ProgressEvent },

    /// An answer was graded
    Graded {
        is_correct: bool,
        correct_answer: String,
        feedback: String,
        /// True when a remedial follow-up can be requested
        scaffold_available: bool,
        /// True when a correct answer closed out a scaffold sequence
        scaffold_complete: bool,
        timestamp: DateTime<Utc>,
    },

    /// A wrong answer was diagnosed; a scaffold problem can be requested
    ScaffoldReady {
        misconception_type: String,
        misconception_detail: String,
        scaffold_topic: String,
        scaffold_hint: String,
        scaffold_level: i64,
        timestamp: DateTime<Utc>,
    },

    /// Non-fatal error notice for client display
    ErrorMessage { message: String },
}

impl SessionEvent {
    /// SSE event name for this event
    pub fn event_name(&self) -> &'static str {
        match self {
            SessionEvent::Pipeline { .. } => "Pipeline",
            SessionEvent::Graded { .. } => "Graded",
            SessionEvent::ScaffoldReady { .. } => "ScaffoldReady",
            SessionEvent::ErrorMessage { .. } => "ErrorMessage",
        }
    }
}
