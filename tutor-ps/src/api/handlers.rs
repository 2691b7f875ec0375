//! HTTP request handlers
//!
//! Implements the REST endpoints for students, problem requests,
//! answering, and learner records. Pipeline and grading work is spawned;
//! these handlers only admit, reject, or read state.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;
use tutor_common::curriculum::CurriculumStyle;
use tutor_common::db::{history, students};
use tutor_common::db::models::{HistoryEntry, StatsSummary, Student};
use tutor_common::events::{ProblemVariant, ProblemView};

use crate::api::server::AppContext;
use crate::error::Error;
use crate::grading;
use crate::pipeline;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    error: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateStudentRequest {
    name: String,
    grade: i64,
    #[serde(default)]
    curriculum_style: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProblemRequest {
    student_id: i64,
    session_id: String,
    #[serde(default)]
    topic: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScaffoldRequest {
    student_id: i64,
    session_id: String,
}

#[derive(Debug, Serialize)]
pub struct RunStartedResponse {
    status: String,
    run_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    student_id: i64,
    session_id: String,
    answer: String,
}

#[derive(Debug, Deserialize)]
pub struct SkipRequest {
    student_id: i64,
    session_id: String,
}

#[derive(Debug, Serialize)]
pub struct AckResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct StudentQuery {
    student_id: i64,
    #[serde(default)]
    limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    session_id: String,
    run_id: Uuid,
    stage: String,
    variant: ProblemVariant,
    started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    problem: Option<ProblemView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    walkthrough: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    focus_note: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    history: Vec<HistoryEntry>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn to_http(e: Error) -> ApiError {
    let status = match &e {
        Error::PipelineBusy(_) => StatusCode::CONFLICT,
        Error::BadRequest(_) | Error::InvalidState(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) | Error::Common(tutor_common::Error::NotFound(_)) => {
            StatusCode::NOT_FOUND
        }
        Error::Common(tutor_common::Error::InvalidInput(_)) => StatusCode::BAD_REQUEST,
        Error::Database(_) | Error::Common(tutor_common::Error::Database(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        Error::Generator(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("Request failed: {}", e);
    }
    (status, Json(ErrorResponse { error: e.to_string() }))
}

// ============================================================================
// Health Endpoint
// ============================================================================

/// GET /health - Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "problem_service".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// Student Endpoints
// ============================================================================

/// GET /api/students - List all learner profiles
pub async fn list_students(
    State(ctx): State<AppContext>,
) -> Result<Json<Vec<Student>>, ApiError> {
    let list = students::list_students(&ctx.deps.pool)
        .await
        .map_err(|e| to_http(e.into()))?;
    Ok(Json(list))
}

/// POST /api/students - Create a learner profile
pub async fn create_student(
    State(ctx): State<AppContext>,
    Json(req): Json<CreateStudentRequest>,
) -> Result<(StatusCode, Json<Student>), ApiError> {
    let style = match req.curriculum_style.as_deref() {
        None => CurriculumStyle::CommonCore,
        Some(name) => CurriculumStyle::from_str(name).ok_or_else(|| {
            to_http(Error::BadRequest(format!("unknown curriculum style: {name}")))
        })?,
    };
    let student_id = students::create_student(&ctx.deps.pool, &req.name, req.grade, style)
        .await
        .map_err(|e| to_http(e.into()))?;
    let student = students::get_student(&ctx.deps.pool, student_id)
        .await
        .map_err(|e| to_http(e.into()))?;
    info!(student_id = student.id, grade = student.grade, "student created");
    Ok((StatusCode::CREATED, Json(student)))
}

// ============================================================================
// Problem Pipeline Endpoints
// ============================================================================

/// POST /api/problem - Start a standard problem pipeline run
///
/// An admitted request clears any armed scaffold context: asking for a
/// fresh problem abandons the remediation chain. Responds 409 while a
/// run is already in flight for the session.
pub async fn request_problem(
    State(ctx): State<AppContext>,
    Json(req): Json<ProblemRequest>,
) -> Result<(StatusCode, Json<RunStartedResponse>), ApiError> {
    let student = students::get_student(&ctx.deps.pool, req.student_id)
        .await
        .map_err(|e| to_http(e.into()))?;

    let run_id = pipeline::start_run(
        ctx.deps.clone(),
        &req.session_id,
        student,
        ProblemVariant::Standard,
        req.topic,
        None,
    )
    .map_err(to_http)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(RunStartedResponse {
            status: "started".to_string(),
            run_id,
        }),
    ))
}

/// POST /api/problem/scaffold - Start a remedial follow-up run
///
/// Requires an armed scaffold context from a previously diagnosed wrong
/// answer; responds 400 otherwise.
pub async fn request_scaffold(
    State(ctx): State<AppContext>,
    Json(req): Json<ScaffoldRequest>,
) -> Result<(StatusCode, Json<RunStartedResponse>), ApiError> {
    let student = students::get_student(&ctx.deps.pool, req.student_id)
        .await
        .map_err(|e| to_http(e.into()))?;

    let scaffold = ctx
        .deps
        .registry
        .scaffold_of(&req.session_id)
        .ok_or_else(|| {
            to_http(Error::InvalidState(
                "no scaffold context for this session".to_string(),
            ))
        })?;

    let run_id = pipeline::start_run(
        ctx.deps.clone(),
        &req.session_id,
        student,
        ProblemVariant::Scaffold,
        None,
        Some(scaffold),
    )
    .map_err(to_http)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(RunStartedResponse {
            status: "started".to_string(),
            run_id,
        }),
    ))
}

/// GET /api/status?session_id= - Snapshot of the session's current run
pub async fn get_status(
    State(ctx): State<AppContext>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<StatusResponse>, ApiError> {
    let run = ctx
        .deps
        .registry
        .status_of(&query.session_id)
        .ok_or_else(|| {
            to_http(Error::NotFound(format!(
                "no pipeline run for session {}",
                query.session_id
            )))
        })?;

    Ok(Json(StatusResponse {
        session_id: run.session_id.clone(),
        run_id: run.run_id,
        stage: run.stage.as_str().to_string(),
        variant: run.variant,
        started_at: run.started_at,
        error: run.error.map(|kind| kind.as_str().to_string()),
        problem: run.problem.as_ref().map(|p| p.view()),
        walkthrough: run.walkthrough.clone(),
        focus_note: run.focus_note.clone(),
    }))
}

// ============================================================================
// Answering Endpoints
// ============================================================================

/// POST /api/answer - Grade an answer to the session's current problem
pub async fn submit_answer(
    State(ctx): State<AppContext>,
    Json(req): Json<AnswerRequest>,
) -> Result<(StatusCode, Json<AckResponse>), ApiError> {
    let student = students::get_student(&ctx.deps.pool, req.student_id)
        .await
        .map_err(|e| to_http(e.into()))?;

    grading::start_grading(ctx.deps.clone(), req.session_id, student, req.answer)
        .map_err(to_http)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AckResponse {
            status: "grading".to_string(),
        }),
    ))
}

/// POST /api/skip - Skip the current problem, cancelling any active run
pub async fn skip_problem(
    State(ctx): State<AppContext>,
    Json(req): Json<SkipRequest>,
) -> Result<Json<AckResponse>, ApiError> {
    let student = students::get_student(&ctx.deps.pool, req.student_id)
        .await
        .map_err(|e| to_http(e.into()))?;

    grading::record_skip(&ctx.deps, &req.session_id, &student)
        .await
        .map_err(to_http)?;
    Ok(Json(AckResponse {
        status: "skipped".to_string(),
    }))
}

// ============================================================================
// Learner Record Endpoints
// ============================================================================

/// GET /api/history?student_id= - Recent graded turns, newest first
pub async fn get_history(
    State(ctx): State<AppContext>,
    Query(query): Query<StudentQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let entries = history::get_history(
        &ctx.deps.pool,
        query.student_id,
        query.limit.unwrap_or(20),
    )
    .await
    .map_err(|e| to_http(e.into()))?;
    Ok(Json(HistoryResponse { history: entries }))
}

/// GET /api/stats?student_id= - Accuracy summary with per-topic breakdown
pub async fn get_stats(
    State(ctx): State<AppContext>,
    Query(query): Query<StudentQuery>,
) -> Result<Json<StatsSummary>, ApiError> {
    let stats = history::get_stats(&ctx.deps.pool, query.student_id)
        .await
        .map_err(|e| to_http(e.into()))?;
    Ok(Json(stats))
}
