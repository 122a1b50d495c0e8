// HTTP route handlers for the Gradebox API

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use gradebox_engine::error::GradeError;
use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, TextEncoder};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};

use crate::AppState;

lazy_static! {
    static ref DRAFTS_TOTAL: IntCounter = prometheus::register_int_counter!(
        "gradebox_drafts_total",
        "Draft saves accepted"
    )
    .unwrap();
    static ref PRECHECKS_TOTAL: IntCounter = prometheus::register_int_counter!(
        "gradebox_prechecks_total",
        "Pre-check runs completed"
    )
    .unwrap();
    static ref SUBMISSIONS_TOTAL: IntCounter = prometheus::register_int_counter!(
        "gradebox_submissions_total",
        "Submissions finalized"
    )
    .unwrap();
    static ref CONFLICTS_TOTAL: IntCounter = prometheus::register_int_counter!(
        "gradebox_conflicts_total",
        "Writes rejected by the submission status guard"
    )
    .unwrap();
    static ref GRADING_FAILURES_TOTAL: IntCounter = prometheus::register_int_counter!(
        "gradebox_grading_failures_total",
        "Grading calls that failed with a bootstrap or store error"
    )
    .unwrap();
}

#[derive(Debug, Deserialize)]
pub struct DraftRequest {
    pub user_id: String,
    pub answers: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct PreCheckRequest {
    pub user_id: String,
    pub question_id: String,
    pub answers: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub user_id: String,
    pub answers: HashMap<String, String>,
}

fn error_response(err: GradeError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &err {
        GradeError::Conflict => {
            CONFLICTS_TOTAL.inc();
            StatusCode::CONFLICT
        }
        GradeError::Locked => StatusCode::LOCKED,
        GradeError::UnknownAssignment(_) | GradeError::UnknownQuestion(_) => StatusCode::NOT_FOUND,
        GradeError::Bootstrap(_) | GradeError::Store(_) => {
            GRADING_FAILURES_TOTAL.inc();
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %err, "request failed");
    }
    (status, Json(serde_json::json!({ "error": err.to_string() })))
}

/// Admin lock gate, applied before the grading core is invoked.
async fn reject_if_locked(state: &AppState, assignment_id: &str) -> Result<(), GradeError> {
    let assignment = state
        .service
        .assignment(assignment_id)
        .await?
        .ok_or_else(|| GradeError::UnknownAssignment(assignment_id.to_string()))?;
    if assignment.is_locked {
        return Err(GradeError::Locked);
    }
    Ok(())
}

/// POST /assignments/{id}/draft - Save in-progress answers
pub async fn save_draft(
    State(state): State<Arc<AppState>>,
    Path(assignment_id): Path<String>,
    Json(payload): Json<DraftRequest>,
) -> impl IntoResponse {
    let result = async {
        reject_if_locked(&state, &assignment_id).await?;
        state
            .service
            .save_draft(&payload.user_id, &assignment_id, payload.answers)
            .await
    }
    .await;

    match result {
        Ok(()) => {
            DRAFTS_TOTAL.inc();
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => error_response(e).into_response(),
    }
}

/// POST /assignments/{id}/precheck - Run the visible tests of one question
pub async fn pre_check(
    State(state): State<Arc<AppState>>,
    Path(assignment_id): Path<String>,
    Json(payload): Json<PreCheckRequest>,
) -> impl IntoResponse {
    let result = async {
        reject_if_locked(&state, &assignment_id).await?;
        state
            .service
            .pre_check(
                &payload.user_id,
                &assignment_id,
                &payload.question_id,
                payload.answers,
            )
            .await
    }
    .await;

    match result {
        Ok(report) => {
            PRECHECKS_TOTAL.inc();
            info!(
                %assignment_id,
                question_id = %payload.question_id,
                ratio = report.ratio,
                "pre-check served"
            );
            (StatusCode::OK, Json(report)).into_response()
        }
        Err(e) => error_response(e).into_response(),
    }
}

/// POST /assignments/{id}/submit - Grade and finalize
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Path(assignment_id): Path<String>,
    Json(payload): Json<SubmitRequest>,
) -> impl IntoResponse {
    let result = async {
        reject_if_locked(&state, &assignment_id).await?;
        state
            .service
            .submit(&payload.user_id, &assignment_id, payload.answers)
            .await
    }
    .await;

    match result {
        Ok(outcome) => {
            SUBMISSIONS_TOTAL.inc();
            info!(
                %assignment_id,
                user_id = %payload.user_id,
                score = outcome.final_score,
                late = outcome.late,
                "submission accepted"
            );
            (StatusCode::OK, Json(outcome)).into_response()
        }
        Err(e) => error_response(e).into_response(),
    }
}

/// GET /assignments/{id} - Assignment content, hidden tests stripped
pub async fn get_assignment(
    State(state): State<Arc<AppState>>,
    Path(assignment_id): Path<String>,
) -> impl IntoResponse {
    match state.service.assignment(&assignment_id).await {
        Ok(Some(mut assignment)) => {
            for question in &mut assignment.questions {
                question.test_cases.retain(|t| t.visible);
            }
            (StatusCode::OK, Json(assignment)).into_response()
        }
        Ok(None) => error_response(GradeError::UnknownAssignment(assignment_id)).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// GET /assignments/{id}/submission/{user_id} - Stored submission state
pub async fn get_submission(
    State(state): State<Arc<AppState>>,
    Path((assignment_id, user_id)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.service.submission(&user_id, &assignment_id).await {
        Ok(Some(record)) => (StatusCode::OK, Json(record)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "no submission" })),
        )
            .into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// POST /session/restart - Drop pooled execution sessions
pub async fn restart_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.service.restart_session();
    StatusCode::NO_CONTENT
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus exposition
pub async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!(error = %e, "failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    (StatusCode::OK, buffer).into_response()
}
