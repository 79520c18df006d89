//! HTTP surface of the sandbox platform.
//!
//! Three sandbox endpoints plus attempt history, deferred execution and a
//! health probe. Authentication is an external collaborator: handlers trust
//! the `X-User-Id` header placed by the identity-providing proxy.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::error;
use uuid::Uuid;

use crate::error::SubmitError;
use crate::scheduler::{JobQueue, SubmissionJob};
use crate::storage::{Session, SessionState};
use crate::submission::SubmissionService;

/// Header carrying the authenticated user identity.
pub const USER_HEADER: &str = "x-user-id";

/// Default page size for attempt history.
const ATTEMPT_HISTORY_LIMIT: i64 = 20;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The submission orchestrator.
    pub service: Arc<SubmissionService>,
    /// Queue for deferred submissions.
    pub queue: Arc<JobQueue>,
}

/// Request body for `POST /sandbox/execute`.
#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    /// Playbook YAML content.
    pub code: String,
    /// Exercise to grade against; plain runs omit it.
    #[serde(default)]
    pub exercise_id: Option<String>,
    /// Hints the student revealed before submitting.
    #[serde(default)]
    pub hints_used: u32,
}

/// Session representation returned to clients.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub container_id: Option<String>,
    pub topology_name: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub is_expired: bool,
}

impl From<Session> for SessionView {
    fn from(session: Session) -> Self {
        let is_expired = session.is_expired();
        Self {
            id: session.id,
            container_id: session.container_id,
            topology_name: session.topology_name,
            state: session.state,
            created_at: session.created_at,
            expires_at: session.expires_at,
            last_activity: session.last_activity,
            is_expired,
        }
    }
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sandbox/create", post(create_sandbox))
        .route("/sandbox/execute", post(execute))
        .route("/sandbox/execute/async", post(execute_async))
        .route("/sandbox/jobs/:job_id", get(job_status))
        .route("/sandbox/destroy", post(destroy_sandbox))
        .route("/exercises/:exercise_id/attempts", get(attempt_history))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// POST /sandbox/create - create or return the user's session.
///
/// 201 on a fresh topology, 200 on reuse, 503/500 on provisioning failure.
async fn create_sandbox(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let user_id = match user_id(&headers) {
        Ok(user_id) => user_id,
        Err(response) => return response,
    };

    match state.service.create_session(&user_id).await {
        Ok((session, created)) => {
            let status = if created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            (status, Json(SessionView::from(session))).into_response()
        }
        Err(SubmitError::Provisioning(_)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "Failed to create sandbox"})),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

/// POST /sandbox/execute - validate, run and grade a playbook inline.
async fn execute(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ExecuteRequest>,
) -> Response {
    let user_id = match user_id(&headers) {
        Ok(user_id) => user_id,
        Err(response) => return response,
    };

    if request.code.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Code cannot be empty"})),
        )
            .into_response();
    }

    match state
        .service
        .submit(
            &user_id,
            &request.code,
            request.exercise_id.as_deref(),
            request.hints_used,
        )
        .await
    {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => submit_error_response(e),
    }
}

/// POST /sandbox/execute/async - enqueue the submission, return a handle.
async fn execute_async(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ExecuteRequest>,
) -> Response {
    let user_id = match user_id(&headers) {
        Ok(user_id) => user_id,
        Err(response) => return response,
    };

    if request.code.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Code cannot be empty"})),
        )
            .into_response();
    }

    let job = SubmissionJob::new(
        user_id,
        request.code,
        request.exercise_id,
        request.hints_used,
    );
    let job_id = job.id;
    state.queue.enqueue(job).await;

    (StatusCode::ACCEPTED, Json(json!({"job_id": job_id}))).into_response()
}

/// GET /sandbox/jobs/{job_id} - poll a deferred submission.
async fn job_status(State(state): State<AppState>, Path(job_id): Path<Uuid>) -> Response {
    match state.queue.get_outcome(job_id).await {
        Some(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        None => (
            StatusCode::OK,
            Json(json!({"job_id": job_id, "status": "pending"})),
        )
            .into_response(),
    }
}

/// POST /sandbox/destroy - tear down the user's session.
async fn destroy_sandbox(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let user_id = match user_id(&headers) {
        Ok(user_id) => user_id,
        Err(response) => return response,
    };

    match state.service.destroy_session(&user_id).await {
        Ok(true) => (
            StatusCode::OK,
            Json(json!({"message": "Sandbox destroyed successfully"})),
        )
            .into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({"message": "No active session found"})),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /exercises/{exercise_id}/attempts - the user's attempt history.
async fn attempt_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(exercise_id): Path<String>,
) -> Response {
    let user_id = match user_id(&headers) {
        Ok(user_id) => user_id,
        Err(response) => return response,
    };

    match state
        .service
        .list_attempts(&user_id, &exercise_id, ATTEMPT_HISTORY_LIMIT)
        .await
    {
        Ok(attempts) => (StatusCode::OK, Json(attempts)).into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /health - liveness probe.
async fn health() -> Response {
    (StatusCode::OK, Json(json!({"status": "ok"}))).into_response()
}

/// Extracts the authenticated user id from request headers.
fn user_id(headers: &HeaderMap) -> Result<String, Response> {
    headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Missing X-User-Id header"})),
            )
                .into_response()
        })
}

/// Maps a submission error onto the HTTP taxonomy.
fn submit_error_response(err: SubmitError) -> Response {
    match err {
        SubmitError::Validation { errors, warnings } => (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "errors": errors, "warnings": warnings})),
        )
            .into_response(),
        SubmitError::ExerciseNotFound(id) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("Exercise '{id}' not found")})),
        )
            .into_response(),
        SubmitError::LimitExceeded { .. } => {
            (StatusCode::BAD_REQUEST, Json(json!({"error": err.to_string()}))).into_response()
        }
        SubmitError::RateLimited { .. } => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"error": err.to_string()})),
        )
            .into_response(),
        SubmitError::NoActiveSession => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "No active sandbox session. Please create one first."})),
        )
            .into_response(),
        SubmitError::Provisioning(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "Failed to provision sandbox"})),
        )
            .into_response(),
        other => internal_error(other),
    }
}

/// Uniform 500 that never leaks internals to the client.
fn internal_error(err: SubmitError) -> Response {
    error!(error = %err, "Internal error handling request");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "Internal server error"})),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_user_id_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, HeaderValue::from_static("alice"));
        assert_eq!(user_id(&headers).expect("user id"), "alice");
    }

    #[test]
    fn test_user_id_missing_or_empty() {
        let headers = HeaderMap::new();
        assert!(user_id(&headers).is_err());

        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, HeaderValue::from_static(""));
        assert!(user_id(&headers).is_err());
    }

    #[test]
    fn test_execute_request_defaults() {
        let request: ExecuteRequest =
            serde_json::from_value(json!({"code": "- hosts: all"})).expect("deserializes");
        assert_eq!(request.code, "- hosts: all");
        assert!(request.exercise_id.is_none());
        assert_eq!(request.hints_used, 0);
    }

    #[test]
    fn test_submit_error_status_codes() {
        let response = submit_error_response(SubmitError::Validation {
            errors: vec!["bad".to_string()],
            warnings: vec![],
        });
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = submit_error_response(SubmitError::RateLimited { limit: 10 });
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let response = submit_error_response(SubmitError::ExerciseNotFound("ex-1".to_string()));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = submit_error_response(SubmitError::LimitExceeded {
            exercise_id: "ex-1".to_string(),
            max_attempts: 3,
        });
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = submit_error_response(SubmitError::Provisioning("boom".to_string()));
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = submit_error_response(SubmitError::NoActiveSession);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_session_view_reports_expiry() {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id: "alice".to_string(),
            container_id: Some("abc123".to_string()),
            topology_name: "ansibox_alice_deadbeef".to_string(),
            state: SessionState::Running,
            created_at: now - chrono::Duration::hours(2),
            expires_at: now - chrono::Duration::minutes(1),
            last_activity: now - chrono::Duration::hours(1),
        };

        let view = SessionView::from(session);
        assert!(view.is_expired);

        let json = serde_json::to_value(&view).expect("serializes");
        assert_eq!(json["state"], "running");
        assert_eq!(json["is_expired"], true);
        // The owner is implicit in the authenticated request.
        assert!(json.get("user_id").is_none());
    }
}
