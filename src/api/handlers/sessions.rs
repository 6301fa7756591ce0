//! Session read/delete endpoints and the convenience session-level stop.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};
use tracing::instrument;

use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::store::models::{Run, Session};

#[instrument(skip(state))]
pub async fn list_sessions(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let sessions = state.sessions.list_sessions().await?;
    Ok(Json(json!({"sessions": sessions})))
}

#[instrument(skip(state))]
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    Ok(Json(state.sessions.get_session(&session_id).await?))
}

#[instrument(skip(state))]
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let removed = state.sessions.delete_session(&session_id).await?;
    if removed {
        Ok(Json(json!({"deleted": true})))
    } else {
        Ok(Json(json!({"already_absent": true})))
    }
}

/// The session's run history, oldest first. Not tabled explicitly in the
/// route contract but needed as the audit trail behind the event log.
#[instrument(skip(state))]
pub async fn list_runs(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let runs = state
        .store
        .runs
        .list_for_session(&session_id)
        .await
        .map_err(ApiError::from_anyhow)?;
    Ok(Json(json!({"runs": runs})))
}

#[instrument(skip(state))]
pub async fn list_events(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let events = state.sessions.list_events(&session_id).await?;
    Ok(Json(json!({"events": events})))
}

#[instrument(skip(state))]
pub async fn get_result(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.sessions.result(&session_id).await?))
}

/// Stops the session's active run (the most recent non-terminal run), if any.
#[instrument(skip(state))]
pub async fn stop_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Run>, ApiError> {
    let runs = state.store.runs.list_for_session(&session_id).await.map_err(ApiError::from_anyhow)?;
    let active = runs
        .into_iter()
        .rev()
        .find(|r| !r.status.is_terminal())
        .ok_or_else(|| ApiError::Conflict(format!("session {session_id} has no active run")))?;

    let run = state.queue.stop_run(&active.run_id).await?;
    Ok(Json(run))
}
