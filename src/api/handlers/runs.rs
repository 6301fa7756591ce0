//! Run creation, status, and stop endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::instrument;

use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::queue::CreateRunRequest;
use crate::store::models::{Demands, ExecutionMode, Run, RunType};

#[derive(Debug, Deserialize)]
pub struct CreateRunBody {
    #[serde(rename = "type")]
    pub run_type: RunType,
    pub agent_name: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub parent_session_id: Option<String>,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub scope: Value,
    #[serde(default)]
    pub demands: Demands,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
}

#[instrument(skip(state, body), fields(agent = %body.agent_name))]
pub async fn create_run(
    State(state): State<AppState>,
    Json(body): Json<CreateRunBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let run = state
        .queue
        .create_run(CreateRunRequest {
            run_type: body.run_type,
            agent_name: body.agent_name,
            session_id: body.session_id,
            parent_session_id: body.parent_session_id,
            parameters: body.parameters,
            scope: body.scope,
            additional_demands: body.demands,
            execution_mode: body.execution_mode,
        })
        .await?;

    Ok((
        StatusCode::OK,
        Json(json!({
            "run_id": run.run_id,
            "session_id": run.session_id,
            "status": run.status,
        })),
    ))
}

#[instrument(skip(state))]
pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Run>, ApiError> {
    let run = state
        .store
        .runs
        .get(&run_id)
        .await
        .map_err(ApiError::from_anyhow)?
        .ok_or_else(|| ApiError::NotFound(format!("run {run_id} not found")))?;
    Ok(Json(run))
}

#[instrument(skip(state))]
pub async fn stop_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Run>, ApiError> {
    Ok(Json(state.queue.stop_run(&run_id).await?))
}
