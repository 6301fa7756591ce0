//! Runner-facing endpoints: registration, heartbeat, dispatch long-poll, and
//! lifecycle reports.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::instrument;

use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::queue::DispatchResult;
use crate::registry::{ContributedBlueprint, RegisterRequest};
use crate::store::models::{BlueprintType, Demands};

#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    pub hostname: String,
    pub project_dir: String,
    pub executor_profile: String,
    #[serde(default)]
    pub capabilities: std::collections::BTreeSet<String>,
    #[serde(default)]
    pub contributed_blueprints: Vec<ContributedBlueprintBody>,
}

#[derive(Debug, Deserialize)]
pub struct ContributedBlueprintBody {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub blueprint_type: BlueprintType,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub parameters_schema: Value,
    #[serde(default)]
    pub output_schema: Option<Value>,
    #[serde(default)]
    pub mcp_servers: Value,
    #[serde(default)]
    pub capabilities_required: std::collections::BTreeSet<String>,
    #[serde(default)]
    pub demands: Demands,
    #[serde(default)]
    pub hooks: Value,
    #[serde(default)]
    pub command: Option<String>,
}

#[instrument(skip(state, body), fields(hostname = %body.hostname))]
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterBody>,
) -> Result<Json<Value>, ApiError> {
    let contributed_blueprints = body
        .contributed_blueprints
        .into_iter()
        .map(|b| ContributedBlueprint {
            name: b.name,
            description: b.description,
            blueprint_type: b.blueprint_type,
            system_prompt: b.system_prompt,
            parameters_schema: b.parameters_schema,
            output_schema: b.output_schema,
            mcp_servers: b.mcp_servers,
            capabilities_required: b.capabilities_required,
            demands: b.demands,
            hooks: b.hooks,
            command: b.command,
        })
        .collect();

    let registration = state
        .registry
        .register(RegisterRequest {
            hostname: body.hostname,
            project_dir: body.project_dir,
            executor_profile: body.executor_profile,
            capabilities: body.capabilities,
            contributed_blueprints,
        })
        .await
        .map_err(ApiError::from_anyhow)?;

    Ok(Json(json!({
        "runner_id": registration.runner_id,
        "poll_timeout_seconds": state.scheduling.poll_timeout_seconds,
        "heartbeat_interval_seconds": state.scheduling.heartbeat_interval_seconds,
    })))
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatBody {
    pub runner_id: String,
}

#[instrument(skip(state))]
pub async fn heartbeat(
    State(state): State<AppState>,
    Json(body): Json<HeartbeatBody>,
) -> Result<Json<Value>, ApiError> {
    let touched = state
        .registry
        .heartbeat(&body.runner_id)
        .await
        .map_err(ApiError::from_anyhow)?;
    if touched {
        Ok(Json(json!({"ok": true})))
    } else {
        Err(ApiError::NotFound(format!(
            "runner {} not registered",
            body.runner_id
        )))
    }
}

#[derive(Debug, Deserialize)]
pub struct GetWorkQuery {
    pub runner_id: String,
}

#[instrument(skip(state))]
pub async fn get_work(
    State(state): State<AppState>,
    axum::extract::Query(query): axum::extract::Query<GetWorkQuery>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    match state.queue.get_work(&query.runner_id).await? {
        DispatchResult::Run(run) => Ok((StatusCode::OK, Json(json!({"run": run})))),
        DispatchResult::StopRuns(run_ids) => {
            Ok((StatusCode::OK, Json(json!({"stop_runs": run_ids}))))
        }
        DispatchResult::Deregistered => {
            Ok((StatusCode::OK, Json(json!({"deregistered": true}))))
        }
        DispatchResult::None => Ok((StatusCode::NO_CONTENT, Json(Value::Null))),
    }
}

#[derive(Debug, Deserialize)]
pub struct StartedBody {
    #[serde(default)]
    pub hostname: Option<String>,
}

#[instrument(skip(state))]
pub async fn report_started(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(body): Json<StartedBody>,
) -> Result<Json<Value>, ApiError> {
    state.sessions.started(&run_id, body.hostname.as_deref()).await?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Debug, Deserialize)]
pub struct CompletedBody {
    #[serde(default)]
    pub result_text: Option<String>,
    #[serde(default)]
    pub result_data: Option<Value>,
}

#[instrument(skip(state, body))]
pub async fn report_completed(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(body): Json<CompletedBody>,
) -> Result<Json<Value>, ApiError> {
    state
        .sessions
        .completed(&run_id, body.result_text, body.result_data)
        .await?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Debug, Deserialize)]
pub struct FailedBody {
    pub error: String,
}

#[instrument(skip(state, body))]
pub async fn report_failed(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(body): Json<FailedBody>,
) -> Result<Json<Value>, ApiError> {
    state.sessions.failed(&run_id, &body.error).await?;
    Ok(Json(json!({"ok": true})))
}

#[derive(Debug, Deserialize)]
pub struct StoppedBody {
    #[serde(default)]
    pub signal: Option<String>,
}

#[instrument(skip(state))]
pub async fn report_stopped(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(body): Json<StoppedBody>,
) -> Result<Json<Value>, ApiError> {
    state.sessions.stopped(&run_id, body.signal.as_deref()).await?;
    Ok(Json(json!({"ok": true})))
}
