//! Blueprint ("agent") CRUD.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::instrument;

use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::blueprint::BlueprintPatch;
use crate::store::models::{Blueprint, BlueprintStatus, BlueprintType, Demands};

#[instrument(skip(state))]
pub async fn list_agents(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let online = state
        .registry
        .online_runner_ids()
        .await
        .map_err(ApiError::from_anyhow)?;
    let blueprints = state
        .blueprints
        .list(&online)
        .await
        .map_err(ApiError::from_anyhow)?;
    Ok(Json(json!({"agents": blueprints})))
}

#[instrument(skip(state))]
pub async fn get_agent(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Blueprint>, ApiError> {
    state
        .blueprints
        .get(&name)
        .await
        .map_err(ApiError::from_anyhow)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("agent {name} not found")))
}

#[derive(Debug, Deserialize)]
pub struct CreateAgentBody {
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

#[instrument(skip(state, body), fields(name = %body.name))]
pub async fn create_agent(
    State(state): State<AppState>,
    Json(body): Json<CreateAgentBody>,
) -> Result<(StatusCode, Json<Blueprint>), ApiError> {
    let blueprint = Blueprint {
        name: body.name,
        description: body.description,
        blueprint_type: body.blueprint_type,
        system_prompt: body.system_prompt,
        parameters_schema: body.parameters_schema,
        output_schema: body.output_schema,
        mcp_servers: body.mcp_servers,
        capabilities_required: body.capabilities_required,
        demands: body.demands,
        hooks: body.hooks,
        status: BlueprintStatus::Active,
        command: body.command,
        runner_owned: false,
        owning_runner_id: None,
    };
    let created = state.blueprints.create(blueprint).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Default, Deserialize)]
pub struct PatchAgentBody {
    pub description: Option<String>,
    pub system_prompt: Option<String>,
    pub parameters_schema: Option<Value>,
    pub output_schema: Option<Value>,
    pub mcp_servers: Option<Value>,
    pub capabilities_required: Option<std::collections::BTreeSet<String>>,
    pub demands: Option<Demands>,
    pub status: Option<BlueprintStatus>,
}

#[instrument(skip(state, body))]
pub async fn patch_agent(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<PatchAgentBody>,
) -> Result<Json<Blueprint>, ApiError> {
    let patch = BlueprintPatch {
        description: body.description,
        system_prompt: body.system_prompt,
        parameters_schema: body.parameters_schema,
        output_schema: body.output_schema,
        mcp_servers: body.mcp_servers,
        capabilities_required: body.capabilities_required,
        demands: body.demands,
        status: body.status,
    };
    Ok(Json(state.blueprints.patch(&name, patch).await?))
}

#[instrument(skip(state))]
pub async fn delete_agent(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let removed = state.blueprints.delete(&name).await?;
    if removed {
        Ok(Json(json!({"deleted": true})))
    } else {
        Ok(Json(json!({"already_absent": true})))
    }
}
