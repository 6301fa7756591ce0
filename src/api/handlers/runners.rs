//! Runner listing and external deregistration.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::instrument;

use crate::api::error::ApiError;
use crate::api::state::AppState;
use crate::store::models::{Liveness, RunnerRegistration};

#[derive(Debug, Serialize)]
pub struct RunnerWithLiveness {
    #[serde(flatten)]
    pub registration: RunnerRegistration,
    pub liveness: Liveness,
}

#[instrument(skip(state))]
pub async fn list_runners(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let runners = state
        .registry
        .list_with_liveness()
        .await
        .map_err(ApiError::from_anyhow)?
        .into_iter()
        .map(|(registration, liveness)| RunnerWithLiveness {
            registration,
            liveness,
        })
        .collect::<Vec<_>>();
    Ok(Json(json!({"runners": runners})))
}

#[instrument(skip(state))]
pub async fn deregister_runner(
    State(state): State<AppState>,
    Path(runner_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let marked = state
        .registry
        .deregister_external(&runner_id)
        .await
        .map_err(ApiError::from_anyhow)?;
    if marked {
        Ok(Json(json!({"ok": true})))
    } else {
        Err(ApiError::NotFound(format!("runner {runner_id} not found")))
    }
}
