//! Session Controller (C6): lifecycle transitions reported by runners,
//! callback delivery to parent sessions, result retrieval, and crash
//! recovery on restart.

use serde_json::{json, Value};

use crate::api::error::ApiError;
use crate::bus::EventBus;
use crate::config::{RecoveryMode, SchedulingConfig};
use crate::queue::{CreateRunRequest, RunQueue};
use crate::registry::RunnerRegistry;
use crate::store::models::{
    current_time, Demands, EventKind, ExecutionMode, RunStatus, RunType, Session, SessionStatus,
};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct SessionController {
    store: Store,
    bus: EventBus,
    registry: RunnerRegistry,
    scheduling: SchedulingConfig,
}

impl SessionController {
    pub fn new(store: Store, bus: EventBus, registry: RunnerRegistry, scheduling: SchedulingConfig) -> Self {
        Self {
            store,
            bus,
            registry,
            scheduling,
        }
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Session, ApiError> {
        self.store
            .sessions
            .get(session_id)
            .await
            .map_err(ApiError::from_anyhow)?
            .ok_or_else(|| ApiError::NotFound(format!("session {session_id} not found")))
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>, ApiError> {
        self.store.sessions.list().await.map_err(ApiError::from_anyhow)
    }

    pub async fn delete_session(&self, session_id: &str) -> Result<bool, ApiError> {
        let removed = self
            .store
            .sessions
            .delete(session_id)
            .await
            .map_err(ApiError::from_anyhow)?;
        if removed {
            self.bus.session_deleted(session_id.to_string());
        }
        Ok(removed)
    }

    pub async fn list_events(&self, session_id: &str) -> Result<Vec<crate::store::models::Event>, ApiError> {
        self.get_session(session_id).await?;
        self.store
            .events
            .list_for_session(session_id)
            .await
            .map_err(ApiError::from_anyhow)
    }

    pub async fn result(&self, session_id: &str) -> Result<Value, ApiError> {
        let session = self.get_session(session_id).await?;
        if !session.status.is_terminal() {
            return Err(ApiError::Conflict("session has not finished yet".into()));
        }
        let latest = self
            .store
            .events
            .latest_of_kind(session_id, EventKind::Result)
            .await
            .map_err(ApiError::from_anyhow)?;
        match latest {
            Some(event) => {
                let result = event
                    .payload
                    .get("result_text")
                    .cloned()
                    .filter(|v| !v.is_null())
                    .or_else(|| event.payload.get("result_data").cloned())
                    .unwrap_or(Value::Null);
                Ok(json!({"result": result}))
            }
            None => Ok(json!({"result": "not_yet_available"})),
        }
    }

    pub async fn started(&self, run_id: &str, hostname: Option<&str>) -> Result<(), ApiError> {
        let run = self.fetch_run(run_id).await?;
        if run.status.is_terminal() || run.status == RunStatus::Running {
            return Ok(());
        }

        self.store.runs.mark_started(run_id).await.map_err(ApiError::from_anyhow)?;
        self.store
            .sessions
            .update_status(&run.session_id, SessionStatus::Running)
            .await
            .map_err(ApiError::from_anyhow)?;
        if let Some(hostname) = hostname {
            self.store
                .sessions
                .set_last_hostname(&run.session_id, hostname)
                .await
                .map_err(ApiError::from_anyhow)?;
        }

        let event = self
            .store
            .events
            .append(&run.session_id, EventKind::SessionStart, json!({"run_id": run_id}))
            .await
            .map_err(ApiError::from_anyhow)?;
        self.bus.event_appended(event);
        self.publish_session(&run.session_id).await?;
        Ok(())
    }

    pub async fn completed(
        &self,
        run_id: &str,
        result_text: Option<String>,
        result_data: Option<Value>,
    ) -> Result<(), ApiError> {
        let run = self.fetch_run(run_id).await?;
        if run.status == RunStatus::Completed {
            return Ok(());
        }
        if run.status.is_terminal() {
            return Err(ApiError::Conflict(format!("run {run_id} already terminal")));
        }

        self.store.runs.mark_completed(run_id).await.map_err(ApiError::from_anyhow)?;
        self.store
            .sessions
            .update_status(&run.session_id, SessionStatus::Finished)
            .await
            .map_err(ApiError::from_anyhow)?;

        let payload = json!({"result_text": result_text, "result_data": result_data});
        let event = self
            .store
            .events
            .append(&run.session_id, EventKind::Result, payload.clone())
            .await
            .map_err(ApiError::from_anyhow)?;
        self.bus.event_appended(event);
        self.publish_session(&run.session_id).await?;

        self.deliver_callback(&run, "completed", &payload).await
    }

    pub async fn failed(&self, run_id: &str, error: &str) -> Result<(), ApiError> {
        let run = self.fetch_run(run_id).await?;
        if run.status == RunStatus::Failed {
            return Ok(());
        }
        if run.status.is_terminal() {
            return Err(ApiError::Conflict(format!("run {run_id} already terminal")));
        }

        self.store
            .runs
            .mark_failed(run_id, error)
            .await
            .map_err(ApiError::from_anyhow)?;
        self.store
            .sessions
            .update_status(&run.session_id, SessionStatus::Failed)
            .await
            .map_err(ApiError::from_anyhow)?;

        let payload = json!({"reason": error});
        let event = self
            .store
            .events
            .append(&run.session_id, EventKind::SessionStop, payload.clone())
            .await
            .map_err(ApiError::from_anyhow)?;
        self.bus.event_appended(event);
        self.publish_session(&run.session_id).await?;

        self.deliver_callback(&run, "failed", &json!({"error": error})).await
    }

    pub async fn stopped(&self, run_id: &str, _signal: Option<&str>) -> Result<(), ApiError> {
        let run = self.fetch_run(run_id).await?;
        if run.status == RunStatus::Stopped {
            return Ok(());
        }
        if run.status.is_terminal() {
            return Err(ApiError::Conflict(format!("run {run_id} already terminal")));
        }

        self.store.runs.mark_stopped(run_id).await.map_err(ApiError::from_anyhow)?;
        self.store
            .sessions
            .update_status(&run.session_id, SessionStatus::Stopped)
            .await
            .map_err(ApiError::from_anyhow)?;
        self.publish_session(&run.session_id).await?;
        Ok(())
    }

    /// Delivers a child run's terminal state to its parent session by
    /// enqueuing a resume run there. Queued even if the parent has already
    /// finished, per the chosen resolution of the open question on stale
    /// parents: finishing re-activates it; a stopped/failed parent still gets
    /// the resume, with a warning logged rather than the callback dropped.
    async fn deliver_callback(
        &self,
        run: &crate::store::models::Run,
        status: &str,
        payload: &Value,
    ) -> Result<(), ApiError> {
        if run.execution_mode != ExecutionMode::AsyncCallback {
            return Ok(());
        }
        let session = self.get_session(&run.session_id).await?;
        let Some(parent_session_id) = session.parent_session_id.clone() else {
            return Ok(());
        };

        let parent = self.get_session(&parent_session_id).await?;
        if matches!(parent.status, SessionStatus::Stopped | SessionStatus::Failed) {
            tracing::warn!(
                parent_session_id,
                child_session_id = %run.session_id,
                "delivering callback resume to a parent session that is stopped or failed"
            );
        }

        let prompt = json!({
            "child_session_id": run.session_id,
            "status": status,
            "result_text": payload.get("result_text").cloned().unwrap_or(Value::Null),
            "result_data": payload.get("result_data").cloned().unwrap_or(Value::Null),
        })
        .to_string();

        let queue = RunQueue::new(
            self.store.clone(),
            self.bus.clone(),
            self.registry.clone(),
            crate::blueprint::BlueprintResolver::new(self.store.clone()),
            self.scheduling.clone(),
        );

        queue
            .create_run(CreateRunRequest {
                run_type: RunType::Resume,
                agent_name: parent.agent_name.clone(),
                session_id: Some(parent_session_id),
                parent_session_id: None,
                parameters: json!({"prompt": prompt}),
                scope: json!({}),
                additional_demands: Demands::default(),
                execution_mode: ExecutionMode::AsyncPoll,
            })
            .await?;
        Ok(())
    }

    async fn fetch_run(&self, run_id: &str) -> Result<crate::store::models::Run, ApiError> {
        self.store
            .runs
            .get(run_id)
            .await
            .map_err(ApiError::from_anyhow)?
            .ok_or_else(|| ApiError::NotFound(format!("run {run_id} not found")))
    }

    async fn publish_session(&self, session_id: &str) -> Result<(), ApiError> {
        let session = self.get_session(session_id).await?;
        self.bus.session_updated(session);
        Ok(())
    }

    /// Runs at startup, before the API starts accepting traffic. `claimed`
    /// runs are safe to re-dispatch; `running`/`stopping` runs are resolved
    /// according to `mode`.
    pub async fn recover(&self, mode: RecoveryMode) -> anyhow::Result<RecoverySummary> {
        let mut summary = RecoverySummary::default();
        let recoverable = self.store.runs.list_recoverable().await?;
        let now = current_time();

        for run in recoverable {
            match run.status {
                RunStatus::Claimed => {
                    self.store.runs.set_status(&run.run_id, RunStatus::Pending).await?;
                    summary.reset_to_pending += 1;
                }
                RunStatus::Running => {
                    let should_fail = match mode {
                        RecoveryMode::None => false,
                        RecoveryMode::All => true,
                        RecoveryMode::Stale => match &run.runner_id {
                            Some(runner_id) => match self.registry.get(runner_id).await? {
                                Some(reg) => {
                                    self.registry.liveness_of(&reg, now)
                                        == crate::store::models::Liveness::Offline
                                }
                                None => true,
                            },
                            None => true,
                        },
                    };
                    if should_fail {
                        self.store
                            .runs
                            .mark_failed(&run.run_id, "runner disappeared")
                            .await?;
                        self.store
                            .sessions
                            .update_status(&run.session_id, SessionStatus::Failed)
                            .await?;
                        summary.marked_failed += 1;
                    }
                }
                RunStatus::Stopping => {
                    self.store.runs.mark_stopped(&run.run_id).await?;
                    self.store
                        .sessions
                        .update_status(&run.session_id, SessionStatus::Stopped)
                        .await?;
                    summary.marked_stopped += 1;
                }
                _ => {}
            }
        }

        self.registry.notify_all();
        Ok(summary)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RecoverySummary {
    pub reset_to_pending: usize,
    pub marked_failed: usize,
    pub marked_stopped: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::BlueprintResolver;
    use crate::db::Database;
    use crate::queue::CreateRunRequest;
    use crate::store::models::{Blueprint, BlueprintStatus, BlueprintType};
    use serde_json::json;

    async fn harness() -> (SessionController, RunQueue, Store) {
        let db = Database::in_memory().await.unwrap();
        let store = Store::new(db.pool().clone());
        let bus = EventBus::new();
        let scheduling = SchedulingConfig::default();
        let registry = RunnerRegistry::new(store.clone(), scheduling.clone());
        let blueprints = BlueprintResolver::new(store.clone());
        blueprints
            .create(Blueprint {
                name: "echo".into(),
                description: None,
                blueprint_type: BlueprintType::Autonomous,
                system_prompt: Some("echo".into()),
                parameters_schema: json!({"type": "object", "properties": {}, "required": []}),
                output_schema: None,
                mcp_servers: json!({}),
                capabilities_required: Default::default(),
                demands: Demands::default(),
                hooks: json!({}),
                status: BlueprintStatus::Active,
                command: None,
                runner_owned: false,
                owning_runner_id: None,
            })
            .await
            .unwrap();
        let queue = RunQueue::new(store.clone(), bus.clone(), registry.clone(), blueprints, scheduling.clone());
        let controller = SessionController::new(store.clone(), bus, registry, scheduling);
        (controller, queue, store)
    }

    #[tokio::test]
    async fn happy_path_transitions_session_to_finished() {
        let (controller, queue, _store) = harness().await;
        let run = queue
            .create_run(CreateRunRequest {
                run_type: RunType::Start,
                agent_name: "echo".into(),
                session_id: None,
                parent_session_id: None,
                parameters: json!({"prompt": "hi"}),
                scope: json!({}),
                additional_demands: Demands::default(),
                execution_mode: ExecutionMode::AsyncPoll,
            })
            .await
            .unwrap();

        controller.started(&run.run_id, None).await.unwrap();
        controller
            .completed(&run.run_id, Some("hi".into()), None)
            .await
            .unwrap();

        let session = controller.get_session(&run.session_id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Finished);
        let result = controller.result(&run.session_id).await.unwrap();
        assert_eq!(result["result"], json!("hi"));
    }

    #[tokio::test]
    async fn completed_is_idempotent() {
        let (controller, queue, _store) = harness().await;
        let run = queue
            .create_run(CreateRunRequest {
                run_type: RunType::Start,
                agent_name: "echo".into(),
                session_id: None,
                parent_session_id: None,
                parameters: json!({"prompt": "hi"}),
                scope: json!({}),
                additional_demands: Demands::default(),
                execution_mode: ExecutionMode::AsyncPoll,
            })
            .await
            .unwrap();
        controller.started(&run.run_id, None).await.unwrap();
        controller.completed(&run.run_id, Some("hi".into()), None).await.unwrap();
        controller.completed(&run.run_id, Some("hi".into()), None).await.unwrap();

        let events = controller.list_events(&run.session_id).await.unwrap();
        let result_events = events.iter().filter(|e| e.kind == EventKind::Result).count();
        assert_eq!(result_events, 1);
    }

    #[tokio::test]
    async fn callback_enqueues_resume_on_parent() {
        let (controller, queue, store) = harness().await;
        let parent = queue
            .create_run(CreateRunRequest {
                run_type: RunType::Start,
                agent_name: "echo".into(),
                session_id: None,
                parent_session_id: None,
                parameters: json!({"prompt": "parent"}),
                scope: json!({}),
                additional_demands: Demands::default(),
                execution_mode: ExecutionMode::AsyncPoll,
            })
            .await
            .unwrap();
        controller.started(&parent.run_id, None).await.unwrap();

        let child = queue
            .create_run(CreateRunRequest {
                run_type: RunType::Start,
                agent_name: "echo".into(),
                session_id: None,
                parent_session_id: Some(parent.session_id.clone()),
                parameters: json!({"prompt": "child"}),
                scope: json!({}),
                additional_demands: Demands::default(),
                execution_mode: ExecutionMode::AsyncCallback,
            })
            .await
            .unwrap();
        controller.started(&child.run_id, None).await.unwrap();
        controller
            .completed(&child.run_id, Some("done".into()), None)
            .await
            .unwrap();

        let parent_runs = store.runs.list_for_session(&parent.session_id).await.unwrap();
        assert_eq!(parent_runs.len(), 2);
        assert_eq!(parent_runs[1].run_type, RunType::Resume);
    }
}
