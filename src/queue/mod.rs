//! Run Queue & Matcher (C4): enqueue, demand-vs-capability matching,
//! long-poll dispatch, and the no-match timeout sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashSet;
use serde_json::Value;
use tokio::time::timeout;

use crate::api::error::ApiError;
use crate::blueprint::BlueprintResolver;
use crate::bus::EventBus;
use crate::config::SchedulingConfig;
use crate::ids;
use crate::registry::RunnerRegistry;
use crate::store::models::{current_time, Demands, ExecutionMode, Run, RunStatus, RunType, Session, SessionStatus};
use crate::store::Store;

pub struct CreateRunRequest {
    pub run_type: RunType,
    pub agent_name: String,
    pub session_id: Option<String>,
    pub parent_session_id: Option<String>,
    pub parameters: Value,
    pub scope: Value,
    pub additional_demands: Demands,
    pub execution_mode: ExecutionMode,
}

pub enum DispatchResult {
    Run(Run),
    StopRuns(Vec<String>),
    Deregistered,
    None,
}

#[derive(Debug, Clone)]
pub struct RunQueue {
    store: Store,
    bus: EventBus,
    registry: RunnerRegistry,
    blueprints: BlueprintResolver,
    scheduling: SchedulingConfig,
    /// Advisory mirror of pending run ids. The Store's `claim_first_matching`
    /// is the authority; this set only avoids waking long-polls when nothing
    /// changed and is rebuilt wholesale at startup (see `rebuild_ready_index`).
    ready_index: Arc<DashSet<String>>,
}

impl RunQueue {
    pub fn new(
        store: Store,
        bus: EventBus,
        registry: RunnerRegistry,
        blueprints: BlueprintResolver,
        scheduling: SchedulingConfig,
    ) -> Self {
        Self {
            store,
            bus,
            registry,
            blueprints,
            scheduling,
            ready_index: Arc::new(DashSet::new()),
        }
    }

    pub async fn rebuild_ready_index(&self) -> anyhow::Result<()> {
        self.ready_index.clear();
        for run in self.store.runs.list_pending().await? {
            self.ready_index.insert(run.run_id);
        }
        Ok(())
    }

    pub async fn create_run(&self, req: CreateRunRequest) -> Result<Run, ApiError> {
        let run_id = ids::run_id();

        let session = self.resolve_session(&req, &run_id).await?;

        let resolved = self
            .blueprints
            .resolve_for_run(
                &req.agent_name,
                req.run_type,
                &req.parameters,
                &req.scope,
                &session.session_id,
                &run_id,
            )
            .await?;

        let demands = merge_demands(&resolved.blueprint.demands, &req.additional_demands)?;

        let now = current_time();
        let run = Run {
            run_id: run_id.clone(),
            run_type: req.run_type,
            session_id: session.session_id.clone(),
            agent_name: req.agent_name.clone(),
            parameters: req.parameters,
            scope: req.scope,
            resolved_blueprint: resolved.resolved_blueprint,
            demands,
            execution_mode: req.execution_mode,
            status: RunStatus::Pending,
            runner_id: None,
            error: None,
            created_at: now,
            claimed_at: None,
            started_at: None,
            completed_at: None,
            timeout_at: Some(now + chrono::Duration::seconds(self.scheduling.no_match_timeout_seconds as i64)),
        };

        self.store.runs.create(&run).await.map_err(ApiError::from_anyhow)?;
        self.ready_index.insert(run.run_id.clone());
        self.bus.session_updated(session);
        self.registry.notify_all();

        Ok(run)
    }

    async fn resolve_session(&self, req: &CreateRunRequest, _run_id: &str) -> Result<Session, ApiError> {
        match req.run_type {
            RunType::Start => {
                if let Some(id) = &req.session_id {
                    let existing = self
                        .store
                        .sessions
                        .get(id)
                        .await
                        .map_err(ApiError::from_anyhow)?;
                    if let Some(session) = existing {
                        return Ok(session);
                    }
                }

                if let Some(parent_id) = &req.parent_session_id {
                    let parent_exists = self
                        .store
                        .sessions
                        .get(parent_id)
                        .await
                        .map_err(ApiError::from_anyhow)?;
                    if parent_exists.is_none() {
                        return Err(ApiError::NotFound(format!(
                            "parent session {parent_id} not found"
                        )));
                    }
                }

                let now = current_time();
                let session = Session {
                    session_id: req.session_id.clone().unwrap_or_else(ids::session_id),
                    parent_session_id: req.parent_session_id.clone(),
                    agent_name: req.agent_name.clone(),
                    status: SessionStatus::Pending,
                    project_dir: None,
                    created_at: now,
                    modified_at: now,
                    executor_identity: None,
                    executor_profile: None,
                    hostname: None,
                };
                self.store
                    .sessions
                    .create(&session)
                    .await
                    .map_err(ApiError::from_anyhow)?;
                self.bus.session_created(session.clone());
                Ok(session)
            }
            RunType::Resume => {
                let session_id = req
                    .session_id
                    .as_ref()
                    .ok_or_else(|| ApiError::BadRequest("resume requires session_id".into()))?;
                self.store
                    .sessions
                    .get(session_id)
                    .await
                    .map_err(ApiError::from_anyhow)?
                    .ok_or_else(|| ApiError::NotFound(format!("session {session_id} not found")))
            }
        }
    }

    /// Runner long-poll entry point. Checks deregistration and stop intents
    /// first, attempts an immediate claim, and otherwise waits on the
    /// runner's own wake signal up to `poll_timeout_seconds` before retrying
    /// the claim once more.
    pub async fn get_work(&self, runner_id: &str) -> Result<DispatchResult, ApiError> {
        let registration = self
            .registry
            .get(runner_id)
            .await
            .map_err(ApiError::from_anyhow)?
            .ok_or_else(|| ApiError::NotFound(format!("runner {runner_id} not registered")))?;

        self.registry
            .heartbeat(runner_id)
            .await
            .map_err(ApiError::from_anyhow)?;

        if registration.marked_for_deregistration {
            return Ok(DispatchResult::Deregistered);
        }

        let stop_runs = self
            .registry
            .drain_stop_intents(runner_id)
            .await
            .map_err(ApiError::from_anyhow)?;
        if !stop_runs.is_empty() {
            return Ok(DispatchResult::StopRuns(stop_runs));
        }

        if let Some(run) = self.try_claim(runner_id).await? {
            return Ok(DispatchResult::Run(run));
        }

        let notify = self.registry.notify_handle(runner_id);
        let _ = timeout(
            Duration::from_secs(self.scheduling.poll_timeout_seconds),
            notify.notified(),
        )
        .await;

        if let Some(run) = self.try_claim(runner_id).await? {
            return Ok(DispatchResult::Run(run));
        }

        let stop_runs = self
            .registry
            .drain_stop_intents(runner_id)
            .await
            .map_err(ApiError::from_anyhow)?;
        if !stop_runs.is_empty() {
            return Ok(DispatchResult::StopRuns(stop_runs));
        }

        let registration = self
            .registry
            .get(runner_id)
            .await
            .map_err(ApiError::from_anyhow)?;
        if registration.map(|r| r.marked_for_deregistration).unwrap_or(false) {
            return Ok(DispatchResult::Deregistered);
        }

        Ok(DispatchResult::None)
    }

    async fn try_claim(&self, runner_id: &str) -> Result<Option<Run>, ApiError> {
        let registration = self
            .registry
            .get(runner_id)
            .await
            .map_err(ApiError::from_anyhow)?
            .ok_or_else(|| ApiError::NotFound(format!("runner {runner_id} not registered")))?;

        let claimed = self
            .store
            .runs
            .claim_first_matching(runner_id, |demands| registration.capabilities_satisfy(demands))
            .await
            .map_err(ApiError::from_anyhow)?;

        if let Some(run) = &claimed {
            self.ready_index.remove(&run.run_id);
        }
        Ok(claimed)
    }

    pub async fn stop_run(&self, run_id: &str) -> Result<Run, ApiError> {
        let run = self
            .store
            .runs
            .get(run_id)
            .await
            .map_err(ApiError::from_anyhow)?
            .ok_or_else(|| ApiError::NotFound(format!("run {run_id} not found")))?;

        match run.status {
            RunStatus::Pending => {
                self.store
                    .runs
                    .set_status(run_id, RunStatus::Stopped)
                    .await
                    .map_err(ApiError::from_anyhow)?;
                self.ready_index.remove(run_id);
            }
            RunStatus::Claimed | RunStatus::Running => {
                self.store
                    .runs
                    .mark_stopping(run_id)
                    .await
                    .map_err(ApiError::from_anyhow)?;
                if let Some(runner_id) = &run.runner_id {
                    self.registry
                        .queue_stop(runner_id, run_id)
                        .await
                        .map_err(ApiError::from_anyhow)?;
                }
            }
            _ => {
                return Err(ApiError::BadRequest(format!(
                    "run {run_id} is already terminal"
                )));
            }
        }

        self.store
            .runs
            .get(run_id)
            .await
            .map_err(ApiError::from_anyhow)?
            .ok_or_else(|| ApiError::NotFound(format!("run {run_id} not found")))
    }

    /// Scans `pending` runs whose grace period expired and fails them. Meant
    /// to run on a fixed tick from a background task in `main`.
    pub async fn sweep_timeouts(&self) -> anyhow::Result<usize> {
        let now = Utc::now();
        let timed_out = self.store.runs.list_timed_out(now).await?;
        for run in &timed_out {
            self.store
                .runs
                .mark_failed(&run.run_id, "no matching runner")
                .await?;
            self.ready_index.remove(&run.run_id);
        }
        Ok(timed_out.len())
    }
}

/// Merges blueprint demands with caller-supplied additional demands. Tag sets
/// union; scalar fields must either match or be left unset by the caller.
fn merge_demands(blueprint: &Demands, additional: &Demands) -> Result<Demands, ApiError> {
    let mut merged = blueprint.clone();
    merged.tags.extend(additional.tags.iter().cloned());

    merge_scalar(&mut merged.hostname, &additional.hostname, "hostname")?;
    merge_scalar(&mut merged.project_dir, &additional.project_dir, "project_dir")?;
    merge_scalar(
        &mut merged.executor_profile,
        &additional.executor_profile,
        "executor_profile",
    )?;

    Ok(merged)
}

fn merge_scalar(base: &mut Option<String>, additional: &Option<String>, field: &str) -> Result<(), ApiError> {
    match (&base, additional) {
        (Some(b), Some(a)) if b != a => Err(ApiError::DemandMismatch(format!(
            "caller demand {field}={a} conflicts with blueprint demand {field}={b}"
        ))),
        (None, Some(a)) => {
            *base = Some(a.clone());
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_demands_unions_tags() {
        let blueprint = Demands {
            tags: ["internal".into()].into_iter().collect(),
            ..Default::default()
        };
        let additional = Demands {
            tags: ["gpu".into()].into_iter().collect(),
            ..Default::default()
        };
        let merged = merge_demands(&blueprint, &additional).unwrap();
        assert_eq!(merged.tags.len(), 2);
    }

    #[test]
    fn merge_demands_rejects_conflicting_scalar() {
        let blueprint = Demands {
            hostname: Some("h1".into()),
            ..Default::default()
        };
        let additional = Demands {
            hostname: Some("h2".into()),
            ..Default::default()
        };
        assert!(merge_demands(&blueprint, &additional).is_err());
    }

    #[test]
    fn merge_demands_allows_idempotent_scalar() {
        let blueprint = Demands {
            hostname: Some("h1".into()),
            ..Default::default()
        };
        let additional = Demands {
            hostname: Some("h1".into()),
            ..Default::default()
        };
        assert!(merge_demands(&blueprint, &additional).is_ok());
    }
}
