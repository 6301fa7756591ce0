//! Runner Registry (C3): worker identity, capability, heartbeat and liveness
//! tracking, plus the per-runner wake primitive the matcher's long-poll uses.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Notify;

use crate::config::SchedulingConfig;
use crate::store::models::{
    derive_runner_id, Blueprint, BlueprintStatus, BlueprintType, Demands, Liveness, RunnerRegistration,
};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct RunnerRegistry {
    store: Store,
    scheduling: SchedulingConfig,
    /// Per-runner wake signal for long-poll dispatch. Keyed, not global: a new
    /// run only needs to wake runners whose capabilities it could satisfy, but
    /// since a runner's own capability set never changes mid-poll we wake every
    /// runner's notify on relevant events and let the matcher re-check.
    notifies: Arc<DashMap<String, Arc<Notify>>>,
}

pub struct RegisterRequest {
    pub hostname: String,
    pub project_dir: String,
    pub executor_profile: String,
    pub capabilities: std::collections::BTreeSet<String>,
    pub contributed_blueprints: Vec<ContributedBlueprint>,
}

/// A runner-owned blueprint offered at registration time. Upserted tied to
/// the registering runner's id; only that runner's next registration can
/// replace it, and it is hidden from listing (not deleted) while the runner
/// is offline.
pub struct ContributedBlueprint {
    pub name: String,
    pub description: Option<String>,
    pub blueprint_type: BlueprintType,
    pub system_prompt: Option<String>,
    pub parameters_schema: Value,
    pub output_schema: Option<Value>,
    pub mcp_servers: Value,
    pub capabilities_required: std::collections::BTreeSet<String>,
    pub demands: Demands,
    pub hooks: Value,
    pub command: Option<String>,
}

impl RunnerRegistry {
    pub fn new(store: Store, scheduling: SchedulingConfig) -> Self {
        Self {
            store,
            scheduling,
            notifies: Arc::new(DashMap::new()),
        }
    }

    pub fn notify_handle(&self, runner_id: &str) -> Arc<Notify> {
        self.notifies
            .entry(runner_id.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Wakes every currently-registered runner's long-poll. Used after a new
    /// run is enqueued (its demands might match any of them), after a stop
    /// intent is queued, and after the recovery sweep.
    pub fn notify_all(&self) {
        for entry in self.notifies.iter() {
            entry.value().notify_waiters();
        }
    }

    pub fn notify_one(&self, runner_id: &str) {
        if let Some(notify) = self.notifies.get(runner_id) {
            notify.notify_waiters();
        }
    }

    pub async fn register(&self, req: RegisterRequest) -> Result<RunnerRegistration> {
        let runner_id = derive_runner_id(&req.hostname, &req.project_dir, &req.executor_profile);
        let now = Utc::now();
        let registration = RunnerRegistration {
            runner_id: runner_id.clone(),
            hostname: req.hostname,
            project_dir: req.project_dir,
            executor_profile: req.executor_profile,
            capabilities: req.capabilities,
            registered_at: now,
            last_heartbeat: now,
            marked_for_deregistration: false,
        };
        self.store.runners.upsert(&registration).await?;

        for contributed in req.contributed_blueprints {
            let blueprint = Blueprint {
                name: contributed.name,
                description: contributed.description,
                blueprint_type: contributed.blueprint_type,
                system_prompt: contributed.system_prompt,
                parameters_schema: contributed.parameters_schema,
                output_schema: contributed.output_schema,
                mcp_servers: contributed.mcp_servers,
                capabilities_required: contributed.capabilities_required,
                demands: contributed.demands,
                hooks: contributed.hooks,
                status: BlueprintStatus::Active,
                command: contributed.command,
                runner_owned: true,
                owning_runner_id: Some(runner_id.clone()),
            };
            self.store.blueprints.upsert(&blueprint).await?;
        }

        Ok(registration)
    }

    pub async fn heartbeat(&self, runner_id: &str) -> Result<bool> {
        self.store.runners.touch_heartbeat(runner_id).await
    }

    pub async fn get(&self, runner_id: &str) -> Result<Option<RunnerRegistration>> {
        self.store.runners.get(runner_id).await
    }

    pub async fn list(&self) -> Result<Vec<RunnerRegistration>> {
        self.store.runners.list().await
    }

    pub async fn list_with_liveness(&self) -> Result<Vec<(RunnerRegistration, Liveness)>> {
        let now = Utc::now();
        let runners = self.store.runners.list().await?;
        Ok(runners
            .into_iter()
            .map(|r| {
                let liveness = self.liveness_of(&r, now);
                (r, liveness)
            })
            .collect())
    }

    pub fn liveness_of(&self, runner: &RunnerRegistration, now: chrono::DateTime<Utc>) -> Liveness {
        runner.liveness(
            now,
            Duration::from_secs(self.scheduling.heartbeat_stale_seconds),
            Duration::from_secs(self.scheduling.heartbeat_timeout_seconds),
        )
    }

    pub async fn online_runner_ids(&self) -> Result<Vec<String>> {
        let now = Utc::now();
        let runners = self.store.runners.list().await?;
        Ok(runners
            .into_iter()
            .filter(|r| !r.marked_for_deregistration && self.liveness_of(r, now) != Liveness::Offline)
            .map(|r| r.runner_id)
            .collect())
    }

    pub async fn deregister_self(&self, runner_id: &str) -> Result<bool> {
        let removed = self.store.runners.delete(runner_id).await?;
        self.notifies.remove(runner_id);
        Ok(removed)
    }

    pub async fn deregister_external(&self, runner_id: &str) -> Result<bool> {
        let marked = self.store.runners.mark_for_deregistration(runner_id).await?;
        if marked {
            self.notify_one(runner_id);
        }
        Ok(marked)
    }

    pub async fn queue_stop(&self, runner_id: &str, run_id: &str) -> Result<()> {
        self.store.runners.queue_stop_intent(runner_id, run_id).await?;
        self.notify_one(runner_id);
        Ok(())
    }

    pub async fn drain_stop_intents(&self, runner_id: &str) -> Result<Vec<String>> {
        self.store.runners.drain_stop_intents(runner_id).await
    }

    /// Garbage-collects registrations that have been offline for longer than
    /// the configured grace period. Distinct from liveness, which is a derived
    /// read-time property and never itself deletes a row.
    pub async fn collect_garbage(&self) -> Result<usize> {
        let now = Utc::now();
        let grace = Duration::from_secs(self.scheduling.registration_gc_grace_seconds);
        let offline_after = Duration::from_secs(self.scheduling.heartbeat_timeout_seconds);
        let runners = self.store.runners.list().await?;
        let mut collected = 0;
        for runner in runners {
            let elapsed = (now - runner.last_heartbeat)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if elapsed >= offline_after + grace {
                self.store.runners.delete(&runner.runner_id).await?;
                self.notifies.remove(&runner.runner_id);
                collected += 1;
            }
        }
        Ok(collected)
    }
}
