//! Blueprint & Placeholder Resolver (C5): blueprint storage, schema
//! validation and `${namespace.key}` resolution before a run is enqueued.

pub mod loader;
pub mod resolver;
pub mod schema;

use serde_json::Value;

use crate::api::error::ApiError;
use crate::store::models::{Blueprint, BlueprintStatus, BlueprintType, Demands, RunType};
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct BlueprintResolver {
    store: Store,
}

pub struct ResolvedForRun {
    pub blueprint: Blueprint,
    pub resolved_blueprint: Value,
}

impl BlueprintResolver {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Seeds the store from `dir` on startup. Insert-if-absent: a name already
    /// present in the store (seeded on a prior run, or created/mutated via the
    /// API since) is left untouched rather than overwritten.
    pub async fn seed_from_disk(&self, dir: &std::path::Path) -> anyhow::Result<usize> {
        let blueprints = loader::load_dir(dir)?;
        let mut seeded = 0;
        for bp in blueprints {
            if self.store.blueprints.get(&bp.name).await?.is_some() {
                continue;
            }
            self.store.blueprints.upsert(&bp).await?;
            seeded += 1;
        }
        Ok(seeded)
    }

    pub async fn get(&self, name: &str) -> anyhow::Result<Option<Blueprint>> {
        self.store.blueprints.get(name).await
    }

    pub async fn list(&self, online_runner_ids: &[String]) -> anyhow::Result<Vec<Blueprint>> {
        self.store.blueprints.list(online_runner_ids).await
    }

    pub async fn create(&self, blueprint: Blueprint) -> Result<Blueprint, ApiError> {
        if self
            .store
            .blueprints
            .get(&blueprint.name)
            .await
            .map_err(ApiError::from_anyhow)?
            .is_some()
        {
            return Err(ApiError::Conflict(format!(
                "blueprint {} already exists",
                blueprint.name
            )));
        }
        self.store
            .blueprints
            .upsert(&blueprint)
            .await
            .map_err(ApiError::from_anyhow)?;
        Ok(blueprint)
    }

    /// Applies a partial update. Rejects mutation of runner-owned blueprints:
    /// those are only replaced by the owning runner's next registration.
    pub async fn patch(&self, name: &str, patch: BlueprintPatch) -> Result<Blueprint, ApiError> {
        let mut existing = self
            .store
            .blueprints
            .get(name)
            .await
            .map_err(ApiError::from_anyhow)?
            .ok_or_else(|| ApiError::NotFound(format!("blueprint {name} not found")))?;

        if existing.runner_owned {
            return Err(ApiError::Forbidden(format!(
                "blueprint {name} is runner-owned and can only be replaced by its runner"
            )));
        }

        if let Some(v) = patch.description {
            existing.description = Some(v);
        }
        if let Some(v) = patch.system_prompt {
            existing.system_prompt = Some(v);
        }
        if let Some(v) = patch.parameters_schema {
            existing.parameters_schema = v;
        }
        if let Some(v) = patch.output_schema {
            existing.output_schema = Some(v);
        }
        if let Some(v) = patch.mcp_servers {
            existing.mcp_servers = v;
        }
        if let Some(v) = patch.capabilities_required {
            existing.capabilities_required = v;
        }
        if let Some(v) = patch.demands {
            existing.demands = v;
        }
        if let Some(v) = patch.status {
            existing.status = v;
        }

        self.store
            .blueprints
            .upsert(&existing)
            .await
            .map_err(ApiError::from_anyhow)?;
        Ok(existing)
    }

    pub async fn delete(&self, name: &str) -> Result<bool, ApiError> {
        let existing = self
            .store
            .blueprints
            .get(name)
            .await
            .map_err(ApiError::from_anyhow)?;
        if let Some(bp) = &existing {
            if bp.runner_owned {
                return Err(ApiError::Forbidden(format!(
                    "blueprint {name} is runner-owned and cannot be deleted via the API"
                )));
            }
        }
        self.store.blueprints.delete(name).await.map_err(ApiError::from_anyhow)
    }

    /// Looks up the blueprint, validates `parameters`, and resolves
    /// placeholders, freezing the result for the run. Steps 1-2 and 4 of the
    /// enqueue sequence; demand merging (step 5) is the queue's job since it
    /// also needs the caller's additional demands.
    pub async fn resolve_for_run(
        &self,
        agent_name: &str,
        run_type: RunType,
        parameters: &Value,
        scope: &Value,
        session_id: &str,
        run_id: &str,
    ) -> Result<ResolvedForRun, ApiError> {
        let blueprint = self
            .store
            .blueprints
            .get(agent_name)
            .await
            .map_err(ApiError::from_anyhow)?
            .ok_or_else(|| ApiError::NotFound(format!("agent {agent_name} not found")))?;

        if blueprint.status == BlueprintStatus::Inactive {
            return Err(ApiError::Conflict(format!("agent {agent_name} is inactive")));
        }

        if blueprint.blueprint_type == BlueprintType::Procedural && run_type == RunType::Resume {
            return Err(ApiError::BadRequest(
                "procedural agents are stateless and cannot be resumed".into(),
            ));
        }

        let schema = match blueprint.blueprint_type {
            BlueprintType::Autonomous => {
                schema::merge_implicit_autonomous_schema(&blueprint.parameters_schema)
            }
            BlueprintType::Procedural => blueprint.parameters_schema.clone(),
        };

        if let Err(errors) = schema::validate(&schema, parameters) {
            return Err(ApiError::ValidationFailed {
                errors,
                parameters_schema: schema,
            });
        }

        let ctx = resolver::ResolutionContext {
            params: parameters,
            scope,
            session_id,
            run_id,
        };

        let resolved_value = serde_json::to_value(&blueprint).map_err(|e| ApiError::Internal(e.into()))?;
        let resolved_blueprint = resolver::resolve(&resolved_value, &ctx);

        Ok(ResolvedForRun {
            blueprint,
            resolved_blueprint,
        })
    }
}

#[derive(Debug, Default)]
pub struct BlueprintPatch {
    pub description: Option<String>,
    pub system_prompt: Option<String>,
    pub parameters_schema: Option<Value>,
    pub output_schema: Option<Value>,
    pub mcp_servers: Option<Value>,
    pub capabilities_required: Option<std::collections::BTreeSet<String>>,
    pub demands: Option<Demands>,
    pub status: Option<BlueprintStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use serde_json::json;

    async fn resolver_with_store() -> BlueprintResolver {
        let db = Database::in_memory().await.unwrap();
        BlueprintResolver::new(Store::new(db.pool().clone()))
    }

    fn autonomous_blueprint(name: &str) -> Blueprint {
        Blueprint {
            name: name.to_string(),
            description: None,
            blueprint_type: BlueprintType::Autonomous,
            system_prompt: Some("be helpful".into()),
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
        }
    }

    #[tokio::test]
    async fn resolve_for_run_rejects_missing_required_prompt() {
        let resolver = resolver_with_store().await;
        resolver.create(autonomous_blueprint("echo")).await.unwrap();
        let result = resolver
            .resolve_for_run("echo", RunType::Start, &json!({}), &json!({}), "ses_1", "run_1")
            .await;
        assert!(matches!(result, Err(ApiError::ValidationFailed { .. })));
    }

    #[tokio::test]
    async fn resolve_for_run_rejects_resume_of_procedural_blueprint() {
        let resolver = resolver_with_store().await;
        let mut bp = autonomous_blueprint("proc");
        bp.blueprint_type = BlueprintType::Procedural;
        bp.command = Some("./run.sh".into());
        resolver.create(bp).await.unwrap();

        let result = resolver
            .resolve_for_run("proc", RunType::Resume, &json!({}), &json!({}), "ses_1", "run_1")
            .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn seed_from_disk_does_not_overwrite_an_api_mutated_row() {
        let resolver = resolver_with_store().await;
        let dir = tempfile::tempdir().unwrap();
        let bp_dir = dir.path().join("echo");
        std::fs::create_dir_all(&bp_dir).unwrap();
        std::fs::write(
            bp_dir.join("blueprint.yaml"),
            "type: autonomous\ndescription: from disk\n",
        )
        .unwrap();
        std::fs::write(bp_dir.join("prompt.md"), "disk prompt").unwrap();

        let seeded = resolver.seed_from_disk(dir.path()).await.unwrap();
        assert_eq!(seeded, 1);

        let mut mutated = resolver.get("echo").await.unwrap().unwrap();
        mutated.description = Some("api mutated".into());
        resolver.store.blueprints.upsert(&mutated).await.unwrap();

        let reseeded = resolver.seed_from_disk(dir.path()).await.unwrap();
        assert_eq!(reseeded, 0, "a name already in the store is not reseeded");

        let current = resolver.get("echo").await.unwrap().unwrap();
        assert_eq!(current.description.as_deref(), Some("api mutated"));
    }

    #[tokio::test]
    async fn runner_owned_blueprint_rejects_patch_and_delete() {
        let resolver = resolver_with_store().await;
        let mut bp = autonomous_blueprint("owned");
        bp.runner_owned = true;
        bp.owning_runner_id = Some("rnr_1".into());
        resolver.store.blueprints.upsert(&bp).await.unwrap();

        let patch_result = resolver
            .patch("owned", BlueprintPatch { description: Some("x".into()), ..Default::default() })
            .await;
        assert!(matches!(patch_result, Err(ApiError::Forbidden(_))));

        let delete_result = resolver.delete("owned").await;
        assert!(matches!(delete_result, Err(ApiError::Forbidden(_))));
    }
}
