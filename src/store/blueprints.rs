//! Blueprint persistence. Filesystem-seeded at startup, API-mutable after that.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};

use super::models::{Blueprint, BlueprintStatus, BlueprintType};

#[derive(Debug, Clone)]
pub struct BlueprintRepository {
    pool: SqlitePool,
}

impl BlueprintRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, blueprint: &Blueprint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO blueprints (
                name, description, blueprint_type, system_prompt, parameters_schema,
                output_schema, mcp_servers, capabilities_required, demands, hooks,
                status, command, runner_owned, owning_runner_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                description = excluded.description,
                blueprint_type = excluded.blueprint_type,
                system_prompt = excluded.system_prompt,
                parameters_schema = excluded.parameters_schema,
                output_schema = excluded.output_schema,
                mcp_servers = excluded.mcp_servers,
                capabilities_required = excluded.capabilities_required,
                demands = excluded.demands,
                hooks = excluded.hooks,
                status = excluded.status,
                command = excluded.command,
                runner_owned = excluded.runner_owned,
                owning_runner_id = excluded.owning_runner_id
            "#,
        )
        .bind(&blueprint.name)
        .bind(&blueprint.description)
        .bind(blueprint.blueprint_type.to_string())
        .bind(&blueprint.system_prompt)
        .bind(serde_json::to_string(&blueprint.parameters_schema)?)
        .bind(
            blueprint
                .output_schema
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(serde_json::to_string(&blueprint.mcp_servers)?)
        .bind(serde_json::to_string(&blueprint.capabilities_required)?)
        .bind(serde_json::to_string(&blueprint.demands)?)
        .bind(serde_json::to_string(&blueprint.hooks)?)
        .bind(blueprint.status.to_string())
        .bind(&blueprint.command)
        .bind(blueprint.runner_owned)
        .bind(&blueprint.owning_runner_id)
        .execute(&self.pool)
        .await
        .context("upserting blueprint")?;
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Option<Blueprint>> {
        let row = sqlx::query(
            r#"
            SELECT name, description, blueprint_type, system_prompt, parameters_schema,
                   output_schema, mcp_servers, capabilities_required, demands, hooks,
                   status, command, runner_owned, owning_runner_id
            FROM blueprints WHERE name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("fetching blueprint")?;

        row.map(row_to_blueprint).transpose()
    }

    /// Lists blueprints, hiding runner-owned ones whose owning runner is not
    /// currently known (offline) unless `include_hidden` is set.
    pub async fn list(&self, online_runner_ids: &[String]) -> Result<Vec<Blueprint>> {
        let rows = sqlx::query(
            r#"
            SELECT name, description, blueprint_type, system_prompt, parameters_schema,
                   output_schema, mcp_servers, capabilities_required, demands, hooks,
                   status, command, runner_owned, owning_runner_id
            FROM blueprints ORDER BY name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("listing blueprints")?;

        let blueprints = rows
            .into_iter()
            .map(row_to_blueprint)
            .collect::<Result<Vec<_>>>()?;

        Ok(blueprints
            .into_iter()
            .filter(|b| {
                if !b.runner_owned {
                    return true;
                }
                match &b.owning_runner_id {
                    Some(id) => online_runner_ids.iter().any(|r| r == id),
                    None => true,
                }
            })
            .collect())
    }

    pub async fn delete(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM blueprints WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .context("deleting blueprint")?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_blueprint(row: sqlx::sqlite::SqliteRow) -> Result<Blueprint> {
    let blueprint_type: String = row.try_get("blueprint_type")?;
    let status: String = row.try_get("status")?;
    let parameters_schema: String = row.try_get("parameters_schema")?;
    let output_schema: Option<String> = row.try_get("output_schema")?;
    let mcp_servers: String = row.try_get("mcp_servers")?;
    let capabilities_required: String = row.try_get("capabilities_required")?;
    let demands: String = row.try_get("demands")?;
    let hooks: String = row.try_get("hooks")?;

    Ok(Blueprint {
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        blueprint_type: blueprint_type
            .parse::<BlueprintType>()
            .map_err(|e| anyhow::anyhow!(e))?,
        system_prompt: row.try_get("system_prompt")?,
        parameters_schema: serde_json::from_str(&parameters_schema)?,
        output_schema: output_schema.map(|s| serde_json::from_str(&s)).transpose()?,
        mcp_servers: serde_json::from_str(&mcp_servers)?,
        capabilities_required: serde_json::from_str(&capabilities_required)?,
        demands: serde_json::from_str(&demands)?,
        hooks: serde_json::from_str(&hooks)?,
        status: status.parse::<BlueprintStatus>().map_err(|e| anyhow::anyhow!(e))?,
        command: row.try_get("command")?,
        runner_owned: row.try_get::<i64, _>("runner_owned")? != 0,
        owning_runner_id: row.try_get("owning_runner_id")?,
    })
}
