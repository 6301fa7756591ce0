//! Runner registration persistence.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};

use super::models::{current_time, RunnerRegistration};

#[derive(Debug, Clone)]
pub struct RunnerRepository {
    pool: SqlitePool,
}

impl RunnerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a fresh registration, or refreshes an existing one with the same id.
    pub async fn upsert(&self, registration: &RunnerRegistration) -> Result<()> {
        let capabilities = serde_json::to_string(&registration.capabilities)?;
        sqlx::query(
            r#"
            INSERT INTO runners (
                runner_id, hostname, project_dir, executor_profile, capabilities,
                registered_at, last_heartbeat, marked_for_deregistration
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 0)
            ON CONFLICT(runner_id) DO UPDATE SET
                hostname = excluded.hostname,
                project_dir = excluded.project_dir,
                executor_profile = excluded.executor_profile,
                capabilities = excluded.capabilities,
                last_heartbeat = excluded.last_heartbeat,
                marked_for_deregistration = 0
            "#,
        )
        .bind(&registration.runner_id)
        .bind(&registration.hostname)
        .bind(&registration.project_dir)
        .bind(&registration.executor_profile)
        .bind(capabilities)
        .bind(registration.registered_at)
        .bind(registration.last_heartbeat)
        .execute(&self.pool)
        .await
        .context("upserting runner registration")?;
        Ok(())
    }

    pub async fn get(&self, runner_id: &str) -> Result<Option<RunnerRegistration>> {
        let row = sqlx::query(
            "SELECT runner_id, hostname, project_dir, executor_profile, capabilities, registered_at, last_heartbeat, marked_for_deregistration FROM runners WHERE runner_id = ?",
        )
        .bind(runner_id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching runner")?;

        row.map(row_to_runner).transpose()
    }

    pub async fn list(&self) -> Result<Vec<RunnerRegistration>> {
        let rows = sqlx::query(
            "SELECT runner_id, hostname, project_dir, executor_profile, capabilities, registered_at, last_heartbeat, marked_for_deregistration FROM runners",
        )
        .fetch_all(&self.pool)
        .await
        .context("listing runners")?;

        rows.into_iter().map(row_to_runner).collect()
    }

    pub async fn touch_heartbeat(&self, runner_id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE runners SET last_heartbeat = ? WHERE runner_id = ?")
            .bind(current_time())
            .bind(runner_id)
            .execute(&self.pool)
            .await
            .context("touching heartbeat")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_for_deregistration(&self, runner_id: &str) -> Result<bool> {
        let result =
            sqlx::query("UPDATE runners SET marked_for_deregistration = 1 WHERE runner_id = ?")
                .bind(runner_id)
                .execute(&self.pool)
                .await
                .context("marking runner for deregistration")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, runner_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM runners WHERE runner_id = ?")
            .bind(runner_id)
            .execute(&self.pool)
            .await
            .context("deleting runner")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn queue_stop_intent(&self, runner_id: &str, run_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO stop_intents (runner_id, run_id) VALUES (?, ?)",
        )
        .bind(runner_id)
        .bind(run_id)
        .execute(&self.pool)
        .await
        .context("queuing stop intent")?;
        Ok(())
    }

    pub async fn drain_stop_intents(&self, runner_id: &str) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await?;
        let run_ids: Vec<String> =
            sqlx::query_scalar("SELECT run_id FROM stop_intents WHERE runner_id = ?")
                .bind(runner_id)
                .fetch_all(&mut *tx)
                .await
                .context("reading stop intents")?;
        sqlx::query("DELETE FROM stop_intents WHERE runner_id = ?")
            .bind(runner_id)
            .execute(&mut *tx)
            .await
            .context("clearing stop intents")?;
        tx.commit().await?;
        Ok(run_ids)
    }

    pub async fn has_stop_intents(&self, runner_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stop_intents WHERE runner_id = ?")
            .bind(runner_id)
            .fetch_one(&self.pool)
            .await
            .context("counting stop intents")?;
        Ok(count > 0)
    }
}

fn row_to_runner(row: sqlx::sqlite::SqliteRow) -> Result<RunnerRegistration> {
    let capabilities: String = row.try_get("capabilities")?;
    Ok(RunnerRegistration {
        runner_id: row.try_get("runner_id")?,
        hostname: row.try_get("hostname")?,
        project_dir: row.try_get("project_dir")?,
        executor_profile: row.try_get("executor_profile")?,
        capabilities: serde_json::from_str(&capabilities)?,
        registered_at: row.try_get("registered_at")?,
        last_heartbeat: row.try_get("last_heartbeat")?,
        marked_for_deregistration: row.try_get::<i64, _>("marked_for_deregistration")? != 0,
    })
}
