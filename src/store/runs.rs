//! Run persistence, including the atomic claim used by the matcher.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use super::models::{current_time, Demands, ExecutionMode, Run, RunStatus, RunType};

#[derive(Debug, Clone)]
pub struct RunRepository {
    pool: SqlitePool,
}

impl RunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, run: &Run) -> Result<()> {
        insert_run(&self.pool, run).await
    }

    pub async fn get(&self, run_id: &str) -> Result<Option<Run>> {
        let row = sqlx::query(SELECT_RUN_COLUMNS_WHERE_ID)
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .context("fetching run")?;
        row.map(row_to_run).transpose()
    }

    pub async fn list_for_session(&self, session_id: &str) -> Result<Vec<Run>> {
        let rows = sqlx::query(&format!(
            "{SELECT_RUN_COLUMNS} WHERE session_id = ? ORDER BY created_at ASC"
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .context("listing runs for session")?;
        rows.into_iter().map(row_to_run).collect()
    }

    /// Indexed scan of pending runs in FIFO order, for rebuilding the in-memory
    /// ready index at startup or after a wake-up.
    pub async fn list_pending(&self) -> Result<Vec<Run>> {
        let rows = sqlx::query(&format!(
            "{SELECT_RUN_COLUMNS} WHERE status = 'pending' ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .context("listing pending runs")?;
        rows.into_iter().map(row_to_run).collect()
    }

    /// Runs whose status is non-terminal and transient across a restart; used
    /// by the recovery sweep.
    pub async fn list_recoverable(&self) -> Result<Vec<Run>> {
        let rows = sqlx::query(&format!(
            "{SELECT_RUN_COLUMNS} WHERE status IN ('claimed', 'running', 'stopping')"
        ))
        .fetch_all(&self.pool)
        .await
        .context("listing recoverable runs")?;
        rows.into_iter().map(row_to_run).collect()
    }

    pub async fn list_timed_out(&self, now: DateTime<Utc>) -> Result<Vec<Run>> {
        let rows = sqlx::query(&format!(
            "{SELECT_RUN_COLUMNS} WHERE status = 'pending' AND timeout_at IS NOT NULL AND timeout_at <= ?"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .context("listing timed out runs")?;
        rows.into_iter().map(row_to_run).collect()
    }

    /// Atomically claims the first pending run (FIFO) whose demands are
    /// satisfied by `capabilities_satisfy`. Uses `BEGIN IMMEDIATE` to take
    /// SQLite's write lock up front so concurrent callers serialize instead of
    /// racing on a read-then-write window.
    pub async fn claim_first_matching(
        &self,
        runner_id: &str,
        satisfies: impl Fn(&Demands) -> bool,
    ) -> Result<Option<Run>> {
        let mut conn = self.pool.acquire().await.context("acquiring connection")?;
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .context("starting claim transaction")?;

        let candidates = sqlx::query(&format!(
            "{SELECT_RUN_COLUMNS} WHERE status = 'pending' ORDER BY created_at ASC"
        ))
        .fetch_all(&mut *conn)
        .await;

        let candidates = match candidates {
            Ok(rows) => rows,
            Err(err) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(err).context("scanning pending runs");
            }
        };

        let mut chosen: Option<Run> = None;
        for row in candidates {
            let run = match row_to_run(row) {
                Ok(run) => run,
                Err(err) => {
                    let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                    return Err(err);
                }
            };
            if satisfies(&run.demands) {
                chosen = Some(run);
                break;
            }
        }

        let Some(mut run) = chosen else {
            sqlx::query("COMMIT")
                .execute(&mut *conn)
                .await
                .context("committing empty claim")?;
            return Ok(None);
        };

        let claimed_at = current_time();
        let update = sqlx::query(
            "UPDATE runs SET status = 'claimed', runner_id = ?, claimed_at = ? WHERE run_id = ? AND status = 'pending'",
        )
        .bind(runner_id)
        .bind(claimed_at)
        .bind(&run.run_id)
        .execute(&mut *conn)
        .await;

        match update {
            Ok(result) if result.rows_affected() == 1 => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .context("committing claim")?;
                run.status = RunStatus::Claimed;
                run.runner_id = Some(runner_id.to_string());
                run.claimed_at = Some(claimed_at);
                Ok(Some(run))
            }
            Ok(_) => {
                // Lost a race despite holding the write lock: should not happen,
                // but fail safe by rolling back and reporting no claim.
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Ok(None)
            }
            Err(err) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(err).context("updating claimed run")
            }
        }
    }

    pub async fn set_status(&self, run_id: &str, status: RunStatus) -> Result<()> {
        sqlx::query("UPDATE runs SET status = ? WHERE run_id = ?")
            .bind(status.to_string())
            .bind(run_id)
            .execute(&self.pool)
            .await
            .context("updating run status")?;
        Ok(())
    }

    pub async fn mark_started(&self, run_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE runs SET status = 'running', started_at = ? WHERE run_id = ? AND status IN ('claimed', 'running')",
        )
        .bind(current_time())
        .bind(run_id)
        .execute(&self.pool)
        .await
        .context("marking run started")?;
        Ok(())
    }

    pub async fn mark_completed(&self, run_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE runs SET status = 'completed', completed_at = ? WHERE run_id = ? AND status != 'completed'",
        )
        .bind(current_time())
        .bind(run_id)
        .execute(&self.pool)
        .await
        .context("marking run completed")?;
        Ok(())
    }

    pub async fn mark_failed(&self, run_id: &str, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE runs SET status = 'failed', error = ?, completed_at = ? WHERE run_id = ? AND status NOT IN ('completed', 'failed', 'stopped')",
        )
        .bind(error)
        .bind(current_time())
        .bind(run_id)
        .execute(&self.pool)
        .await
        .context("marking run failed")?;
        Ok(())
    }

    pub async fn mark_stopping(&self, run_id: &str) -> Result<()> {
        sqlx::query("UPDATE runs SET status = 'stopping' WHERE run_id = ?")
            .bind(run_id)
            .execute(&self.pool)
            .await
            .context("marking run stopping")?;
        Ok(())
    }

    pub async fn mark_stopped(&self, run_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE runs SET status = 'stopped', completed_at = ? WHERE run_id = ? AND status != 'stopped'",
        )
        .bind(current_time())
        .bind(run_id)
        .execute(&self.pool)
        .await
        .context("marking run stopped")?;
        Ok(())
    }
}

async fn insert_run(pool: &SqlitePool, run: &Run) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO runs (
            run_id, run_type, session_id, agent_name, parameters, scope,
            resolved_blueprint, demands, execution_mode, status, runner_id,
            error, created_at, claimed_at, started_at, completed_at, timeout_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&run.run_id)
    .bind(run.run_type.to_string())
    .bind(&run.session_id)
    .bind(&run.agent_name)
    .bind(serde_json::to_string(&run.parameters)?)
    .bind(serde_json::to_string(&run.scope)?)
    .bind(serde_json::to_string(&run.resolved_blueprint)?)
    .bind(serde_json::to_string(&run.demands)?)
    .bind(run.execution_mode.to_string())
    .bind(run.status.to_string())
    .bind(&run.runner_id)
    .bind(&run.error)
    .bind(run.created_at)
    .bind(run.claimed_at)
    .bind(run.started_at)
    .bind(run.completed_at)
    .bind(run.timeout_at)
    .execute(pool)
    .await
    .context("inserting run")?;
    Ok(())
}

const SELECT_RUN_COLUMNS: &str = r#"
SELECT run_id, run_type, session_id, agent_name, parameters, scope, resolved_blueprint,
       demands, execution_mode, status, runner_id, error, created_at, claimed_at,
       started_at, completed_at, timeout_at
FROM runs
"#;

const SELECT_RUN_COLUMNS_WHERE_ID: &str = r#"
SELECT run_id, run_type, session_id, agent_name, parameters, scope, resolved_blueprint,
       demands, execution_mode, status, runner_id, error, created_at, claimed_at,
       started_at, completed_at, timeout_at
FROM runs WHERE run_id = ?
"#;

fn row_to_run(row: sqlx::sqlite::SqliteRow) -> Result<Run> {
    let run_type: String = row.try_get("run_type")?;
    let parameters: String = row.try_get("parameters")?;
    let scope: String = row.try_get("scope")?;
    let resolved_blueprint: String = row.try_get("resolved_blueprint")?;
    let demands: String = row.try_get("demands")?;
    let execution_mode: String = row.try_get("execution_mode")?;
    let status: String = row.try_get("status")?;

    Ok(Run {
        run_id: row.try_get("run_id")?,
        run_type: run_type.parse::<RunType>().map_err(|e| anyhow::anyhow!(e))?,
        session_id: row.try_get("session_id")?,
        agent_name: row.try_get("agent_name")?,
        parameters: serde_json::from_str(&parameters)?,
        scope: serde_json::from_str(&scope)?,
        resolved_blueprint: serde_json::from_str(&resolved_blueprint)?,
        demands: serde_json::from_str(&demands)?,
        execution_mode: execution_mode
            .parse::<ExecutionMode>()
            .map_err(|e| anyhow::anyhow!(e))?,
        status: status.parse::<RunStatus>().map_err(|e| anyhow::anyhow!(e))?,
        runner_id: row.try_get("runner_id")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        claimed_at: row.try_get("claimed_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        timeout_at: row.try_get("timeout_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{current_time, ExecutionMode, RunType};
    use serde_json::json;

    async fn seed_session(pool: &sqlx::SqlitePool) {
        sqlx::query(
            r#"
            INSERT INTO sessions (
                session_id, parent_session_id, agent_name, status, project_dir,
                created_at, modified_at, executor_identity, executor_profile, hostname
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind("ses_test")
        .bind(None::<String>)
        .bind("echo")
        .bind("pending")
        .bind(None::<String>)
        .bind(current_time())
        .bind(current_time())
        .bind(None::<String>)
        .bind(None::<String>)
        .bind(None::<String>)
        .execute(pool)
        .await
        .unwrap();
    }

    fn sample_run(id: &str) -> Run {
        Run {
            run_id: id.to_string(),
            run_type: RunType::Start,
            session_id: "ses_test".to_string(),
            agent_name: "echo".to_string(),
            parameters: json!({"prompt": "hi"}),
            scope: json!({}),
            resolved_blueprint: json!({}),
            demands: Demands::default(),
            execution_mode: ExecutionMode::AsyncPoll,
            status: RunStatus::Pending,
            runner_id: None,
            error: None,
            created_at: current_time(),
            claimed_at: None,
            started_at: None,
            completed_at: None,
            timeout_at: None,
        }
    }

    #[tokio::test]
    async fn claim_is_exclusive_under_concurrency() {
        let db = crate::db::Database::in_memory().await.unwrap();
        seed_session(db.pool()).await;
        let repo = RunRepository::new(db.pool().clone());
        repo.create(&sample_run("run_1")).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.claim_first_matching(&format!("rnr_{i}"), |_| true)
                    .await
                    .unwrap()
            }));
        }

        let mut claims = 0;
        for h in handles {
            if h.await.unwrap().is_some() {
                claims += 1;
            }
        }
        assert_eq!(claims, 1);
    }

    #[tokio::test]
    async fn claim_skips_runs_that_do_not_satisfy_demands() {
        let db = crate::db::Database::in_memory().await.unwrap();
        seed_session(db.pool()).await;
        let repo = RunRepository::new(db.pool().clone());
        let mut gpu_run = sample_run("run_gpu");
        gpu_run.demands.tags.insert("gpu".to_string());
        repo.create(&gpu_run).await.unwrap();
        repo.create(&sample_run("run_plain")).await.unwrap();

        let claimed = repo
            .claim_first_matching("rnr_1", |d| d.tags.is_empty())
            .await
            .unwrap();
        assert_eq!(claimed.unwrap().run_id, "run_plain");
    }
}
