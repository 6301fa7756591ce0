//! Session persistence.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use super::models::{Session, SessionStatus};

#[derive(Debug, Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (
                session_id, parent_session_id, agent_name, status, project_dir,
                created_at, modified_at, executor_identity, executor_profile, hostname
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.session_id)
        .bind(&session.parent_session_id)
        .bind(&session.agent_name)
        .bind(session.status.to_string())
        .bind(&session.project_dir)
        .bind(session.created_at)
        .bind(session.modified_at)
        .bind(&session.executor_identity)
        .bind(&session.executor_profile)
        .bind(&session.hostname)
        .execute(&self.pool)
        .await
        .context("creating session")?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            SELECT session_id, parent_session_id, agent_name, status, project_dir,
                   created_at, modified_at, executor_identity, executor_profile, hostname
            FROM sessions WHERE session_id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching session")?;
        Ok(session)
    }

    pub async fn list(&self) -> Result<Vec<Session>> {
        let sessions = sqlx::query_as::<_, Session>(
            r#"
            SELECT session_id, parent_session_id, agent_name, status, project_dir,
                   created_at, modified_at, executor_identity, executor_profile, hostname
            FROM sessions ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("listing sessions")?;
        Ok(sessions)
    }

    pub async fn update_status(&self, id: &str, status: SessionStatus) -> Result<()> {
        sqlx::query("UPDATE sessions SET status = ?, modified_at = ? WHERE session_id = ?")
            .bind(status.to_string())
            .bind(super::models::current_time())
            .bind(id)
            .execute(&self.pool)
            .await
            .context("updating session status")?;
        Ok(())
    }

    pub async fn set_executor_identity(&self, id: &str, executor_identity: &str) -> Result<()> {
        sqlx::query(
            "UPDATE sessions SET executor_identity = ?, modified_at = ? WHERE session_id = ?",
        )
        .bind(executor_identity)
        .bind(super::models::current_time())
        .bind(id)
        .execute(&self.pool)
        .await
        .context("setting executor identity")?;
        Ok(())
    }

    pub async fn set_last_hostname(&self, id: &str, hostname: &str) -> Result<()> {
        sqlx::query("UPDATE sessions SET hostname = ?, modified_at = ? WHERE session_id = ?")
            .bind(hostname)
            .bind(super::models::current_time())
            .bind(id)
            .execute(&self.pool)
            .await
            .context("setting last hostname")?;
        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE session_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("deleting session")?;
        Ok(result.rows_affected() > 0)
    }
}
