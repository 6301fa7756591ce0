//! Append-only event log persistence.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};

use super::models::{current_time, Event, EventKind};

#[derive(Debug, Clone)]
pub struct EventRepository {
    pool: SqlitePool,
}

impl EventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Appends an event, assigning the next per-session sequence number inside
    /// the same transaction so concurrent appends to one session never collide.
    pub async fn append(
        &self,
        session_id: &str,
        kind: EventKind,
        payload: serde_json::Value,
    ) -> Result<Event> {
        let mut tx = self.pool.begin().await.context("starting event tx")?;

        let next_seq: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM events WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_one(&mut *tx)
        .await
        .context("computing next sequence")?;

        let event = Event {
            event_id: crate::ids::event_id(),
            session_id: session_id.to_string(),
            seq: next_seq,
            kind,
            timestamp: current_time(),
            payload,
        };

        sqlx::query(
            "INSERT INTO events (event_id, session_id, seq, kind, timestamp, payload) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.event_id)
        .bind(&event.session_id)
        .bind(event.seq)
        .bind(event.kind.to_string())
        .bind(event.timestamp)
        .bind(serde_json::to_string(&event.payload)?)
        .execute(&mut *tx)
        .await
        .context("inserting event")?;

        tx.commit().await.context("committing event tx")?;
        Ok(event)
    }

    pub async fn list_for_session(&self, session_id: &str) -> Result<Vec<Event>> {
        let rows = sqlx::query(
            "SELECT event_id, session_id, seq, kind, timestamp, payload FROM events WHERE session_id = ? ORDER BY seq ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .context("listing events")?;

        rows.into_iter().map(row_to_event).collect()
    }

    pub async fn latest_of_kind(
        &self,
        session_id: &str,
        kind: EventKind,
    ) -> Result<Option<Event>> {
        let row = sqlx::query(
            "SELECT event_id, session_id, seq, kind, timestamp, payload FROM events WHERE session_id = ? AND kind = ? ORDER BY seq DESC LIMIT 1",
        )
        .bind(session_id)
        .bind(kind.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("fetching latest event of kind")?;

        row.map(row_to_event).transpose()
    }
}

fn row_to_event(row: sqlx::sqlite::SqliteRow) -> Result<Event> {
    let kind: String = row.try_get("kind")?;
    let payload: String = row.try_get("payload")?;
    Ok(Event {
        event_id: row.try_get("event_id")?,
        session_id: row.try_get("session_id")?,
        seq: row.try_get("seq")?,
        kind: kind.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        timestamp: row.try_get("timestamp")?,
        payload: serde_json::from_str(&payload)?,
    })
}
