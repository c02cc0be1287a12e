//! Session persistence - versioned combat snapshots and append-only logs
//!
//! A session owns at most one combat snapshot, stored as a JSON text
//! column and guarded by a version counter. All combat writes are
//! compare-and-swap: the UPDATE carries the version the writer read,
//! and zero affected rows means the write lost a race (or the session
//! vanished). Retrying is the caller's decision.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::combat::{CombatEvent, CombatState, EventSink};
use crate::dice::RollRecord;

/// Session persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("version conflict on session {id}: expected {expected}")]
    VersionConflict { id: String, expected: i64 },

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// A campaign session and its combat snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combat: Option<CombatState>,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Versioned session storage.
///
/// `update_combat` is the compare-and-swap seam: it succeeds only
/// when `expected_version` still matches, and returns the new
/// version.
pub trait SessionStore: Send + Sync {
    fn create(&self, name: &str) -> impl Future<Output = Result<Session, StoreError>> + Send;

    fn get(&self, id: &str) -> impl Future<Output = Result<Session, StoreError>> + Send;

    fn update_combat(
        &self,
        id: &str,
        combat: Option<&CombatState>,
        expected_version: i64,
    ) -> impl Future<Output = Result<i64, StoreError>> + Send;
}

impl<T: SessionStore> SessionStore for Arc<T> {
    fn create(&self, name: &str) -> impl Future<Output = Result<Session, StoreError>> + Send {
        (**self).create(name)
    }

    fn get(&self, id: &str) -> impl Future<Output = Result<Session, StoreError>> + Send {
        (**self).get(id)
    }

    fn update_combat(
        &self,
        id: &str,
        combat: Option<&CombatState>,
        expected_version: i64,
    ) -> impl Future<Output = Result<i64, StoreError>> + Send {
        (**self).update_combat(id, combat, expected_version)
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    name: String,
    combat: Option<String>,
    version: i64,
    created_at: String,
    updated_at: String,
}

impl SessionRow {
    fn into_session(self) -> Result<Session, StoreError> {
        let combat = self
            .combat
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        Ok(Session {
            id: self.id,
            name: self.name,
            combat,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// SQLite-backed session store
#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl SessionStore for SqliteSessionStore {
    async fn create(&self, name: &str) -> Result<Session, StoreError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO sessions (id, name, version, created_at, updated_at) VALUES (?, ?, 0, ?, ?)",
        )
        .bind(&id)
        .bind(name)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        debug!(session = %id, name, "session created");
        Ok(Session {
            id,
            name: name.to_string(),
            combat: None,
            version: 0,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    async fn get(&self, id: &str) -> Result<Session, StoreError> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT id, name, combat, version, created_at, updated_at FROM sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.into_session(),
            None => Err(StoreError::SessionNotFound(id.to_string())),
        }
    }

    async fn update_combat(
        &self,
        id: &str,
        combat: Option<&CombatState>,
        expected_version: i64,
    ) -> Result<i64, StoreError> {
        let combat_json = combat.map(serde_json::to_string).transpose()?;
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            "UPDATE sessions SET combat = ?, version = version + 1, updated_at = ? \
             WHERE id = ? AND version = ?",
        )
        .bind(&combat_json)
        .bind(&now)
        .bind(id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Zero rows: either the session is gone or another writer
            // bumped the version first. Tell them apart.
            let exists: Option<(i64,)> =
                sqlx::query_as("SELECT version FROM sessions WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
            return match exists {
                Some(_) => Err(StoreError::VersionConflict {
                    id: id.to_string(),
                    expected: expected_version,
                }),
                None => Err(StoreError::SessionNotFound(id.to_string())),
            };
        }

        Ok(expected_version + 1)
    }
}

/// A combat event as stored, payload re-parsed
#[derive(Debug, Clone, Serialize)]
pub struct StoredEvent {
    pub id: i64,
    pub session_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: String,
}

/// Append-only combat event log in SQLite
#[derive(Clone)]
pub struct SqliteEventLog {
    pool: SqlitePool,
}

impl SqliteEventLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// All events for a session, oldest first
    pub async fn for_session(&self, session_id: &str) -> Result<Vec<StoredEvent>, StoreError> {
        let rows: Vec<(i64, String, String, String, String)> = sqlx::query_as(
            "SELECT id, session_id, event_type, payload, created_at \
             FROM combat_events WHERE session_id = ? ORDER BY id",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, session_id, event_type, payload, created_at)| {
                Ok(StoredEvent {
                    id,
                    session_id,
                    event_type,
                    payload: serde_json::from_str(&payload)?,
                    created_at,
                })
            })
            .collect()
    }
}

impl EventSink for SqliteEventLog {
    async fn append(&self, session_id: &str, event: &CombatEvent) -> Result<(), StoreError> {
        let payload = serde_json::to_string(event)?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO combat_events (session_id, event_type, payload, created_at) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(event.event_type())
        .bind(&payload)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        debug!(session = session_id, event = event.event_type(), "event logged");
        Ok(())
    }
}

/// Audit log for dice rolls made through the API
#[derive(Clone)]
pub struct SqliteDiceLog {
    pool: SqlitePool,
}

impl SqliteDiceLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn log_roll(
        &self,
        session_id: Option<&str>,
        record: &RollRecord,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(record)?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO dice_log (id, session_id, roller_id, roller_name, reason, payload, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.result.id.to_string())
        .bind(session_id)
        .bind(&record.roller_id)
        .bind(&record.roller_name)
        .bind(&record.reason)
        .bind(&payload)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Recent rolls for a session, newest first
    pub async fn for_session(
        &self,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<serde_json::Value>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT payload FROM dice_log WHERE session_id = ? ORDER BY rowid DESC LIMIT ?",
        )
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(payload,)| Ok(serde_json::from_str(&payload)?))
            .collect()
    }
}
