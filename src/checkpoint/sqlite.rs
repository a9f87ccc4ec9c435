//! SQLite-backed durable checkpoint store.
//!
//! Checkpoints serialize to a single JSON body column; identity, run
//! lookup, versioning, and expiry live in indexed columns so the queries
//! the runner issues stay cheap.
//!
//! ## Schema
//!
//! - `checkpoints.checkpoint_id` — primary key
//! - `checkpoints.run_id` — run lookup (`latest_for_run`)
//! - `checkpoints.version` — optimistic concurrency counter
//! - `checkpoints.created_at` / `expires_at` — RFC 3339 timestamps
//! - `checkpoints.body_json` — the full serialized [`Checkpoint`]

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use async_trait::async_trait;

use super::{Checkpoint, CheckpointError, CheckpointStore, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS checkpoints (
    checkpoint_id TEXT PRIMARY KEY,
    run_id        TEXT NOT NULL,
    version       INTEGER NOT NULL,
    created_at    TEXT NOT NULL,
    expires_at    TEXT,
    body_json     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_checkpoints_run_id ON checkpoints(run_id);
CREATE INDEX IF NOT EXISTS idx_checkpoints_expires_at ON checkpoints(expires_at);
"#;

pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    /// Connect to `database_url` (e.g. `sqlite::memory:` or
    /// `sqlite://checkpoints.db`) and ensure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await
            .map_err(backend)?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await.map_err(backend)?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn backend(e: sqlx::Error) -> CheckpointError {
    CheckpointError::Backend {
        message: e.to_string(),
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, checkpoint: Checkpoint, expected_version: Option<u64>) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        if let Some(expected) = expected_version {
            let existing: Option<i64> =
                sqlx::query_scalar("SELECT version FROM checkpoints WHERE checkpoint_id = ?1")
                    .bind(&checkpoint.checkpoint_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(backend)?;
            if let Some(actual) = existing {
                if actual as u64 != expected {
                    return Err(CheckpointError::ConcurrencyConflict {
                        checkpoint_id: checkpoint.checkpoint_id.clone(),
                        expected,
                        actual: actual as u64,
                    });
                }
            }
        }

        let body = serde_json::to_string(&checkpoint)?;
        sqlx::query(
            "INSERT INTO checkpoints
                 (checkpoint_id, run_id, version, created_at, expires_at, body_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(checkpoint_id) DO UPDATE SET
                 run_id = excluded.run_id,
                 version = excluded.version,
                 created_at = excluded.created_at,
                 expires_at = excluded.expires_at,
                 body_json = excluded.body_json",
        )
        .bind(&checkpoint.checkpoint_id)
        .bind(&checkpoint.run_id)
        .bind(checkpoint.version as i64)
        .bind(checkpoint.created_at.to_rfc3339())
        .bind(checkpoint.expires_at.map(|t| t.to_rfc3339()))
        .bind(body)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn load(&self, checkpoint_id: &str) -> Result<Checkpoint> {
        let row = sqlx::query("SELECT body_json FROM checkpoints WHERE checkpoint_id = ?1")
            .bind(checkpoint_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or_else(|| CheckpointError::NotFound {
                checkpoint_id: checkpoint_id.to_string(),
            })?;
        let body: String = row.get("body_json");
        Ok(serde_json::from_str(&body)?)
    }

    async fn latest_for_run(&self, run_id: &str) -> Result<Option<Checkpoint>> {
        let row = sqlx::query(
            "SELECT body_json FROM checkpoints
             WHERE run_id = ?1
             ORDER BY created_at DESC, version DESC
             LIMIT 1",
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        match row {
            Some(row) => {
                let body: String = row.get("body_json");
                Ok(Some(serde_json::from_str(&body)?))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, checkpoint_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM checkpoints WHERE checkpoint_id = ?1")
            .bind(checkpoint_id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn list_expired(&self, as_of: DateTime<Utc>) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT checkpoint_id FROM checkpoints
             WHERE expires_at IS NOT NULL AND expires_at <= ?1
             ORDER BY checkpoint_id",
        )
        .bind(as_of.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("checkpoint_id"))
            .collect())
    }
}
