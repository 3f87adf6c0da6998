//! SQLite-backed record store.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use rolodex_core::{Record, RecordId};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use super::{RecordStore, SESSION_KEY, StoreError, decode, encode, record_ids};
use crate::types::AuthToken;

/// SQLite-backed local store (survives restarts).
///
/// This struct is cheap to clone and is safe to share across threads.
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    /// Open (creating if needed) the database file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create record store directory at {:?}", parent))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .with_context(|| format!("failed to create SQLite pool for record store at {:?}", path))?;

        Self::with_pool(pool).await
    }

    /// A private in-memory database (tests/dev).
    ///
    /// Pinned to a single connection that never expires; every connection to
    /// `sqlite::memory:` would otherwise see its own empty database.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("failed to open in-memory SQLite database")?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS local_entries (
                key         TEXT PRIMARY KEY,
                value       TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .context("failed to create local_entries table")?;

        Ok(Self { pool })
    }

    /// Resolve the default database location: `{app_data_dir}/rolodex/records.db`.
    pub fn default_path() -> anyhow::Result<PathBuf> {
        let base = dirs::data_dir()
            .or_else(|| dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            }))
            .context("failed to resolve OS app data directory - tried data_dir() and home_dir()/.local/share")?;

        let mut dir = base;
        dir.push("rolodex");
        dir.push("records.db");
        Ok(dir)
    }

    async fn upsert_raw(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO local_entries (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key)
            DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn fetch_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT value
            FROM local_entries
            WHERE key = ?1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(|row| row.try_get::<String, _>("value").map_err(backend))
            .transpose()
    }

    async fn delete_raw(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            DELETE FROM local_entries
            WHERE key = ?1
            "#,
        )
        .bind(key)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    tracing::error!("record store query failed: {err:?}");
    StoreError::Backend(err.to_string())
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn put(&self, id: &RecordId, record: &Record) -> Result<(), StoreError> {
        let raw = encode(id, record)?;
        self.upsert_raw(id.as_str(), &raw).await
    }

    async fn get(&self, id: &RecordId) -> Result<Option<Record>, StoreError> {
        if id.as_str() == SESSION_KEY {
            return Ok(None);
        }
        self.fetch_raw(id.as_str())
            .await?
            .map(|raw| decode(id.as_str(), &raw))
            .transpose()
    }

    async fn remove(&self, id: &RecordId) -> Result<(), StoreError> {
        if id.as_str() == SESSION_KEY {
            return Ok(());
        }
        self.delete_raw(id.as_str()).await
    }

    async fn list_ids(&self) -> Result<BTreeSet<RecordId>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT key
            FROM local_entries
            WHERE key <> ?1
            "#,
        )
        .bind(SESSION_KEY)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut keys = Vec::with_capacity(rows.len());
        for row in rows {
            keys.push(row.try_get::<String, _>("key").map_err(backend)?);
        }
        Ok(record_ids(keys.iter().map(String::as_str)))
    }

    async fn session_token(&self) -> Result<Option<AuthToken>, StoreError> {
        Ok(self.fetch_raw(SESSION_KEY).await?.map(AuthToken::new))
    }

    async fn set_session_token(&self, token: &AuthToken) -> Result<(), StoreError> {
        self.upsert_raw(SESSION_KEY, token.as_str()).await
    }

    async fn clear_session_token(&self) -> Result<(), StoreError> {
        self.delete_raw(SESSION_KEY).await
    }
}
