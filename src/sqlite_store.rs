//! SQLite-backed [`DocumentStore`] and [`ClaimStore`].
//!
//! Documents live in a single `documents` table as JSON text; top-level
//! field access goes through SQLite's JSON functions, so partial updates and
//! the conditional "set if absent" write are single atomic statements.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;
use std::time::Duration;

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::models::Fields;
use crate::traits::{ClaimStore, DocumentStore};

/// SQLite implementation of [`DocumentStore`] and [`ClaimStore`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// JSON path selecting a top-level field.
fn field_path(field: &str) -> Result<String> {
    if field.is_empty() || field.contains('"') {
        bail!("Invalid field name: '{}'", field);
    }
    Ok(format!("$.\"{}\"", field))
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Fields>> {
        let body: Option<String> =
            sqlx::query_scalar("SELECT body FROM documents WHERE collection = ? AND id = ?")
                .bind(collection)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        body.map(|b| {
            serde_json::from_str::<Fields>(&b)
                .with_context(|| format!("Corrupt document body for {}/{}", collection, id))
        })
        .transpose()
    }

    async fn set(&self, collection: &str, id: &str, fields: &Fields) -> Result<()> {
        let body = serde_json::to_string(fields)?;
        let now = now_ts();

        sqlx::query(
            r#"
            INSERT INTO documents (collection, id, body, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(collection, id) DO UPDATE SET
                body = excluded.body,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(&body)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// All fields go into one `json_set` call, so the update is a single
    /// write statement and never upgrades a read lock.
    async fn update(&self, collection: &str, id: &str, fields: &Fields) -> Result<()> {
        let mut pairs = Vec::with_capacity(fields.len());
        for (field, value) in fields {
            pairs.push((field_path(field)?, value.to_string()));
        }

        let sql = if pairs.is_empty() {
            "UPDATE documents SET updated_at = ? WHERE collection = ? AND id = ?".to_string()
        } else {
            format!(
                "UPDATE documents SET body = json_set(body{}), updated_at = ? \
                 WHERE collection = ? AND id = ?",
                ", ?, json(?)".repeat(pairs.len())
            )
        };

        let mut query = sqlx::query(&sql);
        for (path, value) in &pairs {
            query = query.bind(path).bind(value);
        }
        let result = query
            .bind(now_ts())
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            bail!("Document {}/{} does not exist", collection, id);
        }
        Ok(())
    }

    async fn set_field_if_absent(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: &Value,
    ) -> Result<bool> {
        let path = field_path(field)?;
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET body = json_set(body, ?, json(?)), updated_at = ?
            WHERE collection = ? AND id = ? AND json_type(body, ?) IS NULL
            "#,
        )
        .bind(&path)
        .bind(value.to_string())
        .bind(now_ts())
        .bind(collection)
        .bind(id)
        .bind(&path)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_eq(&self, collection: &str, field: &str, value: &Value) -> Result<Vec<String>> {
        let path = field_path(field)?;
        let literal = value.to_string();
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM documents
            WHERE collection = ?
              AND json_type(body, ?) = json_type(?)
              AND json_extract(body, ?) = json_extract(?, '$')
            ORDER BY id
            "#,
        )
        .bind(collection)
        .bind(&path)
        .bind(&literal)
        .bind(&path)
        .bind(&literal)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn list_ids(&self, collection: &str) -> Result<Vec<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM documents WHERE collection = ? ORDER BY id")
                .bind(collection)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }
}

#[async_trait]
impl ClaimStore for SqliteStore {
    async fn try_claim(
        &self,
        stage: &str,
        item: &str,
        owner: &str,
        lease: Duration,
    ) -> Result<bool> {
        let now = now_ts();
        let expires_at = now + lease.as_secs() as i64;

        // The upsert only takes over an existing claim that has expired or
        // already belongs to `owner`; otherwise no row changes.
        let result = sqlx::query(
            r#"
            INSERT INTO claims (stage, item, owner, expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(stage, item) DO UPDATE SET
                owner = excluded.owner,
                expires_at = excluded.expires_at
            WHERE claims.expires_at <= ? OR claims.owner = excluded.owner
            "#,
        )
        .bind(stage)
        .bind(item)
        .bind(owner)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, stage: &str, item: &str, owner: &str) -> Result<()> {
        sqlx::query("DELETE FROM claims WHERE stage = ? AND item = ? AND owner = ?")
            .bind(stage)
            .bind(item)
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_path_quotes_key() {
        assert_eq!(
            field_path("processed_language_model").unwrap(),
            "$.\"processed_language_model\""
        );
        assert_eq!(field_path("has space").unwrap(), "$.\"has space\"");
    }

    #[test]
    fn field_path_rejects_quotes_and_empty() {
        assert!(field_path("").is_err());
        assert!(field_path("a\"b").is_err());
    }
}
