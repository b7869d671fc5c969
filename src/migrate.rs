use anyhow::Result;
use sqlx::SqlitePool;

/// Create the schema if it does not exist. Safe to run before every command.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // One JSON body per document; a field missing from `body` is absent.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            body TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (collection, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS claims (
            stage TEXT NOT NULL,
            item TEXT NOT NULL,
            owner TEXT NOT NULL,
            expires_at INTEGER NOT NULL,
            PRIMARY KEY (stage, item)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_updated_at ON documents(collection, updated_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
