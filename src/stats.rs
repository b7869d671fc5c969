//! Pipeline status overview.
//!
//! Counts records by enrichment flag state, conversion markers and live
//! claims. Used by `recall status` to check what the next runs will pick up.

use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::{CollectionsConfig, Config};
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStatus {
    /// Records in the records collection.
    pub records: i64,
    /// Records with the enrichment flag `true`.
    pub processed: i64,
    /// Records with the enrichment flag `false`: the next enrichment run's
    /// candidates.
    pub pending: i64,
    /// Records without the flag; `recall repair` initialises these.
    pub missing_flag: i64,
    /// Source files whose conversion is recorded as complete.
    pub conversion_markers: i64,
    /// Unexpired claims held by running (or crashed) runs.
    pub active_claims: i64,
    pub last_converted_at: Option<i64>,
    pub last_enriched_at: Option<i64>,
}

async fn count_by_flag(
    pool: &SqlitePool,
    collection: &str,
    path: &str,
    json_type: &str,
) -> Result<i64> {
    let n: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM documents WHERE collection = ? AND json_type(body, ?) = ?",
    )
    .bind(collection)
    .bind(path)
    .bind(json_type)
    .fetch_one(pool)
    .await?;
    Ok(n)
}

async fn max_timestamp(pool: &SqlitePool, collection: &str, field: &str) -> Result<Option<i64>> {
    let ts: Option<i64> = sqlx::query_scalar(
        "SELECT MAX(json_extract(body, ?)) FROM documents WHERE collection = ?",
    )
    .bind(format!("$.\"{}\"", field))
    .bind(collection)
    .fetch_one(pool)
    .await?;
    Ok(ts)
}

/// Collect the status counts.
pub async fn collect_status(
    pool: &SqlitePool,
    collections: &CollectionsConfig,
) -> Result<PipelineStatus> {
    let records = &collections.records;
    let flag_path = format!("$.\"{}\"", collections.processed_field);

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE collection = ?")
        .bind(records)
        .fetch_one(pool)
        .await?;

    let missing_flag: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM documents WHERE collection = ? AND json_type(body, ?) IS NULL",
    )
    .bind(records)
    .bind(&flag_path)
    .fetch_one(pool)
    .await?;

    let conversion_markers: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE collection = ?")
            .bind(&collections.markers)
            .fetch_one(pool)
            .await?;

    let active_claims: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM claims WHERE expires_at > ?")
        .bind(chrono::Utc::now().timestamp())
        .fetch_one(pool)
        .await?;

    Ok(PipelineStatus {
        records: total,
        processed: count_by_flag(pool, records, &flag_path, "true").await?,
        pending: count_by_flag(pool, records, &flag_path, "false").await?,
        missing_flag,
        conversion_markers,
        active_claims,
        last_converted_at: max_timestamp(pool, records, "converted_at").await?,
        last_enriched_at: max_timestamp(pool, records, "enriched_at").await?,
    })
}

/// Run the status command: query the database and print a summary.
pub async fn run_status(config: &Config) -> Result<PipelineStatus> {
    let store = SqliteStore::open(config).await?;
    let status = collect_status(store.pool(), &config.collections).await;
    store.close().await;
    let status = status?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Recall: pipeline status");
    println!("=======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!(
        "  Records ({}):   {}",
        config.collections.records, status.records
    );
    println!("    processed:      {}", status.processed);
    println!("    pending:        {}", status.pending);
    println!("    missing flag:   {}", status.missing_flag);
    println!(
        "  Converted files ({}):   {}",
        config.collections.markers, status.conversion_markers
    );
    println!("  Active claims:  {}", status.active_claims);
    println!();
    println!(
        "  Last conversion: {}",
        status
            .last_converted_at
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    println!(
        "  Last enrichment: {}",
        status
            .last_enriched_at
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    if status.missing_flag > 0 {
        println!();
        println!(
            "  {} record(s) lack '{}'; run `recall repair` to queue them for enrichment.",
            status.missing_flag, config.collections.processed_field
        );
    }
    println!();

    Ok(status)
}

/// `1536` → `"1.5 KB"`.
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut size = bytes as f64 / 1024.0;
    let mut unit = 0;
    while size >= 1024.0 && unit + 1 < UNITS.len() {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, UNITS[unit])
}

/// Age of a Unix timestamp for the status printout: `"5 minutes ago"` for
/// the last month, a UTC date and time beyond that or in the future.
fn format_ts_relative(ts: i64) -> String {
    const STEPS: [(i64, &str); 3] = [(86_400, "day"), (3_600, "hour"), (60, "minute")];

    let age = chrono::Utc::now().timestamp() - ts;
    if (0..60).contains(&age) {
        return "just now".to_string();
    }
    if (60..30 * 86_400).contains(&age) {
        for (secs, unit) in STEPS {
            let n = age / secs;
            if n > 0 {
                let plural = if n == 1 { "" } else { "s" };
                return format!("{} {}{} ago", n, unit, plural);
            }
        }
    }
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}
