//! Backfill of missing enrichment flags.
//!
//! Records written before the flag field existed are invisible to the
//! enrichment stage, which selects on `flag == false`. Repair walks every
//! record and initialises the flag to `false` where it is absent. Each write
//! is a conditional "set if absent", so existing `true`/`false` values are
//! never touched and the operation can run at any time, alongside pipeline
//! runs, any number of times.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::sqlite_store::SqliteStore;
use crate::traits::DocumentStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    /// Records examined.
    pub scanned: usize,
    /// Records whose flag was missing and has been set to `false`.
    pub initialized: usize,
}

/// Set `field = false` on every record in `collection` that lacks it.
pub async fn repair_missing_flags(
    store: &dyn DocumentStore,
    collection: &str,
    field: &str,
) -> Result<RepairReport> {
    let ids = store
        .list_ids(collection)
        .await
        .with_context(|| format!("Failed to list records in '{}'", collection))?;

    let mut report = RepairReport {
        scanned: ids.len(),
        initialized: 0,
    };

    for id in &ids {
        match store
            .set_field_if_absent(collection, id, field, &Value::Bool(false))
            .await
        {
            Ok(true) => {
                report.initialized += 1;
                info!(record = %id, field, "initialised missing flag");
            }
            Ok(false) => {}
            Err(e) => warn!(record = %id, field, "failed to repair record: {:#}", e),
        }
    }

    info!(
        collection,
        scanned = report.scanned,
        initialized = report.initialized,
        "repair finished"
    );
    Ok(report)
}

/// Run repair against the configured SQLite store.
pub async fn run_repair(config: &Config) -> Result<RepairReport> {
    let store = Arc::new(SqliteStore::open(config).await?);
    let report = repair_missing_flags(
        store.as_ref(),
        &config.collections.records,
        &config.collections.processed_field,
    )
    .await;
    store.close().await;
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::models::Fields;
    use serde_json::json;

    fn record(pairs: &[(&str, Value)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn initialises_only_missing_flags() {
        let store = MemoryStore::new();
        store
            .set("articles", "legacy", &record(&[("content", json!("old"))]))
            .await
            .unwrap();
        store
            .set(
                "articles",
                "done",
                &record(&[("content", json!("x")), ("flag", json!(true))]),
            )
            .await
            .unwrap();
        store
            .set(
                "articles",
                "pending",
                &record(&[("content", json!("y")), ("flag", json!(false))]),
            )
            .await
            .unwrap();

        let report = repair_missing_flags(&store, "articles", "flag").await.unwrap();
        assert_eq!(
            report,
            RepairReport {
                scanned: 3,
                initialized: 1
            }
        );

        let get = |id: &'static str| {
            let store = &store;
            async move { store.get("articles", id).await.unwrap().unwrap() }
        };
        assert_eq!(get("legacy").await.get("flag"), Some(&json!(false)));
        assert_eq!(get("done").await.get("flag"), Some(&json!(true)));
        assert_eq!(get("pending").await.get("flag"), Some(&json!(false)));

        let again = repair_missing_flags(&store, "articles", "flag").await.unwrap();
        assert_eq!(again.initialized, 0);
        assert_eq!(get("done").await.get("flag"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn empty_collection_is_a_no_op() {
        let store = MemoryStore::new();
        let report = repair_missing_flags(&store, "articles", "flag").await.unwrap();
        assert_eq!(report, RepairReport::default());
    }
}
