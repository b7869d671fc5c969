//! Per-item completion checkpoints.
//!
//! A checkpoint is a boolean that moves from unset/`false` to `true` once a
//! stage has durably written an item's output. Nothing in the pipeline
//! writes `false` over `true`.
//!
//! Two layouts exist, matching how each stage's output is stored:
//!
//! | Type | Layout | Used by |
//! |------|--------|---------|
//! | [`MarkerCheckpoints`] | one marker document per item in its own collection | conversion |
//! | [`FieldCheckpoints`] | a boolean field on the item's own record | enrichment |

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::models::Fields;
use crate::traits::DocumentStore;

#[async_trait]
pub trait Checkpoints: Send + Sync {
    /// Whether the item is complete. Absent checkpoints read as `false`.
    async fn is_complete(&self, item: &str) -> Result<bool>;

    /// Record the item as complete.
    async fn mark_complete(&self, item: &str) -> Result<()>;
}

/// Completion markers stored as `{ "processed": true, "completed_at": ts }`
/// documents keyed by item name.
pub struct MarkerCheckpoints {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl MarkerCheckpoints {
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }
}

#[async_trait]
impl Checkpoints for MarkerCheckpoints {
    async fn is_complete(&self, item: &str) -> Result<bool> {
        let marker = self.store.get(&self.collection, item).await?;
        Ok(marker
            .as_ref()
            .and_then(|m| m.get("processed"))
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    async fn mark_complete(&self, item: &str) -> Result<()> {
        let mut marker = Fields::new();
        marker.insert("processed".into(), Value::Bool(true));
        marker.insert("completed_at".into(), json!(chrono::Utc::now().timestamp()));
        self.store.set(&self.collection, item, &marker).await
    }
}

/// Completion flag stored as a boolean field on the item's record.
pub struct FieldCheckpoints {
    store: Arc<dyn DocumentStore>,
    collection: String,
    field: String,
}

impl FieldCheckpoints {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        collection: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            field: field.into(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }
}

#[async_trait]
impl Checkpoints for FieldCheckpoints {
    async fn is_complete(&self, item: &str) -> Result<bool> {
        let record = self.store.get(&self.collection, item).await?;
        Ok(record
            .as_ref()
            .and_then(|r| r.get(&self.field))
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    async fn mark_complete(&self, item: &str) -> Result<()> {
        let mut update = Fields::new();
        update.insert(self.field.clone(), Value::Bool(true));
        self.store.update(&self.collection, item, &update).await
    }
}
