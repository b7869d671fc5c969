//! In-memory [`DocumentStore`] and [`ClaimStore`] for tests and dry runs.
//!
//! Uses `BTreeMap`s behind `std::sync::RwLock`, so ids come back in the same
//! order the SQLite store returns them.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::models::Fields;
use crate::traits::{ClaimStore, DocumentStore};

type Collections = BTreeMap<String, BTreeMap<String, Fields>>;

struct Claim {
    owner: String,
    expires_at: Instant,
}

/// In-memory store for tests.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<Collections>,
    claims: RwLock<HashMap<(String, String), Claim>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Collections>> {
        self.collections
            .read()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Collections>> {
        self.collections
            .write()
            .map_err(|_| anyhow!("memory store lock poisoned"))
    }

    /// Number of documents in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.read()
            .map(|c| c.get(collection).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Fields>> {
        Ok(self
            .read()?
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn set(&self, collection: &str, id: &str, fields: &Fields) -> Result<()> {
        self.write()?
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields.clone());
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, fields: &Fields) -> Result<()> {
        let mut guard = self.write()?;
        let Some(doc) = guard.get_mut(collection).and_then(|docs| docs.get_mut(id)) else {
            bail!("Document {}/{} does not exist", collection, id);
        };
        for (k, v) in fields {
            doc.insert(k.clone(), v.clone());
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
        let mut guard = self.write()?;
        match guard.get_mut(collection).and_then(|docs| docs.get_mut(id)) {
            Some(doc) if !doc.contains_key(field) => {
                doc.insert(field.to_string(), value.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_eq(&self, collection: &str, field: &str, value: &Value) -> Result<Vec<String>> {
        Ok(self
            .read()?
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, doc)| doc.get(field) == Some(value))
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_ids(&self, collection: &str) -> Result<Vec<String>> {
        Ok(self
            .read()?
            .get(collection)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl ClaimStore for MemoryStore {
    async fn try_claim(
        &self,
        stage: &str,
        item: &str,
        owner: &str,
        lease: Duration,
    ) -> Result<bool> {
        let mut claims = self
            .claims
            .write()
            .map_err(|_| anyhow!("claim lock poisoned"))?;
        let now = Instant::now();
        let key = (stage.to_string(), item.to_string());

        if let Some(existing) = claims.get(&key) {
            if existing.owner != owner && existing.expires_at > now {
                return Ok(false);
            }
        }
        claims.insert(
            key,
            Claim {
                owner: owner.to_string(),
                expires_at: now + lease,
            },
        );
        Ok(true)
    }

    async fn release(&self, stage: &str, item: &str, owner: &str) -> Result<()> {
        let mut claims = self
            .claims
            .write()
            .map_err(|_| anyhow!("claim lock poisoned"))?;
        let key = (stage.to_string(), item.to_string());
        if claims.get(&key).is_some_and(|c| c.owner == owner) {
            claims.remove(&key);
        }
        Ok(())
    }
}
