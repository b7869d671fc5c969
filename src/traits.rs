//! Capability traits for the external collaborators of the pipeline.
//!
//! The runner and the two stages only ever talk to these traits. Concrete
//! implementations are built once at startup from [`crate::config::Config`]
//! and passed in explicitly, so tests can substitute in-memory fakes.
//!
//! ```text
//!   ItemSource ──▶ Conversion ──▶ DocumentStore ◀── Enrichment ◀── CompletionClient
//!                     │
//!                 Converter            ClaimStore (optional, both stages)
//! ```
//!
//! | Trait | Built-in implementations |
//! |-------|--------------------------|
//! | [`ItemSource`] | [`S3Source`](crate::source_s3::S3Source), [`LocalDirSource`](crate::source_fs::LocalDirSource) |
//! | [`DocumentStore`] | [`SqliteStore`](crate::sqlite_store::SqliteStore), [`MemoryStore`](crate::memory_store::MemoryStore) |
//! | [`ClaimStore`] | [`SqliteStore`](crate::sqlite_store::SqliteStore), [`MemoryStore`](crate::memory_store::MemoryStore) |
//! | [`Converter`] | [`LlamaParseConverter`](crate::llamaparse::LlamaParseConverter), [`LocalPdfConverter`](crate::extract::LocalPdfConverter) |
//! | [`CompletionClient`] | [`OpenAiClient`](crate::completion::OpenAiClient) |

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::error::ServiceError;
use crate::models::Fields;

// ═══════════════════════════════════════════════════════════════════════
// Item source
// ═══════════════════════════════════════════════════════════════════════

/// Object storage holding the raw documents.
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Tag written to each record's `source` field (e.g. `"s3://bucket"`).
    fn source_tag(&self) -> String;

    /// List every object name, in the storage's enumeration order.
    ///
    /// An error here is fatal for the run.
    async fn list(&self) -> Result<Vec<String>>;

    /// Download one object's bytes.
    async fn fetch(&self, name: &str) -> Result<Vec<u8>>;
}

// ═══════════════════════════════════════════════════════════════════════
// Document store
// ═══════════════════════════════════════════════════════════════════════

/// A document database: named collections of JSON objects keyed by id.
///
/// Single-document writes must be atomic. No cross-document transactions
/// are required by the pipeline.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a document, `None` if it does not exist.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Fields>>;

    /// Whether a document exists.
    async fn exists(&self, collection: &str, id: &str) -> Result<bool> {
        Ok(self.get(collection, id).await?.is_some())
    }

    /// Create or fully overwrite a document.
    async fn set(&self, collection: &str, id: &str, fields: &Fields) -> Result<()>;

    /// Replace the given top-level fields of an existing document, leaving
    /// the others untouched. Fails if the document does not exist.
    async fn update(&self, collection: &str, id: &str, fields: &Fields) -> Result<()>;

    /// Set `field` to `value` only if the document exists and the field is
    /// absent. Returns whether the write happened. Must be atomic.
    async fn set_field_if_absent(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: &Value,
    ) -> Result<bool>;

    /// Ids of documents whose `field` equals `value` (same JSON type and
    /// value), ordered by id. Documents lacking the field never match.
    async fn find_eq(&self, collection: &str, field: &str, value: &Value) -> Result<Vec<String>>;

    /// Ids of all documents in the collection, ordered by id.
    async fn list_ids(&self, collection: &str) -> Result<Vec<String>>;
}

// ═══════════════════════════════════════════════════════════════════════
// Claims
// ═══════════════════════════════════════════════════════════════════════

/// Lease-based in-progress markers, so concurrent runs do not process the
/// same item twice.
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Claim `item` for `stage` on behalf of `owner` for `lease`.
    ///
    /// Succeeds when the item is unclaimed, its claim has expired, or
    /// `owner` already holds it. Must be atomic.
    async fn try_claim(&self, stage: &str, item: &str, owner: &str, lease: Duration)
        -> Result<bool>;

    /// Drop the claim if `owner` holds it.
    async fn release(&self, stage: &str, item: &str, owner: &str) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════
// Document conversion
// ═══════════════════════════════════════════════════════════════════════

/// Turns raw document bytes into markdown-like text.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Short identifier used in logs (e.g. `"llamaparse"`).
    fn name(&self) -> &str;

    /// Convert a document. Returns one or more text segments in document
    /// order; the pipeline uses the first.
    async fn convert(&self, bytes: Vec<u8>, file_name: &str) -> Result<Vec<String>, ServiceError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Language-model completion
// ═══════════════════════════════════════════════════════════════════════

/// A single-turn chat completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// A chat-style completion service.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Model identifier (e.g. `"gpt-4o"`).
    fn model(&self) -> &str;

    /// Run one completion and return the trimmed text of the first choice.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError>;
}
