//! Enrichment stage: document records → summary and metadata.
//!
//! Two completion calls per record. The summary is required: if that call
//! fails or comes back blank, nothing is written. The metadata call must
//! succeed, but its response is parsed best-effort; a response with no
//! usable lines still completes the record, with every well-known key
//! stored as `null`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::checkpoint::{Checkpoints, FieldCheckpoints};
use crate::completion::create_completion_client;
use crate::config::{CollectionsConfig, CompletionConfig, Config};
use crate::metadata::{parse_metadata, ParsedMetadata};
use crate::models::{DocumentRecord, Fields};
use crate::prompts;
use crate::runner::{RunReport, Runner, Stage};
use crate::sqlite_store::SqliteStore;
use crate::traits::{CompletionClient, CompletionRequest, DocumentStore};

/// What the enrichment transform reads from a record.
#[derive(Debug, Clone)]
pub struct EnrichmentInput {
    pub text: String,
    pub file_name: String,
}

/// What the enrichment transform produces.
#[derive(Debug, Clone)]
pub struct EnrichmentOutput {
    pub summary: String,
    pub metadata: ParsedMetadata,
}

pub struct Enrichment {
    client: Arc<dyn CompletionClient>,
    store: Arc<dyn DocumentStore>,
    checkpoints: FieldCheckpoints,
    records: String,
    max_tokens: u32,
    temperature: f32,
}

impl Enrichment {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        store: Arc<dyn DocumentStore>,
        collections: &CollectionsConfig,
        completion: &CompletionConfig,
    ) -> Self {
        Self {
            checkpoints: FieldCheckpoints::new(
                store.clone(),
                collections.records.clone(),
                collections.processed_field.clone(),
            ),
            client,
            store,
            records: collections.records.clone(),
            max_tokens: completion.max_tokens,
            temperature: completion.temperature,
        }
    }

    fn request(&self, system: &str, user: String) -> CompletionRequest {
        CompletionRequest {
            system: system.to_string(),
            user,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }

    /// Summarise `text` and extract its metadata.
    pub async fn enrich(&self, text: &str, file_name: &str) -> Result<EnrichmentOutput> {
        let summary = self
            .client
            .complete(&self.request(
                prompts::SUMMARY_SYSTEM_PROMPT,
                prompts::summary_user_prompt(text),
            ))
            .await
            .context("summary completion failed")?;
        let summary = summary.trim().to_string();
        if summary.is_empty() {
            bail!("summary completion returned no text");
        }

        let raw = self
            .client
            .complete(&self.request(
                prompts::METADATA_SYSTEM_PROMPT,
                prompts::metadata_user_prompt(file_name, text),
            ))
            .await
            .context("metadata completion failed")?;

        let metadata = parse_metadata(&raw);
        if metadata.is_empty() {
            warn!(
                file = %file_name,
                rejected = ?metadata.rejected,
                "no metadata could be parsed; storing empty metadata"
            );
        } else if !metadata.rejected.is_empty() {
            debug!(
                file = %file_name,
                rejected = ?metadata.rejected,
                "ignored unparsable metadata lines"
            );
        }

        Ok(EnrichmentOutput { summary, metadata })
    }
}

#[async_trait]
impl Stage for Enrichment {
    type Input = EnrichmentInput;
    type Output = EnrichmentOutput;

    fn name(&self) -> &'static str {
        "enrich"
    }

    fn checkpoints(&self) -> &dyn Checkpoints {
        &self.checkpoints
    }

    /// Records whose flag is exactly `false`. Records missing the flag are
    /// not selected until `recall repair` initialises it.
    async fn candidates(&self) -> Result<Vec<String>> {
        self.store
            .find_eq(&self.records, self.checkpoints.field(), &Value::Bool(false))
            .await
    }

    async fn fetch(&self, item: &str) -> Result<EnrichmentInput> {
        let fields = self
            .store
            .get(&self.records, item)
            .await?
            .with_context(|| format!("record '{}' not found", item))?;
        let record = DocumentRecord::from_fields(&fields, self.checkpoints.field());
        if record.content.trim().is_empty() {
            bail!("record '{}' has no content", item);
        }
        Ok(EnrichmentInput {
            text: record.content,
            file_name: record.file_name.unwrap_or_else(|| item.to_string()),
        })
    }

    async fn transform(&self, item: &str, input: EnrichmentInput) -> Result<EnrichmentOutput> {
        let output = self.enrich(&input.text, &input.file_name).await?;
        info!(
            item = %item,
            summary_chars = output.summary.len(),
            metadata_fields = output.metadata.fields.len(),
            "enriched record"
        );
        Ok(output)
    }

    async fn persist(&self, item: &str, output: EnrichmentOutput) -> Result<()> {
        let mut update = Fields::new();
        update.insert("summary".into(), Value::String(output.summary));
        update.insert("metadata".into(), output.metadata.to_value());
        update.insert("enriched_at".into(), json!(chrono::Utc::now().timestamp()));
        self.store.update(&self.records, item, &update).await
    }
}

/// Run the enrichment stage against the configured completion service and
/// SQLite store.
pub async fn run_enrichment(config: &Config) -> Result<RunReport> {
    let client = create_completion_client(&config.completion, &config.run)?;
    let store = Arc::new(SqliteStore::open(config).await?);

    let stage = Enrichment::new(
        client,
        store.clone(),
        &config.collections,
        &config.completion,
    );
    let report = Runner::from_config(&config.run, store.clone())
        .run(&stage)
        .await;

    store.close().await;
    report
}
