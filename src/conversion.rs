//! Conversion stage: PDF objects in the item source → document records.
//!
//! ```text
//! ItemSource::list ──▶ *.pdf ──▶ fetch bytes ──▶ Converter ──▶ records/{name}
//!                                                              processed_files/{name}
//! ```
//!
//! The record is written with create-or-overwrite semantics and its
//! enrichment flag set to `false`; the conversion marker is written after.
//! A record whose flag is already `true` is never overwritten.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::checkpoint::{Checkpoints, MarkerCheckpoints};
use crate::config::{CollectionsConfig, Config, ConverterKind};
use crate::extract::LocalPdfConverter;
use crate::llamaparse::LlamaParseConverter;
use crate::models::{is_pdf, title_from_name, ConvertedRecord, DocumentRecord};
use crate::runner::{RunReport, Runner, Stage};
use crate::sources::create_source;
use crate::sqlite_store::SqliteStore;
use crate::traits::{Converter, DocumentStore, ItemSource};

pub struct Conversion {
    source: Arc<dyn ItemSource>,
    converter: Arc<dyn Converter>,
    store: Arc<dyn DocumentStore>,
    checkpoints: MarkerCheckpoints,
    records: String,
    processed_field: String,
}

impl Conversion {
    pub fn new(
        source: Arc<dyn ItemSource>,
        converter: Arc<dyn Converter>,
        store: Arc<dyn DocumentStore>,
        collections: &CollectionsConfig,
    ) -> Self {
        Self {
            checkpoints: MarkerCheckpoints::new(store.clone(), collections.markers.clone()),
            source,
            converter,
            store,
            records: collections.records.clone(),
            processed_field: collections.processed_field.clone(),
        }
    }
}

#[async_trait]
impl Stage for Conversion {
    type Input = Vec<u8>;
    type Output = ConvertedRecord;

    fn name(&self) -> &'static str {
        "convert"
    }

    fn checkpoints(&self) -> &dyn Checkpoints {
        &self.checkpoints
    }

    async fn candidates(&self) -> Result<Vec<String>> {
        let names = self.source.list().await?;
        let total = names.len();
        let pdfs: Vec<String> = names.into_iter().filter(|n| is_pdf(n)).collect();
        info!(
            source = %self.source.source_tag(),
            objects = total,
            pdfs = pdfs.len(),
            "listed source objects"
        );
        Ok(pdfs)
    }

    async fn fetch(&self, item: &str) -> Result<Vec<u8>> {
        let bytes = self.source.fetch(item).await?;
        if bytes.is_empty() {
            bail!("object '{}' is empty", item);
        }
        info!(item = %item, bytes = bytes.len(), "downloaded object");
        Ok(bytes)
    }

    async fn transform(&self, item: &str, input: Vec<u8>) -> Result<ConvertedRecord> {
        let segments = self.converter.convert(input, item).await?;
        let content = match segments.into_iter().next() {
            Some(text) if !text.trim().is_empty() => text,
            _ => bail!("{} produced no text for '{}'", self.converter.name(), item),
        };

        Ok(ConvertedRecord {
            title: title_from_name(item),
            content,
            source: self.source.source_tag(),
            file_name: item.to_string(),
            converted_at: chrono::Utc::now().timestamp(),
        })
    }

    /// Writes the record unless it has already been enriched. That happens
    /// when an earlier run persisted the record but failed to write its
    /// marker; the enriched record is kept and only the marker follows.
    async fn persist(&self, item: &str, output: ConvertedRecord) -> Result<()> {
        if let Some(existing) = self.store.get(&self.records, item).await? {
            if DocumentRecord::from_fields(&existing, &self.processed_field).is_enriched() {
                info!(item = %item, "record already enriched; keeping it");
                return Ok(());
            }
        }
        self.store
            .set(&self.records, item, &output.to_fields(&self.processed_field))
            .await
    }
}

/// Build the converter selected by `CONVERTER`.
pub fn create_converter(config: &Config) -> Result<Arc<dyn Converter>> {
    match config.conversion.converter {
        ConverterKind::LlamaParse => Ok(Arc::new(LlamaParseConverter::from_config(
            &config.conversion,
            &config.run,
        )?)),
        ConverterKind::Local => Ok(Arc::new(LocalPdfConverter::new())),
    }
}

/// Run the conversion stage against the configured source, converter and
/// SQLite store.
pub async fn run_conversion(config: &Config) -> Result<RunReport> {
    let source = create_source(config)?;
    let converter = create_converter(config)?;
    let store = Arc::new(SqliteStore::open(config).await?);

    let stage = Conversion::new(source, converter, store.clone(), &config.collections);
    let report = Runner::from_config(&config.run, store.clone())
        .run(&stage)
        .await;

    store.close().await;
    report
}
