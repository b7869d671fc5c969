//! Environment-driven configuration.
//!
//! Every setting has a default except credentials and the location of the
//! source documents. Required values are checked by the component that needs
//! them (`recall enrich` never asks for S3 credentials), so a partially
//! configured environment is still usable for the stages it covers.
//!
//! [`Config::from_env`] reads the process environment (after loading an
//! optional `.env` file in `main`); [`Config::from_lookup`] takes any lookup
//! function and is what the tests use.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub collections: CollectionsConfig,
    pub source: SourceConfig,
    pub conversion: ConversionConfig,
    pub completion: CompletionConfig,
    pub run: RunConfig,
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Names of the document collections and the enrichment flag field.
#[derive(Debug, Clone)]
pub struct CollectionsConfig {
    /// Collection holding one record per converted document.
    pub records: String,
    /// Collection holding one completion marker per converted source file.
    pub markers: String,
    /// Boolean field on each record set once enrichment has completed.
    pub processed_field: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    S3,
    Local,
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub s3: S3SourceConfig,
    pub local_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct S3SourceConfig {
    pub bucket: Option<String>,
    pub prefix: String,
    pub region: String,
    /// S3-compatible endpoint (MinIO, GCS interoperability, LocalStack).
    /// Requests use path-style addressing when this is set.
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConverterKind {
    LlamaParse,
    Local,
}

#[derive(Debug, Clone)]
pub struct ConversionConfig {
    pub converter: ConverterKind,
    pub llamaparse_url: String,
    pub llamaparse_api_key: Option<String>,
    /// Key handed to the parsing service for its vision-assisted mode.
    pub vision_api_key: Option<String>,
    pub poll_interval_ms: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub http_timeout_secs: u64,
    pub max_items: Option<usize>,
    /// Claim lease in seconds; 0 disables claiming.
    pub claim_lease_secs: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/recall.sqlite")
}
fn default_records_collection() -> String {
    "articles".to_string()
}
fn default_markers_collection() -> String {
    "processed_files".to_string()
}
fn default_processed_field() -> String {
    "processed_language_model".to_string()
}
fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_llamaparse_url() -> String {
    "https://api.cloud.llamaindex.ai".to_string()
}
fn default_poll_interval_ms() -> u64 {
    2000
}
fn default_parse_timeout_secs() -> u64 {
    600
}
fn default_openai_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_model() -> String {
    "gpt-4o".to_string()
}
fn default_max_tokens() -> u32 {
    150
}
fn default_temperature() -> f32 {
    0.5
}
fn default_http_timeout_secs() -> u64 {
    120
}

/// Thin wrapper over a lookup function: trims values and treats empty
/// strings as unset.
struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn first(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|k| self.get(k))
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", key, raw, e)),
            None => Ok(None),
        }
    }
}

impl Config {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
            .context("Failed to load configuration from environment")
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let source_kind = match env.get("SOURCE_KIND").as_deref() {
            None | Some("s3") => SourceKind::S3,
            Some("local") | Some("filesystem") => SourceKind::Local,
            Some(other) => bail!(
                "Unknown SOURCE_KIND: '{}'. Must be s3 or local.",
                other
            ),
        };

        let converter = match env.get("CONVERTER").as_deref() {
            None | Some("llamaparse") => ConverterKind::LlamaParse,
            Some("local") => ConverterKind::Local,
            Some(other) => bail!(
                "Unknown CONVERTER: '{}'. Must be llamaparse or local.",
                other
            ),
        };

        let config = Config {
            db: DbConfig {
                path: env
                    .get("RECALL_DB_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(default_db_path),
            },
            collections: CollectionsConfig {
                records: env
                    .first(&["RECORDS_COLLECTION", "FIRESTORE_COLLECTION"])
                    .unwrap_or_else(default_records_collection),
                markers: env
                    .get("PROCESSED_FILES_COLLECTION")
                    .unwrap_or_else(default_markers_collection),
                processed_field: env
                    .get("LANGUAGE_MODEL_PROCESSED_FIELD")
                    .unwrap_or_else(default_processed_field),
            },
            source: SourceConfig {
                kind: source_kind,
                s3: S3SourceConfig {
                    bucket: env.first(&["S3_BUCKET", "GCS_BUCKET_NAME"]),
                    prefix: env.get("S3_PREFIX").unwrap_or_default(),
                    region: env.get("S3_REGION").unwrap_or_else(default_region),
                    endpoint_url: env.get("S3_ENDPOINT_URL"),
                    access_key_id: env.get("AWS_ACCESS_KEY_ID"),
                    secret_access_key: env.get("AWS_SECRET_ACCESS_KEY"),
                    session_token: env.get("AWS_SESSION_TOKEN"),
                },
                local_dir: env.get("SOURCE_DIR").map(PathBuf::from),
            },
            conversion: ConversionConfig {
                converter,
                llamaparse_url: env
                    .get("LLAMAPARSE_API_URL")
                    .unwrap_or_else(default_llamaparse_url),
                llamaparse_api_key: env.get("LLAMAPARSE_API_KEY"),
                vision_api_key: env.get("OPENAI_API_KEY"),
                poll_interval_ms: env
                    .parse("LLAMAPARSE_POLL_INTERVAL_MS")?
                    .unwrap_or_else(default_poll_interval_ms),
                timeout_secs: env
                    .parse("LLAMAPARSE_TIMEOUT_SECS")?
                    .unwrap_or_else(default_parse_timeout_secs),
            },
            completion: CompletionConfig {
                api_key: env.get("OPENAI_API_KEY"),
                base_url: env.get("OPENAI_BASE_URL").unwrap_or_else(default_openai_url),
                model: env.get("OPENAI_MODEL").unwrap_or_else(default_model),
                max_tokens: env
                    .parse("COMPLETION_MAX_TOKENS")?
                    .unwrap_or_else(default_max_tokens),
                temperature: env
                    .parse("COMPLETION_TEMPERATURE")?
                    .unwrap_or_else(default_temperature),
            },
            run: RunConfig {
                http_timeout_secs: env
                    .parse("HTTP_TIMEOUT_SECS")?
                    .unwrap_or_else(default_http_timeout_secs),
                max_items: env.parse("RUN_MAX_ITEMS")?,
                claim_lease_secs: env.parse("CLAIM_LEASE_SECS")?.unwrap_or(0),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let c = &self.collections;
        if c.records == c.markers {
            bail!(
                "RECORDS_COLLECTION and PROCESSED_FILES_COLLECTION must differ (both are '{}')",
                c.records
            );
        }
        if c.processed_field.contains('"') || c.processed_field.contains('.') {
            bail!(
                "LANGUAGE_MODEL_PROCESSED_FIELD must not contain '\"' or '.': '{}'",
                c.processed_field
            );
        }

        if self.completion.max_tokens == 0 {
            bail!("COMPLETION_MAX_TOKENS must be > 0");
        }
        if !(0.0..=2.0).contains(&self.completion.temperature) {
            bail!("COMPLETION_TEMPERATURE must be in [0.0, 2.0]");
        }

        if self.conversion.poll_interval_ms == 0 {
            bail!("LLAMAPARSE_POLL_INTERVAL_MS must be > 0");
        }
        if self.conversion.timeout_secs == 0 {
            bail!("LLAMAPARSE_TIMEOUT_SECS must be > 0");
        }
        if self.run.http_timeout_secs == 0 {
            bail!("HTTP_TIMEOUT_SECS must be > 0");
        }
        if self.run.max_items == Some(0) {
            bail!("RUN_MAX_ITEMS must be >= 1 when set");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(move |k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_to_empty_environment() {
        let cfg = config_from(&[]).unwrap();
        assert_eq!(cfg.collections.records, "articles");
        assert_eq!(cfg.collections.markers, "processed_files");
        assert_eq!(cfg.collections.processed_field, "processed_language_model");
        assert_eq!(cfg.source.kind, SourceKind::S3);
        assert_eq!(cfg.conversion.converter, ConverterKind::LlamaParse);
        assert_eq!(cfg.completion.model, "gpt-4o");
        assert_eq!(cfg.completion.max_tokens, 150);
        assert!((cfg.completion.temperature - 0.5).abs() < f32::EPSILON);
        assert_eq!(cfg.run.claim_lease_secs, 0);
        assert_eq!(cfg.run.max_items, None);
    }

    #[test]
    fn legacy_names_are_accepted() {
        let cfg = config_from(&[
            ("FIRESTORE_COLLECTION", "papers"),
            ("GCS_BUCKET_NAME", "library"),
        ])
        .unwrap();
        assert_eq!(cfg.collections.records, "papers");
        assert_eq!(cfg.source.s3.bucket.as_deref(), Some("library"));
    }

    #[test]
    fn blank_values_count_as_unset() {
        let cfg = config_from(&[("OPENAI_MODEL", "   "), ("OPENAI_API_KEY", "")]).unwrap();
        assert_eq!(cfg.completion.model, "gpt-4o");
        assert!(cfg.completion.api_key.is_none());
    }

    #[test]
    fn local_source_and_converter() {
        let cfg = config_from(&[
            ("SOURCE_KIND", "local"),
            ("SOURCE_DIR", "/srv/pdfs"),
            ("CONVERTER", "local"),
        ])
        .unwrap();
        assert_eq!(cfg.source.kind, SourceKind::Local);
        assert_eq!(cfg.source.local_dir, Some(PathBuf::from("/srv/pdfs")));
        assert_eq!(cfg.conversion.converter, ConverterKind::Local);
    }

    #[test]
    fn rejects_unknown_source_kind() {
        let err = config_from(&[("SOURCE_KIND", "ftp")]).unwrap_err();
        assert!(err.to_string().contains("SOURCE_KIND"));
    }

    #[test]
    fn rejects_unparsable_number() {
        let err = config_from(&[("COMPLETION_MAX_TOKENS", "lots")]).unwrap_err();
        assert!(err.to_string().contains("COMPLETION_MAX_TOKENS"));
    }

    #[test]
    fn rejects_out_of_range_temperature() {
        assert!(config_from(&[("COMPLETION_TEMPERATURE", "3.5")]).is_err());
    }

    #[test]
    fn rejects_shared_collection() {
        let err = config_from(&[
            ("RECORDS_COLLECTION", "docs"),
            ("PROCESSED_FILES_COLLECTION", "docs"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn rejects_zero_item_limit() {
        assert!(config_from(&[("RUN_MAX_ITEMS", "0")]).is_err());
        let cfg = config_from(&[("RUN_MAX_ITEMS", "25")]).unwrap();
        assert_eq!(cfg.run.max_items, Some(25));
    }
}
