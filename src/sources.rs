//! Construction of the configured [`ItemSource`].

use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, SourceKind};
use crate::source_fs::LocalDirSource;
use crate::source_s3::S3Source;
use crate::traits::ItemSource;

/// Build the item source selected by `SOURCE_KIND`.
///
/// # Errors
///
/// When the settings the selected source needs are missing (`S3_BUCKET` and
/// AWS credentials for `s3`, `SOURCE_DIR` for `local`).
pub fn create_source(config: &Config) -> Result<Arc<dyn ItemSource>> {
    match config.source.kind {
        SourceKind::S3 => Ok(Arc::new(S3Source::from_config(
            &config.source.s3,
            Duration::from_secs(config.run.http_timeout_secs),
        )?)),
        SourceKind::Local => {
            let dir = config
                .source
                .local_dir
                .clone()
                .ok_or_else(|| anyhow!("SOURCE_DIR must be set for SOURCE_KIND=local"))?;
            Ok(Arc::new(LocalDirSource::new(dir)))
        }
    }
}
