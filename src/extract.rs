//! Offline PDF text extraction.
//!
//! [`LocalPdfConverter`] runs `pdf-extract` on a blocking thread and returns
//! the plain text as a single segment. It needs no network or credentials,
//! which makes it the converter of choice for local runs and tests
//! (`CONVERTER=local`). Layout is not reconstructed; the output is plain
//! text, not markdown.

use async_trait::async_trait;

use crate::error::ServiceError;
use crate::traits::Converter;

/// Extract the text of an in-memory PDF.
pub fn extract_pdf_text(bytes: &[u8]) -> Result<String, ServiceError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ServiceError::Extraction(e.to_string()))
}

/// [`Converter`] backed by `pdf-extract`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalPdfConverter;

impl LocalPdfConverter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Converter for LocalPdfConverter {
    fn name(&self) -> &str {
        "local"
    }

    async fn convert(&self, bytes: Vec<u8>, _file_name: &str) -> Result<Vec<String>, ServiceError> {
        let text = tokio::task::spawn_blocking(move || extract_pdf_text(&bytes))
            .await
            .map_err(|e| ServiceError::Extraction(format!("extraction task failed: {}", e)))??;
        Ok(vec![text.trim().to_string()])
    }
}
