//! Document conversion through the LlamaParse REST API.
//!
//! Three calls per document:
//!
//! 1. `POST /api/parsing/upload` (multipart) → job id
//! 2. `GET /api/parsing/job/{id}` until the job leaves `PENDING`
//! 3. `GET /api/parsing/job/{id}/result/markdown` → markdown
//!
//! Polling is part of the protocol, not a retry: a job that ends in `ERROR`
//! or `CANCELED`, or does not finish within the timeout, fails the item.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::{ConversionConfig, RunConfig};
use crate::error::ServiceError;
use crate::traits::Converter;

const SERVICE: &str = "llamaparse";

/// [`Converter`] backed by LlamaParse.
pub struct LlamaParseConverter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    /// Key for the vision-assisted parsing mode; the mode is off without it.
    vision_api_key: Option<String>,
    poll_interval: Duration,
    timeout: Duration,
}

impl LlamaParseConverter {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        http_timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(ServiceError::transport(SERVICE))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            vision_api_key: None,
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(600),
        })
    }

    pub fn with_vision_key(mut self, key: Option<String>) -> Self {
        self.vision_api_key = key;
        self
    }

    pub fn with_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = interval;
        self.timeout = timeout;
        self
    }

    /// Build from configuration.
    ///
    /// # Errors
    ///
    /// [`ServiceError::NotConfigured`] when `LLAMAPARSE_API_KEY` is not set.
    pub fn from_config(conv: &ConversionConfig, run: &RunConfig) -> Result<Self, ServiceError> {
        let api_key = conv
            .llamaparse_api_key
            .clone()
            .ok_or_else(|| ServiceError::NotConfigured {
                service: SERVICE,
                hint: "set LLAMAPARSE_API_KEY, or CONVERTER=local".into(),
            })?;
        Ok(
            Self::new(&conv.llamaparse_url, api_key, Duration::from_secs(run.http_timeout_secs))?
                .with_vision_key(conv.vision_api_key.clone())
                .with_polling(
                    Duration::from_millis(conv.poll_interval_ms),
                    Duration::from_secs(conv.timeout_secs),
                ),
        )
    }

    async fn get_json(&self, url: &str) -> Result<Value, ServiceError> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(ServiceError::transport(SERVICE))?;
        read_json(resp).await
    }

    async fn upload(&self, bytes: Vec<u8>, file_name: &str) -> Result<String, ServiceError> {
        let part = Part::bytes(bytes)
            .file_name(upload_name(file_name))
            .mime_str("application/pdf")
            .map_err(ServiceError::transport(SERVICE))?;

        let mut form = Form::new()
            .part("file", part)
            .text("result_type", "markdown")
            .text("do_not_cache", "true")
            .text("split_by_page", "false")
            .text("page_separator", "");
        if let Some(key) = &self.vision_api_key {
            form = form
                .text("gpt4o_mode", "true")
                .text("gpt4o_api_key", key.clone());
        }

        let resp = self
            .client
            .post(format!("{}/api/parsing/upload", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json")
            .multipart(form)
            .send()
            .await
            .map_err(ServiceError::transport(SERVICE))?;

        let json = read_json(resp).await?;
        json.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ServiceError::InvalidResponse {
                service: SERVICE,
                detail: "upload response has no job id".into(),
            })
    }

    async fn wait_for_job(&self, job_id: &str) -> Result<(), ServiceError> {
        let url = format!("{}/api/parsing/job/{}", self.base_url, job_id);
        let deadline = Instant::now() + self.timeout;

        loop {
            let json = self.get_json(&url).await?;
            let status = json
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or("PENDING")
                .to_ascii_uppercase();

            match status.as_str() {
                "SUCCESS" => return Ok(()),
                "ERROR" | "CANCELED" | "CANCELLED" => {
                    return Err(ServiceError::JobFailed {
                        service: SERVICE,
                        job_id: job_id.to_string(),
                        status,
                    })
                }
                _ => debug!(job_id, status = %status, "parse job not finished"),
            }

            if Instant::now() + self.poll_interval > deadline {
                return Err(ServiceError::Timeout {
                    service: SERVICE,
                    job_id: job_id.to_string(),
                    secs: self.timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl Converter for LlamaParseConverter {
    fn name(&self) -> &str {
        SERVICE
    }

    async fn convert(&self, bytes: Vec<u8>, file_name: &str) -> Result<Vec<String>, ServiceError> {
        let size = bytes.len();
        let job_id = self.upload(bytes, file_name).await?;
        info!(file = %file_name, job_id = %job_id, bytes = size, "uploaded document for parsing");

        self.wait_for_job(&job_id).await?;

        let json = self
            .get_json(&format!(
                "{}/api/parsing/job/{}/result/markdown",
                self.base_url, job_id
            ))
            .await?;
        let segments = markdown_segments(&json)?;
        debug!(job_id = %job_id, segments = segments.len(), "parse result received");
        Ok(segments)
    }
}

async fn read_json(resp: reqwest::Response) -> Result<Value, ServiceError> {
    if !resp.status().is_success() {
        return Err(ServiceError::from_response(SERVICE, resp).await);
    }
    resp.json().await.map_err(|e| ServiceError::InvalidResponse {
        service: SERVICE,
        detail: format!("body is not JSON: {}", e),
    })
}

/// Base name sent as the upload's file name hint.
fn upload_name(item: &str) -> String {
    item.rsplit('/').next().unwrap_or(item).to_string()
}

/// Text segments of a markdown result, in document order.
///
/// Accepts `{"markdown": "..."}` (one segment) or
/// `{"pages": [{"md": "..."}, ...]}` (one segment per page).
fn markdown_segments(json: &Value) -> Result<Vec<String>, ServiceError> {
    if let Some(md) = json.get("markdown").and_then(Value::as_str) {
        return Ok(vec![md.to_string()]);
    }
    if let Some(pages) = json.get("pages").and_then(Value::as_array) {
        return Ok(pages
            .iter()
            .filter_map(|p| p.get("md").and_then(Value::as_str))
            .map(str::to_string)
            .collect());
    }
    Err(ServiceError::InvalidResponse {
        service: SERVICE,
        detail: "result has neither 'markdown' nor 'pages'".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn single_markdown_result() {
        let segs = markdown_segments(&json!({ "markdown": "# Report\nBody." })).unwrap();
        assert_eq!(segs, vec!["# Report\nBody.".to_string()]);
    }

    #[test]
    fn paged_result_keeps_order() {
        let segs = markdown_segments(&json!({
            "pages": [ { "page": 1, "md": "one" }, { "page": 2, "md": "two" } ]
        }))
        .unwrap();
        assert_eq!(segs, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn unknown_result_shape_is_invalid() {
        assert!(matches!(
            markdown_segments(&json!({ "text": "x" })),
            Err(ServiceError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn upload_name_is_base_name() {
        assert_eq!(upload_name("2024/q1/report.pdf"), "report.pdf");
        assert_eq!(upload_name("report.pdf"), "report.pdf");
    }

    #[test]
    fn from_config_requires_key() {
        let conv = ConversionConfig {
            converter: crate::config::ConverterKind::LlamaParse,
            llamaparse_url: "https://api.cloud.llamaindex.ai".into(),
            llamaparse_api_key: None,
            vision_api_key: None,
            poll_interval_ms: 2000,
            timeout_secs: 600,
        };
        let run = RunConfig {
            http_timeout_secs: 120,
            max_items: None,
            claim_lease_secs: 0,
        };
        assert!(matches!(
            LlamaParseConverter::from_config(&conv, &run),
            Err(ServiceError::NotConfigured { .. })
        ));
    }
}
