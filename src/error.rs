//! Error types for the recall pipeline.
//!
//! Two failure scopes exist:
//!
//! * **Run-fatal**: the candidate set for a stage cannot be obtained at all
//!   (listing the bucket fails, the record query fails). These surface as
//!   `anyhow::Error` from [`crate::runner::Runner::run`].
//!
//! * **Per-item**: one item could not be fetched, transformed, persisted or
//!   checkpointed. These never leave the runner; they are recorded as
//!   [`ItemFailure`]s in the [`crate::runner::RunReport`] and the item stays
//!   unfinished for the next run.
//!
//! External services report through [`ServiceError`] so callers can tell a
//! transport failure from an unusable (e.g. empty) response.

use serde::Serialize;
use thiserror::Error;

/// The point in an item's processing at which it was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// Reading or writing the item's completion checkpoint.
    Checkpoint,
    /// Another live run holds the item's claim, or the claim store failed.
    Claim,
    /// Reading the item's raw input.
    Fetch,
    /// Calling the external service(s) that produce the stage output.
    Transform,
    /// Writing the stage output to the record store.
    Persist,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Step::Checkpoint => "checkpoint",
            Step::Claim => "claim",
            Step::Fetch => "fetch",
            Step::Transform => "transform",
            Step::Persist => "persist",
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A skipped item, as reported at the end of a run.
#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    pub item: String,
    pub step: Step,
    pub reason: String,
}

impl ItemFailure {
    pub fn new(item: &str, step: Step, err: &anyhow::Error) -> Self {
        Self {
            item: item.to_string(),
            step,
            reason: format!("{:#}", err),
        }
    }
}

/// Failure of an external document-parsing or completion service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The request never produced an HTTP response (DNS, TLS, timeout...).
    #[error("{service} request failed: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The service answered with a non-success status.
    #[error("{service} returned HTTP {status}: {body}")]
    Http {
        service: &'static str,
        status: u16,
        body: String,
    },

    /// The response body did not have the expected shape.
    #[error("{service} returned an unusable response: {detail}")]
    InvalidResponse {
        service: &'static str,
        detail: String,
    },

    /// An asynchronous job finished in a failed state.
    #[error("{service} job {job_id} ended with status {status}")]
    JobFailed {
        service: &'static str,
        job_id: String,
        status: String,
    },

    /// An asynchronous job did not finish within the configured limit.
    #[error("{service} job {job_id} did not finish within {secs}s")]
    Timeout {
        service: &'static str,
        job_id: String,
        secs: u64,
    },

    /// The service succeeded but produced no usable text.
    #[error("{service} returned an empty {what}")]
    EmptyResult {
        service: &'static str,
        what: &'static str,
    },

    /// Local text extraction failed.
    #[error("text extraction failed: {0}")]
    Extraction(String),

    /// The service cannot be used because a required setting is missing.
    #[error("{service} is not configured: {hint}")]
    NotConfigured {
        service: &'static str,
        hint: String,
    },
}

impl ServiceError {
    /// Read a non-success response into [`ServiceError::Http`], keeping at
    /// most 500 characters of the body.
    pub async fn from_response(service: &'static str, resp: reqwest::Response) -> Self {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        ServiceError::Http {
            service,
            status,
            body: body.chars().take(500).collect(),
        }
    }

    pub fn transport(service: &'static str) -> impl FnOnce(reqwest::Error) -> Self {
        move |source| ServiceError::Transport { service, source }
    }
}
