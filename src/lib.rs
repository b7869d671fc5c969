//! # Recall
//!
//! A two-stage batch pipeline that turns PDF documents in object storage
//! into summarised, metadata-tagged records in a document store.
//!
//! ```text
//! ┌──────────────┐   ┌────────────┐   ┌──────────────┐   ┌────────────┐
//! │ Object store │──▶│  convert   │──▶│   records    │──▶│   enrich   │
//! │  S3 / local  │   │ LlamaParse │   │   (SQLite)   │◀──│   OpenAI   │
//! └──────────────┘   └────────────┘   └──────────────┘   └────────────┘
//! ```
//!
//! Both stages run through the same [`runner::Runner`]: enumerate
//! candidates, drop the ones whose checkpoint is set, then fetch →
//! transform → persist → checkpoint each remaining item in turn. A failing
//! item is logged and left unfinished; running the stage again is the retry.
//!
//! ## Quick Start
//!
//! ```bash
//! recall init      # create the database
//! recall convert   # PDFs → markdown records
//! recall enrich    # records → summary + metadata
//! recall status    # what is done, what is pending
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Environment configuration |
//! | [`traits`] | Capability traits for external collaborators |
//! | [`runner`] | Generic checkpointed stage runner |
//! | [`checkpoint`] | Marker and field checkpoints |
//! | [`conversion`] | PDF → markdown stage |
//! | [`enrichment`] | Summary and metadata stage |
//! | [`metadata`] | `Key: Value` metadata parsing |
//! | [`repair`] | Backfill of missing enrichment flags |
//! | [`sqlite_store`] | SQLite document and claim store |
//! | [`source_s3`] | S3 item source |
//! | [`llamaparse`] | LlamaParse converter |
//! | [`completion`] | OpenAI chat completion client |

pub mod checkpoint;
pub mod completion;
pub mod config;
pub mod conversion;
pub mod db;
pub mod enrichment;
pub mod error;
pub mod extract;
pub mod llamaparse;
pub mod memory_store;
pub mod metadata;
pub mod migrate;
pub mod models;
pub mod prompts;
pub mod repair;
pub mod runner;
pub mod source_fs;
pub mod source_s3;
pub mod sources;
pub mod sqlite_store;
pub mod stats;
pub mod traits;
