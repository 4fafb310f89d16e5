//! # Content Intake Core
//!
//! Runtime-agnostic logic for the content intake pipeline: candidate
//! models, normalization, identity resolution, the store abstraction, the
//! staging adapter, the publication coordinator, and the batch runner.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem dependencies.
//! The `content-intake` crate supplies the SQLite store, the workbook and
//! crawl readers, and the CLI / HTTP surfaces.
//!
//! ```text
//! HeadlineHit / SheetRow
//!        │ normalize
//!        ▼
//!  CandidateItem ──identity──▶ AnnotatedCandidate (operator review)
//!        │ staging::save_accepted
//!        ▼
//!  StagedRecord ──publish::publish_staged──▶ PublishedRecord
//! ```

pub mod batch;
pub mod identity;
pub mod models;
pub mod normalize;
pub mod publish;
pub mod staging;
pub mod store;
