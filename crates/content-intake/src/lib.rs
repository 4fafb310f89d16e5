//! # Content Intake
//!
//! Collects news and case-study candidates from a live search-page crawl
//! and from operator-uploaded spreadsheets, resolves each candidate's
//! identity against staging and the published stores, and moves accepted
//! items through staging into publication.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌────────────┐   ┌──────────┐
//! │ crawl/xlsx  │──▶│  normalize + │──▶│  staging   │──▶│ published│
//! │ acquisition │   │  identity    │   │  (review)  │   │  stores  │
//! └─────────────┘   └──────────────┘   └────────────┘   └──────────┘
//!                                             ▲
//!                      ┌──────────────────────┤
//!                      │                      │
//!                 ┌──────────┐          ┌──────────┐
//!                 │   CLI    │          │   HTTP   │
//!                 │ (intake) │          │  (axum)  │
//!                 └──────────┘          └──────────┘
//! ```
//!
//! The pipeline logic itself lives in `content-intake-core`; this crate
//! supplies storage, acquisition and the two operator surfaces.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite `Store` implementation |
//! | [`workbook`] | `.xlsx` first-sheet reader |
//! | [`crawl`] | Search-page acquisition and DOM walk |
//! | [`ingest`] | Acquisition → normalization → annotation |
//! | [`auth`] | Bearer-token identity provider |
//! | [`server`] | HTTP API |
//! | [`commands`] | CLI command implementations |

pub mod auth;
pub mod commands;
pub mod config;
pub mod crawl;
pub mod db;
pub mod ingest;
pub mod migrate;
pub mod server;
pub mod sqlite_store;
pub mod workbook;
