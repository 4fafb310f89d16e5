//! Storage abstraction for the intake pipeline.
//!
//! The [`Store`] trait covers the staging store and the three published
//! stores ([`PublishTarget`]). Pipeline components only ever talk to a
//! `Store`, so the same logic runs against SQLite in the application and
//! against [`memory::InMemoryStore`] in tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::identity::NaturalKey;
use crate::models::{
    Collection, ContentKind, FieldPatch, PublishTarget, PublishedRecord, StagedRecord,
};

/// The identity-relevant projection of a persisted row.
///
/// Preloaded in bulk by the identity resolver, so implementations should
/// fetch only these columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentityKey {
    pub id: String,
    pub scope: Collection,
    pub external_id: String,
    pub title: String,
    pub author_name: Option<String>,
    pub source_url: Option<String>,
    /// Staged row a published record came from.
    pub staged_id: Option<String>,
    /// Always true for published rows; the cached flag for staged rows.
    pub is_published: bool,
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_staged`](Store::insert_staged) | Write one staged row |
/// | [`list_staged`](Store::list_staged) | Staged rows, newest first |
/// | [`get_staged`](Store::get_staged) | Staged rows by id |
/// | [`delete_staged`](Store::delete_staged) | Remove one staged row |
/// | [`insert_published`](Store::insert_published) | Publish one row, flagging its staged source |
/// | [`list_published`](Store::list_published) | Published rows, newest first |
/// | [`delete_published`](Store::delete_published) | Remove one published row, clearing its staged flag |
/// | [`set_pinned`](Store::set_pinned) | Toggle the pinned flag |
/// | [`update_published`](Store::update_published) | Overwrite patchable fields |
/// | [`identity_keys`](Store::identity_keys) | Bulk identity projection for resolution |
/// | [`find_by_natural_key`](Store::find_by_natural_key) | Single live lookup before a write |
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a staged row.
    async fn insert_staged(&self, record: &StagedRecord) -> Result<()>;

    /// Staged rows, optionally of one kind, ordered by `uploaded_at` descending.
    async fn list_staged(&self, kind: Option<ContentKind>) -> Result<Vec<StagedRecord>>;

    /// Staged rows whose id is in `ids`. Missing ids are silently absent.
    async fn get_staged(&self, ids: &[String]) -> Result<Vec<StagedRecord>>;

    /// Delete a staged row. Returns `false` when no row had that id.
    async fn delete_staged(&self, id: &str) -> Result<bool>;

    /// Insert a published row.
    ///
    /// When `record.staged_id` is set, the referenced staged row's
    /// `is_published` flag is set in the same unit of work.
    async fn insert_published(&self, target: PublishTarget, record: &PublishedRecord) -> Result<()>;

    /// Published rows of a target, ordered by `published_at` descending.
    async fn list_published(&self, target: PublishTarget) -> Result<Vec<PublishedRecord>>;

    /// Delete a published row. Returns `false` when no row had that id.
    ///
    /// The staged row it came from, if any, keeps existing but has its
    /// `is_published` flag cleared.
    async fn delete_published(&self, target: PublishTarget, id: &str) -> Result<bool>;

    /// Set or clear the pinned flag. Returns `false` when no row had that id.
    async fn set_pinned(&self, target: PublishTarget, id: &str, pinned: bool) -> Result<bool>;

    /// Overwrite the fields present in `patch` and bump `updated_at`.
    /// Returns `false` when no row had that id.
    async fn update_published(
        &self,
        target: PublishTarget,
        id: &str,
        patch: &FieldPatch,
    ) -> Result<bool>;

    /// Identity projection of every row in a collection.
    async fn identity_keys(&self, scope: Collection) -> Result<Vec<IdentityKey>>;

    /// First row in a collection with the given natural key.
    async fn find_by_natural_key(
        &self,
        scope: Collection,
        key: &NaturalKey,
    ) -> Result<Option<IdentityKey>>;
}

#[cfg(test)]
pub(crate) mod testing;
