//! Failure-injecting store wrapper for unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::identity::NaturalKey;
use crate::models::{
    Collection, ContentKind, FieldPatch, PublishTarget, PublishedRecord, StagedRecord,
};

use super::memory::InMemoryStore;
use super::{IdentityKey, Store};

/// Delegates to an [`InMemoryStore`] unless told to fail.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryStore,
    pub fail_preload: AtomicBool,
    pub fail_lookup: AtomicBool,
    /// Inserts whose title equals this value fail.
    pub fail_insert_title: Mutex<Option<String>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_fails(&self, title: &str) -> bool {
        self.fail_insert_title
            .lock()
            .map(|t| t.as_deref() == Some(title))
            .unwrap_or(false)
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn insert_staged(&self, record: &StagedRecord) -> Result<()> {
        if self.insert_fails(&record.title) {
            anyhow::bail!("constraint violation");
        }
        self.inner.insert_staged(record).await
    }

    async fn list_staged(&self, kind: Option<ContentKind>) -> Result<Vec<StagedRecord>> {
        self.inner.list_staged(kind).await
    }

    async fn get_staged(&self, ids: &[String]) -> Result<Vec<StagedRecord>> {
        self.inner.get_staged(ids).await
    }

    async fn delete_staged(&self, id: &str) -> Result<bool> {
        self.inner.delete_staged(id).await
    }

    async fn insert_published(
        &self,
        target: PublishTarget,
        record: &PublishedRecord,
    ) -> Result<()> {
        if self.insert_fails(&record.title) {
            anyhow::bail!("constraint violation");
        }
        self.inner.insert_published(target, record).await
    }

    async fn list_published(&self, target: PublishTarget) -> Result<Vec<PublishedRecord>> {
        self.inner.list_published(target).await
    }

    async fn delete_published(&self, target: PublishTarget, id: &str) -> Result<bool> {
        self.inner.delete_published(target, id).await
    }

    async fn set_pinned(&self, target: PublishTarget, id: &str, pinned: bool) -> Result<bool> {
        self.inner.set_pinned(target, id, pinned).await
    }

    async fn update_published(
        &self,
        target: PublishTarget,
        id: &str,
        patch: &FieldPatch,
    ) -> Result<bool> {
        self.inner.update_published(target, id, patch).await
    }

    async fn identity_keys(&self, scope: Collection) -> Result<Vec<IdentityKey>> {
        if self.fail_preload.load(Ordering::SeqCst) {
            anyhow::bail!("connection reset");
        }
        self.inner.identity_keys(scope).await
    }

    async fn find_by_natural_key(
        &self,
        scope: Collection,
        key: &NaturalKey,
    ) -> Result<Option<IdentityKey>> {
        if self.fail_lookup.load(Ordering::SeqCst) {
            anyhow::bail!("connection reset");
        }
        self.inner.find_by_natural_key(scope, key).await
    }
}
