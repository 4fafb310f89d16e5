//! Publication coordinator.
//!
//! Drives the publication state machine across the staging store and the
//! published stores:
//!
//! ```text
//!  Staged ──publish──▶ Published ──pin──▶ Pinned
//!    ▲                    │  ▲               │
//!    │                    │  └────unpin──────┘
//!    └──flag cleared──── delete
//! ```
//!
//! Each item transition is atomic on its own (the store writes a published
//! row and flags its staged source in one unit of work); batches are not.
//! All multi-item calls go through [`run_batch`] and return a
//! [`BatchReport`]; only a failed preload aborts a call.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::batch::{run_batch, BatchOperation, BatchReport, ItemOperation, ItemOutcome, SkipReason};
use crate::identity::{IdentityIndex, IdentityResolver};
use crate::models::{
    CandidateItem, Collection, FieldPatch, PublishTarget, PublishedRecord, StagedRecord,
};
use crate::store::{IdentityKey, Store};

/// Default cap on pinned rows shown at the top of a published listing.
pub const DEFAULT_MAX_PINNED: usize = 3;

/// A published store read for display: pinned rows first.
#[derive(Debug, Clone, Serialize)]
pub struct PublishedListing {
    pub target: PublishTarget,
    pub pinned: Vec<PublishedRecord>,
    pub items: Vec<PublishedRecord>,
}

pub struct PublicationCoordinator<'a, S: Store> {
    store: &'a S,
}

impl<'a, S: Store> PublicationCoordinator<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Publish staged rows into `target`.
    ///
    /// Each row is resolved again against the target store; rows already
    /// present (by staged reference, natural key, or external id) are
    /// skipped. Unknown ids are skipped as not found.
    pub async fn publish_staged(
        &self,
        ids: Vec<String>,
        target: PublishTarget,
        actor: &str,
    ) -> Result<BatchReport> {
        let resolver = IdentityResolver::new(self.store);
        let index = resolver.preload(&[Collection::Published(target)]).await?;
        let staged: HashMap<String, StagedRecord> = self
            .store
            .get_staged(&ids)
            .await?
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();
        let mut op = PublishStagedOp {
            store: self.store,
            resolver,
            index,
            staged,
            target,
            actor,
        };
        Ok(run_batch(ids, &mut op).await)
    }

    /// Publish candidates straight into `target` without staging them.
    pub async fn publish_candidates(
        &self,
        candidates: Vec<CandidateItem>,
        target: PublishTarget,
        actor: &str,
    ) -> Result<BatchReport> {
        let resolver = IdentityResolver::new(self.store);
        let index = resolver.preload(&[Collection::Published(target)]).await?;
        let mut op = PublishCandidateOp {
            store: self.store,
            resolver,
            index,
            target,
            actor,
        };
        Ok(run_batch(candidates, &mut op).await)
    }

    /// Pin or unpin published rows. No cap is enforced here.
    pub async fn set_pinned(
        &self,
        target: PublishTarget,
        ids: Vec<String>,
        pinned: bool,
    ) -> BatchReport {
        let mut op = PinOp {
            store: self.store,
            target,
            pinned,
        };
        run_batch(ids, &mut op).await
    }

    /// Delete published rows. Their staged sources survive and become
    /// publishable again.
    pub async fn delete_published(&self, target: PublishTarget, ids: Vec<String>) -> BatchReport {
        let mut op = DeletePublishedOp {
            store: self.store,
            target,
        };
        run_batch(ids, &mut op).await
    }

    /// Overwrite patch fields on the given rows, or on every row of the
    /// target when `ids` is `None`.
    pub async fn bulk_update(
        &self,
        target: PublishTarget,
        ids: Option<Vec<String>>,
        patch: FieldPatch,
    ) -> Result<BatchReport> {
        if patch.is_empty() {
            anyhow::bail!("at least one of author_name or image_url must be provided");
        }
        let ids = match ids {
            Some(ids) => ids,
            None => self
                .store
                .list_published(target)
                .await?
                .into_iter()
                .map(|r| r.id)
                .collect(),
        };
        let mut op = UpdateOp {
            store: self.store,
            target,
            patch,
        };
        Ok(run_batch(ids, &mut op).await)
    }

    /// Read a published store for display.
    ///
    /// The newest `max_pinned` pinned rows lead; over-cap pinned rows are
    /// listed with the rest, newest first.
    pub async fn list_published(
        &self,
        target: PublishTarget,
        max_pinned: usize,
    ) -> Result<PublishedListing> {
        let rows = self.store.list_published(target).await?;
        let mut pinned = Vec::new();
        let mut items = Vec::new();
        for row in rows {
            if row.is_pinned && pinned.len() < max_pinned {
                pinned.push(row);
            } else {
                items.push(row);
            }
        }
        Ok(PublishedListing {
            target,
            pinned,
            items,
        })
    }
}

struct PublishStagedOp<'a, S: Store> {
    store: &'a S,
    resolver: IdentityResolver<'a, S>,
    index: IdentityIndex,
    staged: HashMap<String, StagedRecord>,
    target: PublishTarget,
    actor: &'a str,
}

#[async_trait]
impl<'a, S: Store> ItemOperation<String> for PublishStagedOp<'a, S> {
    fn operation(&self) -> BatchOperation {
        BatchOperation::Publish
    }

    fn label(&self, id: &String) -> String {
        self.staged
            .get(id)
            .map(|r| r.title.clone())
            .unwrap_or_else(|| id.clone())
    }

    async fn apply(&mut self, id: String) -> Result<ItemOutcome> {
        let staged = match self.staged.get(&id) {
            Some(staged) => staged,
            None => return Ok(ItemOutcome::Skipped(SkipReason::NotFound)),
        };
        if staged.kind != self.target.kind() {
            anyhow::bail!("cannot publish {} item into {}", staged.kind, self.target);
        }

        let resolution = self.index.resolve(staged);
        if resolution.is_duplicate {
            return Ok(ItemOutcome::Skipped(SkipReason::Duplicate));
        }
        let scope = Collection::Published(self.target);
        if let Some(existing) = self.resolver.recheck(scope, staged).await {
            self.index.record(existing);
            return Ok(ItemOutcome::Skipped(SkipReason::Duplicate));
        }

        let record = PublishedRecord::from_staged(staged, resolution.external_id, self.actor);
        self.store.insert_published(self.target, &record).await?;
        tracing::debug!(staged = %id, published = %record.id, target = %self.target, "published");
        self.index
            .record(IdentityKey::from_published(self.target, &record));
        Ok(ItemOutcome::Succeeded)
    }
}

struct PublishCandidateOp<'a, S: Store> {
    store: &'a S,
    resolver: IdentityResolver<'a, S>,
    index: IdentityIndex,
    target: PublishTarget,
    actor: &'a str,
}

#[async_trait]
impl<'a, S: Store> ItemOperation<CandidateItem> for PublishCandidateOp<'a, S> {
    fn operation(&self) -> BatchOperation {
        BatchOperation::Publish
    }

    fn label(&self, item: &CandidateItem) -> String {
        item.label()
    }

    async fn apply(&mut self, candidate: CandidateItem) -> Result<ItemOutcome> {
        candidate.validate()?;
        if candidate.kind != self.target.kind() {
            anyhow::bail!("cannot publish {} item into {}", candidate.kind, self.target);
        }
        let resolution = self.index.resolve(&candidate);
        if resolution.is_duplicate {
            return Ok(ItemOutcome::Skipped(SkipReason::Duplicate));
        }
        let scope = Collection::Published(self.target);
        if let Some(existing) = self.resolver.recheck(scope, &candidate).await {
            self.index.record(existing);
            return Ok(ItemOutcome::Skipped(SkipReason::Duplicate));
        }

        let record = PublishedRecord::from_candidate(candidate, resolution.external_id, self.actor);
        self.store.insert_published(self.target, &record).await?;
        self.index
            .record(IdentityKey::from_published(self.target, &record));
        Ok(ItemOutcome::Succeeded)
    }
}

struct PinOp<'a, S: Store> {
    store: &'a S,
    target: PublishTarget,
    pinned: bool,
}

#[async_trait]
impl<'a, S: Store> ItemOperation<String> for PinOp<'a, S> {
    fn operation(&self) -> BatchOperation {
        if self.pinned {
            BatchOperation::Pin
        } else {
            BatchOperation::Unpin
        }
    }

    fn label(&self, id: &String) -> String {
        id.clone()
    }

    async fn apply(&mut self, id: String) -> Result<ItemOutcome> {
        Ok(if self.store.set_pinned(self.target, &id, self.pinned).await? {
            ItemOutcome::Succeeded
        } else {
            ItemOutcome::Skipped(SkipReason::NotFound)
        })
    }
}

struct DeletePublishedOp<'a, S: Store> {
    store: &'a S,
    target: PublishTarget,
}

#[async_trait]
impl<'a, S: Store> ItemOperation<String> for DeletePublishedOp<'a, S> {
    fn operation(&self) -> BatchOperation {
        BatchOperation::Delete
    }

    fn label(&self, id: &String) -> String {
        id.clone()
    }

    async fn apply(&mut self, id: String) -> Result<ItemOutcome> {
        Ok(if self.store.delete_published(self.target, &id).await? {
            ItemOutcome::Succeeded
        } else {
            ItemOutcome::Skipped(SkipReason::NotFound)
        })
    }
}

struct UpdateOp<'a, S: Store> {
    store: &'a S,
    target: PublishTarget,
    patch: FieldPatch,
}

#[async_trait]
impl<'a, S: Store> ItemOperation<String> for UpdateOp<'a, S> {
    fn operation(&self) -> BatchOperation {
        BatchOperation::Update
    }

    fn label(&self, id: &String) -> String {
        id.clone()
    }

    async fn apply(&mut self, id: String) -> Result<ItemOutcome> {
        Ok(
            if self
                .store
                .update_published(self.target, &id, &self.patch)
                .await?
            {
                ItemOutcome::Succeeded
            } else {
                ItemOutcome::Skipped(SkipReason::NotFound)
            },
        )
    }
}
