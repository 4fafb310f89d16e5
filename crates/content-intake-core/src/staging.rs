//! Staging repository adapter.
//!
//! The only writer of staged rows. Reads recompute the duplicate and
//! published flags from the current state of the stores, so the cached
//! `is_published` column is never trusted on its own.
//!
//! # Operations
//!
//! | Method | Batch | Envelope key |
//! |--------|-------|--------------|
//! | [`list_staged`](StagingRepository::list_staged) | no | n/a |
//! | [`save_accepted`](StagingRepository::save_accepted) | yes | `saved` |
//! | [`delete_staged`](StagingRepository::delete_staged) | yes | `deleted` |

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::batch::{run_batch, BatchOperation, BatchReport, ItemOperation, ItemOutcome, SkipReason};
use crate::identity::{published_scopes, Identifiable, IdentityIndex, IdentityResolver, NaturalKey};
use crate::models::{CandidateItem, Collection, ContentKind, StagedRecord};
use crate::store::{IdentityKey, Store};

/// Filter for [`StagingRepository::list_staged`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StagedFilter {
    #[serde(default)]
    pub kind: Option<ContentKind>,
    /// Keep only rows whose live published state matches.
    #[serde(default)]
    pub published: Option<bool>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// A staged row with flags computed at read time.
#[derive(Debug, Clone, Serialize)]
pub struct StagedView {
    #[serde(flatten)]
    pub record: StagedRecord,
    /// An earlier staged row of the same kind shares this row's natural key.
    pub is_duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<String>,
}

pub struct StagingRepository<'a, S: Store> {
    store: &'a S,
}

impl<'a, S: Store> StagingRepository<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Staged rows, newest first, with live `is_duplicate` / `is_published`.
    pub async fn list_staged(&self, filter: &StagedFilter) -> Result<Vec<StagedView>> {
        let rows = self.store.list_staged(filter.kind).await?;
        let resolver = IdentityResolver::new(self.store);

        let mut published: HashMap<ContentKind, IdentityIndex> = HashMap::new();
        for kind in [ContentKind::News, ContentKind::Case] {
            if rows.iter().any(|r| r.kind == kind) {
                published.insert(kind, resolver.preload(&published_scopes(kind)).await?);
            }
        }

        // earliest upload per natural key; rows arrive newest first
        let mut first_seen: HashMap<NaturalKey, String> = HashMap::new();
        let mut duplicate_of: HashMap<String, String> = HashMap::new();
        for row in rows.iter().rev() {
            if let Some(nk) = row.natural_key() {
                match first_seen.get(&nk) {
                    Some(first) => {
                        duplicate_of.insert(row.id.clone(), first.clone());
                    }
                    None => {
                        first_seen.insert(nk, row.id.clone());
                    }
                }
            }
        }

        let mut views = Vec::new();
        for mut record in rows {
            let index = published.get(&record.kind);
            let live_published = record.is_published
                || index.is_some_and(|idx| {
                    idx.find_staged_ref(&record.id).is_some()
                        || record
                            .natural_key()
                            .is_some_and(|nk| idx.find_natural(&nk).is_some())
                });
            if filter.published.is_some_and(|want| want != live_published) {
                continue;
            }
            record.is_published = live_published;
            let duplicate_of = duplicate_of.remove(&record.id);
            views.push(StagedView {
                is_duplicate: duplicate_of.is_some(),
                duplicate_of,
                record,
            });
            if filter.limit.is_some_and(|limit| views.len() >= limit) {
                break;
            }
        }
        Ok(views)
    }

    /// Persist operator-accepted candidates, skipping duplicates.
    ///
    /// Duplicate flags sent by the caller are ignored: every candidate is
    /// resolved again against the staging store. Committing the same set
    /// twice saves nothing the second time.
    pub async fn save_accepted(
        &self,
        candidates: Vec<CandidateItem>,
        actor: &str,
    ) -> Result<BatchReport> {
        let resolver = IdentityResolver::new(self.store);
        let mut indexes = HashMap::new();
        for kind in [ContentKind::News, ContentKind::Case] {
            if candidates.iter().any(|c| c.kind == kind) {
                indexes.insert(kind, resolver.preload(&[Collection::Staging(kind)]).await?);
            }
        }
        let mut op = SaveOp {
            store: self.store,
            resolver,
            indexes,
            actor,
        };
        Ok(run_batch(candidates, &mut op).await)
    }

    /// Delete staged rows by id. Unknown ids are skipped.
    pub async fn delete_staged(&self, ids: Vec<String>) -> BatchReport {
        let mut op = DeleteStagedOp { store: self.store };
        run_batch(ids, &mut op).await
    }
}

struct SaveOp<'a, S: Store> {
    store: &'a S,
    resolver: IdentityResolver<'a, S>,
    indexes: HashMap<ContentKind, IdentityIndex>,
    actor: &'a str,
}

#[async_trait]
impl<'a, S: Store> ItemOperation<CandidateItem> for SaveOp<'a, S> {
    fn operation(&self) -> BatchOperation {
        BatchOperation::Save
    }

    fn label(&self, item: &CandidateItem) -> String {
        item.label()
    }

    async fn apply(&mut self, candidate: CandidateItem) -> Result<ItemOutcome> {
        candidate.validate()?;
        let index = self.indexes.entry(candidate.kind).or_default();

        let resolution = index.resolve(&candidate);
        if resolution.is_duplicate {
            tracing::debug!(
                title = %candidate.title,
                matched = ?resolution.matched_id(),
                "skipping duplicate"
            );
            return Ok(ItemOutcome::Skipped(SkipReason::Duplicate));
        }
        let scope = Collection::Staging(candidate.kind);
        if let Some(existing) = self.resolver.recheck(scope, &candidate).await {
            tracing::debug!(
                title = %candidate.title,
                matched = %existing.id,
                "duplicate found at write time"
            );
            index.record(existing);
            return Ok(ItemOutcome::Skipped(SkipReason::Duplicate));
        }

        let record = StagedRecord::from_candidate(candidate, resolution.external_id, self.actor);
        self.store.insert_staged(&record).await?;
        index.record(IdentityKey::from_staged(&record));
        Ok(ItemOutcome::Succeeded)
    }
}

struct DeleteStagedOp<'a, S: Store> {
    store: &'a S,
}

#[async_trait]
impl<'a, S: Store> ItemOperation<String> for DeleteStagedOp<'a, S> {
    fn operation(&self) -> BatchOperation {
        BatchOperation::Delete
    }

    fn label(&self, id: &String) -> String {
        id.clone()
    }

    async fn apply(&mut self, id: String) -> Result<ItemOutcome> {
        Ok(if self.store.delete_staged(&id).await? {
            ItemOutcome::Succeeded
        } else {
            ItemOutcome::Skipped(SkipReason::NotFound)
        })
    }
}
