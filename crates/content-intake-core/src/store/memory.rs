//! In-memory [`Store`] implementation for tests and embedding.
//!
//! Uses `Vec`s behind `std::sync::RwLock`. Each published-store write
//! holds both locks it touches, so a publish and its staged-flag update
//! are observed together.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::identity::{Identifiable, NaturalKey};
use crate::models::{
    Collection, ContentKind, FieldPatch, PublishTarget, PublishedRecord, StagedRecord,
};

use super::{IdentityKey, Store};

/// In-memory store.
pub struct InMemoryStore {
    staged: RwLock<Vec<StagedRecord>>,
    published: RwLock<HashMap<PublishTarget, Vec<PublishedRecord>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            staged: RwLock::new(Vec::new()),
            published: RwLock::new(HashMap::new()),
        }
    }

    fn staged_read(&self) -> Result<RwLockReadGuard<'_, Vec<StagedRecord>>> {
        self.staged.read().map_err(|_| anyhow!("staging lock poisoned"))
    }

    fn staged_write(&self) -> Result<RwLockWriteGuard<'_, Vec<StagedRecord>>> {
        self.staged.write().map_err(|_| anyhow!("staging lock poisoned"))
    }

    fn published_read(
        &self,
    ) -> Result<RwLockReadGuard<'_, HashMap<PublishTarget, Vec<PublishedRecord>>>> {
        self.published
            .read()
            .map_err(|_| anyhow!("published lock poisoned"))
    }

    fn published_write(
        &self,
    ) -> Result<RwLockWriteGuard<'_, HashMap<PublishTarget, Vec<PublishedRecord>>>> {
        self.published
            .write()
            .map_err(|_| anyhow!("published lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_staged(&self, record: &StagedRecord) -> Result<()> {
        let mut staged = self.staged_write()?;
        if staged.iter().any(|r| r.id == record.id) {
            anyhow::bail!("staged row {} already exists", record.id);
        }
        staged.push(record.clone());
        Ok(())
    }

    async fn list_staged(&self, kind: Option<ContentKind>) -> Result<Vec<StagedRecord>> {
        let staged = self.staged_read()?;
        let mut rows: Vec<StagedRecord> = staged
            .iter()
            .filter(|r| kind.map_or(true, |k| r.kind == k))
            .cloned()
            .collect();
        // newest first; later inserts win ties
        rows.reverse();
        rows.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(rows)
    }

    async fn get_staged(&self, ids: &[String]) -> Result<Vec<StagedRecord>> {
        let staged = self.staged_read()?;
        Ok(staged
            .iter()
            .filter(|r| ids.contains(&r.id))
            .cloned()
            .collect())
    }

    async fn delete_staged(&self, id: &str) -> Result<bool> {
        let mut staged = self.staged_write()?;
        let before = staged.len();
        staged.retain(|r| r.id != id);
        Ok(staged.len() != before)
    }

    async fn insert_published(
        &self,
        target: PublishTarget,
        record: &PublishedRecord,
    ) -> Result<()> {
        let mut published = self.published_write()?;
        let mut staged = self.staged_write()?;
        let rows = published.entry(target).or_default();
        if rows.iter().any(|r| r.id == record.id) {
            anyhow::bail!("{} row {} already exists", target, record.id);
        }
        rows.push(record.clone());
        if let Some(staged_id) = &record.staged_id {
            if let Some(row) = staged.iter_mut().find(|r| &r.id == staged_id) {
                row.is_published = true;
            }
        }
        Ok(())
    }

    async fn list_published(&self, target: PublishTarget) -> Result<Vec<PublishedRecord>> {
        let published = self.published_read()?;
        let mut rows = published.get(&target).cloned().unwrap_or_default();
        rows.reverse();
        rows.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        Ok(rows)
    }

    async fn delete_published(&self, target: PublishTarget, id: &str) -> Result<bool> {
        let mut published = self.published_write()?;
        let mut staged = self.staged_write()?;
        let rows = match published.get_mut(&target) {
            Some(rows) => rows,
            None => return Ok(false),
        };
        let pos = match rows.iter().position(|r| r.id == id) {
            Some(pos) => pos,
            None => return Ok(false),
        };
        let removed = rows.remove(pos);
        if let Some(staged_id) = removed.staged_id {
            if let Some(row) = staged.iter_mut().find(|r| r.id == staged_id) {
                row.is_published = false;
            }
        }
        Ok(true)
    }

    async fn set_pinned(&self, target: PublishTarget, id: &str, pinned: bool) -> Result<bool> {
        let mut published = self.published_write()?;
        let row = published
            .get_mut(&target)
            .and_then(|rows| rows.iter_mut().find(|r| r.id == id));
        Ok(match row {
            Some(row) => {
                row.is_pinned = pinned;
                row.updated_at = chrono::Utc::now().timestamp();
                true
            }
            None => false,
        })
    }

    async fn update_published(
        &self,
        target: PublishTarget,
        id: &str,
        patch: &FieldPatch,
    ) -> Result<bool> {
        let mut published = self.published_write()?;
        let row = published
            .get_mut(&target)
            .and_then(|rows| rows.iter_mut().find(|r| r.id == id));
        Ok(match row {
            Some(row) => {
                if let Some(author) = &patch.author_name {
                    row.author_name = Some(author.clone());
                }
                if let Some(image) = &patch.image_url {
                    row.image_url = Some(image.clone());
                }
                row.updated_at = chrono::Utc::now().timestamp();
                true
            }
            None => false,
        })
    }

    async fn identity_keys(&self, scope: Collection) -> Result<Vec<IdentityKey>> {
        match scope {
            Collection::Staging(kind) => {
                let staged = self.staged_read()?;
                Ok(staged
                    .iter()
                    .filter(|r| r.kind == kind)
                    .map(IdentityKey::from_staged)
                    .collect())
            }
            Collection::Published(target) => {
                let published = self.published_read()?;
                Ok(published
                    .get(&target)
                    .map(|rows| {
                        rows.iter()
                            .map(|r| IdentityKey::from_published(target, r))
                            .collect()
                    })
                    .unwrap_or_default())
            }
        }
    }

    async fn find_by_natural_key(
        &self,
        scope: Collection,
        key: &NaturalKey,
    ) -> Result<Option<IdentityKey>> {
        let keys = self.identity_keys(scope).await?;
        Ok(keys
            .into_iter()
            .find(|k| k.natural_key().as_ref() == Some(key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CandidateItem;

    fn staged(id: &str, url: &str, uploaded_at: i64) -> StagedRecord {
        let mut c = CandidateItem::new(ContentKind::News, id);
        c.source_url = Some(url.to_string());
        StagedRecord {
            id: id.to_string(),
            uploaded_at,
            ..StagedRecord::from_candidate(c, id.to_string(), "admin")
        }
    }

    #[tokio::test]
    async fn publish_flags_staged_and_delete_clears_it() {
        let store = InMemoryStore::new();
        let row = staged("s1", "https://n.example/1", 10);
        store.insert_staged(&row).await.unwrap();

        let published = PublishedRecord::from_staged(&row, "1".into(), "admin");
        store
            .insert_published(PublishTarget::Selected, &published)
            .await
            .unwrap();
        assert!(store.get_staged(&["s1".into()]).await.unwrap()[0].is_published);

        assert!(store
            .delete_published(PublishTarget::Selected, &published.id)
            .await
            .unwrap());
        assert!(!store.get_staged(&["s1".into()]).await.unwrap()[0].is_published);
        assert!(!store
            .delete_published(PublishTarget::Selected, &published.id)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn list_staged_is_newest_first() {
        let store = InMemoryStore::new();
        store.insert_staged(&staged("old", "https://n/1", 1)).await.unwrap();
        store.insert_staged(&staged("new", "https://n/2", 5)).await.unwrap();
        let ids: Vec<String> = store
            .list_staged(Some(ContentKind::News))
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert!(store.list_staged(Some(ContentKind::Case)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn natural_key_lookup_scopes_by_collection() {
        let store = InMemoryStore::new();
        store.insert_staged(&staged("s1", "https://n/1", 1)).await.unwrap();
        let key = NaturalKey::SourceUrl {
            url: "https://n/1".into(),
        };
        let found = store
            .find_by_natural_key(Collection::Staging(ContentKind::News), &key)
            .await
            .unwrap();
        assert_eq!(found.map(|k| k.id), Some("s1".to_string()));
        assert!(store
            .find_by_natural_key(Collection::Published(PublishTarget::Feed), &key)
            .await
            .unwrap()
            .is_none());
    }
}
