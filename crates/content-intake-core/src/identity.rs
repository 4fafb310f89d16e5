//! Identity derivation and duplicate resolution.
//!
//! Every item entering a persisted store gets a stable **external
//! identity**, and is checked against what the store already holds before
//! it is written. All duplicate decisions in the pipeline go through this
//! module.
//!
//! # External identity
//!
//! First applicable rule wins:
//!
//! 1. `source_url` present: its last `/`-separated segment, or the whole
//!    trimmed URL when that segment is empty.
//! 2. Author and title present: `author_title`, lowercased, whitespace runs
//!    collapsed to `_`, title truncated to 50 characters.
//! 3. Otherwise `{kind}_{unix_millis}_{token}`, which never collides.
//!
//! Rules 1 and 2 are pure functions of the item's fields.
//!
//! # Resolution
//!
//! ```text
//! staged_id reference ─┐
//! natural key ─────────┼─▶ duplicate
//! external id + same natural fields ─┘
//! external id, different natural fields ──▶ new, identity regenerated
//! nothing matches ──▶ new
//! ```
//!
//! The natural key is `(author_name, title)` for case studies and
//! `source_url` for news. Resolution runs against an [`IdentityIndex`]
//! preloaded once per batch; callers record each insert back into the
//! index so repeats inside one batch are caught too.

use std::collections::HashMap;

use anyhow::Result;
use serde::Serialize;

use crate::models::{
    non_empty, CandidateItem, Collection, ContentKind, PublishedRecord, StagedRecord,
};
use crate::store::{IdentityKey, Store};

/// Maximum title characters used in an author/title identity.
pub const TITLE_IDENTITY_CHARS: usize = 50;

/// Composite natural key for a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NaturalKey {
    AuthorTitle { author: String, title: String },
    SourceUrl { url: String },
}

impl NaturalKey {
    /// Build the natural key for the given kind, or `None` when the
    /// required fields are missing.
    pub fn for_fields(
        kind: ContentKind,
        author_name: Option<&str>,
        title: &str,
        source_url: Option<&str>,
    ) -> Option<Self> {
        match kind {
            ContentKind::Case => {
                let author = author_name.map(str::trim).filter(|s| !s.is_empty())?;
                let title = title.trim();
                if title.is_empty() {
                    return None;
                }
                Some(NaturalKey::AuthorTitle {
                    author: author.to_string(),
                    title: title.to_string(),
                })
            }
            ContentKind::News => {
                let url = source_url.map(str::trim).filter(|s| !s.is_empty())?;
                Some(NaturalKey::SourceUrl {
                    url: url.to_string(),
                })
            }
        }
    }
}

/// Fields identity resolution reads from an item.
pub trait Identifiable {
    fn kind(&self) -> ContentKind;
    fn title(&self) -> &str;
    fn author_name(&self) -> Option<&str>;
    fn source_url(&self) -> Option<&str>;

    /// Staged row id that published records may reference.
    fn staged_ref(&self) -> Option<&str> {
        None
    }

    fn natural_key(&self) -> Option<NaturalKey> {
        NaturalKey::for_fields(self.kind(), self.author_name(), self.title(), self.source_url())
    }
}

impl Identifiable for CandidateItem {
    fn kind(&self) -> ContentKind {
        self.kind
    }
    fn title(&self) -> &str {
        &self.title
    }
    fn author_name(&self) -> Option<&str> {
        non_empty(&self.author_name)
    }
    fn source_url(&self) -> Option<&str> {
        non_empty(&self.source_url)
    }
}

impl Identifiable for StagedRecord {
    fn kind(&self) -> ContentKind {
        self.kind
    }
    fn title(&self) -> &str {
        &self.title
    }
    fn author_name(&self) -> Option<&str> {
        non_empty(&self.author_name)
    }
    fn source_url(&self) -> Option<&str> {
        non_empty(&self.source_url)
    }
    fn staged_ref(&self) -> Option<&str> {
        Some(&self.id)
    }
}

impl Identifiable for IdentityKey {
    fn kind(&self) -> ContentKind {
        self.scope.kind()
    }
    fn title(&self) -> &str {
        &self.title
    }
    fn author_name(&self) -> Option<&str> {
        non_empty(&self.author_name)
    }
    fn source_url(&self) -> Option<&str> {
        non_empty(&self.source_url)
    }
}

/// Derive the external identity of an item.
pub fn derive_external_id<T: Identifiable + ?Sized>(item: &T) -> String {
    if let Some(url) = item.source_url() {
        let last = url.rsplit('/').next().unwrap_or_default();
        return if last.is_empty() {
            url.to_string()
        } else {
            last.to_string()
        };
    }

    let title = item.title().trim();
    if let Some(author) = item.author_name() {
        if !title.is_empty() {
            let title: String = title.chars().take(TITLE_IDENTITY_CHARS).collect();
            return format!("{}_{}", slug(author), slug(&title));
        }
    }

    format!("{}_{}", item.kind(), unique_suffix())
}

/// Lowercase and collapse whitespace runs to `_`.
fn slug(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_space = false;
    for c in s.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push('_');
            }
            in_space = true;
        } else {
            out.extend(c.to_lowercase());
            in_space = false;
        }
    }
    out
}

fn unique_suffix() -> String {
    let token = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}",
        chrono::Utc::now().timestamp_millis(),
        &token[..7]
    )
}

/// Which rule classified an item as a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    StagedReference,
    NaturalKey,
    ExternalId,
}

/// Outcome of resolving one item.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub external_id: String,
    pub is_duplicate: bool,
    /// The existing record the item matched, when duplicate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched: Option<IdentityKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<MatchRule>,
    /// The derived identity collided with a different record and was suffixed.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub regenerated: bool,
}

impl Resolution {
    fn new_item(external_id: String) -> Self {
        Self {
            external_id,
            is_duplicate: false,
            matched: None,
            rule: None,
            regenerated: false,
        }
    }

    fn duplicate(external_id: String, matched: &IdentityKey, rule: MatchRule) -> Self {
        Self {
            external_id,
            is_duplicate: true,
            matched: Some(matched.clone()),
            rule: Some(rule),
            regenerated: false,
        }
    }

    pub fn matched_id(&self) -> Option<&str> {
        self.matched.as_ref().map(|k| k.id.as_str())
    }
}

/// In-memory lookup tables over the identity keys of one or more stores.
#[derive(Debug, Default)]
pub struct IdentityIndex {
    by_natural: HashMap<NaturalKey, IdentityKey>,
    by_external: HashMap<String, IdentityKey>,
    by_staged: HashMap<String, IdentityKey>,
}

impl IdentityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_keys(keys: impl IntoIterator<Item = IdentityKey>) -> Self {
        let mut index = Self::new();
        for key in keys {
            index.record(key);
        }
        index
    }

    /// Add a key. Earlier keys win when two share a lookup value.
    pub fn record(&mut self, key: IdentityKey) {
        if let Some(natural) = key.natural_key() {
            self.by_natural.entry(natural).or_insert_with(|| key.clone());
        }
        if !key.external_id.is_empty() {
            self.by_external
                .entry(key.external_id.clone())
                .or_insert_with(|| key.clone());
        }
        if let Some(staged_id) = key.staged_id.clone() {
            self.by_staged.entry(staged_id).or_insert(key);
        }
    }

    /// Look up an item by its natural key only.
    pub fn find_natural(&self, key: &NaturalKey) -> Option<&IdentityKey> {
        self.by_natural.get(key)
    }

    /// Look up a published record that references a staged row.
    pub fn find_staged_ref(&self, staged_id: &str) -> Option<&IdentityKey> {
        self.by_staged.get(staged_id)
    }

    /// Classify an item as new or duplicate.
    pub fn resolve<T: Identifiable + ?Sized>(&self, item: &T) -> Resolution {
        let derived = derive_external_id(item);

        if let Some(key) = item.staged_ref().and_then(|id| self.by_staged.get(id)) {
            return Resolution::duplicate(derived, key, MatchRule::StagedReference);
        }

        if let Some(key) = item.natural_key().and_then(|nk| self.by_natural.get(&nk)) {
            return Resolution::duplicate(derived, key, MatchRule::NaturalKey);
        }

        if let Some(key) = self.by_external.get(&derived) {
            if same_natural_fields(item, key) {
                return Resolution::duplicate(derived, key, MatchRule::ExternalId);
            }
            let regenerated = format!("{}_{}", derived, unique_suffix());
            tracing::debug!(
                external_id = %derived,
                existing = %key.id,
                regenerated = %regenerated,
                "external id collision with different record"
            );
            return Resolution {
                regenerated: true,
                ..Resolution::new_item(regenerated)
            };
        }

        Resolution::new_item(derived)
    }
}

fn same_natural_fields<T: Identifiable + ?Sized>(item: &T, key: &IdentityKey) -> bool {
    match item.kind() {
        ContentKind::Case => {
            item.author_name() == key.author_name() && item.title().trim() == key.title().trim()
        }
        ContentKind::News => item.source_url() == key.source_url(),
    }
}

impl IdentityKey {
    pub fn from_staged(record: &StagedRecord) -> Self {
        Self {
            id: record.id.clone(),
            scope: Collection::Staging(record.kind),
            external_id: record.external_id.clone(),
            title: record.title.clone(),
            author_name: record.author_name.clone(),
            source_url: record.source_url.clone(),
            staged_id: None,
            is_published: record.is_published,
        }
    }

    pub fn from_published(target: crate::models::PublishTarget, record: &PublishedRecord) -> Self {
        Self {
            id: record.id.clone(),
            scope: Collection::Published(target),
            external_id: record.external_id.clone(),
            title: record.title.clone(),
            author_name: record.author_name.clone(),
            source_url: record.source_url.clone(),
            staged_id: record.staged_id.clone(),
            is_published: true,
        }
    }
}

/// Candidate annotated with its resolution, as returned to the operator
/// before anything is saved.
#[derive(Debug, Clone, Serialize)]
pub struct AnnotatedCandidate {
    #[serde(flatten)]
    pub candidate: CandidateItem,
    pub external_id: String,
    pub is_duplicate: bool,
    pub is_published: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_id: Option<String>,
}

/// Store-backed resolver: preloads indexes and performs write-time rechecks.
pub struct IdentityResolver<'a, S: Store> {
    store: &'a S,
}

impl<'a, S: Store> IdentityResolver<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Load every identity key of the given collections into one index.
    ///
    /// A failure here is a lookup error for the whole call.
    pub async fn preload(&self, scopes: &[Collection]) -> Result<IdentityIndex> {
        Ok(IdentityIndex::from_keys(self.load_keys(scopes).await?))
    }

    async fn load_keys(&self, scopes: &[Collection]) -> Result<Vec<IdentityKey>> {
        let mut all = Vec::new();
        for scope in scopes {
            let keys = self.store.identity_keys(*scope).await.map_err(|e| {
                e.context(format!("failed to preload identity keys from {}", scope))
            })?;
            tracing::debug!(scope = %scope, keys = keys.len(), "preloaded identity keys");
            all.extend(keys);
        }
        Ok(all)
    }

    /// Annotate candidates against staging and the published stores of
    /// their kind, without writing anything.
    ///
    /// `is_published` is true when the matched row carries the flag or when
    /// any published store of the kind holds the candidate (by natural key)
    /// or references the matched staged row.
    pub async fn annotate(
        &self,
        candidates: Vec<CandidateItem>,
    ) -> Result<Vec<AnnotatedCandidate>> {
        // per kind: staging + published keys, and published keys alone
        let mut indexes: HashMap<ContentKind, (IdentityIndex, IdentityIndex)> = HashMap::new();
        let mut out = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let kind = candidate.kind;
            if !indexes.contains_key(&kind) {
                let staged = self.load_keys(&[Collection::Staging(kind)]).await?;
                let published = self.load_keys(&published_scopes(kind)).await?;
                let all =
                    IdentityIndex::from_keys(staged.into_iter().chain(published.iter().cloned()));
                indexes.insert(kind, (all, IdentityIndex::from_keys(published)));
            }
            let (index, published) = match indexes.get(&kind) {
                Some(pair) => pair,
                None => continue,
            };
            let resolution = index.resolve(&candidate);
            let matched_published = resolution
                .matched
                .as_ref()
                .is_some_and(|k| k.is_published || published.find_staged_ref(&k.id).is_some());
            let held_published = candidate
                .natural_key()
                .is_some_and(|nk| published.find_natural(&nk).is_some());
            out.push(AnnotatedCandidate {
                external_id: resolution.external_id.clone(),
                is_duplicate: resolution.is_duplicate,
                is_published: matched_published || held_published,
                matched_id: resolution.matched_id().map(str::to_string),
                candidate,
            });
        }
        Ok(out)
    }

    /// Live natural-key lookup issued just before a write.
    ///
    /// Lookup errors are logged and treated as "no match".
    pub async fn recheck<T: Identifiable + ?Sized>(
        &self,
        scope: Collection,
        item: &T,
    ) -> Option<IdentityKey> {
        let natural = item.natural_key()?;
        match self.store.find_by_natural_key(scope, &natural).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(
                    scope = %scope,
                    title = %item.title(),
                    error = %e,
                    "duplicate recheck failed; treating item as new"
                );
                None
            }
        }
    }
}

/// Published stores that hold items of `kind`.
pub fn published_scopes(kind: ContentKind) -> Vec<Collection> {
    kind.publish_targets()
        .iter()
        .map(|t| Collection::Published(*t))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PublishTarget;

    fn case(author: &str, title: &str) -> CandidateItem {
        let mut c = CandidateItem::new(ContentKind::Case, title);
        c.author_name = Some(author.to_string());
        c
    }

    fn news(url: &str) -> CandidateItem {
        let mut c = CandidateItem::new(ContentKind::News, "Headline");
        c.source_url = Some(url.to_string());
        c
    }

    fn key(id: &str, scope: Collection, external_id: &str) -> IdentityKey {
        IdentityKey {
            id: id.to_string(),
            scope,
            external_id: external_id.to_string(),
            title: String::new(),
            author_name: None,
            source_url: None,
            staged_id: None,
            is_published: false,
        }
    }

    #[test]
    fn url_identity_is_last_segment() {
        assert_eq!(derive_external_id(&news("https://example.com/news/12345")), "12345");
        assert_eq!(
            derive_external_id(&news("https://example.com/news/")),
            "https://example.com/news/"
        );
    }

    #[test]
    fn url_identity_ignores_author_and_title() {
        let mut a = case("Kim", "First");
        a.source_url = Some("https://portal/cases/77".into());
        let mut b = case("Lee", "Second");
        b.source_url = Some("https://portal/cases/77".into());
        assert_eq!(derive_external_id(&a), derive_external_id(&b));
    }

    #[test]
    fn author_title_identity_is_slugged_and_truncated() {
        let long_title = "Weekly   Report ".repeat(10);
        let id = derive_external_id(&case("Hong  Gil Dong", &long_title));
        let expected_title: String = long_title.trim().chars().take(50).collect();
        assert_eq!(
            id,
            format!("hong_gil_dong_{}", slug(&expected_title))
        );
        assert_eq!(id, derive_external_id(&case("Hong  Gil Dong", &long_title)));
    }

    #[test]
    fn fallback_identity_is_unique() {
        let a = derive_external_id(&CandidateItem::new(ContentKind::Case, "No author"));
        let b = derive_external_id(&CandidateItem::new(ContentKind::Case, "No author"));
        assert!(a.starts_with("case_"));
        assert_ne!(a, b);
    }

    #[test]
    fn new_url_candidate_is_not_duplicate() {
        let index = IdentityIndex::new();
        let r = index.resolve(&news("https://example.com/news/12345"));
        assert_eq!(r.external_id, "12345");
        assert!(!r.is_duplicate);
    }

    #[test]
    fn author_title_match_returns_existing_id() {
        let mut existing = key("case-9", Collection::Published(PublishTarget::Cases), "x");
        existing.author_name = Some("Park".into());
        existing.title = "Meeting summarizer".into();
        let index = IdentityIndex::from_keys([existing]);

        let mut candidate = case("Park", "  Meeting summarizer ");
        candidate.source_url = Some("https://elsewhere/other/1".into());
        let r = index.resolve(&candidate);
        assert!(r.is_duplicate);
        assert_eq!(r.matched_id(), Some("case-9"));
        assert_eq!(r.rule, Some(MatchRule::NaturalKey));
    }

    #[test]
    fn external_id_with_same_fields_is_duplicate() {
        let mut existing = key("n1", Collection::Staging(ContentKind::Case), "77");
        existing.title = "Bot".into();
        let index = IdentityIndex::from_keys([existing]);

        // no author, so no natural key; the url identity still lines up
        let mut candidate = CandidateItem::new(ContentKind::Case, "Bot");
        candidate.source_url = Some("https://portal/cases/77".into());
        let r = index.resolve(&candidate);
        assert_eq!(r.external_id, "77");
        assert!(r.is_duplicate);
        assert_eq!(r.rule, Some(MatchRule::ExternalId));
    }

    #[test]
    fn external_id_collision_regenerates() {
        let mut existing = key("n1", Collection::Staging(ContentKind::News), "123");
        existing.source_url = Some("https://a.example/x/123".into());
        let index = IdentityIndex::from_keys([existing]);

        let r = index.resolve(&news("https://b.example/y/123"));
        assert!(!r.is_duplicate);
        assert!(r.regenerated);
        assert!(r.external_id.starts_with("123_"));
    }

    #[test]
    fn staged_reference_wins() {
        let mut published = key("p1", Collection::Published(PublishTarget::Selected), "zzz");
        published.staged_id = Some("s1".into());
        let index = IdentityIndex::from_keys([published]);

        let staged = StagedRecord::from_candidate(news("https://n.example/1"), "1".into(), "admin");
        let staged = StagedRecord {
            id: "s1".into(),
            ..staged
        };
        let r = index.resolve(&staged);
        assert!(r.is_duplicate);
        assert_eq!(r.rule, Some(MatchRule::StagedReference));
    }

    #[test]
    fn recorded_keys_catch_in_batch_repeats() {
        let mut index = IdentityIndex::new();
        let first = news("https://example.com/a/1");
        assert!(!index.resolve(&first).is_duplicate);
        let staged = StagedRecord::from_candidate(first.clone(), "1".into(), "admin");
        index.record(IdentityKey::from_staged(&staged));
        assert!(index.resolve(&first).is_duplicate);
    }

    #[tokio::test]
    async fn annotate_sees_published_copy_behind_stale_staged_flag() {
        use crate::models::PublishedRecord;
        use crate::store::memory::InMemoryStore;

        let store = InMemoryStore::new();
        let url = "https://news.example.com/a/777";
        let staged = StagedRecord::from_candidate(news(url), "777".into(), "admin");
        store.insert_staged(&staged).await.unwrap();
        // published straight from a crawl, so the staged row never learns about it
        let direct = PublishedRecord::from_candidate(news(url), "777".into(), "admin");
        store
            .insert_published(PublishTarget::Feed, &direct)
            .await
            .unwrap();

        let annotated = IdentityResolver::new(&store)
            .annotate(vec![news(url), news("https://news.example.com/a/778")])
            .await
            .unwrap();
        assert!(annotated[0].is_duplicate);
        assert_eq!(annotated[0].matched_id.as_deref(), Some(staged.id.as_str()));
        assert!(annotated[0].is_published);
        assert!(!annotated[1].is_duplicate);
        assert!(!annotated[1].is_published);
    }

    #[tokio::test]
    async fn annotate_follows_staged_reference_into_published_store() {
        use crate::models::PublishedRecord;
        use crate::store::memory::InMemoryStore;

        let store = InMemoryStore::new();
        let staged = StagedRecord::from_candidate(case("Kim", "Report bot"), "kim".into(), "admin");
        // published row retitled afterwards so only the staged_id link remains;
        // inserted before the staged row so the cached flag stays false
        let mut row = PublishedRecord::from_staged(&staged, "kim".into(), "admin");
        row.title = "Report bot v2".into();
        store
            .insert_published(PublishTarget::Cases, &row)
            .await
            .unwrap();
        store.insert_staged(&staged).await.unwrap();

        let annotated = IdentityResolver::new(&store)
            .annotate(vec![case("Kim", "Report bot")])
            .await
            .unwrap();
        assert!(annotated[0].is_duplicate);
        assert!(annotated[0].is_published);
    }
}
