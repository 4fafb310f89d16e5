//! Core data models for the intake pipeline.
//!
//! Items move through four shapes:
//!
//! ```text
//! raw row / headline ──▶ CandidateItem ──▶ StagedRecord ──▶ PublishedRecord
//!      (normalize)         (resolve)        (save)           (publish)
//! ```
//!
//! # Types
//!
//! | Type | Persisted | Produced by |
//! |------|-----------|-------------|
//! | [`CandidateItem`] | never | [`crate::normalize`] |
//! | [`StagedRecord`] | staging store | [`crate::staging`] |
//! | [`PublishedRecord`] | feed / selected / cases | [`crate::publish`] |
//!
//! Timestamps owned by the pipeline are Unix seconds (`i64`). Source-supplied
//! publication times are kept as strings, normalized to RFC 3339 when they
//! parse (see [`crate::normalize::normalize_timestamp`]).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Default `source_site` for news items from the crawl and news workbooks.
pub const DEFAULT_NEWS_SITE: &str = "네이버 뉴스";

/// What kind of content an item carries.
///
/// Selects the header alias table, the natural-key rule used by
/// identity resolution, and which published stores an item may enter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    News,
    Case,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::News => "news",
            ContentKind::Case => "case",
        }
    }

    /// Published stores that accept items of this kind.
    pub fn publish_targets(&self) -> &'static [PublishTarget] {
        match self {
            ContentKind::News => &[PublishTarget::Selected, PublishTarget::Feed],
            ContentKind::Case => &[PublishTarget::Cases],
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "news" => Ok(ContentKind::News),
            "case" | "cases" => Ok(ContentKind::Case),
            other => anyhow::bail!("unknown content kind '{}': expected news or case", other),
        }
    }
}

/// A terminal (published) store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishTarget {
    /// General news feed.
    Feed,
    /// Curated news, fed from staging.
    Selected,
    /// Case-study archive.
    Cases,
}

impl PublishTarget {
    pub const ALL: [PublishTarget; 3] = [
        PublishTarget::Feed,
        PublishTarget::Selected,
        PublishTarget::Cases,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PublishTarget::Feed => "feed",
            PublishTarget::Selected => "selected",
            PublishTarget::Cases => "cases",
        }
    }

    /// The content kind this store holds.
    pub fn kind(&self) -> ContentKind {
        match self {
            PublishTarget::Feed | PublishTarget::Selected => ContentKind::News,
            PublishTarget::Cases => ContentKind::Case,
        }
    }
}

impl fmt::Display for PublishTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PublishTarget {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "feed" | "news" => Ok(PublishTarget::Feed),
            "selected" | "selected_news" => Ok(PublishTarget::Selected),
            "cases" | "case" | "ai_cases" => Ok(PublishTarget::Cases),
            other => anyhow::bail!(
                "unknown publish target '{}': expected feed, selected, or cases",
                other
            ),
        }
    }
}

/// A persisted collection that identity resolution can be scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "store", content = "name", rename_all = "lowercase")]
pub enum Collection {
    Staging(ContentKind),
    Published(PublishTarget),
}

impl Collection {
    pub fn kind(&self) -> ContentKind {
        match self {
            Collection::Staging(kind) => *kind,
            Collection::Published(target) => target.kind(),
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Collection::Staging(kind) => write!(f, "staging:{}", kind),
            Collection::Published(target) => write!(f, "published:{}", target),
        }
    }
}

/// Case-study attributes that vary by submission form.
///
/// Stored as a JSON column alongside the common record fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leading_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_usage_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_usage_evaluation_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_tools: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub development_background: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_effects: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub development_level_evaluation_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_file_size: Option<String>,
}

impl CaseAttributes {
    pub fn is_empty(&self) -> bool {
        *self == CaseAttributes::default()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Parse the stored JSON column; malformed JSON yields empty attributes.
    pub fn from_json(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_default()
    }
}

/// A normalized, not-yet-persisted item from the crawl or a workbook.
///
/// `title` must be non-empty after trimming before the item is handed to
/// identity resolution; [`CandidateItem::validate`] enforces that.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub kind: ContentKind,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_site: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "CaseAttributes::is_empty")]
    pub attributes: CaseAttributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
}

impl CandidateItem {
    /// A bare candidate with only a kind and title set.
    pub fn new(kind: ContentKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            content: String::new(),
            source_url: None,
            source_site: None,
            author_name: None,
            author_email: None,
            employee_number: None,
            image_url: None,
            attributes: CaseAttributes::default(),
            published_at: None,
        }
    }

    /// Reject candidates that must not reach identity resolution.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.title.trim().is_empty() {
            anyhow::bail!("title must not be empty");
        }
        if self.kind == ContentKind::News && non_empty(&self.source_url).is_none() {
            anyhow::bail!("news item requires a source url");
        }
        Ok(())
    }

    /// Human-readable label used in per-item error messages.
    pub fn label(&self) -> String {
        let title = self.title.trim();
        if title.is_empty() {
            "(untitled)".to_string()
        } else {
            title.to_string()
        }
    }
}

/// An item that has been ingested into the staging store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedRecord {
    pub id: String,
    pub kind: ContentKind,
    pub external_id: String,
    pub title: String,
    pub content: String,
    pub source_url: Option<String>,
    pub source_site: Option<String>,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub employee_number: Option<String>,
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "CaseAttributes::is_empty")]
    pub attributes: CaseAttributes,
    pub published_at: Option<String>,
    /// Unix seconds.
    pub uploaded_at: i64,
    pub uploaded_by: String,
    /// Denormalized cache; recomputed on read by the staging adapter.
    pub is_published: bool,
}

impl StagedRecord {
    pub fn from_candidate(
        candidate: CandidateItem,
        external_id: String,
        uploaded_by: &str,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: candidate.kind,
            external_id,
            title: candidate.title.trim().to_string(),
            content: candidate.content,
            source_url: trimmed(candidate.source_url),
            source_site: trimmed(candidate.source_site),
            author_name: trimmed(candidate.author_name),
            author_email: trimmed(candidate.author_email),
            employee_number: trimmed(candidate.employee_number),
            image_url: trimmed(candidate.image_url),
            attributes: candidate.attributes,
            published_at: trimmed(candidate.published_at),
            uploaded_at: chrono::Utc::now().timestamp(),
            uploaded_by: uploaded_by.to_string(),
            is_published: false,
        }
    }
}

/// A row in one of the terminal stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedRecord {
    pub id: String,
    pub kind: ContentKind,
    pub external_id: String,
    /// Staged row this record was published from, if any.
    pub staged_id: Option<String>,
    pub title: String,
    pub content: String,
    pub source_url: Option<String>,
    pub source_site: Option<String>,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub employee_number: Option<String>,
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "CaseAttributes::is_empty")]
    pub attributes: CaseAttributes,
    pub published_at: String,
    pub is_pinned: bool,
    pub imported_by: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl PublishedRecord {
    /// Copy every field of a staged row into a new published row.
    pub fn from_staged(staged: &StagedRecord, external_id: String, imported_by: &str) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: staged.kind,
            external_id,
            staged_id: Some(staged.id.clone()),
            title: staged.title.clone(),
            content: staged.content.clone(),
            source_url: staged.source_url.clone(),
            source_site: staged.source_site.clone(),
            author_name: staged.author_name.clone(),
            author_email: staged.author_email.clone(),
            employee_number: staged.employee_number.clone(),
            image_url: staged.image_url.clone(),
            attributes: staged.attributes.clone(),
            published_at: staged
                .published_at
                .clone()
                .unwrap_or_else(|| crate::normalize::format_rfc3339(now)),
            is_pinned: false,
            imported_by: imported_by.to_string(),
            created_at: now.timestamp(),
            updated_at: now.timestamp(),
        }
    }

    /// Build a published row straight from a candidate, bypassing staging.
    pub fn from_candidate(
        candidate: CandidateItem,
        external_id: String,
        imported_by: &str,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: candidate.kind,
            external_id,
            staged_id: None,
            title: candidate.title.trim().to_string(),
            content: candidate.content,
            source_url: trimmed(candidate.source_url),
            source_site: trimmed(candidate.source_site),
            author_name: trimmed(candidate.author_name),
            author_email: trimmed(candidate.author_email),
            employee_number: trimmed(candidate.employee_number),
            image_url: trimmed(candidate.image_url),
            attributes: candidate.attributes,
            published_at: trimmed(candidate.published_at)
                .unwrap_or_else(|| crate::normalize::format_rfc3339(now)),
            is_pinned: false,
            imported_by: imported_by.to_string(),
            created_at: now.timestamp(),
            updated_at: now.timestamp(),
        }
    }
}

/// Field overwrite applied by bulk update. At least one field must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPatch {
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl FieldPatch {
    pub fn is_empty(&self) -> bool {
        self.author_name.is_none() && self.image_url.is_none()
    }
}

/// Returns the trimmed value when it is present and non-empty.
pub fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_and_target_parse_aliases() {
        assert_eq!("NEWS".parse::<ContentKind>().unwrap(), ContentKind::News);
        assert_eq!("cases".parse::<ContentKind>().unwrap(), ContentKind::Case);
        assert_eq!(
            "selected_news".parse::<PublishTarget>().unwrap(),
            PublishTarget::Selected
        );
        assert!("archive".parse::<PublishTarget>().is_err());
    }

    #[test]
    fn validate_rejects_blank_title_and_urlless_news() {
        let blank = CandidateItem::new(ContentKind::Case, "   ");
        assert!(blank.validate().is_err());

        let news = CandidateItem::new(ContentKind::News, "Headline");
        assert!(news.validate().is_err());

        let case = CandidateItem::new(ContentKind::Case, "Report bot");
        assert!(case.validate().is_ok());
    }

    #[test]
    fn staged_copy_trims_and_drops_blank_fields() {
        let mut candidate = CandidateItem::new(ContentKind::News, "  Title  ");
        candidate.source_url = Some(" https://example.com/a ".into());
        candidate.image_url = Some("   ".into());
        let staged = StagedRecord::from_candidate(candidate, "a".into(), "admin");
        assert_eq!(staged.title, "Title");
        assert_eq!(staged.source_url.as_deref(), Some("https://example.com/a"));
        assert_eq!(staged.image_url, None);
        assert!(!staged.is_published);
    }

    #[test]
    fn published_defaults_published_at_to_now() {
        let staged = StagedRecord::from_candidate(
            CandidateItem::new(ContentKind::Case, "Tool"),
            "x".into(),
            "admin",
        );
        let published = PublishedRecord::from_staged(&staged, "x".into(), "admin");
        assert!(chrono::DateTime::parse_from_rfc3339(&published.published_at).is_ok());
        assert_eq!(published.staged_id.as_deref(), Some(staged.id.as_str()));
    }

    #[test]
    fn attributes_roundtrip_through_json_column() {
        let attrs = CaseAttributes {
            ai_tools: Some("ChatGPT".into()),
            ..Default::default()
        };
        assert_eq!(CaseAttributes::from_json(&attrs.to_json()), attrs);
        assert!(CaseAttributes::from_json("not json").is_empty());
    }
}
