//! Ingestion orchestration.
//!
//! Ties each ingestion source to normalization and identity annotation:
//!
//! ```text
//! crawl:    PageFetcher ─▶ scan_page ─▶ normalize_headlines ─┐
//!                                                             ├─▶ IdentityResolver::annotate ─▶ IngestReport
//! workbook: read_sheet_rows ─▶ normalize_rows ────────────────┘
//! ```
//!
//! Nothing is persisted here. The operator reviews the annotated list and
//! commits a selection through [`content_intake_core::staging`].

use serde::Serialize;
use thiserror::Error;

use content_intake_core::identity::{AnnotatedCandidate, IdentityResolver};
use content_intake_core::models::{CandidateItem, ContentKind};
use content_intake_core::normalize::normalize_rows;
use content_intake_core::store::Store;

use crate::crawl::{AcquireError, Crawler, PageFetcher};
use crate::workbook::{self, WorkbookError};

/// Whole-call ingestion failure. Per-row problems are reported in
/// [`IngestReport::errors`] instead.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Workbook(#[from] WorkbookError),
    #[error("identity lookup failed: {0:#}")]
    Lookup(anyhow::Error),
    #[error(transparent)]
    Acquire(#[from] AcquireError),
    #[error("{0}")]
    Input(String),
}

/// Annotated candidates returned for operator review.
#[derive(Debug, Serialize)]
pub struct IngestReport {
    pub success: bool,
    /// Candidates plus rejected rows.
    pub total: usize,
    pub candidates: Vec<AnnotatedCandidate>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl IngestReport {
    fn new(candidates: Vec<AnnotatedCandidate>, errors: Vec<String>) -> Self {
        Self {
            success: true,
            total: candidates.len() + errors.len(),
            candidates,
            errors,
        }
    }

    pub fn duplicates(&self) -> usize {
        self.candidates.iter().filter(|c| c.is_duplicate).count()
    }
}

async fn annotate<S: Store>(
    store: &S,
    candidates: Vec<CandidateItem>,
) -> Result<Vec<AnnotatedCandidate>, IngestError> {
    IdentityResolver::new(store)
        .annotate(candidates)
        .await
        .map_err(IngestError::Lookup)
}

/// Crawl the search page and annotate the headlines found.
pub async fn crawl_candidates<S: Store, F: PageFetcher>(
    store: &S,
    crawler: &Crawler<F>,
) -> Result<IngestReport, IngestError> {
    let candidates = crawler.crawl().await?;
    let annotated = annotate(store, candidates).await?;
    let report = IngestReport::new(annotated, Vec::new());
    tracing::info!(
        total = report.total,
        duplicates = report.duplicates(),
        "crawl candidates annotated"
    );
    Ok(report)
}

/// Read an uploaded workbook and annotate its rows.
///
/// An unreadable workbook fails the whole call; rows missing required
/// fields are listed in `errors` and the rest still come back.
pub async fn workbook_candidates<S: Store>(
    store: &S,
    kind: ContentKind,
    file_name: &str,
    bytes: &[u8],
) -> Result<IngestReport, IngestError> {
    workbook::check_upload(file_name, bytes)?;
    let rows = workbook::read_sheet_rows(bytes)?;
    let outcome = normalize_rows(kind, rows);
    tracing::info!(
        file = %file_name,
        kind = %kind,
        candidates = outcome.candidates.len(),
        rejected = outcome.rejected.len(),
        dropped = outcome.dropped,
        "workbook normalized"
    );
    let errors = outcome.rejected.iter().map(|e| e.to_string()).collect();
    let annotated = annotate(store, outcome.candidates).await?;
    Ok(IngestReport::new(annotated, errors))
}

/// Keep the candidates at the operator-selected indexes, in index order.
///
/// `None` keeps everything.
pub fn pick_selected(
    candidates: Vec<CandidateItem>,
    selected: Option<&[usize]>,
) -> Result<Vec<CandidateItem>, IngestError> {
    let selected = match selected {
        Some(selected) => selected,
        None => return Ok(candidates),
    };
    if let Some(bad) = selected.iter().find(|&&i| i >= candidates.len()) {
        return Err(IngestError::Input(format!(
            "selected index {} is out of range ({} candidates)",
            bad,
            candidates.len()
        )));
    }
    let mut slots: Vec<Option<CandidateItem>> = candidates.into_iter().map(Some).collect();
    Ok(selected.iter().filter_map(|&i| slots[i].take()).collect())
}
