//! Candidate normalization.
//!
//! Turns the two raw input shapes into [`CandidateItem`]s:
//!
//! - **Spreadsheet rows**: header → value maps read from an operator's
//!   workbook. Each logical field has an [`AliasChain`] of accepted header
//!   spellings; the first alias whose trimmed value is non-empty wins.
//! - **Headline hits**: title / link / summary triples pulled out of the
//!   rendered search page by the crawler.
//!
//! Normalization never touches a store. Rows that cannot become a
//! candidate are either dropped silently (blank rows, repeated header
//! rows) or reported as [`RowError`]s; neither aborts the batch.

use std::collections::HashSet;

use chrono::{DateTime, FixedOffset, NaiveDate, SecondsFormat, TimeZone, Utc};

use crate::models::{CandidateItem, CaseAttributes, ContentKind, DEFAULT_NEWS_SITE};

/// Ordered header spellings for one logical field.
#[derive(Debug, Clone, Copy)]
pub struct AliasChain {
    pub primary: &'static [&'static str],
    pub fallback: &'static [&'static str],
}

impl AliasChain {
    pub fn iter(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.primary.iter().chain(self.fallback.iter()).copied()
    }
}

/// Header alias tables. Headers are compared after trimming.
pub mod aliases {
    use super::AliasChain;

    const fn chain(
        primary: &'static [&'static str],
        fallback: &'static [&'static str],
    ) -> AliasChain {
        AliasChain { primary, fallback }
    }

    // ---- case studies ----

    pub const AUTHOR_NAME: AliasChain = chain(&["이름", "author_name"], &["name", "Name"]);
    pub const AUTHOR_EMAIL: AliasChain = chain(&["이메일", "author_email"], &["email", "Email"]);
    pub const EMPLOYEE_NUMBER: AliasChain = chain(
        &["사번", "employee_number"],
        &["사원번호", "employee_id", "사년"],
    );
    pub const TITLE: AliasChain = chain(&["제목", "title"], &["Title"]);
    pub const CONTENT: AliasChain = chain(&["내용", "content"], &["Content"]);
    pub const LEADING_ROLE: AliasChain =
        chain(&["리딩 역할", "리딩역할"], &["leading_role"]);
    pub const ACTIVITY_DETAILS: AliasChain =
        chain(&["활동내용", "활동 내용"], &["activity_details"]);
    pub const AI_USAGE_LEVEL: AliasChain =
        chain(&["AI 활용수준", "AI활용수준"], &["ai_usage_level"]);
    pub const AI_USAGE_EVALUATION_REASON: AliasChain = chain(
        &["AI 활용 평가이유", "AI활용평가이유"],
        &["ai_usage_evaluation_reason"],
    );
    pub const OUTPUT_NAME: AliasChain = chain(&["산출물명"], &["output_name"]);
    pub const AI_TOOLS: AliasChain = chain(
        &["사용 AI툴", "사용 AI 툴", "사용AI툴"],
        &[
            "업무 연관 AI 사용 툴",
            "업무연관 AI 사용 툴",
            "업무연관여누사용 Al",
            "AI도구",
            "ai_tools",
        ],
    );
    pub const DEVELOPMENT_BACKGROUND: AliasChain =
        chain(&["개발 배경", "개발배경"], &["development_background"]);
    pub const FEATURES: AliasChain = chain(&["기능"], &["features"]);
    pub const USAGE_EFFECTS: AliasChain =
        chain(&["사용 효과", "사용효과"], &["usage_effects"]);
    pub const DEVELOPMENT_LEVEL_EVALUATION_REASON: AliasChain = chain(
        &["개발 수준 평가이유", "개발수준 평가이유"],
        &["development_level_evaluation_reason"],
    );
    pub const SUBMISSION_FORMAT: AliasChain =
        chain(&["제출 형식", "제출형식"], &["submission_format"]);
    pub const ATTACHED_FILE_NAME: AliasChain =
        chain(&["첨부 파일명", "첨부파일명"], &["attached_file_name"]);
    pub const ATTACHED_FILE_SIZE: AliasChain =
        chain(&["파일 크기", "파일크기"], &["attached_file_size"]);
    pub const SOURCE_URL: AliasChain = chain(
        &["URL", "url", "링크", "link"],
        &["source_url", "sourceUrl"],
    );
    pub const PUBLISHED_AT: AliasChain = chain(
        &["제출 일시", "제출일시", "published_at"],
        &["제출일", "submission_date"],
    );

    // ---- news ----

    pub const NEWS_TITLE: AliasChain = chain(&["title", "제목"], &["Title"]);
    pub const NEWS_CONTENT: AliasChain = chain(&["content", "내용"], &["본문", "summary"]);
    pub const NEWS_LINK: AliasChain = chain(&["link", "링크"], &["url", "URL", "source_url"]);
    pub const NEWS_SOURCE_SITE: AliasChain =
        chain(&["source_site", "출처"], &["언론사", "site"]);
    pub const NEWS_AUTHOR: AliasChain = chain(&["author_name", "작성자"], &["기자", "author"]);
    pub const NEWS_IMAGE: AliasChain = chain(&["image_url", "이미지"], &["image", "thumbnail"]);
    pub const NEWS_PUBLISHED_AT: AliasChain =
        chain(&["published_at", "게시일"], &["발행일", "날짜", "date"]);
}

/// Labels that mark a header row repeated as the first data row.
const HEADER_LABELS: &[&str] = &["번호", "제목", "title"];

/// One spreadsheet data row as ordered header/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SheetRow {
    /// 1-based row number in the sheet, header row included.
    pub number: usize,
    pub cells: Vec<(String, String)>,
}

impl SheetRow {
    pub fn new(number: usize, cells: Vec<(String, String)>) -> Self {
        Self { number, cells }
    }

    /// Trimmed value under an exact (trimmed) header.
    pub fn get(&self, header: &str) -> Option<&str> {
        let header = header.trim();
        self.cells
            .iter()
            .find(|(h, _)| h.trim() == header)
            .map(|(_, v)| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// First non-empty value along an alias chain.
    pub fn first(&self, chain: &AliasChain) -> Option<String> {
        chain.iter().find_map(|alias| self.get(alias)).map(str::to_string)
    }

    fn first_cell(&self) -> Option<&str> {
        self.cells.first().map(|(_, v)| v.trim())
    }

    fn is_blank(&self) -> bool {
        self.cells.iter().all(|(_, v)| v.trim().is_empty())
    }
}

/// Convert a raw cell grid into [`SheetRow`]s.
///
/// `grid[0]` is sheet row 1. The first row with a non-blank cell is the
/// header; rows above it are ignored and row numbers stay those of the
/// sheet. Blank header cells are skipped along with their column.
pub fn rows_from_grid(grid: Vec<Vec<String>>) -> Vec<SheetRow> {
    let mut iter = grid
        .into_iter()
        .enumerate()
        .skip_while(|(_, row)| row.iter().all(|v| v.trim().is_empty()));
    let (header_index, headers) = match iter.next() {
        Some(h) => h,
        None => return Vec::new(),
    };
    if header_index > 0 {
        tracing::debug!(header_row = header_index + 1, "header found below first sheet row");
    }
    iter.map(|(i, values)| {
        let cells = headers
            .iter()
            .enumerate()
            .filter(|(_, h)| !h.trim().is_empty())
            .map(|(col, h)| (h.clone(), values.get(col).cloned().unwrap_or_default()))
            .collect();
        SheetRow::new(i + 1, cells)
    })
    .collect()
}

/// A row that could not become a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    pub row: usize,
    pub message: String,
}

impl std::fmt::Display for RowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "row {}: {}", self.row, self.message)
    }
}

/// Result of normalizing a batch of rows.
#[derive(Debug, Default)]
pub struct NormalizeOutcome {
    pub candidates: Vec<CandidateItem>,
    pub rejected: Vec<RowError>,
    /// Rows dropped silently (blank or repeated header).
    pub dropped: usize,
}

impl NormalizeOutcome {
    fn reject(&mut self, row: &SheetRow, message: &str) {
        self.rejected.push(RowError {
            row: row.number,
            message: message.to_string(),
        });
    }
}

fn is_repeated_header(row: &SheetRow, title_chain: &AliasChain) -> bool {
    let looks_like_label = |v: &str| HEADER_LABELS.iter().any(|l| l.eq_ignore_ascii_case(v));
    row.first_cell().is_some_and(looks_like_label)
        || row.first(title_chain).is_some_and(|t| looks_like_label(&t))
}

/// Normalize rows from a workbook of the given kind.
pub fn normalize_rows(kind: ContentKind, rows: Vec<SheetRow>) -> NormalizeOutcome {
    match kind {
        ContentKind::News => normalize_news_rows(rows),
        ContentKind::Case => normalize_case_rows(rows),
    }
}

/// Normalize case-study rows.
///
/// Title falls back output name → title → activity details; content
/// falls back activity details → content.
pub fn normalize_case_rows(rows: Vec<SheetRow>) -> NormalizeOutcome {
    use aliases::*;

    let mut out = NormalizeOutcome::default();
    for (i, row) in rows.into_iter().enumerate() {
        if row.is_blank() || (i == 0 && is_repeated_header(&row, &TITLE)) {
            out.dropped += 1;
            continue;
        }

        let author = row.first(&AUTHOR_NAME);
        let activity = row.first(&ACTIVITY_DETAILS);
        let output_name = row.first(&OUTPUT_NAME);
        let title = output_name
            .clone()
            .or_else(|| row.first(&TITLE))
            .or_else(|| activity.clone());

        let title = match (title, &author) {
            (Some(title), _) => title,
            (None, None) => {
                out.dropped += 1;
                continue;
            }
            (None, Some(_)) => {
                out.reject(&row, "missing title");
                continue;
            }
        };

        let mut candidate = CandidateItem::new(ContentKind::Case, title);
        candidate.content = activity
            .clone()
            .or_else(|| row.first(&CONTENT))
            .unwrap_or_default();
        candidate.author_name = author;
        candidate.author_email = row.first(&AUTHOR_EMAIL);
        candidate.employee_number = row.first(&EMPLOYEE_NUMBER);
        candidate.source_url = row.first(&SOURCE_URL);
        candidate.published_at = row.first(&PUBLISHED_AT).map(|raw| normalize_timestamp(&raw));
        candidate.attributes = CaseAttributes {
            leading_role: row.first(&LEADING_ROLE),
            activity_details: activity,
            ai_usage_level: row.first(&AI_USAGE_LEVEL),
            ai_usage_evaluation_reason: row.first(&AI_USAGE_EVALUATION_REASON),
            output_name,
            ai_tools: row.first(&AI_TOOLS),
            development_background: row.first(&DEVELOPMENT_BACKGROUND),
            features: row.first(&FEATURES),
            usage_effects: row.first(&USAGE_EFFECTS),
            development_level_evaluation_reason: row.first(&DEVELOPMENT_LEVEL_EVALUATION_REASON),
            submission_format: row.first(&SUBMISSION_FORMAT),
            attached_file_name: row.first(&ATTACHED_FILE_NAME),
            attached_file_size: row.first(&ATTACHED_FILE_SIZE),
        };
        out.candidates.push(candidate);
    }
    out
}

/// Normalize news rows. Title and link are both required.
pub fn normalize_news_rows(rows: Vec<SheetRow>) -> NormalizeOutcome {
    use aliases::*;

    let mut out = NormalizeOutcome::default();
    for (i, row) in rows.into_iter().enumerate() {
        if row.is_blank() || (i == 0 && is_repeated_header(&row, &NEWS_TITLE)) {
            out.dropped += 1;
            continue;
        }

        let title = row.first(&NEWS_TITLE);
        let link = row.first(&NEWS_LINK);
        let (title, link) = match (title, link) {
            (Some(t), Some(l)) => (t, l),
            (None, None) => {
                out.dropped += 1;
                continue;
            }
            (None, Some(_)) => {
                out.reject(&row, "missing title");
                continue;
            }
            (Some(_), None) => {
                out.reject(&row, "missing link");
                continue;
            }
        };

        let mut candidate = CandidateItem::new(ContentKind::News, title);
        candidate.content = row.first(&NEWS_CONTENT).unwrap_or_default();
        candidate.source_url = Some(link);
        candidate.source_site = Some(
            row.first(&NEWS_SOURCE_SITE)
                .unwrap_or_else(|| DEFAULT_NEWS_SITE.to_string()),
        );
        candidate.author_name = row.first(&NEWS_AUTHOR);
        candidate.image_url = row.first(&NEWS_IMAGE);
        candidate.published_at = row
            .first(&NEWS_PUBLISHED_AT)
            .map(|raw| normalize_timestamp(&raw));
        out.candidates.push(candidate);
    }
    out
}

/// A headline found on the rendered search page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadlineHit {
    pub title: String,
    /// Absolute link of the nearest enclosing anchor, if any.
    pub link: Option<String>,
    pub summary: Option<String>,
}

/// Turn crawled headlines into news candidates.
///
/// Hits without a link or title are skipped, repeated links keep their
/// first occurrence, and at most `max_items` candidates are returned in
/// page order.
pub fn normalize_headlines(
    hits: Vec<HeadlineHit>,
    max_items: usize,
    source_site: &str,
    crawled_at: DateTime<Utc>,
) -> Vec<CandidateItem> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for hit in hits {
        if out.len() >= max_items {
            break;
        }
        let link = match hit.link.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
            Some(link) => link.to_string(),
            None => continue,
        };
        let title = hit.title.split_whitespace().collect::<Vec<_>>().join(" ");
        if title.is_empty() || !seen.insert(link.clone()) {
            continue;
        }
        let mut candidate = CandidateItem::new(ContentKind::News, title);
        candidate.content = hit
            .summary
            .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
            .unwrap_or_default();
        candidate.source_url = Some(link);
        candidate.source_site = Some(source_site.to_string());
        candidate.published_at = Some(format_rfc3339(crawled_at));
        out.push(candidate);
    }
    out
}

/// Format a UTC instant the way the pipeline stores timestamps.
pub fn format_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Offset assumed for source timestamps that carry none (KST).
const SOURCE_OFFSET_SECS: i32 = 9 * 3600;

/// Normalize a source-supplied timestamp to RFC 3339 UTC.
///
/// Accepts RFC 3339, Excel serial day numbers, and dotted or dashed local
/// dates such as `2024. 5. 3. 오후 3:20`. Anything else is returned
/// trimmed but otherwise unchanged.
pub fn normalize_timestamp(raw: &str) -> String {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return format_rfc3339(dt.with_timezone(&Utc));
    }
    if let Some(dt) = parse_excel_serial(raw).or_else(|| parse_local_datetime(raw)) {
        return format_rfc3339(dt);
    }
    raw.to_string()
}

fn source_offset() -> Option<FixedOffset> {
    FixedOffset::east_opt(SOURCE_OFFSET_SECS)
}

/// Excel stores dates as days since 1899-12-30.
fn parse_excel_serial(raw: &str) -> Option<DateTime<Utc>> {
    let serial: f64 = raw.parse().ok()?;
    if !(20_000.0..80_000.0).contains(&serial) {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let secs = (serial * 86_400.0).round() as i64;
    let local = epoch.checked_add_signed(chrono::Duration::seconds(secs))?;
    source_offset()?
        .from_local_datetime(&local)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_local_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let pm = raw.contains("오후") || raw.to_ascii_uppercase().contains("PM");
    let am = raw.contains("오전") || raw.to_ascii_uppercase().contains("AM");
    let parts: Vec<u32> = raw
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().ok())
        .collect::<Option<_>>()?;
    if parts.len() < 3 || parts.len() > 6 || !(1900..=9999).contains(&parts[0]) {
        return None;
    }
    let date = NaiveDate::from_ymd_opt(parts[0] as i32, parts[1], parts[2])?;
    let mut hour = parts.get(3).copied().unwrap_or(0);
    if pm && hour < 12 {
        hour += 12;
    } else if am && hour == 12 {
        hour = 0;
    }
    let minute = parts.get(4).copied().unwrap_or(0);
    let second = parts.get(5).copied().unwrap_or(0);
    let local = date.and_hms_opt(hour, minute, second)?;
    source_offset()?
        .from_local_datetime(&local)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(number: usize, cells: &[(&str, &str)]) -> SheetRow {
        SheetRow::new(
            number,
            cells
                .iter()
                .map(|(h, v)| (h.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn fallback_alias_fills_field() {
        let rows = vec![row(
            2,
            &[
                ("이름", "김철수"),
                ("산출물명", "회의록 요약기"),
                ("업무연관 AI 사용 툴", "ChatGPT"),
            ],
        )];
        let out = normalize_case_rows(rows);
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(
            out.candidates[0].attributes.ai_tools.as_deref(),
            Some("ChatGPT")
        );
    }

    #[test]
    fn primary_alias_beats_fallback_and_blank_values_are_skipped() {
        let rows = vec![row(
            2,
            &[
                ("이름", "Lee"),
                ("제목", "Bot"),
                ("사용 AI툴", "  "),
                ("사용AI툴", "Claude"),
                ("AI도구", "Other"),
            ],
        )];
        let out = normalize_case_rows(rows);
        assert_eq!(out.candidates[0].attributes.ai_tools.as_deref(), Some("Claude"));
    }

    #[test]
    fn headers_match_after_trimming() {
        let rows = vec![row(2, &[(" 이름 ", "Lee"), ("사번 \n", "1001"), ("제목", "Bot")])];
        let out = normalize_case_rows(rows);
        assert_eq!(out.candidates[0].employee_number.as_deref(), Some("1001"));
    }

    #[test]
    fn case_title_fallback_order() {
        let rows = vec![
            row(2, &[("이름", "A"), ("산출물명", "Output"), ("제목", "Title")]),
            row(3, &[("이름", "B"), ("제목", "Title")]),
            row(4, &[("이름", "C"), ("활동내용", "Did things")]),
        ];
        let titles: Vec<String> = normalize_case_rows(rows)
            .candidates
            .into_iter()
            .map(|c| c.title)
            .collect();
        assert_eq!(titles, vec!["Output", "Title", "Did things"]);
    }

    #[test]
    fn activity_details_become_content() {
        let rows = vec![row(
            2,
            &[("이름", "A"), ("제목", "T"), ("활동내용", "Body"), ("내용", "Other")],
        )];
        assert_eq!(normalize_case_rows(rows).candidates[0].content, "Body");
    }

    #[test]
    fn repeated_header_and_blank_rows_are_dropped() {
        let rows = vec![
            row(2, &[("번호", "번호"), ("이름", "이름"), ("제목", "제목")]),
            row(3, &[("번호", ""), ("이름", ""), ("제목", "")]),
            row(4, &[("번호", "1"), ("이름", "Kim"), ("제목", "Tool")]),
        ];
        let out = normalize_case_rows(rows);
        assert_eq!(out.dropped, 2);
        assert_eq!(out.candidates.len(), 1);
    }

    #[test]
    fn author_without_title_is_rejected() {
        let out = normalize_case_rows(vec![row(7, &[("이름", "Kim"), ("이메일", "k@x")])]);
        assert!(out.candidates.is_empty());
        assert_eq!(out.rejected[0].to_string(), "row 7: missing title");
    }

    #[test]
    fn news_rows_need_title_and_link() {
        let rows = vec![
            row(2, &[("title", "A"), ("link", "https://n/1")]),
            row(3, &[("title", "B"), ("link", "")]),
            row(4, &[("title", ""), ("link", "")]),
        ];
        let out = normalize_news_rows(rows);
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(out.candidates[0].source_site.as_deref(), Some(DEFAULT_NEWS_SITE));
        assert_eq!(out.rejected.len(), 1);
        assert_eq!(out.dropped, 1);
    }

    #[test]
    fn grid_becomes_numbered_rows() {
        let grid = vec![
            vec!["title".to_string(), "".to_string(), "link".to_string()],
            vec!["A".to_string(), "ignored".to_string(), "https://n/1".to_string()],
            vec!["B".to_string()],
        ];
        let rows = rows_from_grid(grid);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].number, 2);
        assert_eq!(rows[0].cells.len(), 2);
        assert_eq!(rows[1].get("link"), None);
    }

    #[test]
    fn header_below_blank_rows_keeps_sheet_numbers() {
        let grid = vec![
            vec![],
            vec!["".to_string(), " ".to_string()],
            vec!["이름".to_string(), "산출물명".to_string()],
            vec!["Kim".to_string(), "Bot".to_string()],
        ];
        let rows = rows_from_grid(grid);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].number, 4);
        assert_eq!(rows[0].get("이름"), Some("Kim"));

        let out = normalize_case_rows(rows);
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(out.candidates[0].title, "Bot");

        assert!(rows_from_grid(vec![vec![String::new()], vec![]]).is_empty());
    }

    #[test]
    fn headlines_skip_missing_links_and_repeats_and_cap() {
        let now = Utc::now();
        let mut hits = vec![
            HeadlineHit {
                title: "No link".into(),
                link: None,
                summary: None,
            },
            HeadlineHit {
                title: " First \n story ".into(),
                link: Some("https://n/1".into()),
                summary: Some("sum".into()),
            },
            HeadlineHit {
                title: "Repeat".into(),
                link: Some("https://n/1".into()),
                summary: None,
            },
        ];
        for i in 2..40 {
            hits.push(HeadlineHit {
                title: format!("Story {}", i),
                link: Some(format!("https://n/{}", i)),
                summary: None,
            });
        }
        let out = normalize_headlines(hits, 20, DEFAULT_NEWS_SITE, now);
        assert_eq!(out.len(), 20);
        assert_eq!(out[0].title, "First story");
        assert_eq!(out[0].content, "sum");
        assert_eq!(out[1].title, "Story 2");
    }

    #[test]
    fn timestamps_normalize_korean_and_excel_forms() {
        assert_eq!(
            normalize_timestamp("2024. 5. 3. 오후 3:20"),
            "2024-05-03T06:20:00Z"
        );
        assert_eq!(normalize_timestamp("2024-05-03 09:00:00"), "2024-05-03T00:00:00Z");
        assert_eq!(
            normalize_timestamp("2024-05-03T09:00:00+09:00"),
            "2024-05-03T00:00:00Z"
        );
        // 45415 = 2024-05-03 in the 1900 date system
        assert_eq!(normalize_timestamp("45415"), "2024-05-02T15:00:00Z");
        assert_eq!(normalize_timestamp(" sometime "), "sometime");
    }
}
