//! Spreadsheet reading for workbook ingestion.
//!
//! Reads the first worksheet (first tab in `xl/workbook.xml`) of an `.xlsx`
//! upload into a rectangular grid of strings. The first used row is the
//! header row; turning the grid into [`SheetRow`]s and candidates is left
//! to [`content_intake_core::normalize`].
//!
//! Only the OOXML container is supported. Legacy `.xls` and `.csv` uploads
//! are rejected with [`WorkbookError::UnsupportedFormat`].
//!
//! Cell handling:
//!
//! | Cell | Value |
//! |------|-------|
//! | `t="s"` | shared string at the index in `<v>` |
//! | `t="inlineStr"` | concatenated `<is><t>` runs |
//! | `t="b"` | `TRUE` / `FALSE` |
//! | anything else | raw `<v>` text (numbers, dates as serials) |

use std::io::Read;

use quick_xml::events::{BytesStart, Event};
use thiserror::Error;

use content_intake_core::normalize::{rows_from_grid, SheetRow};

/// Maximum rows read from a sheet, header included.
const MAX_ROWS: usize = 10_000;
/// Maximum cells read from a sheet (avoids unbounded memory).
const MAX_CELLS: usize = 200_000;
/// Widest column index accepted from a cell reference.
const MAX_COLUMNS: usize = 512;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS: &str = "xl/_rels/workbook.xml.rels";

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

#[derive(Debug, Error)]
pub enum WorkbookError {
    #[error("unsupported file '{0}': upload an .xlsx workbook")]
    UnsupportedFormat(String),
    #[error("workbook is not a valid xlsx archive: {0}")]
    Archive(String),
    #[error("workbook has no worksheets")]
    NoSheets,
    #[error("failed to parse {entry}: {message}")]
    Xml { entry: String, message: String },
    #[error("ZIP entry {0} exceeds size limit")]
    TooLarge(String),
}

/// Check the upload's name and magic bytes before parsing.
pub fn check_upload(file_name: &str, bytes: &[u8]) -> Result<(), WorkbookError> {
    let lower = file_name.to_ascii_lowercase();
    if !lower.ends_with(".xlsx") || !bytes.starts_with(ZIP_MAGIC) {
        return Err(WorkbookError::UnsupportedFormat(file_name.to_string()));
    }
    Ok(())
}

/// Read the first worksheet into header-keyed rows.
pub fn read_sheet_rows(bytes: &[u8]) -> Result<Vec<SheetRow>, WorkbookError> {
    Ok(rows_from_grid(read_first_sheet(bytes)?))
}

/// Read the first worksheet (the first tab in workbook order) as a grid of
/// cell strings.
///
/// Rows are padded so that row `n` of the sheet is `grid[n - 1]`; missing
/// cells are empty strings.
pub fn read_first_sheet(bytes: &[u8]) -> Result<Vec<Vec<String>>, WorkbookError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| WorkbookError::Archive(e.to_string()))?;
    let shared_strings = read_shared_strings(&mut archive)?;
    let sheet = first_sheet_entry(&mut archive)?.ok_or(WorkbookError::NoSheets)?;
    let xml = read_zip_entry_bounded(&mut archive, &sheet, MAX_XML_ENTRY_BYTES)?;
    parse_sheet(&xml, &shared_strings).map_err(|message| WorkbookError::Xml {
        entry: sheet,
        message,
    })
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, WorkbookError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| WorkbookError::Archive(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| WorkbookError::Archive(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(WorkbookError::TooLarge(name.to_string()));
    }
    Ok(out)
}

/// Shared string table. Workbooks without string cells may omit it.
fn read_shared_strings(
    archive: &mut Archive<'_>,
) -> Result<Vec<String>, WorkbookError> {
    const ENTRY: &str = "xl/sharedStrings.xml";
    if !has_entry(archive, ENTRY) {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, ENTRY, MAX_XML_ENTRY_BYTES)?;
    let xml_err = |message: String| WorkbookError::Xml {
        entry: ENTRY.to_string(),
        message,
    };

    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    // Phonetic runs (<rPh>) carry reading hints, not cell text.
    let mut in_phonetic = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"rPh" => in_phonetic = true,
                b"t" if !in_phonetic => in_t = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    let text = te.unescape().map_err(|e| xml_err(e.to_string()))?;
                    s.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => {
                    if let Some(s) = current.take() {
                        strings.push(s);
                    }
                }
                b"rPh" => in_phonetic = false,
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn has_entry(archive: &Archive<'_>, name: &str) -> bool {
    archive.file_names().any(|n| n == name)
}

/// Worksheet part of the first tab, resolved through `xl/workbook.xml` and
/// its relationships. Falls back to the lowest-numbered `sheetN.xml` when
/// either part is missing or points nowhere.
fn first_sheet_entry(archive: &mut Archive<'_>) -> Result<Option<String>, WorkbookError> {
    if let Some(entry) = first_tab_target(archive)? {
        if has_entry(archive, &entry) {
            return Ok(Some(entry));
        }
        tracing::debug!(entry = %entry, "first tab points at a missing part");
    }
    Ok(list_worksheet_names(archive).into_iter().next())
}

fn first_tab_target(archive: &mut Archive<'_>) -> Result<Option<String>, WorkbookError> {
    if !has_entry(archive, WORKBOOK_PART) || !has_entry(archive, WORKBOOK_RELS) {
        return Ok(None);
    }
    let workbook = read_zip_entry_bounded(archive, WORKBOOK_PART, MAX_XML_ENTRY_BYTES)?;
    let rel_id = find_element(&workbook, b"sheet", |e| attr(e, b"id")).map_err(|message| {
        WorkbookError::Xml {
            entry: WORKBOOK_PART.to_string(),
            message,
        }
    })?;
    let Some(rel_id) = rel_id else {
        return Ok(None);
    };
    let rels = read_zip_entry_bounded(archive, WORKBOOK_RELS, MAX_XML_ENTRY_BYTES)?;
    let target = find_element(&rels, b"Relationship", |e| {
        (attr(e, b"Id").as_deref() == Some(rel_id.as_str()))
            .then(|| attr(e, b"Target"))
            .flatten()
    })
    .map_err(|message| WorkbookError::Xml {
        entry: WORKBOOK_RELS.to_string(),
        message,
    })?;
    Ok(target.map(|t| part_path(&t)))
}

/// First element named `name` for which `pick` returns a value.
fn find_element<F>(xml: &[u8], name: &[u8], mut pick: F) -> Result<Option<String>, String>
where
    F: FnMut(&BytesStart<'_>) -> Option<String>,
{
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == name => {
                if let Some(found) = pick(&e) {
                    return Ok(Some(found));
                }
            }
            Ok(Event::Eof) => return Ok(None),
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
}

/// Relationship targets are relative to `xl/` unless absolute.
fn part_path(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target.trim_start_matches("./")),
    }
}

fn list_worksheet_names(archive: &Archive<'_>) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

#[derive(Clone, Copy, PartialEq)]
enum CellType {
    Shared,
    Inline,
    Bool,
    Plain,
}

/// Per-cell parse state.
struct Cell {
    column: usize,
    ty: CellType,
    value: String,
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

/// Zero-based column index of a reference like `B7` or `AA12`.
fn column_index(reference: &str) -> Option<usize> {
    let letters: String = reference
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    if letters.is_empty() {
        return None;
    }
    let mut index = 0usize;
    for c in letters.chars() {
        index = index * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
        if index > MAX_COLUMNS {
            return None;
        }
    }
    Some(index - 1)
}

/// One-based row number of a reference like `B7`.
fn row_number(reference: &str) -> Option<usize> {
    reference
        .trim_start_matches(|c: char| c.is_ascii_alphabetic())
        .parse()
        .ok()
}

fn parse_sheet(xml: &[u8], shared_strings: &[String]) -> Result<Vec<Vec<String>>, String> {
    let mut grid: Vec<Vec<String>> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    let mut row: Option<Vec<String>> = None;
    let mut cell: Option<Cell> = None;
    let mut in_value = false;
    let mut cell_count = 0usize;

    loop {
        if cell_count >= MAX_CELLS || grid.len() >= MAX_ROWS {
            tracing::warn!(rows = grid.len(), cells = cell_count, "sheet truncated at read limit");
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    let number = attr(&e, b"r").and_then(|r| r.parse::<usize>().ok());
                    pad_rows(&mut grid, number);
                    row = Some(Vec::new());
                }
                b"c" => {
                    let next = row.as_ref().map(|r| r.len()).unwrap_or(0);
                    let reference = attr(&e, b"r");
                    if row.is_none() {
                        pad_rows(&mut grid, reference.as_deref().and_then(row_number));
                        row = Some(Vec::new());
                    }
                    let column = reference
                        .as_deref()
                        .and_then(column_index)
                        .unwrap_or(next);
                    let ty = match attr(&e, b"t").as_deref() {
                        Some("s") => CellType::Shared,
                        Some("inlineStr") => CellType::Inline,
                        Some("b") => CellType::Bool,
                        _ => CellType::Plain,
                    };
                    cell = Some(Cell {
                        column,
                        ty,
                        value: String::new(),
                    });
                }
                b"v" => in_value = true,
                b"t" if cell.as_ref().map(|c| c.ty) == Some(CellType::Inline) => in_value = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"row" => {
                let number = attr(&e, b"r").and_then(|r| r.parse::<usize>().ok());
                pad_rows(&mut grid, number);
                grid.push(Vec::new());
            }
            Ok(Event::Text(te)) if in_value => {
                if let Some(cell) = cell.as_mut() {
                    let text = te.unescape().map_err(|e| e.to_string())?;
                    cell.value.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let (Some(cell), Some(row)) = (cell.take(), row.as_mut()) {
                        let value = resolve_cell(cell.ty, cell.value, shared_strings);
                        if row.len() <= cell.column {
                            row.resize(cell.column + 1, String::new());
                        }
                        row[cell.column] = value;
                        cell_count += 1;
                    }
                }
                b"row" => {
                    if let Some(row) = row.take() {
                        grid.push(row);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    if let Some(row) = row.take() {
        grid.push(row);
    }

    let width = grid.iter().map(Vec::len).max().unwrap_or(0);
    for row in &mut grid {
        row.resize(width, String::new());
    }
    Ok(grid)
}

/// Insert empty rows so the next pushed row lands at `number`.
fn pad_rows(grid: &mut Vec<Vec<String>>, number: Option<usize>) {
    if let Some(number) = number {
        let target = number.saturating_sub(1).min(MAX_ROWS);
        while grid.len() < target {
            grid.push(Vec::new());
        }
    }
}

fn resolve_cell(ty: CellType, raw: String, shared_strings: &[String]) -> String {
    match ty {
        CellType::Shared => raw
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared_strings.get(i).cloned())
            .unwrap_or_default(),
        CellType::Bool => match raw.trim() {
            "1" => "TRUE".to_string(),
            "0" => "FALSE".to_string(),
            other => other.to_string(),
        },
        CellType::Inline | CellType::Plain => raw,
    }
}
