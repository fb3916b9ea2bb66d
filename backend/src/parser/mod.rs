//! Quiz export loader with encoding and delimiter auto-detection.
//!
//! Turns CSV exports (files or uploaded bytes) into [`RawRecord`]s. Columns are
//! recognised by header alias, so the Japanese export headers and English
//! equivalents both load. A source that cannot be decoded or lacks required
//! columns is skipped and reported; it never aborts the batch.

use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::api::logs::{log_info_indent, log_success, log_warning, log_warning_indent};
use crate::error::{SourceError, SourceResult};
use crate::models::RawRecord;

// =============================================================================
// Decoding
// =============================================================================

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Detect the encoding of raw bytes using chardet
pub fn detect_encoding(bytes: &[u8]) -> String {
    let charset = chardet::detect(bytes).0;

    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" => "utf-8".to_string(),
        "shift_jis" | "sjis" | "cp932" | "windows-31j" => "shift_jis".to_string(),
        _ => charset,
    }
}

/// Decode with the named encoding, falling back to Shift_JIS (cp932) when the
/// label is unknown to encoding_rs. Malformed input is an error, never lossy.
pub fn decode_as(bytes: &[u8], label: &str) -> SourceResult<(String, String)> {
    let encoding = encoding_rs::Encoding::for_label(label.trim().as_bytes())
        .filter(|e| *e != encoding_rs::UTF_8)
        .unwrap_or(encoding_rs::SHIFT_JIS);

    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| (text.into_owned(), encoding.name().to_string()))
        .ok_or_else(|| SourceError::Encoding {
            encoding: encoding.name().to_string(),
        })
}

/// Decode source bytes: UTF-8 (BOM stripped) first, otherwise the detected
/// encoding. Returns the text and the encoding name used.
pub fn decode_content(bytes: &[u8]) -> SourceResult<(String, String)> {
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    if let Ok(text) = std::str::from_utf8(body) {
        return Ok((text.to_string(), "UTF-8".to_string()));
    }
    decode_as(bytes, &detect_encoding(bytes))
}

/// Detect the delimiter by counting occurrences in the first line
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().next().unwrap_or("");

    let separators = [',', ';', '\t', '|'];
    let mut best_sep = ',';
    let mut best_count = 0;

    for &sep in &separators {
        let count = first_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

/// Format delimiter for display
pub fn format_delimiter(d: char) -> &'static str {
    match d {
        ';' => ";",
        ',' => ",",
        '\t' => "TAB",
        '|' => "|",
        _ => "?",
    }
}

// =============================================================================
// Column recognition
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    StudentId,
    Name,
    Date,
    Time,
    Field,
    Attempted,
    Correct,
}

impl Column {
    const REQUIRED: [Column; 5] = [
        Column::StudentId,
        Column::Name,
        Column::Field,
        Column::Attempted,
        Column::Correct,
    ];

    /// Accepted header spellings, compared case-insensitively.
    fn aliases(&self) -> &'static [&'static str] {
        match self {
            Column::StudentId => &["学籍番号", "生徒番号", "student_id", "student id", "id"],
            Column::Name => &["氏名", "名前", "name", "student_name", "student name"],
            Column::Date => &["日付", "実施日", "date"],
            Column::Time => &["時刻", "時間", "time"],
            Column::Field => &["分野", "field", "category", "topic"],
            Column::Attempted => &["問題数", "attempted", "questions"],
            Column::Correct => &["正答数", "correct"],
        }
    }

    /// Canonical (export) header name.
    pub fn header(&self) -> &'static str {
        self.aliases()[0]
    }

    fn all() -> [Column; 7] {
        [
            Column::StudentId,
            Column::Name,
            Column::Date,
            Column::Time,
            Column::Field,
            Column::Attempted,
            Column::Correct,
        ]
    }
}

/// Column positions found in a header row.
#[derive(Debug, Clone, Default)]
pub struct ColumnMap {
    indices: HashMap<Column, usize>,
}

impl ColumnMap {
    pub fn from_headers(headers: &[String]) -> SourceResult<Self> {
        let mut indices = HashMap::new();
        for (i, header) in headers.iter().enumerate() {
            let cleaned = header.trim_start_matches('\u{feff}').trim().to_lowercase();
            let column = Column::all()
                .into_iter()
                .find(|c| c.aliases().iter().any(|alias| *alias == cleaned));
            if let Some(column) = column {
                // First occurrence wins on duplicated headers.
                indices.entry(column).or_insert(i);
            }
        }

        let missing: Vec<String> = Column::REQUIRED
            .iter()
            .filter(|c| !indices.contains_key(*c))
            .map(|c| c.header().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(SourceError::MissingColumns { columns: missing });
        }

        Ok(Self { indices })
    }

    pub fn index(&self, column: Column) -> Option<usize> {
        self.indices.get(&column).copied()
    }

    fn value<'a>(&self, row: &'a csv::StringRecord, column: Column) -> &'a str {
        self.index(column).and_then(|i| row.get(i)).unwrap_or("")
    }

    fn record(&self, row: &csv::StringRecord) -> RawRecord {
        RawRecord {
            student_id: self.value(row, Column::StudentId).to_string(),
            name: self.value(row, Column::Name).to_string(),
            date: self.value(row, Column::Date).to_string(),
            time: self
                .index(Column::Time)
                .map(|_| self.value(row, Column::Time).to_string()),
            field: self.value(row, Column::Field).to_string(),
            attempted: self.value(row, Column::Attempted).to_string(),
            correct: self.value(row, Column::Correct).to_string(),
        }
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// Where a loaded source came from and what was detected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceInfo {
    pub name: String,
    pub encoding: String,
    pub delimiter: char,
    pub headers: Vec<String>,
    pub row_count: usize,
}

#[derive(Debug, Clone)]
pub struct LoadedSource {
    pub info: SourceInfo,
    pub records: Vec<RawRecord>,
}

/// Parse decoded text. Blank rows are ignored; short rows read as empty cells.
pub fn parse_text(content: &str, delimiter: char) -> SourceResult<(Vec<String>, Vec<RawRecord>)> {
    if content.trim().is_empty() {
        return Err(SourceError::Empty);
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(String::from).collect();
    let columns = ColumnMap::from_headers(&headers)?;

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        if row.iter().all(|cell| cell.is_empty()) {
            continue;
        }
        records.push(columns.record(&row));
    }

    Ok((headers, records))
}

/// Decode and parse one source.
pub fn parse_bytes(name: &str, bytes: &[u8]) -> SourceResult<LoadedSource> {
    if bytes.is_empty() {
        return Err(SourceError::Empty);
    }
    let (content, encoding) = decode_content(bytes)?;
    let delimiter = detect_delimiter(&content);
    let (headers, records) = parse_text(&content, delimiter)?;

    Ok(LoadedSource {
        info: SourceInfo {
            name: name.to_string(),
            encoding,
            delimiter,
            headers,
            row_count: records.len(),
        },
        records,
    })
}

pub fn parse_file(path: &Path) -> SourceResult<LoadedSource> {
    let bytes = std::fs::read(path)?;
    parse_bytes(&path.display().to_string(), &bytes)
}

// =============================================================================
// Discovery & batch loading
// =============================================================================

fn is_csv(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
}

fn is_skipped(path: &Path, skip_markers: &[String]) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    skip_markers
        .iter()
        .any(|marker| !marker.is_empty() && name.contains(marker.as_str()))
}

/// List CSV sources under `root`, sorted by path.
///
/// A file given directly is returned as is. In directories, files whose name
/// contains a skip marker are left out. Directory symlinks are not followed;
/// symlinked files are kept.
pub fn discover_sources(root: &Path, recursive: bool, skip_markers: &[String]) -> SourceResult<Vec<PathBuf>> {
    if root.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }
    let depth = if recursive { usize::MAX } else { 1 };
    let mut found = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).max_depth(depth) {
        let entry = entry.map_err(std::io::Error::from)?;
        let is_file = entry.file_type().is_file() || (entry.path_is_symlink() && entry.path().is_file());
        if is_file && is_csv(entry.path()) && !is_skipped(entry.path(), skip_markers) {
            found.push(entry.into_path());
        }
    }
    found.sort();
    Ok(found)
}

/// One input to [`load_sources`].
#[derive(Debug, Clone)]
pub enum SourceInput {
    Path(PathBuf),
    Bytes { name: String, bytes: Vec<u8> },
}

impl SourceInput {
    pub fn name(&self) -> String {
        match self {
            SourceInput::Path(path) => path.display().to_string(),
            SourceInput::Bytes { name, .. } => name.clone(),
        }
    }

    fn load(&self) -> SourceResult<LoadedSource> {
        match self {
            SourceInput::Path(path) => parse_file(path),
            SourceInput::Bytes { name, bytes } => parse_bytes(name, bytes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedSource {
    pub name: String,
    pub reason: String,
}

/// Every record of the loaded sources, concatenated in input order.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub sources: Vec<SourceInfo>,
    pub skipped: Vec<SkippedSource>,
    pub records: Vec<RawRecord>,
}

/// Load every input, skipping (and reporting) the ones that fail.
pub fn load_sources(inputs: &[SourceInput]) -> LoadReport {
    let mut report = LoadReport::default();

    for input in inputs {
        match input.load() {
            Ok(loaded) => {
                log_info_indent(
                    format!(
                        "{}: {} rows ({}, '{}')",
                        loaded.info.name,
                        loaded.info.row_count,
                        loaded.info.encoding,
                        format_delimiter(loaded.info.delimiter)
                    ),
                    1,
                );
                report.records.extend(loaded.records);
                report.sources.push(loaded.info);
            }
            Err(err) => {
                let name = input.name();
                log_warning_indent(format!("Skipped {}: {}", name, err), 1);
                report.skipped.push(SkippedSource {
                    name,
                    reason: err.to_string(),
                });
            }
        }
    }

    if report.skipped.is_empty() {
        log_success(format!(
            "Loaded {} rows from {} source(s)",
            report.records.len(),
            report.sources.len()
        ));
    } else {
        log_warning(format!(
            "Loaded {} rows from {} source(s), {} skipped",
            report.records.len(),
            report.sources.len(),
            report.skipped.len()
        ));
    }

    report
}
