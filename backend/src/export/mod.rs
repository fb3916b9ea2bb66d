//! Flat-row export.
//!
//! Every pipeline output flattens to rows of identity columns plus metric
//! columns, written as CSV (optionally with a UTF-8 BOM so spreadsheet
//! applications pick the right encoding) or JSON.

use csv::WriterBuilder;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ExportError, ExportResult};
use crate::models::{
    activity_label, Aggregation, Ranking, ResolvedRecord, StudentIdentity,
    StudentSummary, NOT_APPLICABLE,
};
use crate::transform::pipeline::PipelineOutput;
use crate::transform::pivot::{PivotMatrix, ValueKind};

const BOM: &str = "\u{feff}";

// =============================================================================
// Row types
// =============================================================================

/// One surviving record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordRow {
    pub student_id: String,
    pub name: String,
    pub raw_student_id: String,
    /// ISO date, or the source text when it could not be parsed.
    pub date: String,
    pub time: String,
    pub field: String,
    pub attempted: u64,
    pub correct: u64,
    pub coerced: bool,
}

/// One aggregated cell. Dimensions outside the grouping are empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellRow {
    pub student_id: String,
    pub name: String,
    pub date: String,
    pub field: String,
    pub attempted: u64,
    pub correct: u64,
    pub accuracy: f64,
    pub record_count: usize,
    pub student_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSummaryRow {
    pub student_id: String,
    pub name: String,
    pub field: String,
    pub attempted: u64,
    pub correct: u64,
    pub accuracy: f64,
    pub occurrence_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub student_id: String,
    pub name: String,
    pub total_attempted: u64,
    pub total_correct: u64,
    pub overall_accuracy: f64,
    pub weakest_field: String,
    pub weakest_accuracy: f64,
    pub strongest_field: String,
    pub strongest_accuracy: f64,
    pub distinct_fields: usize,
    pub activity: String,
    pub total_sessions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingRow {
    pub rank: usize,
    pub student_id: String,
    pub name: String,
    pub overall_accuracy: f64,
    pub total_attempted: u64,
    pub total_correct: u64,
    pub weakest_field: String,
    pub strongest_field: String,
    pub activity: String,
}

fn identity_columns(identity: &StudentIdentity) -> (String, String) {
    (identity.canonical_id.clone(), identity.canonical_name.clone())
}

pub fn record_rows(records: &[ResolvedRecord]) -> Vec<RecordRow> {
    records
        .iter()
        .map(|r| {
            let (student_id, name) = identity_columns(&r.identity);
            let rec = &r.record;
            RecordRow {
                student_id,
                name,
                raw_student_id: rec.raw_student_id.clone(),
                date: rec
                    .date
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| rec.raw_date.clone()),
                time: rec.time.clone().unwrap_or_default(),
                field: rec.field.clone(),
                attempted: rec.attempted,
                correct: rec.correct,
                coerced: rec.coerced,
            }
        })
        .collect()
}

pub fn cell_rows(aggregation: &Aggregation) -> Vec<CellRow> {
    aggregation
        .cells
        .iter()
        .map(|cell| {
            let (student_id, name) = cell
                .student
                .as_deref()
                .map(identity_columns)
                .unwrap_or_default();
            let date = match (aggregation.keys.date, cell.date) {
                (false, _) => String::new(),
                (true, Some(d)) => d.format("%Y-%m-%d").to_string(),
                (true, None) => NOT_APPLICABLE.to_string(),
            };
            CellRow {
                student_id,
                name,
                date,
                field: cell.field.clone().unwrap_or_default(),
                attempted: cell.attempted,
                correct: cell.correct,
                accuracy: cell.accuracy,
                record_count: cell.record_count,
                student_count: cell.student_count,
            }
        })
        .collect()
}

pub fn field_summary_rows(summaries: &[StudentSummary]) -> Vec<FieldSummaryRow> {
    summaries
        .iter()
        .flat_map(|s| {
            s.fields.iter().map(move |f| FieldSummaryRow {
                student_id: s.identity.canonical_id.clone(),
                name: s.identity.canonical_name.clone(),
                field: f.field.clone(),
                attempted: f.attempted,
                correct: f.correct,
                accuracy: f.accuracy,
                occurrence_count: f.occurrence_count,
            })
        })
        .collect()
}

impl From<&StudentSummary> for SummaryRow {
    fn from(s: &StudentSummary) -> Self {
        let (student_id, name) = identity_columns(&s.identity);
        Self {
            student_id,
            name,
            total_attempted: s.total_attempted,
            total_correct: s.total_correct,
            overall_accuracy: s.overall_accuracy,
            weakest_field: s.weakest.label().to_string(),
            weakest_accuracy: s.weakest.accuracy(),
            strongest_field: s.strongest.label().to_string(),
            strongest_accuracy: s.strongest.accuracy(),
            distinct_fields: s.distinct_field_count,
            activity: activity_label(s.activity.as_ref()),
            total_sessions: s.total_sessions,
        }
    }
}

pub fn summary_rows(summaries: &[StudentSummary]) -> Vec<SummaryRow> {
    summaries.iter().map(SummaryRow::from).collect()
}

pub fn ranking_rows(ranking: &Ranking) -> Vec<RankingRow> {
    ranking
        .entries
        .iter()
        .map(|e| {
            let s = &e.summary;
            RankingRow {
                rank: e.rank,
                student_id: s.identity.canonical_id.clone(),
                name: s.identity.canonical_name.clone(),
                overall_accuracy: s.overall_accuracy,
                total_attempted: s.total_attempted,
                total_correct: s.total_correct,
                weakest_field: s.weakest.label().to_string(),
                strongest_field: s.strongest.label().to_string(),
                activity: activity_label(s.activity.as_ref()),
            }
        })
        .collect()
}

// =============================================================================
// CSV writing
// =============================================================================

fn finish(writer: csv::Writer<Vec<u8>>, bom: bool) -> ExportResult<String> {
    let bytes = writer
        .into_inner()
        .map_err(|e| ExportError::Buffer(e.to_string()))?;
    let body = String::from_utf8(bytes).map_err(|e| ExportError::Buffer(e.to_string()))?;
    Ok(if bom { format!("{}{}", BOM, body) } else { body })
}

/// Serialize rows to CSV text with a header line.
pub fn to_csv<T: Serialize>(rows: &[T], bom: bool) -> ExportResult<String> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    finish(writer, bom)
}

/// Wide pivot: one row per student, `date/field/kind` columns. Absent cells
/// stay empty.
pub fn pivot_csv(matrix: &PivotMatrix, bom: bool) -> ExportResult<String> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(matrix.headers())?;

    for row in &matrix.rows {
        let mut values = vec![
            row.student.canonical_id.clone(),
            row.student.canonical_name.clone(),
        ];
        for column in &matrix.columns {
            let cell = row.get(column);
            values.extend(
                ValueKind::ALL
                    .iter()
                    .map(|kind| cell.map(|c| c.display(*kind)).unwrap_or_default()),
            );
        }
        writer.write_record(&values)?;
    }
    finish(writer, bom)
}

/// Write the whole report into `dir`: one CSV per table plus `report.json`.
pub fn write_report_dir(output: &PipelineOutput, dir: &Path, bom: bool) -> ExportResult<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;

    let files: Vec<(&str, String)> = vec![
        ("records.csv", to_csv(&record_rows(&output.records), bom)?),
        ("detail.csv", to_csv(&cell_rows(&output.detail), bom)?),
        ("student_fields.csv", to_csv(&cell_rows(&output.student_field), bom)?),
        ("totals.csv", to_csv(&cell_rows(&output.totals), bom)?),
        ("pivot.csv", pivot_csv(&output.pivot, bom)?),
        ("summaries.csv", to_csv(&summary_rows(&output.summaries), bom)?),
        ("field_summaries.csv", to_csv(&field_summary_rows(&output.summaries), bom)?),
        ("ranking_top.csv", to_csv(&ranking_rows(&output.top), bom)?),
        ("ranking_bottom.csv", to_csv(&ranking_rows(&output.bottom), bom)?),
        ("field_rollups.csv", to_csv(&output.field_rollups, bom)?),
        ("report.json", serde_json::to_string_pretty(output)?),
    ];

    let mut written = Vec::with_capacity(files.len());
    for (name, content) in files {
        let path = dir.join(name);
        fs::write(&path, content)?;
        written.push(path);
    }
    Ok(written)
}

/// `{name}_{id}.csv` with whitespace and path separators replaced by `_`.
pub fn student_file_name(identity: &StudentIdentity) -> String {
    let clean = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_whitespace() || c == '/' || c == '\\' { '_' } else { c })
            .collect()
    };
    format!(
        "{}_{}.csv",
        clean(&identity.canonical_name),
        clean(&identity.canonical_id)
    )
}

/// One CSV of flat records per student, ordered by date (invalid last) then time.
pub fn write_student_files(records: &[ResolvedRecord], dir: &Path, bom: bool) -> ExportResult<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;

    let mut by_student: BTreeMap<(&str, &str), Vec<ResolvedRecord>> = BTreeMap::new();
    for record in records {
        by_student
            .entry(record.identity.sort_key())
            .or_default()
            .push(record.clone());
    }

    let mut written = Vec::with_capacity(by_student.len());
    for mut student_records in by_student.into_values() {
        student_records.sort_by(|a, b| {
            let key = |r: &ResolvedRecord| (r.record.date.is_none(), r.record.date, r.record.time.clone());
            key(a).cmp(&key(b))
        });
        let Some(first) = student_records.first() else { continue };
        let path = dir.join(student_file_name(&first.identity));
        fs::write(&path, to_csv(&record_rows(&student_records), bom)?)?;
        written.push(path);
    }
    Ok(written)
}
