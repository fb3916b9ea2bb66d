//! Student × (date, field) pivot.
//!
//! Each row maps the columns a student actually has to their three values;
//! absent combinations stay absent rather than being zero-filled.

use chrono::NaiveDate;
use serde::ser::{SerializeSeq, Serializer};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{TransformError, TransformResult};
use crate::models::{AggregatedCell, Aggregation, GroupKeys, StudentIdentity, NOT_APPLICABLE};

/// The three values every pivot column group carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Attempted,
    Correct,
    Accuracy,
}

impl ValueKind {
    pub const ALL: [ValueKind; 3] = [ValueKind::Attempted, ValueKind::Correct, ValueKind::Accuracy];

    pub fn label(&self) -> &'static str {
        match self {
            ValueKind::Attempted => "attempted",
            ValueKind::Correct => "correct",
            ValueKind::Accuracy => "accuracy",
        }
    }
}

/// A (date, field) column group. `date` is `None` for invalid source dates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ColumnKey {
    pub date: Option<NaiveDate>,
    pub field: String,
}

impl ColumnKey {
    pub fn date_label(&self) -> String {
        self.date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| NOT_APPLICABLE.to_string())
    }

    /// Flattened header, e.g. `2026-02-16/Math/accuracy`.
    pub fn header(&self, kind: ValueKind) -> String {
        format!("{}/{}/{}", self.date_label(), self.field, kind.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PivotCell {
    pub attempted: u64,
    pub correct: u64,
    pub accuracy: f64,
}

impl PivotCell {
    /// Text rendering of one value, accuracy with one decimal.
    pub fn display(&self, kind: ValueKind) -> String {
        match kind {
            ValueKind::Attempted => self.attempted.to_string(),
            ValueKind::Correct => self.correct.to_string(),
            ValueKind::Accuracy => format!("{:.1}", self.accuracy),
        }
    }
}

impl From<&AggregatedCell> for PivotCell {
    fn from(cell: &AggregatedCell) -> Self {
        Self {
            attempted: cell.attempted,
            correct: cell.correct,
            accuracy: cell.accuracy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PivotRow {
    pub student: Arc<StudentIdentity>,
    #[serde(serialize_with = "serialize_cells")]
    pub cells: HashMap<ColumnKey, PivotCell>,
}

impl PivotRow {
    pub fn get(&self, column: &ColumnKey) -> Option<&PivotCell> {
        self.cells.get(column)
    }
}

/// Rows ordered by student (name, then id), columns in display order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PivotMatrix {
    pub columns: Vec<ColumnKey>,
    pub rows: Vec<PivotRow>,
}

impl PivotMatrix {
    /// Flattened headers: identity columns, then `date/field/kind` per column group.
    pub fn headers(&self) -> Vec<String> {
        let mut headers = vec!["student_id".to_string(), "name".to_string()];
        for column in &self.columns {
            headers.extend(ValueKind::ALL.iter().map(|kind| column.header(*kind)));
        }
        headers
    }

    pub fn row(&self, student_id: &str) -> Option<&PivotRow> {
        self.rows.iter().find(|r| r.student.canonical_id == student_id)
    }
}

/// Sort position of a column: dated before undated, then date, then field rank
/// in the caller's order, then field name.
fn column_order<'a>(
    column: &'a ColumnKey,
    ranks: &HashMap<&str, usize>,
) -> (bool, Option<NaiveDate>, usize, &'a str) {
    let rank = ranks.get(column.field.as_str()).copied().unwrap_or(usize::MAX);
    (column.date.is_none(), column.date, rank, column.field.as_str())
}

/// Build the pivot from (student, date, field) cells.
///
/// `field_order` fixes the field sequence inside each date; fields it does not
/// list follow lexicographically.
pub fn pivot(aggregation: &Aggregation, field_order: Option<&[String]>) -> TransformResult<PivotMatrix> {
    if aggregation.keys != GroupKeys::DETAIL {
        return Err(TransformError::GranularityMismatch {
            expected: GroupKeys::DETAIL.to_string(),
            found: aggregation.keys.to_string(),
        });
    }

    let ranks: HashMap<&str, usize> = field_order
        .unwrap_or_default()
        .iter()
        .enumerate()
        .map(|(i, f)| (f.as_str(), i))
        .collect();

    let mut columns: HashSet<ColumnKey> = HashSet::new();
    let mut rows: Vec<PivotRow> = Vec::new();

    // Cells arrive grouped by student, so one row is open at a time.
    for cell in &aggregation.cells {
        let Some(student) = &cell.student else { continue };
        let column = ColumnKey {
            date: cell.date,
            field: cell.field.clone().unwrap_or_default(),
        };

        let same_student = rows
            .last()
            .is_some_and(|row| row.student.sort_key() == student.sort_key());
        if !same_student {
            rows.push(PivotRow {
                student: Arc::clone(student),
                cells: HashMap::new(),
            });
        }
        if let Some(row) = rows.last_mut() {
            row.cells.insert(column.clone(), PivotCell::from(cell));
        }
        columns.insert(column);
    }

    let mut columns: Vec<ColumnKey> = columns.into_iter().collect();
    columns.sort_by(|a, b| column_order(a, &ranks).cmp(&column_order(b, &ranks)));

    Ok(PivotMatrix { columns, rows })
}

/// Serialize a row's cell map as a list ordered by date then field.
fn serialize_cells<S>(cells: &HashMap<ColumnKey, PivotCell>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    #[derive(Serialize)]
    struct Entry<'a> {
        date: Option<NaiveDate>,
        field: &'a str,
        #[serde(flatten)]
        cell: &'a PivotCell,
    }

    let no_ranks = HashMap::new();
    let mut entries: Vec<(&ColumnKey, &PivotCell)> = cells.iter().collect();
    entries.sort_by(|a, b| column_order(a.0, &no_ranks).cmp(&column_order(b.0, &no_ranks)));

    let mut seq = serializer.serialize_seq(Some(entries.len()))?;
    for (key, cell) in entries {
        seq.serialize_element(&Entry {
            date: key.date,
            field: &key.field,
            cell,
        })?;
    }
    seq.end()
}
