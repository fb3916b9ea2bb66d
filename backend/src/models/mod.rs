//! Domain models for the quizstats pipeline.
//!
//! Each pipeline stage owns and returns its own collection of these types:
//!
//! - [`RawRecord`] - one row as read from a quiz export
//! - [`NormalizedRecord`] - cleaned row (names, identifier, counts, date)
//! - [`StudentIdentity`] - canonical (id, name) for all spellings of a student
//! - [`ResolvedRecord`] - normalized row bound to its identity
//! - [`AggregatedCell`] - summed counts for one group at a [`GroupKeys`] granularity
//! - [`StudentSummary`] / [`Ranking`] - per-student statistics and orderings
//! - [`FieldRollup`] / [`CohortStats`] - domain-wide statistics

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Label used wherever a statistic does not apply.
pub const NOT_APPLICABLE: &str = "N/A";

// =============================================================================
// Records
// =============================================================================

/// A record exactly as read from a source row. Every value is text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub student_id: String,
    pub name: String,
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    pub field: String,
    pub attempted: String,
    pub correct: String,
}

impl RawRecord {
    pub fn new(
        student_id: impl Into<String>,
        name: impl Into<String>,
        date: impl Into<String>,
        field: impl Into<String>,
        attempted: impl Into<String>,
        correct: impl Into<String>,
    ) -> Self {
        Self {
            student_id: student_id.into(),
            name: name.into(),
            date: date.into(),
            time: None,
            field: field.into(),
            attempted: attempted.into(),
            correct: correct.into(),
        }
    }

    pub fn with_time(mut self, time: impl Into<String>) -> Self {
        self.time = Some(time.into());
        self
    }
}

/// A cleaned record.
///
/// `correct` may exceed `attempted` when the source is malformed; the value is
/// passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    /// Canonical identifier (truncated to the configured width).
    pub student_id: String,
    /// Trimmed identifier before truncation.
    pub raw_student_id: String,
    /// Display name: trimmed, whitespace runs collapsed to one space.
    pub name: String,
    /// Matching name: all whitespace removed.
    pub name_key: String,
    /// `None` when the date cell could not be parsed.
    pub date: Option<NaiveDate>,
    /// Trimmed date text as found in the source.
    pub raw_date: String,
    pub time: Option<String>,
    pub field: String,
    pub attempted: u64,
    pub correct: u64,
    /// Set when a count had to be substituted with 0.
    pub coerced: bool,
}

// =============================================================================
// Identity
// =============================================================================

/// The single (identifier, name) pair standing for every raw variant of one student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentIdentity {
    pub canonical_id: String,
    pub canonical_name: String,
    /// Every canonical identifier observed for this student, sorted.
    pub variant_ids: Vec<String>,
    /// Every display spelling observed for this student, sorted.
    pub variant_names: Vec<String>,
}

impl StudentIdentity {
    /// Ordering key used for every student-ordered output: name, then id.
    pub fn sort_key(&self) -> (&str, &str) {
        (&self.canonical_name, &self.canonical_id)
    }
}

/// A normalized record bound to its resolved identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRecord {
    pub identity: Arc<StudentIdentity>,
    pub record: NormalizedRecord,
}

// =============================================================================
// Aggregation
// =============================================================================

/// Which dimensions an aggregation groups by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupKeys {
    pub student: bool,
    pub date: bool,
    pub field: bool,
}

impl GroupKeys {
    /// (student, date, field): the detailed matrix.
    pub const DETAIL: Self = Self { student: true, date: true, field: true };
    /// (student, field): per-student field rollups.
    pub const STUDENT_FIELD: Self = Self { student: true, date: false, field: true };
    /// (student): totals.
    pub const STUDENT: Self = Self { student: true, date: false, field: false };
    /// (field): domain-wide rollups.
    pub const FIELD: Self = Self { student: false, date: false, field: true };
}

impl fmt::Display for GroupKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = [
            (self.student, "student"),
            (self.date, "date"),
            (self.field, "field"),
        ]
        .iter()
        .filter(|(on, _)| *on)
        .map(|(_, name)| *name)
        .collect();

        if parts.is_empty() {
            write!(f, "all")
        } else {
            write!(f, "{}", parts.join("+"))
        }
    }
}

/// Summed counts for one group.
///
/// Dimensions not part of the grouping are `None`. When `date` is a grouping
/// key, `None` also stands for the group of records whose date was invalid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedCell {
    pub student: Option<Arc<StudentIdentity>>,
    pub date: Option<NaiveDate>,
    pub field: Option<String>,
    pub attempted: u64,
    pub correct: u64,
    /// Percentage with one decimal, computed from the sums.
    pub accuracy: f64,
    /// Number of records summed into this cell.
    pub record_count: usize,
    /// Number of distinct students contributing to this cell.
    pub student_count: usize,
}

/// Cells produced at one granularity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub keys: GroupKeys,
    pub cells: Vec<AggregatedCell>,
}

// =============================================================================
// Summaries
// =============================================================================

/// Per-student, per-field rollup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSummary {
    pub field: String,
    pub attempted: u64,
    pub correct: u64,
    pub accuracy: f64,
    pub occurrence_count: usize,
}

/// Outcome of a threshold-gated weakest/strongest selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldPick {
    Field { field: String, accuracy: f64 },
    /// No field met the minimum sample size.
    NotApplicable,
}

impl FieldPick {
    pub fn label(&self) -> &str {
        match self {
            FieldPick::Field { field, .. } => field,
            FieldPick::NotApplicable => NOT_APPLICABLE,
        }
    }

    /// Accuracy of the picked field, 0 when not applicable.
    pub fn accuracy(&self) -> f64 {
        match self {
            FieldPick::Field { accuracy, .. } => *accuracy,
            FieldPick::NotApplicable => 0.0,
        }
    }

    pub fn is_applicable(&self) -> bool {
        matches!(self, FieldPick::Field { .. })
    }
}

/// First and last valid activity dates of a student.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pattern = if self.start.year() == self.end.year() {
            "%m/%d"
        } else {
            "%Y/%m/%d"
        };
        write!(
            f,
            "{}〜{}",
            self.start.format(pattern),
            self.end.format(pattern)
        )
    }
}

/// Human label for an optional activity range.
pub fn activity_label(range: Option<&DateRange>) -> String {
    range
        .map(|r| r.to_string())
        .unwrap_or_else(|| NOT_APPLICABLE.to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentSummary {
    pub identity: Arc<StudentIdentity>,
    pub total_attempted: u64,
    pub total_correct: u64,
    pub overall_accuracy: f64,
    pub weakest: FieldPick,
    pub strongest: FieldPick,
    pub distinct_field_count: usize,
    pub activity: Option<DateRange>,
    /// Surviving records of this student (after dedup, resolution and exclusion).
    pub total_sessions: usize,
    /// Per-field rollups, sorted by field name.
    pub fields: Vec<FieldSummary>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankOrder {
    /// Highest accuracy first.
    Descending,
    /// Lowest accuracy first.
    Ascending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedStudent {
    /// 1-based position.
    pub rank: usize,
    pub summary: StudentSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ranking {
    pub order: RankOrder,
    pub entries: Vec<RankedStudent>,
}

/// Domain-wide statistics for one field across all students.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRollup {
    pub field: String,
    pub attempted: u64,
    pub correct: u64,
    pub accuracy: f64,
    pub student_count: usize,
    pub record_count: usize,
}

/// One student's name and accuracy, for cohort extremes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentMark {
    pub student_id: String,
    pub name: String,
    pub accuracy: f64,
}

/// Batch-wide statistics over every student summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortStats {
    pub student_count: usize,
    pub record_count: usize,
    pub mean_accuracy: f64,
    pub median_accuracy: f64,
    pub highest: Option<StudentMark>,
    pub lowest: Option<StudentMark>,
}

// =============================================================================
// Tests
// =============================================================================
