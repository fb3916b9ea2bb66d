//! Group resolved records and sum their counts.
//!
//! # Architecture
//!
//! ```text
//! Resolved records                      Cells (student+field)
//! ┌──────────────────────────────┐     ┌──────────────────────────────┐
//! │ 田中, 02/16, Math, 20 / 10   │     │ 田中, Math, 30 / 18, 60.0%   │
//! │ 田中, 02/17, Math, 10 /  8   │ →   ├──────────────────────────────┤
//! │ 鈴木, 02/16, Art,   5 /  5   │     │ 鈴木, Art,   5 /  5, 100.0%  │
//! └──────────────────────────────┘     └──────────────────────────────┘
//! ```
//!
//! Accuracy is always recomputed from the summed counts, never averaged from
//! per-record percentages.

use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::models::{AggregatedCell, Aggregation, GroupKeys, ResolvedRecord, StudentIdentity};

/// Round to one decimal place, exact halves to the even digit.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round_ties_even() / 10.0
}

/// `correct / attempted * 100` rounded to one decimal; 0 when nothing was attempted.
/// Not clamped: malformed sources with `correct > attempted` exceed 100.
pub fn accuracy(correct: u64, attempted: u64) -> f64 {
    if attempted == 0 {
        return 0.0;
    }
    round1(correct as f64 / attempted as f64 * 100.0)
}

/// Date position in the sort order: real dates ascending, invalid ones last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum DateSlot {
    Day(NaiveDate),
    Invalid,
    Ungrouped,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct CellKey {
    /// (canonical name, canonical id)
    student: Option<(String, String)>,
    date: DateSlot,
    field: Option<String>,
}

impl CellKey {
    fn of(record: &ResolvedRecord, keys: GroupKeys) -> Self {
        let identity = &record.identity;
        Self {
            student: keys
                .student
                .then(|| (identity.canonical_name.clone(), identity.canonical_id.clone())),
            date: match (keys.date, record.record.date) {
                (false, _) => DateSlot::Ungrouped,
                (true, Some(d)) => DateSlot::Day(d),
                (true, None) => DateSlot::Invalid,
            },
            field: keys.field.then(|| record.record.field.clone()),
        }
    }
}

/// Accumulator for one cell.
struct CellBuilder {
    student: Option<Arc<StudentIdentity>>,
    date: Option<NaiveDate>,
    field: Option<String>,
    attempted: u64,
    correct: u64,
    records: usize,
    students: BTreeSet<(String, String)>,
}

impl CellBuilder {
    fn new(record: &ResolvedRecord, keys: GroupKeys) -> Self {
        Self {
            student: keys.student.then(|| Arc::clone(&record.identity)),
            date: if keys.date { record.record.date } else { None },
            field: keys.field.then(|| record.record.field.clone()),
            attempted: 0,
            correct: 0,
            records: 0,
            students: BTreeSet::new(),
        }
    }

    fn add(&mut self, record: &ResolvedRecord) {
        // Counts are unbounded text; saturate rather than wrap.
        self.attempted = self.attempted.saturating_add(record.record.attempted);
        self.correct = self.correct.saturating_add(record.record.correct);
        self.records += 1;
        let (name, id) = record.identity.sort_key();
        self.students.insert((name.to_string(), id.to_string()));
    }

    fn build(self) -> AggregatedCell {
        AggregatedCell {
            student: self.student,
            date: self.date,
            field: self.field,
            attempted: self.attempted,
            correct: self.correct,
            accuracy: accuracy(self.correct, self.attempted),
            record_count: self.records,
            student_count: self.students.len(),
        }
    }
}

/// Sum counts per group.
///
/// Cells come out ordered by student (name, then id), date (invalid last),
/// then field.
pub fn aggregate(records: &[ResolvedRecord], keys: GroupKeys) -> Aggregation {
    let mut groups: BTreeMap<CellKey, CellBuilder> = BTreeMap::new();

    for record in records {
        groups
            .entry(CellKey::of(record, keys))
            .or_insert_with(|| CellBuilder::new(record, keys))
            .add(record);
    }

    Aggregation {
        keys,
        cells: groups.into_values().map(CellBuilder::build).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawRecord;
    use crate::transform::identity::{apply, resolve, ResolutionStrategy};
    use crate::transform::normalize::Normalizer;
    use std::collections::HashMap;

    fn resolved(raw: Vec<RawRecord>) -> Vec<ResolvedRecord> {
        let records = Normalizer::default().normalize(&raw);
        let map = resolve(&records, ResolutionStrategy::IdentifierKeyed);
        apply(records, &map)
    }

    fn row(id: &str, date: &str, field: &str, attempted: &str, correct: &str) -> RawRecord {
        let name = match id {
            "AB1234" => "田中 太郎",
            "CD5678" => "鈴木 花子",
            _ => "山田 一",
        };
        RawRecord::new(id, name, date, field, attempted, correct)
    }

    #[test]
    fn test_accuracy_rounding() {
        assert_eq!(accuracy(18, 30), 60.0);
        assert_eq!(accuracy(1, 3), 33.3);
        assert_eq!(accuracy(2, 3), 66.7);
        assert_eq!(accuracy(0, 0), 0.0);
        assert_eq!(accuracy(5, 0), 0.0);
        // Exact halves go to the even digit.
        assert_eq!(accuracy(1, 16), 6.2);
        assert_eq!(accuracy(5, 16), 31.2);
        assert_eq!(accuracy(3, 16), 18.8);
    }

    #[test]
    fn test_huge_counts_saturate() {
        let records = resolved(vec![
            row("AB1234", "2026/02/16", "Math", "18446744073709551615", "1"),
            row("AB1234", "2026/02/17", "Math", "1", "1"),
        ]);
        let agg = aggregate(&records, GroupKeys::STUDENT);

        assert_eq!(agg.cells.len(), 1);
        assert_eq!(agg.cells[0].attempted, u64::MAX);
        assert_eq!(agg.cells[0].correct, 2);
        assert_eq!(agg.cells[0].record_count, 2);
    }

    #[test]
    fn test_student_field_sums_and_recomputes() {
        let records = resolved(vec![
            RawRecord::new("AB1234", "田中 太郎", "2026/02/16", "Math", "20", "10"),
            RawRecord::new("AB1234", "田中太郎", "2026/02/17", "Math", "10", "8"),
        ]);
        let agg = aggregate(&records, GroupKeys::STUDENT_FIELD);

        assert_eq!(agg.cells.len(), 1);
        let cell = &agg.cells[0];
        assert_eq!(cell.attempted, 30);
        assert_eq!(cell.correct, 18);
        assert_eq!(cell.accuracy, 60.0);
        assert_eq!(cell.record_count, 2);
        assert_eq!(cell.student.as_ref().unwrap().canonical_id, "AB1234");
        assert!(cell.date.is_none());
    }

    #[test]
    fn test_accuracy_is_not_an_average_of_rows() {
        // Row percentages 100% and 11.1% would average to 55.6%.
        let records = resolved(vec![
            row("AB1234", "2026/02/16", "Math", "1", "1"),
            row("AB1234", "2026/02/16", "Math", "9", "1"),
        ]);
        let agg = aggregate(&records, GroupKeys::STUDENT);
        assert_eq!(agg.cells[0].accuracy, 20.0);
    }

    #[test]
    fn test_zero_attempted_is_zero_accuracy() {
        let records = resolved(vec![row("AB1234", "2026/02/16", "Math", "0", "0")]);
        let agg = aggregate(&records, GroupKeys::DETAIL);
        assert_eq!(agg.cells.len(), 1);
        assert_eq!(agg.cells[0].accuracy, 0.0);
    }

    #[test]
    fn test_correct_above_attempted_not_clamped() {
        let records = resolved(vec![row("AB1234", "2026/02/16", "Math", "5", "8")]);
        let agg = aggregate(&records, GroupKeys::STUDENT_FIELD);
        assert_eq!(agg.cells[0].correct, 8);
        assert_eq!(agg.cells[0].accuracy, 160.0);
    }

    #[test]
    fn test_detail_ordering_and_invalid_dates_last() {
        let records = resolved(vec![
            row("AB1234", "garbled", "Math", "4", "2"),
            row("AB1234", "2026/02/17", "Art", "4", "2"),
            row("AB1234", "2026/02/16", "Math", "4", "2"),
            row("AB1234", "2026/02/16", "Art", "4", "2"),
        ]);
        let agg = aggregate(&records, GroupKeys::DETAIL);

        let keys: Vec<(Option<NaiveDate>, String)> = agg
            .cells
            .iter()
            .map(|c| (c.date, c.field.clone().unwrap()))
            .collect();
        let d = |day| NaiveDate::from_ymd_opt(2026, 2, day);
        assert_eq!(
            keys,
            vec![
                (d(16), "Art".to_string()),
                (d(16), "Math".to_string()),
                (d(17), "Art".to_string()),
                (None, "Math".to_string()),
            ]
        );
    }

    #[test]
    fn test_students_ordered_by_name() {
        let records = resolved(vec![
            row("ZZ0001", "2026/02/16", "Math", "1", "1"),
            row("CD5678", "2026/02/16", "Math", "1", "1"),
            row("AB1234", "2026/02/16", "Math", "1", "1"),
        ]);
        let agg = aggregate(&records, GroupKeys::STUDENT);
        let names: Vec<_> = agg
            .cells
            .iter()
            .map(|c| c.student.as_ref().unwrap().canonical_name.clone())
            .collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_field_rollup_counts_students() {
        let records = resolved(vec![
            row("AB1234", "2026/02/16", "Math", "10", "5"),
            row("AB1234", "2026/02/17", "Math", "10", "5"),
            row("CD5678", "2026/02/16", "Math", "10", "10"),
        ]);
        let agg = aggregate(&records, GroupKeys::FIELD);
        assert_eq!(agg.cells.len(), 1);
        let cell = &agg.cells[0];
        assert!(cell.student.is_none());
        assert_eq!(cell.student_count, 2);
        assert_eq!(cell.record_count, 3);
        assert_eq!(cell.accuracy, 66.7);
    }

    #[test]
    fn test_sum_conservation_over_partition() {
        let records = resolved(vec![
            row("AB1234", "2026/02/16", "Math", "20", "10"),
            row("AB1234", "2026/02/17", "Math", "10", "8"),
            row("AB1234", "2026/02/17", "Art", "7", "3"),
            row("CD5678", "2026/02/16", "Math", "12", "12"),
            row("CD5678", "bad", "Art", "x", "1"),
            row("EF0001", "2026/02/18", "Art", "3", "0"),
        ]);

        let whole = aggregate(&records, GroupKeys::STUDENT_FIELD);

        let (left, right): (Vec<_>, Vec<_>) = records
            .iter()
            .cloned()
            .enumerate()
            .partition(|(i, _)| i % 2 == 0);
        let left: Vec<_> = left.into_iter().map(|(_, r)| r).collect();
        let right: Vec<_> = right.into_iter().map(|(_, r)| r).collect();

        let mut merged: HashMap<(String, String), (u64, u64)> = HashMap::new();
        for part in [aggregate(&left, GroupKeys::STUDENT_FIELD), aggregate(&right, GroupKeys::STUDENT_FIELD)] {
            for cell in part.cells {
                let key = (
                    cell.student.unwrap().canonical_id.clone(),
                    cell.field.unwrap(),
                );
                let entry = merged.entry(key).or_default();
                entry.0 += cell.attempted;
                entry.1 += cell.correct;
            }
        }

        assert_eq!(merged.len(), whole.cells.len());
        for cell in &whole.cells {
            let key = (
                cell.student.as_ref().unwrap().canonical_id.clone(),
                cell.field.clone().unwrap(),
            );
            assert_eq!(merged[&key], (cell.attempted, cell.correct));
        }
    }

    #[test]
    fn test_accuracy_bound_on_every_cell() {
        let records = resolved(vec![
            row("AB1234", "2026/02/16", "Math", "7", "3"),
            row("AB1234", "2026/02/16", "Art", "9", "9"),
            row("CD5678", "2026/02/16", "Math", "11", "4"),
        ]);
        for keys in [GroupKeys::DETAIL, GroupKeys::STUDENT_FIELD, GroupKeys::STUDENT, GroupKeys::FIELD] {
            for cell in aggregate(&records, keys).cells {
                assert!(cell.attempted > 0);
                let exact = cell.correct as f64 / cell.attempted as f64 * 100.0;
                assert_eq!(cell.accuracy, (exact * 10.0).round_ties_even() / 10.0);
                assert!(cell.accuracy >= 0.0);
            }
        }
    }
}
