//! Per-student summaries, rankings and batch-wide statistics.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::models::{
    CohortStats, DateRange, FieldPick, FieldRollup, FieldSummary, GroupKeys, RankOrder,
    RankedStudent, Ranking, ResolvedRecord, StudentMark, StudentSummary,
};
use crate::transform::aggregate::{aggregate, round1};

type StudentKey = (String, String);

fn student_key(record: &ResolvedRecord) -> StudentKey {
    let (name, id) = record.identity.sort_key();
    (name.to_string(), id.to_string())
}

// =============================================================================
// Student summaries
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extreme {
    Weakest,
    Strongest,
}

/// Threshold-gated extremum over a student's fields.
///
/// Only fields with at least `min_attempts` attempted questions compete. Fields
/// arrive sorted by name and only a strictly better accuracy replaces the
/// current pick, so ties go to the smallest field name.
fn pick_field(fields: &[FieldSummary], min_attempts: u64, extreme: Extreme) -> FieldPick {
    let mut best: Option<&FieldSummary> = None;

    for field in fields.iter().filter(|f| f.attempted >= min_attempts) {
        let better = match best {
            None => true,
            Some(current) => {
                let ord = field.accuracy.total_cmp(&current.accuracy);
                match extreme {
                    Extreme::Weakest => ord == Ordering::Less,
                    Extreme::Strongest => ord == Ordering::Greater,
                }
            }
        };
        if better {
            best = Some(field);
        }
    }

    best.map(|f| FieldPick::Field {
        field: f.field.clone(),
        accuracy: f.accuracy,
    })
    .unwrap_or(FieldPick::NotApplicable)
}

/// Summarize every student, ordered by canonical name then id.
pub fn summarize(records: &[ResolvedRecord], min_field_attempts: u64) -> Vec<StudentSummary> {
    let mut activity: HashMap<StudentKey, DateRange> = HashMap::new();
    for record in records {
        let Some(date) = record.record.date else { continue };
        activity
            .entry(student_key(record))
            .and_modify(|range| {
                range.start = range.start.min(date);
                range.end = range.end.max(date);
            })
            .or_insert(DateRange { start: date, end: date });
    }

    let mut fields: HashMap<StudentKey, Vec<FieldSummary>> = HashMap::new();
    for cell in aggregate(records, GroupKeys::STUDENT_FIELD).cells {
        let Some(student) = &cell.student else { continue };
        let (name, id) = student.sort_key();
        fields
            .entry((name.to_string(), id.to_string()))
            .or_default()
            .push(FieldSummary {
                field: cell.field.clone().unwrap_or_default(),
                attempted: cell.attempted,
                correct: cell.correct,
                accuracy: cell.accuracy,
                occurrence_count: cell.record_count,
            });
    }

    aggregate(records, GroupKeys::STUDENT)
        .cells
        .into_iter()
        .filter_map(|cell| {
            let identity = cell.student?;
            let (name, id) = identity.sort_key();
            let key = (name.to_string(), id.to_string());
            let student_fields = fields.remove(&key).unwrap_or_default();

            Some(StudentSummary {
                total_attempted: cell.attempted,
                total_correct: cell.correct,
                overall_accuracy: cell.accuracy,
                weakest: pick_field(&student_fields, min_field_attempts, Extreme::Weakest),
                strongest: pick_field(&student_fields, min_field_attempts, Extreme::Strongest),
                distinct_field_count: student_fields.len(),
                activity: activity.get(&key).copied(),
                total_sessions: cell.record_count,
                fields: student_fields,
                identity,
            })
        })
        .collect()
}

// =============================================================================
// Rankings
// =============================================================================

/// Order summaries by overall accuracy.
///
/// The sort is stable, so equal accuracies keep the input order (name order
/// when fed straight from [`summarize`]). `limit` truncates after sorting.
pub fn rank(summaries: &[StudentSummary], order: RankOrder, limit: Option<usize>) -> Ranking {
    let mut sorted: Vec<&StudentSummary> = summaries.iter().collect();
    sorted.sort_by(|a, b| match order {
        RankOrder::Descending => b.overall_accuracy.total_cmp(&a.overall_accuracy),
        RankOrder::Ascending => a.overall_accuracy.total_cmp(&b.overall_accuracy),
    });

    let entries = sorted
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .enumerate()
        .map(|(i, summary)| RankedStudent {
            rank: i + 1,
            summary: summary.clone(),
        })
        .collect();

    Ranking { order, entries }
}

// =============================================================================
// Batch-wide statistics
// =============================================================================

/// Per-field totals across all students, weakest field first.
pub fn field_rollups(records: &[ResolvedRecord]) -> Vec<FieldRollup> {
    let mut rollups: Vec<FieldRollup> = aggregate(records, GroupKeys::FIELD)
        .cells
        .into_iter()
        .map(|cell| FieldRollup {
            field: cell.field.unwrap_or_default(),
            attempted: cell.attempted,
            correct: cell.correct,
            accuracy: cell.accuracy,
            student_count: cell.student_count,
            record_count: cell.record_count,
        })
        .collect();

    rollups.sort_by(|a, b| {
        a.accuracy
            .total_cmp(&b.accuracy)
            .then_with(|| a.field.cmp(&b.field))
    });
    rollups
}

fn mark(summary: &StudentSummary) -> StudentMark {
    StudentMark {
        student_id: summary.identity.canonical_id.clone(),
        name: summary.identity.canonical_name.clone(),
        accuracy: summary.overall_accuracy,
    }
}

/// Mean, median and extremes of overall accuracy. Ties on the extremes go to
/// the first student in summary order.
pub fn cohort_stats(summaries: &[StudentSummary], record_count: usize) -> CohortStats {
    let mut stats = CohortStats {
        student_count: summaries.len(),
        record_count,
        mean_accuracy: 0.0,
        median_accuracy: 0.0,
        highest: None,
        lowest: None,
    };
    if summaries.is_empty() {
        return stats;
    }

    let mut values: Vec<f64> = summaries.iter().map(|s| s.overall_accuracy).collect();
    stats.mean_accuracy = round1(values.iter().sum::<f64>() / values.len() as f64);

    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    stats.median_accuracy = if values.len() % 2 == 0 {
        round1((values[mid - 1] + values[mid]) / 2.0)
    } else {
        values[mid]
    };

    let mut highest = &summaries[0];
    let mut lowest = &summaries[0];
    for summary in &summaries[1..] {
        if summary.overall_accuracy > highest.overall_accuracy {
            highest = summary;
        }
        if summary.overall_accuracy < lowest.overall_accuracy {
            lowest = summary;
        }
    }
    stats.highest = Some(mark(highest));
    stats.lowest = Some(mark(lowest));
    stats
}
