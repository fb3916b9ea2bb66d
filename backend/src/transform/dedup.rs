//! Exact-duplicate removal across overlapping exports.

use std::collections::HashSet;

use crate::models::NormalizedRecord;

/// Equality key of a normalized record. The coercion flag and raw identifier
/// are not part of it; an invalid date compares by its raw text.
#[derive(Debug, PartialEq, Eq, Hash)]
struct RecordKey<'a> {
    student_id: &'a str,
    name: &'a str,
    date: DateKey<'a>,
    time: Option<&'a str>,
    field: &'a str,
    attempted: u64,
    correct: u64,
}

#[derive(Debug, PartialEq, Eq, Hash)]
enum DateKey<'a> {
    Valid(chrono::NaiveDate),
    Invalid(&'a str),
}

impl<'a> From<&'a NormalizedRecord> for RecordKey<'a> {
    fn from(r: &'a NormalizedRecord) -> Self {
        Self {
            student_id: &r.student_id,
            name: &r.name,
            date: match r.date {
                Some(d) => DateKey::Valid(d),
                None => DateKey::Invalid(&r.raw_date),
            },
            time: r.time.as_deref(),
            field: &r.field,
            attempted: r.attempted,
            correct: r.correct,
        }
    }
}

/// Result of deduplication.
#[derive(Debug, Clone)]
pub struct DedupResult {
    /// Surviving records, first occurrences in input order.
    pub records: Vec<NormalizedRecord>,
    pub removed: usize,
}

/// Remove exact duplicates, keeping the first occurrence of each record.
pub fn dedup(records: &[NormalizedRecord]) -> DedupResult {
    let mut seen: HashSet<RecordKey<'_>> = HashSet::with_capacity(records.len());
    let mut kept = Vec::with_capacity(records.len());

    for record in records {
        if seen.insert(RecordKey::from(record)) {
            kept.push(record.clone());
        }
    }

    DedupResult {
        removed: records.len() - kept.len(),
        records: kept,
    }
}
