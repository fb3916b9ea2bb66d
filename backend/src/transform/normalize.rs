//! Record normalization.
//!
//! Cleans every raw field without ever dropping a record. Unparsable counts
//! become 0 (record flagged as coerced) and unparsable dates become `None`;
//! [`NormalizeStats`] counts both for reporting.

use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;

use crate::config::{PipelineOptions, DEFAULT_DATE_FORMATS, DEFAULT_ID_WIDTH};
use crate::models::{NormalizedRecord, RawRecord};

/// Display normalization: trim and collapse whitespace runs (including
/// U+3000) to a single ASCII space.
pub fn display_name(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Matching normalization: remove every whitespace character.
pub fn matching_name(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_whitespace()).collect()
}

/// First `width` characters of the trimmed identifier.
pub fn canonical_id(raw: &str, width: usize) -> String {
    raw.trim().chars().take(width).collect()
}

/// Parse a question count. Accepts full-width digits and integral decimals
/// (`"12.0"`); anything negative, fractional or non-numeric is `None`.
pub fn parse_count(raw: &str) -> Option<u64> {
    let ascii: String = raw
        .trim()
        .chars()
        .map(|c| match c {
            '０'..='９' => char::from_u32(c as u32 - '０' as u32 + '0' as u32).unwrap_or(c),
            '．' => '.',
            _ => c,
        })
        .collect();

    if ascii.is_empty() {
        return None;
    }
    if let Ok(n) = ascii.parse::<u64>() {
        return Some(n);
    }
    match ascii.parse::<f64>() {
        Ok(f) if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 => {
            Some(f as u64)
        }
        _ => None,
    }
}

/// Canonicalise `H:MM[:SS]` to `HH:MM:SS`; other non-empty text is kept trimmed.
pub fn normalize_time(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    ["%H:%M:%S", "%H:%M"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(trimmed, fmt).ok())
        .map(|t| t.format("%H:%M:%S").to_string())
        .or_else(|| Some(trimmed.to_string()))
}

/// Field-level cleaning configured with the identifier width and date formats.
#[derive(Debug, Clone)]
pub struct Normalizer {
    id_width: usize,
    date_formats: Vec<String>,
}

impl Normalizer {
    pub fn new(id_width: usize, date_formats: Vec<String>) -> Self {
        Self {
            id_width,
            date_formats,
        }
    }

    pub fn from_options(options: &PipelineOptions) -> Self {
        Self::new(options.id_width, options.date_formats.clone())
    }

    pub fn normalize(&self, raw: &[RawRecord]) -> Vec<NormalizedRecord> {
        raw.iter().map(|r| self.normalize_record(r)).collect()
    }

    pub fn normalize_record(&self, raw: &RawRecord) -> NormalizedRecord {
        let attempted = parse_count(&raw.attempted);
        let correct = parse_count(&raw.correct);

        NormalizedRecord {
            student_id: canonical_id(&raw.student_id, self.id_width),
            raw_student_id: raw.student_id.trim().to_string(),
            name: display_name(&raw.name),
            name_key: matching_name(&raw.name),
            date: self.parse_date(&raw.date),
            raw_date: raw.date.trim().to_string(),
            time: raw.time.as_deref().and_then(normalize_time),
            field: raw.field.trim().to_string(),
            attempted: attempted.unwrap_or(0),
            correct: correct.unwrap_or(0),
            coerced: attempted.is_none() || correct.is_none(),
        }
    }

    /// Try every configured format on the whole cell, then on its date part
    /// when a time component follows.
    pub fn parse_date(&self, raw: &str) -> Option<NaiveDate> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        let date_part = trimmed
            .split(|c: char| c.is_whitespace() || c == 'T')
            .next()
            .unwrap_or(trimmed);

        [trimmed, date_part].iter().find_map(|candidate| {
            self.date_formats
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(candidate, fmt).ok())
        })
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(
            DEFAULT_ID_WIDTH,
            DEFAULT_DATE_FORMATS.iter().map(|s| s.to_string()).collect(),
        )
    }
}

/// Diagnostic counters for a normalized batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeStats {
    pub records: usize,
    /// Records with at least one count substituted by 0.
    pub coerced: usize,
    /// Records whose date is invalid or missing.
    pub invalid_dates: usize,
}

impl NormalizeStats {
    pub fn from_records(records: &[NormalizedRecord]) -> Self {
        Self {
            records: records.len(),
            coerced: records.iter().filter(|r| r.coerced).count(),
            invalid_dates: records.iter().filter(|r| r.date.is_none()).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_collapses_fullwidth_space() {
        assert_eq!(display_name("  田中\u{3000}\u{3000}太郎 "), "田中 太郎");
        assert_eq!(display_name("Sato\t  Hanako"), "Sato Hanako");
    }

    #[test]
    fn test_matching_name_strips_all_whitespace() {
        assert_eq!(matching_name(" 田中\u{3000}太郎 "), "田中太郎");
        assert_eq!(matching_name("田中 太郎"), matching_name("田中太郎"));
    }

    #[test]
    fn test_canonical_id_truncates_to_width() {
        assert_eq!(canonical_id(" AB1234-07 ", 6), "AB1234");
        assert_eq!(canonical_id("AB12", 6), "AB12");
        assert_eq!(canonical_id("", 6), "");
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("20"), Some(20));
        assert_eq!(parse_count(" 7 "), Some(7));
        assert_eq!(parse_count("12.0"), Some(12));
        assert_eq!(parse_count("２０"), Some(20));
        assert_eq!(parse_count("12.5"), None);
        assert_eq!(parse_count("-3"), None);
        assert_eq!(parse_count("abc"), None);
        assert_eq!(parse_count(""), None);
    }

    #[test]
    fn test_normalize_time() {
        assert_eq!(normalize_time("9:05"), Some("09:05:00".to_string()));
        assert_eq!(normalize_time("13:45:10"), Some("13:45:10".to_string()));
        assert_eq!(normalize_time(" 午前 "), Some("午前".to_string()));
        assert_eq!(normalize_time("  "), None);
    }

    #[test]
    fn test_parse_date_formats() {
        let n = Normalizer::default();
        let expected = NaiveDate::from_ymd_opt(2026, 2, 16);
        assert_eq!(n.parse_date("2026/02/16"), expected);
        assert_eq!(n.parse_date("2026/2/16"), expected);
        assert_eq!(n.parse_date("2026-02-16"), expected);
        assert_eq!(n.parse_date("2026/02/16 10:30:00"), expected);
        assert_eq!(n.parse_date("2026-02-16T10:30:00"), expected);
        assert_eq!(n.parse_date("16 Feb"), None);
        assert_eq!(n.parse_date(""), None);
    }

    #[test]
    fn test_normalize_record_coercion() {
        let raw = RawRecord::new("AB1234X", "田中　太郎", "not a date", " Math ", "abc", "5");
        let rec = Normalizer::default().normalize_record(&raw);

        assert_eq!(rec.student_id, "AB1234");
        assert_eq!(rec.raw_student_id, "AB1234X");
        assert_eq!(rec.name, "田中 太郎");
        assert_eq!(rec.name_key, "田中太郎");
        assert_eq!(rec.field, "Math");
        assert_eq!(rec.attempted, 0);
        assert_eq!(rec.correct, 5);
        assert!(rec.coerced);
        assert!(rec.date.is_none());
        assert_eq!(rec.raw_date, "not a date");
    }

    #[test]
    fn test_correct_above_attempted_passes_through() {
        let raw = RawRecord::new("AB1234", "A", "2026/02/16", "Math", "5", "8");
        let rec = Normalizer::default().normalize_record(&raw);
        assert_eq!((rec.attempted, rec.correct), (5, 8));
        assert!(!rec.coerced);
    }

    #[test]
    fn test_no_record_dropped_and_stats() {
        let raw = vec![
            RawRecord::new("AB1234", "A", "2026/02/16", "Math", "10", "5"),
            RawRecord::new("", "", "", "", "", ""),
            RawRecord::new("AB1235", "B", "bad", "Math", "x", "1"),
        ];
        let records = Normalizer::default().normalize(&raw);
        assert_eq!(records.len(), 3);

        let stats = NormalizeStats::from_records(&records);
        assert_eq!(stats.records, 3);
        assert_eq!(stats.coerced, 2);
        assert_eq!(stats.invalid_dates, 2);
    }
}
