//! High-level pipeline API.
//!
//! Combines every stage: loading, normalization, deduplication, identity
//! resolution, exclusion, aggregation, pivot and summaries.
//!
//! # Example
//!
//! ```rust,ignore
//! use quizstats::{run_paths, PipelineOptions};
//! use std::path::PathBuf;
//!
//! let output = run_paths(&[PathBuf::from("exports/")], true, &PipelineOptions::default())?;
//! println!("{} students", output.summaries.len());
//! ```

use serde::Serialize;
use std::path::PathBuf;

use crate::api::logs::{log_info, log_success, log_warning};
use crate::config::PipelineOptions;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    Aggregation, CohortStats, FieldRollup, GroupKeys, RankOrder, Ranking, RawRecord,
    ResolvedRecord, StudentSummary,
};
use crate::parser::{discover_sources, load_sources, LoadReport, SkippedSource, SourceInfo, SourceInput};
use crate::transform::aggregate::aggregate;
use crate::transform::dedup::dedup;
use crate::transform::identity::{apply, exclude, resolve, ResolutionStrategy};
use crate::transform::normalize::{NormalizeStats, Normalizer};
use crate::transform::pivot::{pivot, PivotMatrix};
use crate::transform::summary::{cohort_stats, field_rollups, rank, summarize};

/// Counters collected along the way.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    /// Rows read from all sources.
    pub input_records: usize,
    /// Rows with a count substituted by 0.
    pub coerced_records: usize,
    /// Rows whose date could not be parsed.
    pub invalid_dates: usize,
    pub duplicates_removed: usize,
    /// Distinct students after resolution (before exclusion).
    pub identities: usize,
    pub excluded_records: usize,
    /// Exclusion entries that matched nobody.
    pub unmatched_exclusions: Vec<String>,
    pub skipped_sources: Vec<SkippedSource>,
}

/// Everything one run produces.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutput {
    pub strategy: ResolutionStrategy,
    /// Surviving records bound to their identities.
    pub records: Vec<ResolvedRecord>,
    /// (student, date, field)
    pub detail: Aggregation,
    /// (student, field)
    pub student_field: Aggregation,
    /// (student)
    pub totals: Aggregation,
    /// (field)
    pub field_totals: Aggregation,
    pub pivot: PivotMatrix,
    pub summaries: Vec<StudentSummary>,
    /// Highest accuracy first.
    pub top: Ranking,
    /// Lowest accuracy first.
    pub bottom: Ranking,
    pub field_rollups: Vec<FieldRollup>,
    pub cohort: CohortStats,
    pub diagnostics: Diagnostics,
    pub sources: Vec<SourceInfo>,
}

/// Run the pipeline over records that are already in memory.
pub fn run(raw: Vec<RawRecord>, options: &PipelineOptions) -> PipelineResult<PipelineOutput> {
    run_report(
        LoadReport {
            records: raw,
            ..LoadReport::default()
        },
        options,
    )
}

/// Discover, load and process CSV sources. Directories are scanned for
/// `*.csv` files (descending into subdirectories when `recursive`).
pub fn run_paths(inputs: &[PathBuf], recursive: bool, options: &PipelineOptions) -> PipelineResult<PipelineOutput> {
    let mut paths = Vec::new();
    for input in inputs {
        paths.extend(discover_sources(input, recursive, &options.skip_markers)?);
    }
    if paths.is_empty() {
        return Err(PipelineError::NoSources);
    }

    log_info(format!("📖 Reading {} source file(s)...", paths.len()));
    let sources: Vec<SourceInput> = paths.into_iter().map(SourceInput::Path).collect();
    run_report(load_sources(&sources), options)
}

/// Process uploaded files given as (file name, bytes).
pub fn run_uploads(uploads: Vec<(String, Vec<u8>)>, options: &PipelineOptions) -> PipelineResult<PipelineOutput> {
    if uploads.is_empty() {
        return Err(PipelineError::NoSources);
    }

    log_info(format!("📖 Reading {} uploaded file(s)...", uploads.len()));
    let sources: Vec<SourceInput> = uploads
        .into_iter()
        .map(|(name, bytes)| SourceInput::Bytes { name, bytes })
        .collect();
    run_report(load_sources(&sources), options)
}

fn run_report(report: LoadReport, options: &PipelineOptions) -> PipelineResult<PipelineOutput> {
    options.validate()?;

    let LoadReport {
        sources,
        skipped,
        records: raw,
    } = report;

    if raw.is_empty() {
        return Err(PipelineError::EmptyBatch {
            sources: sources.len() + skipped.len(),
        });
    }

    let mut diagnostics = Diagnostics {
        input_records: raw.len(),
        skipped_sources: skipped,
        ..Diagnostics::default()
    };

    // Step 1: Normalize
    log_info("🧹 Normalizing records...");
    let normalized = Normalizer::from_options(options).normalize(&raw);
    let stats = NormalizeStats::from_records(&normalized);
    diagnostics.coerced_records = stats.coerced;
    diagnostics.invalid_dates = stats.invalid_dates;
    if stats.coerced > 0 {
        log_warning(format!("{} record(s) had unreadable counts, treated as 0", stats.coerced));
    }
    if stats.invalid_dates > 0 {
        log_warning(format!("{} record(s) have an invalid date", stats.invalid_dates));
    }

    // Step 2: Deduplicate
    let deduped = dedup(&normalized);
    diagnostics.duplicates_removed = deduped.removed;
    log_success(format!(
        "{} records after removing {} duplicate(s)",
        deduped.records.len(),
        deduped.removed
    ));

    // Step 3: Resolve identities
    log_info(format!("🪪 Resolving identities ({})...", options.strategy));
    let identities = resolve(&deduped.records, options.strategy);
    diagnostics.identities = identities.len();
    log_success(format!("{} student(s)", identities.len()));
    let resolved = apply(deduped.records, &identities);

    // Step 4: Exclusion list
    let excluded = exclude(resolved, &options.exclude);
    diagnostics.excluded_records = excluded.removed;
    if excluded.removed > 0 {
        log_info(format!("Excluded {} record(s)", excluded.removed));
    }
    if !excluded.unmatched.is_empty() {
        log_warning(format!(
            "Exclusion entries matched nobody: {}",
            excluded.unmatched.join(", ")
        ));
    }
    diagnostics.unmatched_exclusions = excluded.unmatched;
    let records = excluded.records;
    if records.is_empty() {
        return Err(PipelineError::AllExcluded(excluded.removed));
    }

    // Step 5: Aggregate
    log_info("📊 Aggregating...");
    let detail = aggregate(&records, GroupKeys::DETAIL);
    let student_field = aggregate(&records, GroupKeys::STUDENT_FIELD);
    let totals = aggregate(&records, GroupKeys::STUDENT);
    let field_totals = aggregate(&records, GroupKeys::FIELD);
    let pivot = pivot(&detail, options.field_order.as_deref())?;
    log_success(format!(
        "{} detail cells, {} pivot column group(s)",
        detail.cells.len(),
        pivot.columns.len()
    ));

    // Step 6: Summaries
    let summaries = summarize(&records, options.min_field_attempts);
    let top = rank(&summaries, RankOrder::Descending, Some(options.ranking_size));
    let bottom = rank(&summaries, RankOrder::Ascending, Some(options.ranking_size));
    let rollups = field_rollups(&records);
    let cohort = cohort_stats(&summaries, records.len());
    log_success(format!(
        "{} student summaries, cohort mean {:.1}%",
        summaries.len(),
        cohort.mean_accuracy
    ));

    Ok(PipelineOutput {
        strategy: options.strategy,
        records,
        detail,
        student_field,
        totals,
        field_totals,
        pivot,
        summaries,
        top,
        bottom,
        field_rollups: rollups,
        cohort,
        diagnostics,
        sources,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn batch() -> Vec<RawRecord> {
        vec![
            RawRecord::new("AB1234-01", "田中 太郎", "2026/02/16", "Math", "20", "10"),
            RawRecord::new("AB1234-02", "田中太郎", "2026/02/17", "Math", "10", "8"),
            RawRecord::new("CD5678", "鈴木 花子", "2026/02/16", "Art", "12", "3"),
            RawRecord::new("CD5678", "鈴木 花子", "2026/02/16", "Art", "12", "3"),
            RawRecord::new("EF9012", "試験 用", "2026/02/16", "Art", "1", "1"),
        ]
    }

    fn options() -> PipelineOptions {
        PipelineOptions {
            exclude: vec!["試験用".to_string()],
            ..PipelineOptions::default()
        }
    }

    #[test]
    fn test_run_end_to_end() {
        let output = run(batch(), &options()).unwrap();

        assert_eq!(output.diagnostics.input_records, 5);
        assert_eq!(output.diagnostics.duplicates_removed, 1);
        assert_eq!(output.diagnostics.identities, 3);
        assert_eq!(output.diagnostics.excluded_records, 1);
        assert_eq!(output.records.len(), 3);

        let tanaka = output
            .student_field
            .cells
            .iter()
            .find(|c| c.student.as_ref().unwrap().canonical_id == "AB1234")
            .unwrap();
        assert_eq!((tanaka.attempted, tanaka.correct, tanaka.accuracy), (30, 18, 60.0));

        assert_eq!(output.summaries.len(), 2);
        assert_eq!(output.top.entries[0].summary.identity.canonical_id, "AB1234");
        assert_eq!(output.bottom.entries[0].summary.identity.canonical_id, "CD5678");
        assert_eq!(output.pivot.rows.len(), 2);
        assert_eq!(output.field_rollups[0].field, "Art");
        assert_eq!(output.cohort.student_count, 2);
    }

    #[test]
    fn test_duplicate_batch_matches_single() {
        let row = RawRecord::new("AB1234", "A", "2026/02/16", "Math", "20", "10");
        let once = run(vec![row.clone()], &PipelineOptions::default()).unwrap();
        let twice = run(vec![row.clone(), row], &PipelineOptions::default()).unwrap();
        assert_eq!(twice.diagnostics.duplicates_removed, 1);
        assert_eq!(once.detail, twice.detail);
        assert_eq!(once.summaries, twice.summaries);
    }

    #[test]
    fn test_unmatched_exclusion_reported() {
        let opts = PipelineOptions {
            exclude: vec!["ZZ0000".to_string()],
            ..PipelineOptions::default()
        };
        let output = run(batch(), &opts).unwrap();
        assert_eq!(output.diagnostics.unmatched_exclusions, vec!["ZZ0000"]);
        assert_eq!(output.diagnostics.excluded_records, 0);
    }

    #[test]
    fn test_empty_batch_is_fatal() {
        let err = run(Vec::new(), &PipelineOptions::default()).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyBatch { sources: 0 }));
    }

    #[test]
    fn test_everything_excluded_is_fatal() {
        let opts = PipelineOptions {
            exclude: vec!["AB1234".to_string()],
            ..PipelineOptions::default()
        };
        let raw = vec![RawRecord::new("AB1234", "A", "2026/02/16", "Math", "1", "1")];
        let err = run(raw, &opts).unwrap_err();
        assert!(matches!(err, PipelineError::AllExcluded(1)));
    }

    #[test]
    fn test_ranking_size_limits_both_rankings() {
        let opts = PipelineOptions {
            ranking_size: 1,
            ..PipelineOptions::default()
        };
        let output = run(batch(), &opts).unwrap();
        assert_eq!(output.top.entries.len(), 1);
        assert_eq!(output.bottom.entries.len(), 1);
        assert_eq!(output.summaries.len(), 3);
    }

    #[test]
    fn test_name_keyed_strategy_selected() {
        let opts = PipelineOptions {
            strategy: ResolutionStrategy::NameKeyed,
            ..PipelineOptions::default()
        };
        let output = run(batch(), &opts).unwrap();
        assert_eq!(output.strategy, ResolutionStrategy::NameKeyed);
        assert_eq!(output.diagnostics.identities, 3);
    }

    #[test]
    fn test_run_paths_over_directory() {
        let dir = TempDir::new().unwrap();
        let header = "学籍番号,氏名,日付,分野,問題数,正答数\n";
        fs::write(
            dir.path().join("day1.csv"),
            format!("{header}AB1234,田中 太郎,2026/02/16,Math,20,10\n"),
        )
        .unwrap();
        fs::write(
            dir.path().join("day2.csv"),
            format!("{header}AB1234,田中 太郎,2026/02/17,Math,10,8\nAB1234,田中 太郎,2026/02/16,Math,20,10\n"),
        )
        .unwrap();
        fs::write(dir.path().join("day2 - コピー.csv"), "garbage").unwrap();
        fs::write(dir.path().join("broken.csv"), "only,two\n1,2\n").unwrap();

        let output = run_paths(&[dir.path().to_path_buf()], false, &PipelineOptions::default()).unwrap();
        assert_eq!(output.sources.len(), 2);
        assert_eq!(output.diagnostics.skipped_sources.len(), 1);
        assert_eq!(output.diagnostics.duplicates_removed, 1);
        assert_eq!(output.totals.cells[0].accuracy, 60.0);
    }

    #[test]
    fn test_run_paths_without_sources() {
        let dir = TempDir::new().unwrap();
        let err = run_paths(&[dir.path().to_path_buf()], true, &PipelineOptions::default()).unwrap_err();
        assert!(matches!(err, PipelineError::NoSources));
    }

    #[test]
    fn test_run_uploads_all_unreadable() {
        let uploads = vec![("a.csv".to_string(), b"x,y\n1,2\n".to_vec())];
        let err = run_uploads(uploads, &PipelineOptions::default()).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyBatch { sources: 1 }));
    }

    #[test]
    fn test_invalid_options_rejected() {
        let opts = PipelineOptions {
            id_width: 0,
            ..PipelineOptions::default()
        };
        let err = run(batch(), &opts).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
