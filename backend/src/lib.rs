//! # quizstats - consolidation of quiz-practice exports
//!
//! quizstats merges the CSV exports of a quiz practice tool (one file per day
//! or class, overlapping, inconsistently spelled) into per-student statistics:
//! detailed and rolled-up aggregates, a student × (date, field) pivot, student
//! summaries with weakest/strongest fields, rankings and field-wide rollups.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────┐   ┌───────┐   ┌──────────┐   ┌───────────┐   ┌───────────┐
//! │ CSV files│──▶│ Normalize │──▶│ Dedup │──▶│ Identity │──▶│ Aggregate │──▶│ Pivot &   │
//! │ (UTF-8 / │   │ names, id,│   │ exact │   │ resolve +│   │ 4 grains  │   │ summaries │
//! │  cp932)  │   │ counts    │   │ rows  │   │ exclude  │   │           │   │ rankings  │
//! └──────────┘   └───────────┘   └───────┘   └──────────┘   └───────────┘   └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use quizstats::{run_paths, PipelineOptions};
//! use std::path::PathBuf;
//!
//! let output = run_paths(&[PathBuf::from("exports")], true, &PipelineOptions::default())?;
//! for entry in &output.top.entries {
//!     println!("{}. {} {:.1}%", entry.rank, entry.summary.identity.canonical_name, entry.summary.overall_accuracy);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`models`] - Records, identities, cells, summaries
//! - [`config`] - Pipeline options (file, environment)
//! - [`parser`] - Source discovery and CSV loading with auto-detection
//! - [`transform`] - Pipeline stages and orchestration
//! - [`export`] - Flat-row CSV and JSON report output
//! - [`api`] - HTTP API server and log broadcasting

// Core modules
pub mod error;
pub mod models;
pub mod config;

// Loading
pub mod parser;

// Transformation
pub mod transform;

// Output
pub mod export;

// HTTP API
pub mod api;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ConfigError, ExportError, PipelineError, ServerError, SourceError, TransformError,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{
    AggregatedCell, Aggregation, CohortStats, DateRange, FieldPick, FieldRollup, FieldSummary,
    GroupKeys, NormalizedRecord, RankOrder, RankedStudent, Ranking, RawRecord, ResolvedRecord,
    StudentIdentity, StudentSummary,
};

// =============================================================================
// Re-exports - Configuration
// =============================================================================

pub use config::PipelineOptions;

// =============================================================================
// Re-exports - Loading
// =============================================================================

pub use parser::{
    decode_content, detect_delimiter, detect_encoding, discover_sources, load_sources,
    parse_bytes, parse_file, LoadReport, SourceInfo, SourceInput,
};

// =============================================================================
// Re-exports - Stages
// =============================================================================

pub use transform::{
    accuracy, aggregate, apply, cohort_stats, dedup, exclude, field_rollups, pivot, rank,
    resolve, summarize, IdentityMap, Normalizer, PivotMatrix, ResolutionStrategy,
};

// =============================================================================
// Re-exports - Pipeline
// =============================================================================

pub use transform::pipeline::{run, run_paths, run_uploads, Diagnostics, PipelineOutput};

// =============================================================================
// Re-exports - Export
// =============================================================================

pub use export::{pivot_csv, to_csv, write_report_dir, write_student_files};

// =============================================================================
// Re-exports - API
// =============================================================================

pub use api::types::{error_response, ResponseMetadata, UploadResponse};

// Server
pub mod server {
    pub use crate::api::server::start_server;
}
