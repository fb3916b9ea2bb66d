//! Error types for the quizstats pipeline.
//!
//! - [`SourceError`] - a single input source could not be loaded
//! - [`TransformError`] - a stage was handed data it cannot process
//! - [`ConfigError`] - invalid configuration file or environment value
//! - [`ExportError`] - writing flat rows or reports failed
//! - [`PipelineError`] - top-level orchestration errors
//! - [`ServerError`] - HTTP API errors
//!
//! Field-level problems (unparsable counts, garbled dates) are never errors:
//! the normalizer substitutes defaults and counts them. Source-level errors are
//! recovered by the loader, which skips the source. Only an empty batch is fatal.

use thiserror::Error;

// =============================================================================
// Source Errors
// =============================================================================

/// Errors while reading or decoding one input source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Failed to read file or directory.
    #[error("Failed to read source: {0}")]
    Io(#[from] std::io::Error),

    /// Bytes could not be decoded in the detected encoding.
    #[error("Failed to decode source as {encoding}")]
    Encoding { encoding: String },

    /// Invalid CSV structure.
    #[error("Invalid CSV at line {line}: {message}")]
    Parse { line: u64, message: String },

    /// Empty file.
    #[error("Source is empty")]
    Empty,

    /// Header row is missing required columns.
    #[error("Missing required columns: {}", .columns.join(", "))]
    MissingColumns { columns: Vec<String> },
}

impl From<csv::Error> for SourceError {
    fn from(err: csv::Error) -> Self {
        let line = err.position().map(|p| p.line()).unwrap_or(0);
        SourceError::Parse {
            line,
            message: err.to_string(),
        }
    }
}

// =============================================================================
// Transformation Errors
// =============================================================================

/// Errors raised by transformation stages.
#[derive(Debug, Error)]
pub enum TransformError {
    /// Cells of the wrong granularity were handed to a stage.
    #[error("Expected cells grouped by {expected}, got {found}")]
    GranularityMismatch { expected: String, found: String },
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors while loading pipeline options.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file unreadable.
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON for the options schema.
    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A single value failed to parse.
    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

// =============================================================================
// Export Errors
// =============================================================================

/// Errors while serialising outputs.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Export IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The csv writer could not hand back its buffer.
    #[error("CSV buffer error: {0}")]
    Buffer(String),
}

// =============================================================================
// Pipeline Errors (top-level)
// =============================================================================

/// Top-level pipeline orchestration errors.
///
/// This is the error type returned by [`crate::transform::pipeline::run`] and
/// the loader-driven entry points.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Discovery found nothing to load.
    #[error("No input sources found")]
    NoSources,

    /// Every source was skipped or contained no rows.
    #[error("No usable records after loading {sources} source(s)")]
    EmptyBatch { sources: usize },

    /// The exclusion list removed every record.
    #[error("All {0} records were excluded")]
    AllExcluded(usize),
}

// =============================================================================
// Server Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

pub type SourceResult<T> = Result<T, SourceError>;

pub type TransformResult<T> = Result<T, TransformError>;

pub type ConfigResult<T> = Result<T, ConfigError>;

pub type ExportResult<T> = Result<T, ExportError>;

pub type PipelineResult<T> = Result<T, PipelineError>;

pub type ServerResult<T> = Result<T, ServerError>;
