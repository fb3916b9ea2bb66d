//! Transformation module.
//!
//! One submodule per pipeline stage:
//! - normalize: field cleaning
//! - dedup: exact-duplicate removal
//! - identity: canonical student identities and the exclusion list
//! - aggregate: grouped sums and accuracy
//! - pivot: student × (date, field) matrix
//! - summary: per-student summaries, rankings, field and cohort statistics
//! - pipeline: orchestration

pub mod aggregate;
pub mod dedup;
pub mod identity;
pub mod normalize;
pub mod pipeline;
pub mod pivot;
pub mod summary;

pub use aggregate::{accuracy, aggregate};
pub use dedup::{dedup, DedupResult};
pub use identity::{apply, exclude, resolve, ExclusionResult, IdentityMap, ResolutionStrategy};
pub use normalize::{NormalizeStats, Normalizer};
pub use pipeline::*;
pub use pivot::{pivot, ColumnKey, PivotCell, PivotMatrix, PivotRow, ValueKind};
pub use summary::{cohort_stats, field_rollups, rank, summarize};
