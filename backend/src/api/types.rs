//! REST API types.
//!
//! The upload response carries the report tables directly; the flat record
//! list stays server-side since the summaries and pivot already cover it.

use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::{CohortStats, FieldRollup, Ranking, StudentSummary};
use crate::parser::SourceInfo;
use crate::transform::identity::ResolutionStrategy;
use crate::transform::pipeline::{Diagnostics, PipelineOutput};
use crate::transform::pivot::PivotMatrix;

/// Response sent after an upload has been processed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    /// Unique job identifier
    pub job_id: String,

    /// Status: "ready", "warning"
    pub status: String,

    pub metadata: ResponseMetadata,

    pub summaries: Vec<StudentSummary>,
    pub top: Ranking,
    pub bottom: Ranking,
    pub field_rollups: Vec<FieldRollup>,
    pub cohort: CohortStats,
    pub pivot: PivotMatrix,
    pub diagnostics: Diagnostics,
}

/// Metadata about the run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub strategy: ResolutionStrategy,
    pub student_count: usize,
    pub record_count: usize,
    pub sources: Vec<SourceInfo>,
}

/// Whether a run had anything the user should look at: skipped sources,
/// substituted counts, invalid dates or exclusion entries that matched nobody.
pub fn needs_attention(diagnostics: &Diagnostics) -> bool {
    !diagnostics.skipped_sources.is_empty()
        || diagnostics.coerced_records > 0
        || diagnostics.invalid_dates > 0
        || !diagnostics.unmatched_exclusions.is_empty()
}

impl From<PipelineOutput> for UploadResponse {
    fn from(output: PipelineOutput) -> Self {
        let status = if needs_attention(&output.diagnostics) {
            "warning"
        } else {
            "ready"
        };

        UploadResponse {
            job_id: Uuid::new_v4().to_string(),
            status: status.to_string(),
            metadata: ResponseMetadata {
                strategy: output.strategy,
                student_count: output.summaries.len(),
                record_count: output.records.len(),
                sources: output.sources,
            },
            summaries: output.summaries,
            top: output.top,
            bottom: output.bottom,
            field_rollups: output.field_rollups,
            cohort: output.cohort,
            pivot: output.pivot,
            diagnostics: output.diagnostics,
        }
    }
}

/// Create an error response
pub fn error_response(error: &str) -> Value {
    json!({
        "jobId": Uuid::new_v4().to_string(),
        "status": "error",
        "error": error,
        "summaries": [],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineOptions;
    use crate::models::RawRecord;
    use crate::transform::pipeline::run;

    #[test]
    fn test_clean_run_is_ready() {
        let output = run(
            vec![RawRecord::new("AB1234", "田中 太郎", "2026/02/16", "Math", "20", "10")],
            &PipelineOptions::default(),
        )
        .unwrap();
        let response = UploadResponse::from(output);

        assert_eq!(response.status, "ready");
        assert_eq!(response.metadata.student_count, 1);
        assert!(Uuid::parse_str(&response.job_id).is_ok());

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["metadata"]["strategy"], "identifier");
        assert!(json.get("fieldRollups").is_some());
    }

    #[test]
    fn test_coerced_counts_are_a_warning() {
        let output = run(
            vec![RawRecord::new("AB1234", "田中 太郎", "2026/02/16", "Math", "?", "10")],
            &PipelineOptions::default(),
        )
        .unwrap();
        assert_eq!(UploadResponse::from(output).status, "warning");
    }

    #[test]
    fn test_error_response_shape() {
        let value = error_response("No input sources found");
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"], "No input sources found");
    }
}
