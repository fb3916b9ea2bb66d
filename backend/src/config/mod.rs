//! Pipeline configuration.
//!
//! Precedence, lowest first: built-in defaults, JSON config file, environment
//! (`.env` honoured), command-line flags.
//!
//! | Variable                        | Field                |
//! |---------------------------------|----------------------|
//! | `QUIZSTATS_STRATEGY`            | `strategy`           |
//! | `QUIZSTATS_EXCLUDE`             | `exclude` (comma separated) |
//! | `QUIZSTATS_MIN_FIELD_ATTEMPTS`  | `min_field_attempts` |
//! | `QUIZSTATS_TOP`                 | `ranking_size`       |

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::error::{ConfigError, ConfigResult};
use crate::transform::identity::ResolutionStrategy;

/// Width of the canonical student identifier (cohort + sequence).
pub const DEFAULT_ID_WIDTH: usize = 6;

/// Minimum attempted questions before a field can be weakest/strongest.
pub const DEFAULT_MIN_FIELD_ATTEMPTS: u64 = 10;

/// Size of the top-N / bottom-N rankings.
pub const DEFAULT_RANKING_SIZE: usize = 10;

pub const DEFAULT_DATE_FORMATS: &[&str] = &["%Y/%m/%d", "%Y-%m-%d", "%Y.%m.%d"];

/// File-name markers of stray copies left next to real exports.
pub const DEFAULT_SKIP_MARKERS: &[&str] = &["コピー"];

pub const ENV_STRATEGY: &str = "QUIZSTATS_STRATEGY";
pub const ENV_EXCLUDE: &str = "QUIZSTATS_EXCLUDE";
pub const ENV_MIN_FIELD_ATTEMPTS: &str = "QUIZSTATS_MIN_FIELD_ATTEMPTS";
pub const ENV_TOP: &str = "QUIZSTATS_TOP";

/// Options for the aggregation pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Which identity resolution policy to apply.
    pub strategy: ResolutionStrategy,

    /// Identifiers or names whose records are purged after resolution.
    pub exclude: Vec<String>,

    /// Canonical identifier width.
    pub id_width: usize,

    /// Threshold for weakest/strongest field eligibility.
    pub min_field_attempts: u64,

    /// chrono formats tried in order when parsing dates.
    pub date_formats: Vec<String>,

    /// Explicit field order for pivot columns; lexicographic when absent.
    pub field_order: Option<Vec<String>>,

    /// Number of students in each ranking.
    pub ranking_size: usize,

    /// Discovery skips CSV files whose name contains one of these.
    pub skip_markers: Vec<String>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            strategy: ResolutionStrategy::default(),
            exclude: Vec::new(),
            id_width: DEFAULT_ID_WIDTH,
            min_field_attempts: DEFAULT_MIN_FIELD_ATTEMPTS,
            date_formats: DEFAULT_DATE_FORMATS.iter().map(|s| s.to_string()).collect(),
            field_order: None,
            ranking_size: DEFAULT_RANKING_SIZE,
            skip_markers: DEFAULT_SKIP_MARKERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl PipelineOptions {
    /// Parse options from JSON. Missing keys keep their defaults.
    pub fn from_json(content: &str) -> ConfigResult<Self> {
        let options: Self = serde_json::from_str(content)?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_json_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Apply `QUIZSTATS_*` overrides from the process environment.
    pub fn apply_env(self) -> ConfigResult<Self> {
        let _ = dotenvy::dotenv();
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_from<F>(mut self, lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_STRATEGY) {
            self.strategy = parse_value(ENV_STRATEGY, &value)?;
        }
        if let Some(value) = lookup(ENV_EXCLUDE) {
            self.exclude.extend(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from),
            );
        }
        if let Some(value) = lookup(ENV_MIN_FIELD_ATTEMPTS) {
            self.min_field_attempts = parse_value(ENV_MIN_FIELD_ATTEMPTS, &value)?;
        }
        if let Some(value) = lookup(ENV_TOP) {
            self.ranking_size = parse_value(ENV_TOP, &value)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.id_width == 0 {
            return Err(ConfigError::InvalidValue {
                key: "id_width".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.date_formats.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "date_formats".into(),
                message: "at least one format is required".into(),
            });
        }
        Ok(())
    }
}

fn parse_value<T>(key: &str, value: &str) -> ConfigResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}
