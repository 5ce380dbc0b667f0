use serde::Serialize;
use strum::{Display, IntoStaticStr};
use uuid::Uuid;

use crate::models::job::Disposition;
use crate::models::nutrition::NutritionEstimate;

/// Result of one analysis attempt. Every execution path ends in exactly one
/// of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, IntoStaticStr)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AnalysisOutcome {
    Success {
        estimate: NutritionEstimate,
        record_id: Uuid,
    },
    NoFoodDetected {
        reason: String,
    },
    RetryableFailure {
        cause: String,
    },
    NonRetryableFailure {
        cause: String,
    },
    /// The health data store refused the write; user action is required.
    PermissionDenied {
        cause: String,
    },
    /// A previous dispatch of this job already recorded the entry and
    /// consumed the image.
    AlreadyRecorded {
        record_id: Uuid,
    },
}

impl AnalysisOutcome {
    /// Metric/log label for the outcome kind.
    pub fn kind(&self) -> &'static str {
        self.into()
    }
}

/// Retry classification of a failure cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Retryability {
    Retryable,
    NonRetryable,
}

/// What happens to the source image after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ImageDisposition {
    Delete,
    Retain,
}

/// Everything an attempt produced, as seen by the runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub outcome: AnalysisOutcome,
    pub disposition: Disposition,
    pub image: ImageDisposition,
}

/// Counters from one sweeper run. Log-only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub deleted_count: u64,
    pub deleted_bytes: u64,
    pub retained_count: u64,
    pub error_count: u64,
}
