use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use crate::models::job::{AttemptContext, Disposition, JobPayload};
use crate::models::notification::NotificationContent;
use crate::models::nutrition::{self, NewNutritionEntry};
use crate::models::outcome::{AnalysisOutcome, JobReport, Retryability};
use crate::pipeline::classifier;
use crate::pipeline::lifecycle::PhotoLifecycleManager;
use crate::pipeline::notifier::{self, ProgressNotifier};
use crate::services::health_store::{HealthDataStore, HealthStoreError};
use crate::services::image_store::{ImageStore, StorageError};
use crate::services::notifications::NotificationSink;
use crate::services::vision::{VisionAnalysis, VisionAnalyzer};

/// Collaborators an [`AnalysisJob`] drives.
pub struct AnalysisDeps {
    pub vision: Arc<dyn VisionAnalyzer>,
    pub health_store: Arc<dyn HealthDataStore>,
    pub images: Arc<dyn ImageStore>,
    pub notifications: Arc<dyn NotificationSink>,
}

/// Runs one attempt of meal photo analysis.
///
/// An attempt never returns an error: every path resolves to an
/// [`AnalysisOutcome`], after which the image is disposed of and the user is
/// notified, in that order.
pub struct AnalysisJob {
    vision: Arc<dyn VisionAnalyzer>,
    health_store: Arc<dyn HealthDataStore>,
    images: Arc<dyn ImageStore>,
    notifications: Arc<dyn NotificationSink>,
    lifecycle: PhotoLifecycleManager,
    notifier: ProgressNotifier,
    max_attempts: u32,
}

impl AnalysisJob {
    pub fn new(deps: AnalysisDeps, notifier: ProgressNotifier, max_attempts: u32) -> Self {
        Self {
            lifecycle: PhotoLifecycleManager::new(deps.images.clone()),
            vision: deps.vision,
            health_store: deps.health_store,
            images: deps.images,
            notifications: deps.notifications,
            notifier,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Execute attempt `attempt_number` (1-based) for `payload`.
    pub async fn execute(&self, payload: &JobPayload, attempt_number: u32) -> JobReport {
        let attempt = AttemptContext::new(attempt_number, self.max_attempts);
        let handle = payload.image_handle.as_str();

        tracing::info!(
            image_handle = %handle,
            attempt = attempt.attempt_number,
            max_attempts = attempt.max_attempts,
            "Starting meal analysis attempt"
        );

        let outcome = match AssertUnwindSafe(self.analyze(payload, attempt)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => AnalysisOutcome::NonRetryableFailure {
                cause: "analysis panicked".to_string(),
            },
        };
        let disposition = disposition_for(&outcome, attempt);

        // Store insert (inside analyze) has already happened; delete comes after.
        let image = self.lifecycle.dispose(&outcome, handle, attempt).await;

        match (&outcome, disposition) {
            (AnalysisOutcome::Success { estimate, .. }, _) => {
                let content = self.notifier.succeeded(estimate);
                self.post_notification(handle, &content).await;
            }
            // The earlier dispatch already posted the terminal notice.
            (AnalysisOutcome::AlreadyRecorded { .. }, _) => {}
            (_, Disposition::Failed) => {
                let content = self.notifier.failed(notifier::failure_reason(&outcome));
                self.post_notification(handle, &content).await;
            }
            // The running notice stays up until the next attempt refreshes it.
            (_, _) => {}
        }

        metrics::counter!("meal_analysis_jobs_total", "outcome" => outcome.kind()).increment(1);
        metrics::counter!(
            "meal_analysis_dispositions_total",
            "disposition" => disposition.to_string()
        )
        .increment(1);

        match &outcome {
            AnalysisOutcome::Success { record_id, .. } => tracing::info!(
                image_handle = %handle,
                record_id = %record_id,
                "Meal analysis succeeded"
            ),
            AnalysisOutcome::AlreadyRecorded { record_id } => tracing::info!(
                image_handle = %handle,
                record_id = %record_id,
                attempt = attempt.attempt_number,
                "Duplicate dispatch of a recorded meal, nothing to do"
            ),
            other => tracing::warn!(
                image_handle = %handle,
                attempt = attempt.attempt_number,
                outcome = other.kind(),
                disposition = %disposition,
                image = %image,
                details = ?other,
                "Meal analysis did not succeed"
            ),
        }

        JobReport {
            outcome,
            disposition,
            image,
        }
    }

    async fn analyze(&self, payload: &JobPayload, attempt: AttemptContext) -> AnalysisOutcome {
        let handle = payload.image_handle.as_str();

        let Some(captured_at) = payload.captured_at() else {
            return AnalysisOutcome::NonRetryableFailure {
                cause: format!(
                    "capture timestamp out of range: {}",
                    payload.captured_at_epoch_seconds
                ),
            };
        };

        let image_bytes = match self.images.read(handle).await {
            Ok(bytes) => bytes,
            Err(e @ StorageError::NotFound(_)) => {
                return self.missing_image_outcome(handle, captured_at, e).await;
            }
            Err(e) => {
                return AnalysisOutcome::NonRetryableFailure {
                    cause: format!("image unavailable: {}", e),
                }
            }
        };

        // Posted once the image is known to be pending, so a duplicate
        // dispatch of a finished job leaves the result notice untouched.
        let running = self.notifier.running(
            &notifier::running_status(attempt.attempt_number, attempt.max_attempts),
            None,
        );
        self.post_notification(handle, &running).await;

        let start = Instant::now();
        let analysis = self.vision.analyze(&image_bytes).await;
        metrics::histogram!("vision_analysis_seconds").record(start.elapsed().as_secs_f64());

        let estimate = match analysis {
            Ok(VisionAnalysis::Estimate(estimate)) => estimate,
            Ok(VisionAnalysis::NoFood { reason }) => {
                return AnalysisOutcome::NoFoodDetected { reason };
            }
            Err(e) => {
                let cause = e.to_string();
                return match classifier::classify(&e) {
                    Retryability::Retryable => AnalysisOutcome::RetryableFailure { cause },
                    Retryability::NonRetryable => AnalysisOutcome::NonRetryableFailure { cause },
                };
            }
        };

        tracing::debug!(
            image_handle = %handle,
            calories = estimate.calories(),
            description = %estimate.description(),
            "Vision estimate received, saving entry"
        );

        let entry = NewNutritionEntry::new(&estimate, handle, captured_at);
        match self.health_store.insert(&entry).await {
            Ok(record_id) => AnalysisOutcome::Success {
                estimate,
                record_id,
            },
            Err(HealthStoreError::PermissionDenied(cause)) => {
                AnalysisOutcome::PermissionDenied { cause }
            }
            Err(e @ (HealthStoreError::Validation(_) | HealthStoreError::Unavailable(_))) => {
                AnalysisOutcome::NonRetryableFailure {
                    cause: e.to_string(),
                }
            }
        }
    }

    /// A missing image either means the capture is gone or that a previous
    /// dispatch of this job finished and deleted it.
    async fn missing_image_outcome(
        &self,
        handle: &str,
        captured_at: DateTime<Utc>,
        err: StorageError,
    ) -> AnalysisOutcome {
        match self
            .health_store
            .find(nutrition::entry_key(handle, captured_at))
            .await
        {
            Ok(Some(record_id)) => AnalysisOutcome::AlreadyRecorded { record_id },
            Ok(None) => AnalysisOutcome::NonRetryableFailure {
                cause: format!("image unavailable: {}", err),
            },
            Err(lookup) => {
                tracing::warn!(image_handle = %handle, error = %lookup, "Could not check for an existing entry");
                AnalysisOutcome::NonRetryableFailure {
                    cause: format!("image unavailable: {}", err),
                }
            }
        }
    }

    async fn post_notification(&self, key: &str, content: &NotificationContent) {
        if let Err(e) = self.notifications.post(key, content).await {
            tracing::warn!(key = %key, error = %e, "Failed to post notification");
        }
    }
}

/// What the scheduler should do after an attempt ended in `outcome`.
pub fn disposition_for(outcome: &AnalysisOutcome, attempt: AttemptContext) -> Disposition {
    match outcome {
        AnalysisOutcome::Success { .. } | AnalysisOutcome::AlreadyRecorded { .. } => {
            Disposition::Succeeded
        }
        AnalysisOutcome::RetryableFailure { .. } if attempt.has_attempts_remaining() => {
            Disposition::Retry
        }
        AnalysisOutcome::RetryableFailure { .. }
        | AnalysisOutcome::NoFoodDetected { .. }
        | AnalysisOutcome::NonRetryableFailure { .. }
        | AnalysisOutcome::PermissionDenied { .. } => Disposition::Failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    use crate::models::nutrition::NutritionEstimate;

    #[test]
    fn test_disposition_retry_only_with_budget() {
        let retryable = AnalysisOutcome::RetryableFailure {
            cause: "timeout".into(),
        };
        for attempt in 1..4 {
            assert_eq!(
                disposition_for(&retryable, AttemptContext::new(attempt, 4)),
                Disposition::Retry
            );
        }
        assert_eq!(
            disposition_for(&retryable, AttemptContext::new(4, 4)),
            Disposition::Failed
        );
    }

    #[test]
    fn test_disposition_terminal_outcomes() {
        let success = AnalysisOutcome::Success {
            estimate: NutritionEstimate::new(300, "Soup").unwrap(),
            record_id: Uuid::nil(),
        };
        assert_eq!(
            disposition_for(&success, AttemptContext::new(1, 4)),
            Disposition::Succeeded
        );
        let duplicate = AnalysisOutcome::AlreadyRecorded {
            record_id: Uuid::nil(),
        };
        assert_eq!(
            disposition_for(&duplicate, AttemptContext::new(4, 4)),
            Disposition::Succeeded
        );

        for outcome in [
            AnalysisOutcome::NoFoodDetected { reason: "desk".into() },
            AnalysisOutcome::NonRetryableFailure { cause: "parse".into() },
            AnalysisOutcome::PermissionDenied { cause: "revoked".into() },
        ] {
            for attempt in 1..=4 {
                assert_eq!(
                    disposition_for(&outcome, AttemptContext::new(attempt, 4)),
                    Disposition::Failed
                );
            }
        }
    }
}
