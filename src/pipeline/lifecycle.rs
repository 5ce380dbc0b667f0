use std::sync::Arc;

use crate::models::job::AttemptContext;
use crate::models::outcome::{AnalysisOutcome, ImageDisposition};
use crate::services::image_store::ImageStore;

/// Decides whether a job's source image is deleted or kept, and deletes it.
pub struct PhotoLifecycleManager {
    images: Arc<dyn ImageStore>,
}

impl PhotoLifecycleManager {
    pub fn new(images: Arc<dyn ImageStore>) -> Self {
        Self { images }
    }

    /// Retention rule for an outcome.
    ///
    /// | Outcome                              | Image  |
    /// |--------------------------------------|--------|
    /// | Success                              | delete |
    /// | NoFoodDetected                       | delete |
    /// | NonRetryableFailure                  | delete |
    /// | RetryableFailure, attempts remaining | retain |
    /// | RetryableFailure, attempts exhausted | delete |
    /// | PermissionDenied                     | retain |
    /// | AlreadyRecorded                      | retain |
    pub fn decide(outcome: &AnalysisOutcome, attempt: AttemptContext) -> ImageDisposition {
        match outcome {
            AnalysisOutcome::Success { .. }
            | AnalysisOutcome::NoFoodDetected { .. }
            | AnalysisOutcome::NonRetryableFailure { .. } => ImageDisposition::Delete,
            AnalysisOutcome::RetryableFailure { .. } if attempt.has_attempts_remaining() => {
                ImageDisposition::Retain
            }
            AnalysisOutcome::RetryableFailure { .. } => ImageDisposition::Delete,
            // The user has to restore access; the photo must survive until then.
            AnalysisOutcome::PermissionDenied { .. } => ImageDisposition::Retain,
            // Nothing left to delete.
            AnalysisOutcome::AlreadyRecorded { .. } => ImageDisposition::Retain,
        }
    }

    /// Apply [`Self::decide`]. A failed delete is logged and otherwise ignored.
    pub async fn dispose(
        &self,
        outcome: &AnalysisOutcome,
        image_handle: &str,
        attempt: AttemptContext,
    ) -> ImageDisposition {
        let disposition = Self::decide(outcome, attempt);
        match disposition {
            ImageDisposition::Retain => {
                tracing::debug!(
                    image_handle = %image_handle,
                    outcome = outcome.kind(),
                    "Retaining source image"
                );
            }
            ImageDisposition::Delete => match self.images.delete(image_handle).await {
                Ok(()) => {
                    tracing::debug!(image_handle = %image_handle, "Deleted source image");
                }
                Err(e) => {
                    tracing::warn!(
                        image_handle = %image_handle,
                        error = %e,
                        "Failed to delete source image, leaving it for the sweeper"
                    );
                }
            },
        }
        disposition
    }
}
