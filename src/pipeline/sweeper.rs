use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::models::outcome::SweepReport;
use crate::services::image_store::ImageStore;
use crate::services::scheduler::BackoffPolicy;

/// How long an image may sit in the transient store before it is orphaned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl RetentionPolicy {
    /// True when a job could still be retrying an image the sweeper already
    /// considers stale.
    pub fn overlaps_retry_window(&self, backoff: &BackoffPolicy) -> bool {
        self.max_age <= backoff.total_retry_window()
    }

    fn is_expired(&self, last_modified: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        // Negative ages (clock skew) convert to Err and count as fresh.
        (now - last_modified)
            .to_std()
            .map(|age| age > self.max_age)
            .unwrap_or(false)
    }
}

/// Periodically deletes images older than the retention window.
pub struct StaleImageSweeper {
    images: Arc<dyn ImageStore>,
    retention: RetentionPolicy,
}

impl StaleImageSweeper {
    pub fn new(images: Arc<dyn ImageStore>, retention: RetentionPolicy) -> Self {
        Self { images, retention }
    }

    /// Evaluate every stored image once. Never fails; problems show up in
    /// `error_count`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        let listing = match self.images.list().await {
            Ok(listing) => listing,
            Err(e) => {
                tracing::warn!(error = %e, "Could not list transient images, skipping sweep");
                report.error_count = 1;
                return report;
            }
        };

        // Unreadable entries cannot be aged; they stay and are counted.
        report.error_count += listing.unreadable;

        for image in listing.images {
            if !self.retention.is_expired(image.last_modified, now) {
                report.retained_count += 1;
                continue;
            }

            match self.images.delete(&image.handle).await {
                Ok(()) => {
                    report.deleted_count += 1;
                    report.deleted_bytes += image.size_bytes;
                    tracing::debug!(
                        image_handle = %image.handle,
                        last_modified = %image.last_modified,
                        "Deleted stale image"
                    );
                }
                Err(e) => {
                    report.error_count += 1;
                    tracing::warn!(image_handle = %image.handle, error = %e, "Failed to delete stale image");
                }
            }
        }

        report
    }

    /// Sweep every `period`, forever. The first sweep runs immediately.
    pub async fn run_periodic(self, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let report = self.sweep(Utc::now()).await;

            metrics::counter!("image_sweeper_deleted_total").increment(report.deleted_count);
            metrics::counter!("image_sweeper_deleted_bytes_total").increment(report.deleted_bytes);
            metrics::counter!("image_sweeper_errors_total").increment(report.error_count);

            tracing::info!(
                deleted = report.deleted_count,
                deleted_bytes = report.deleted_bytes,
                retained = report.retained_count,
                errors = report.error_count,
                "Stale image sweep finished"
            );
        }
    }
}
