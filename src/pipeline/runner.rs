use chrono::{DateTime, Utc};

use crate::models::job::{Disposition, QueuedJob};
use crate::models::outcome::JobReport;
use crate::pipeline::job::AnalysisJob;
use crate::services::scheduler::{BackoffPolicy, JobScheduler, SchedulerError};

/// Pulls due jobs from a scheduler, executes them and settles the result.
pub struct JobRunner<'a> {
    scheduler: &'a dyn JobScheduler,
    job: &'a AnalysisJob,
    backoff: BackoffPolicy,
}

impl<'a> JobRunner<'a> {
    pub fn new(scheduler: &'a dyn JobScheduler, job: &'a AnalysisJob, backoff: BackoffPolicy) -> Self {
        Self {
            scheduler,
            job,
            backoff,
        }
    }

    /// Process the next due job.
    /// Returns `Ok(None)` if nothing was due at `now`.
    ///
    /// Backoff for a retry is measured from when the attempt finished, never
    /// earlier than `now`.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<Option<JobReport>, SchedulerError> {
        let Some(queued) = self.scheduler.dequeue_due(now).await? else {
            return Ok(None);
        };

        tracing::info!(
            job_id = %queued.job_id,
            image_handle = %queued.payload.image_handle,
            attempt = queued.attempt_number,
            "Processing analysis job"
        );

        let report = self.job.execute(&queued.payload, queued.attempt_number).await;
        let finished_at = Utc::now().max(now);
        self.settle(&queued, report.disposition, finished_at).await?;
        Ok(Some(report))
    }

    /// Report a disposition back to the scheduler.
    ///
    /// On retry the next attempt is enqueued before the current one is
    /// released, so a crash in between leaves a duplicate rather than a gap.
    /// The retry becomes due one backoff delay after `finished_at`.
    pub async fn settle(
        &self,
        queued: &QueuedJob,
        disposition: Disposition,
        finished_at: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        if disposition == Disposition::Retry {
            let delay = self.backoff.delay_after(queued.attempt_number);
            let not_before = chrono::Duration::from_std(delay)
                .ok()
                .and_then(|d| finished_at.checked_add_signed(d))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            let next = queued.next_attempt();
            self.scheduler.enqueue(&next, not_before).await?;

            tracing::info!(
                job_id = %queued.job_id,
                next_attempt = next.attempt_number,
                delay_ms = delay.as_millis() as u64,
                "Analysis job re-queued for retry"
            );
        }

        self.scheduler.complete(queued).await
    }
}
