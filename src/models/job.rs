use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Input handed to an analysis job by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    pub image_handle: String,
    pub captured_at_epoch_seconds: i64,
}

impl JobPayload {
    pub fn new(image_handle: impl Into<String>, captured_at: DateTime<Utc>) -> Self {
        Self {
            image_handle: image_handle.into(),
            captured_at_epoch_seconds: captured_at.timestamp(),
        }
    }

    /// Capture timestamp, or `None` if the epoch value is out of range.
    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.captured_at_epoch_seconds, 0)
    }
}

/// Durable queue record for one attempt of a logical job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub job_id: Uuid,
    pub payload: JobPayload,
    /// 1-based attempt counter.
    pub attempt_number: u32,
}

impl QueuedJob {
    pub fn first_attempt(payload: JobPayload) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            payload,
            attempt_number: 1,
        }
    }

    /// Same logical job, next attempt.
    pub fn next_attempt(&self) -> Self {
        Self {
            job_id: self.job_id,
            payload: self.payload.clone(),
            attempt_number: self.attempt_number + 1,
        }
    }
}

/// Where an attempt sits within its retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptContext {
    pub attempt_number: u32,
    pub max_attempts: u32,
}

impl AttemptContext {
    pub fn new(attempt_number: u32, max_attempts: u32) -> Self {
        Self {
            attempt_number: attempt_number.max(1),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn has_attempts_remaining(&self) -> bool {
        self.attempt_number < self.max_attempts
    }
}

/// Signal reported back to the scheduler after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Disposition {
    Succeeded,
    Retry,
    Failed,
}

/// Request to schedule analysis of a captured image.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitJobRequest {
    #[garde(length(min = 1, max = 512))]
    pub image_handle: String,

    #[garde(range(min = 0))]
    pub captured_at_epoch_seconds: i64,
}

/// Response after scheduling an analysis job.
#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_attempt_keeps_identity() {
        let job = QueuedJob::first_attempt(JobPayload {
            image_handle: "img.jpg".to_string(),
            captured_at_epoch_seconds: 1_700_000_000,
        });
        let next = job.next_attempt();
        assert_eq!(job.attempt_number, 1);
        assert_eq!(next.attempt_number, 2);
        assert_eq!(next.job_id, job.job_id);
        assert_eq!(next.payload, job.payload);
    }

    #[test]
    fn test_attempts_remaining() {
        assert!(AttemptContext::new(1, 4).has_attempts_remaining());
        assert!(AttemptContext::new(3, 4).has_attempts_remaining());
        assert!(!AttemptContext::new(4, 4).has_attempts_remaining());
        assert!(!AttemptContext::new(5, 4).has_attempts_remaining());
        // attempt numbers are 1-based
        assert_eq!(AttemptContext::new(0, 4).attempt_number, 1);
    }

    #[test]
    fn test_captured_at_out_of_range() {
        let payload = JobPayload {
            image_handle: "img.jpg".to_string(),
            captured_at_epoch_seconds: i64::MAX,
        };
        assert!(payload.captured_at().is_none());
    }

    #[test]
    fn test_disposition_labels() {
        assert_eq!(Disposition::Retry.to_string(), "retry");
        assert_eq!("succeeded".parse::<Disposition>().unwrap(), Disposition::Succeeded);
    }
}
