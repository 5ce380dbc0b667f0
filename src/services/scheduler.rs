use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::models::job::QueuedJob;

const SCHEDULED_KEY: &str = "meal_snap:jobs:scheduled";
const CLAIMED_KEY: &str = "meal_snap:jobs:claimed";

/// Atomically claim the earliest due job: pop it from the scheduled set and
/// record it in the claimed set, scored by claim time.
const CLAIM_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #due == 0 then
    return false
end
redis.call('ZREM', KEYS[1], due[1])
redis.call('ZADD', KEYS[2], ARGV[1], due[1])
return due[1]
"#;

/// Atomically move every claim made at or before ARGV[1] back to the
/// scheduled set, due at ARGV[2].
const RECOVER_SCRIPT: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for _, job in ipairs(expired) do
    redis.call('ZREM', KEYS[2], job)
    redis.call('ZADD', KEYS[1], ARGV[2], job)
end
return #expired
"#;

/// Exponential retry timing and the attempt ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max_attempts: 4,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the attempt following `attempt_number`.
    pub fn delay_after(&self, attempt_number: u32) -> Duration {
        let exponent = attempt_number.saturating_sub(1).min(31);
        self.initial.saturating_mul(1u32 << exponent)
    }

    /// Sum of every backoff delay a job can accumulate before its last attempt.
    pub fn total_retry_window(&self) -> Duration {
        (1..self.max_attempts)
            .map(|attempt| self.delay_after(attempt))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

/// Durable work queue that dispatches analysis attempts.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Schedule `job` to become due at `not_before`.
    async fn enqueue(&self, job: &QueuedJob, not_before: DateTime<Utc>) -> Result<(), SchedulerError>;

    /// Claim the earliest job due at `now`, if any.
    async fn dequeue_due(&self, now: DateTime<Utc>) -> Result<Option<QueuedJob>, SchedulerError>;

    /// Release a claimed job once its attempt has been settled.
    async fn complete(&self, job: &QueuedJob) -> Result<(), SchedulerError>;

    /// Make jobs claimed more than `lease` before `now` and never settled due
    /// again at `now`. Returns how many were recovered.
    async fn recover_expired(&self, now: DateTime<Utc>, lease: Duration) -> Result<usize, SchedulerError>;
}

/// Latest claim time that counts as abandoned at `now`.
fn lease_cutoff(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lease)
        .ok()
        .and_then(|lease| now.checked_sub_signed(lease))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Redis-backed scheduler: a sorted set of due times plus a sorted set of
/// claim times.
pub struct RedisJobScheduler {
    client: redis::Client,
    claim: redis::Script,
    recover: redis::Script,
}

impl RedisJobScheduler {
    pub fn new(redis_url: &str) -> Result<Self, SchedulerError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            claim: redis::Script::new(CLAIM_SCRIPT),
            recover: redis::Script::new(RECOVER_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, SchedulerError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), SchedulerError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    /// Number of jobs waiting to become due or be claimed.
    pub async fn queue_depth(&self) -> Result<u64, SchedulerError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.zcard(SCHEDULED_KEY).await?;
        Ok(depth)
    }
}

#[async_trait]
impl JobScheduler for RedisJobScheduler {
    async fn enqueue(&self, job: &QueuedJob, not_before: DateTime<Utc>) -> Result<(), SchedulerError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(job)?;
        conn.zadd::<_, _, _, ()>(SCHEDULED_KEY, &payload, not_before.timestamp_millis())
            .await?;
        Ok(())
    }

    async fn dequeue_due(&self, now: DateTime<Utc>) -> Result<Option<QueuedJob>, SchedulerError> {
        let mut conn = self.connection().await?;
        let claimed: Option<String> = self
            .claim
            .key(SCHEDULED_KEY)
            .key(CLAIMED_KEY)
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        match claimed {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn complete(&self, job: &QueuedJob) -> Result<(), SchedulerError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(job)?;
        conn.zrem::<_, _, ()>(CLAIMED_KEY, &payload).await?;
        Ok(())
    }

    async fn recover_expired(&self, now: DateTime<Utc>, lease: Duration) -> Result<usize, SchedulerError> {
        let mut conn = self.connection().await?;
        let recovered: usize = self
            .recover
            .key(SCHEDULED_KEY)
            .key(CLAIMED_KEY)
            .arg(lease_cutoff(now, lease).timestamp_millis())
            .arg(now.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        Ok(recovered)
    }
}

#[derive(Default)]
struct InMemoryQueues {
    scheduled: Vec<(DateTime<Utc>, QueuedJob)>,
    claimed: Vec<(DateTime<Utc>, QueuedJob)>,
}

/// Process-local scheduler with the same claim/complete semantics as the
/// Redis one. Not durable; meant for tests and single-process setups.
#[derive(Default)]
pub struct InMemoryJobScheduler {
    queues: Mutex<InMemoryQueues>,
}

impl InMemoryJobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheduled jobs with their due times, earliest first.
    pub async fn scheduled(&self) -> Vec<(DateTime<Utc>, QueuedJob)> {
        let queues = self.queues.lock().await;
        let mut scheduled = queues.scheduled.clone();
        scheduled.sort_by_key(|(due, _)| *due);
        scheduled
    }

    pub async fn in_flight(&self) -> Vec<QueuedJob> {
        self.queues
            .lock()
            .await
            .claimed
            .iter()
            .map(|(_, job)| job.clone())
            .collect()
    }
}

#[async_trait]
impl JobScheduler for InMemoryJobScheduler {
    async fn enqueue(&self, job: &QueuedJob, not_before: DateTime<Utc>) -> Result<(), SchedulerError> {
        self.queues
            .lock()
            .await
            .scheduled
            .push((not_before, job.clone()));
        Ok(())
    }

    async fn dequeue_due(&self, now: DateTime<Utc>) -> Result<Option<QueuedJob>, SchedulerError> {
        let mut queues = self.queues.lock().await;
        let earliest = queues
            .scheduled
            .iter()
            .enumerate()
            .filter(|(_, (due, _))| *due <= now)
            .min_by_key(|(_, (due, _))| *due)
            .map(|(index, _)| index);

        Ok(earliest.map(|index| {
            let (_, job) = queues.scheduled.remove(index);
            queues.claimed.push((now, job.clone()));
            job
        }))
    }

    async fn complete(&self, job: &QueuedJob) -> Result<(), SchedulerError> {
        let mut queues = self.queues.lock().await;
        if let Some(index) = queues.claimed.iter().position(|(_, j)| j == job) {
            queues.claimed.remove(index);
        }
        Ok(())
    }

    async fn recover_expired(&self, now: DateTime<Utc>, lease: Duration) -> Result<usize, SchedulerError> {
        let cutoff = lease_cutoff(now, lease);
        let mut queues = self.queues.lock().await;
        let (expired, live): (Vec<_>, Vec<_>) = queues
            .claimed
            .drain(..)
            .partition(|(claimed_at, _)| *claimed_at <= cutoff);
        queues.claimed = live;

        let count = expired.len();
        queues
            .scheduled
            .extend(expired.into_iter().map(|(_, job)| (now, job)));
        Ok(count)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
