use async_trait::async_trait;
use redis::AsyncCommands;

use crate::models::notification::NotificationContent;

const NOTIFICATION_KEY_PREFIX: &str = "meal_snap:notifications";
const NOTIFICATION_CHANNEL: &str = "meal_snap:notifications";

/// How long a posted notice is kept for late-joining presenters.
const NOTIFICATION_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Hands notices to the presentation layer. Posting under an existing key
/// replaces that notice.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn post(&self, key: &str, content: &NotificationContent) -> Result<(), NotificationError>;
}

/// Writes notices to the structured log only.
#[derive(Debug, Default)]
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn post(&self, key: &str, content: &NotificationContent) -> Result<(), NotificationError> {
        tracing::info!(
            key = %key,
            channel = %content.channel_id,
            title = %content.title,
            body = %content.body,
            ongoing = content.ongoing,
            "Notification posted"
        );
        Ok(())
    }
}

/// Stores the latest notice per key in Redis and publishes it for presenters.
pub struct RedisNotificationSink {
    client: redis::Client,
}

impl RedisNotificationSink {
    pub fn new(redis_url: &str) -> Result<Self, NotificationError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl NotificationSink for RedisNotificationSink {
    async fn post(&self, key: &str, content: &NotificationContent) -> Result<(), NotificationError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let envelope = serde_json::json!({ "key": key, "content": content }).to_string();

        conn.set_ex::<_, _, ()>(
            format!("{}:{}", NOTIFICATION_KEY_PREFIX, key),
            &envelope,
            NOTIFICATION_TTL_SECS,
        )
        .await?;
        conn.publish::<_, _, ()>(NOTIFICATION_CHANNEL, &envelope).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}
