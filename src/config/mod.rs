use serde::Deserialize;
use std::time::Duration;

use crate::models::notification::{Importance, NotificationChannel};
use crate::pipeline::sweeper::RetentionPolicy;
use crate::services::scheduler::BackoffPolicy;

/// Where captured images are held until analysis finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageBackend {
    Local,
    R2,
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Prometheus scrape address of the worker process
    #[serde(default = "default_worker_metrics_addr")]
    pub worker_metrics_addr: String,

    /// PostgreSQL connection string (health data store)
    pub database_url: String,

    /// Redis connection string for the job scheduler and notifications
    pub redis_url: String,

    /// Cloudflare account ID
    pub cf_account_id: String,

    /// Cloudflare Workers AI API token
    pub cf_api_token: String,

    /// Workers AI vision model
    #[serde(default)]
    pub vision_model: Option<String>,

    #[serde(default = "default_vision_timeout_secs")]
    pub vision_timeout_secs: u64,

    #[serde(default = "default_image_backend")]
    pub image_backend: ImageBackend,

    /// Directory of the local transient image store
    #[serde(default = "default_image_dir")]
    pub image_dir: String,

    pub r2_bucket: Option<String>,
    pub r2_endpoint: Option<String>,
    pub r2_access_key: Option<String>,
    pub r2_secret_key: Option<String>,

    #[serde(default = "default_r2_prefix")]
    pub r2_prefix: String,

    /// AES-256-GCM key for images at rest in R2 (base64-encoded, 32 bytes)
    pub encryption_key: Option<String>,

    /// Attempts per job, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_initial_secs")]
    pub backoff_initial_secs: u64,

    /// How long a claimed job may run before another worker may take it over
    #[serde(default = "default_claim_lease_secs")]
    pub claim_lease_secs: u64,

    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    #[serde(default = "default_notification_channel_id")]
    pub notification_channel_id: String,

    #[serde(default = "default_notification_channel_name")]
    pub notification_channel_name: String,

    #[serde(default = "default_notification_importance")]
    pub notification_importance: Importance,

    /// Deep link opened when a result notification is tapped
    #[serde(default = "default_main_view_target")]
    pub main_view_target: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_worker_metrics_addr() -> String {
    "0.0.0.0:9091".to_string()
}

fn default_vision_timeout_secs() -> u64 {
    60
}

fn default_image_backend() -> ImageBackend {
    ImageBackend::Local
}

fn default_image_dir() -> String {
    "./data/captures".to_string()
}

fn default_r2_prefix() -> String {
    "captures/".to_string()
}

fn default_max_attempts() -> u32 {
    4
}

fn default_backoff_initial_secs() -> u64 {
    1
}

fn default_claim_lease_secs() -> u64 {
    600
}

fn default_retention_hours() -> u64 {
    24
}

fn default_sweep_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_notification_channel_id() -> String {
    "meal_analysis".to_string()
}

fn default_notification_channel_name() -> String {
    "Meal analysis".to_string()
}

fn default_notification_importance() -> Importance {
    Importance::Low
}

fn default_main_view_target() -> String {
    "mealsnap://main".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_secs(self.backoff_initial_secs),
            max_attempts: self.max_attempts.max(1),
        }
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_age: Duration::from_secs(self.retention_hours * 60 * 60),
        }
    }

    pub fn notification_channel(&self) -> NotificationChannel {
        NotificationChannel {
            id: self.notification_channel_id.clone(),
            name: self.notification_channel_name.clone(),
            importance: self.notification_importance,
            main_view_target: self.main_view_target.clone(),
        }
    }

    pub fn vision_timeout(&self) -> Duration {
        Duration::from_secs(self.vision_timeout_secs)
    }

    pub fn claim_lease(&self) -> Duration {
        Duration::from_secs(self.claim_lease_secs.max(1))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
