use sqlx::PgPool;
use std::sync::Arc;

use crate::services::scheduler::RedisJobScheduler;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub scheduler: Arc<RedisJobScheduler>,
}

impl AppState {
    pub fn new(db: PgPool, scheduler: RedisJobScheduler) -> Self {
        Self {
            db,
            scheduler: Arc::new(scheduler),
        }
    }
}
