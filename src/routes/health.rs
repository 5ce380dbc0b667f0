use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub health_store: ComponentHealth,
    pub scheduler: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_depth: Option<u64>,
}

impl ComponentHealth {
    fn ok(latency_ms: u64) -> Self {
        Self {
            status: "ok".to_string(),
            latency_ms: Some(latency_ms),
            queue_depth: None,
        }
    }

    fn error() -> Self {
        Self {
            status: "error".to_string(),
            latency_ms: None,
            queue_depth: None,
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// GET /health: health data store and scheduler connectivity.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let db_start = std::time::Instant::now();
    let health_store = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => ComponentHealth::ok(db_start.elapsed().as_millis() as u64),
        Err(_) => ComponentHealth::error(),
    };

    let redis_start = std::time::Instant::now();
    let scheduler = match state.scheduler.health_check().await {
        Ok(()) => {
            let mut health = ComponentHealth::ok(redis_start.elapsed().as_millis() as u64);
            health.queue_depth = state.scheduler.queue_depth().await.ok();
            if let Some(depth) = health.queue_depth {
                metrics::gauge!("meal_analysis_queue_depth").set(depth as f64);
            }
            health
        }
        Err(_) => ComponentHealth::error(),
    };

    let all_healthy = health_store.is_ok() && scheduler.is_ok();
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            health_store,
            scheduler,
        },
    };

    (status_code, Json(response))
}
