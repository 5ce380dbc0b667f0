use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::job::{JobPayload, QueuedJob, SubmitJobRequest, SubmitJobResponse};
use crate::services::scheduler::JobScheduler;

/// POST /api/v1/jobs: schedule analysis of a captured image.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), StatusCode> {
    request.validate().map_err(|e| {
        tracing::debug!(error = %e, "Rejected job submission");
        StatusCode::UNPROCESSABLE_ENTITY
    })?;

    let job = QueuedJob::first_attempt(JobPayload {
        image_handle: request.image_handle,
        captured_at_epoch_seconds: request.captured_at_epoch_seconds,
    });

    state.scheduler.enqueue(&job, Utc::now()).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to enqueue analysis job");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    metrics::counter!("meal_analysis_jobs_submitted_total").increment(1);
    tracing::info!(
        job_id = %job.job_id,
        image_handle = %job.payload.image_handle,
        "Analysis job scheduled"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id: job.job_id,
            status: "scheduled".to_string(),
        }),
    ))
}
