use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use crate::models::nutrition::{EstimateError, NutritionEstimate};

/// What the vision service saw in a meal photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VisionAnalysis {
    Estimate(NutritionEstimate),
    NoFood { reason: String },
}

/// Image-to-nutrition analysis backend.
#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    /// Analyze compressed image bytes. May take tens of seconds.
    async fn analyze(&self, image_bytes: &[u8]) -> Result<VisionAnalysis, VisionError>;
}

const DEFAULT_MODEL: &str = "@cf/llava-hf/llava-1.5-7b-hf";

const PROMPT: &str = concat!(
    "Analyze this photo of a meal. Respond with a single JSON object with the fields ",
    "food_detected (boolean), calories (total estimated kilocalories as an integer), ",
    "description (a short name for the meal, at most 200 characters) and ",
    "reason (only when food_detected is false: why no food was recognized). ",
    "Return ONLY valid JSON with these exact field names."
);

/// Client for a Cloudflare Workers AI vision model.
pub struct WorkersAiClient {
    http: Client,
    account_id: String,
    api_token: String,
    model: String,
}

#[derive(Deserialize)]
struct WorkersAiResponse {
    result: WorkersAiResult,
}

#[derive(Deserialize)]
struct WorkersAiResult {
    description: String,
}

/// Raw JSON the model is asked to produce. Everything is optional because
/// model output is untrusted.
#[derive(Debug, Deserialize)]
struct MealAssessment {
    food_detected: Option<bool>,
    calories: Option<f64>,
    description: Option<String>,
    reason: Option<String>,
}

impl WorkersAiClient {
    pub fn new(
        account_id: &str,
        api_token: &str,
        model: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, VisionError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VisionError::Other(e.to_string()))?;

        Ok(Self {
            http,
            account_id: account_id.to_string(),
            api_token: api_token.to_string(),
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "https://api.cloudflare.com/client/v4/accounts/{}/ai/run/{}",
            self.account_id, self.model
        )
    }
}

#[async_trait]
impl VisionAnalyzer for WorkersAiClient {
    async fn analyze(&self, image_bytes: &[u8]) -> Result<VisionAnalysis, VisionError> {
        let format = image::guess_format(image_bytes)
            .map_err(|e| VisionError::InvalidImage(e.to_string()))?;
        tracing::debug!(format = ?format, size = image_bytes.len(), "Sending image to Workers AI");

        let request_body = serde_json::json!({
            "image": base64::engine::general_purpose::STANDARD.encode(image_bytes),
            "prompt": PROMPT,
            "max_tokens": 256
        });

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_token)
            .json(&request_body)
            .send()
            .await
            .map_err(VisionError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VisionError::from_status(status, body));
        }

        let envelope: WorkersAiResponse = response
            .json()
            .await
            .map_err(VisionError::from_transport)?;

        parse_assessment(&envelope.result.description)
    }
}

/// Turn the model's free-text answer into a [`VisionAnalysis`].
pub fn parse_assessment(text: &str) -> Result<VisionAnalysis, VisionError> {
    let json = extract_json_object(text)
        .ok_or_else(|| VisionError::MalformedResponse("no JSON object in model output".into()))?;
    let assessment: MealAssessment = serde_json::from_str(json)
        .map_err(|e| VisionError::MalformedResponse(e.to_string()))?;

    let food_detected = match (assessment.food_detected, assessment.calories) {
        (Some(detected), _) => detected,
        (None, Some(_)) => true,
        (None, None) => {
            return Err(VisionError::MalformedResponse(
                "neither food_detected nor calories in model output".into(),
            ))
        }
    };
    if !food_detected {
        let reason = assessment
            .reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| "No food visible in the photo".to_string());
        return Ok(VisionAnalysis::NoFood { reason });
    }

    let calories = assessment
        .calories
        .filter(|c| c.is_finite())
        .ok_or_else(|| VisionError::MalformedResponse("missing calories".into()))?
        .round();
    // Negative and oversized values are left for range validation to reject.
    let calories = if calories < 0.0 { 0 } else { calories.min(u32::MAX as f64) as u32 };

    let estimate = NutritionEstimate::new(calories, assessment.description.unwrap_or_default())
        .map_err(VisionError::InvalidEstimate)?;
    Ok(VisionAnalysis::Estimate(estimate))
}

/// Slice out the outermost `{ ... }`, dropping code fences or prose around it.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("Connection to vision service failed: {0}")]
    Connection(String),

    #[error("Vision request timed out: {0}")]
    Timeout(String),

    #[error("Vision service rate limited the request")]
    RateLimited,

    #[error("Vision service error (HTTP {status}): {body}")]
    Server { status: u16, body: String },

    #[error("Vision service rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("Vision service rejected the request (HTTP {status}): {body}")]
    BadRequest { status: u16, body: String },

    #[error("Unparseable vision response: {0}")]
    MalformedResponse(String),

    #[error("Image bytes are not a supported format: {0}")]
    InvalidImage(String),

    #[error(transparent)]
    InvalidEstimate(#[from] EstimateError),

    #[error("Vision request failed: {0}")]
    Other(String),
}

impl VisionError {
    fn from_transport(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            VisionError::Timeout(e.to_string())
        } else if e.is_connect() {
            VisionError::Connection(e.to_string())
        } else if e.is_decode() {
            VisionError::MalformedResponse(e.to_string())
        } else {
            VisionError::Other(e.to_string())
        }
    }

    fn from_status(status: StatusCode, body: String) -> Self {
        match status {
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                VisionError::Timeout(format!("HTTP {}", status.as_u16()))
            }
            StatusCode::TOO_MANY_REQUESTS => VisionError::RateLimited,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => VisionError::Unauthorized {
                status: status.as_u16(),
            },
            s if s.is_server_error() => VisionError::Server {
                status: s.as_u16(),
                body,
            },
            s => VisionError::BadRequest {
                status: s.as_u16(),
                body,
            },
        }
    }
}
