//! Shared test data for pipeline tests

use chrono::{DateTime, Utc};
use meal_snap::models::job::JobPayload;
use meal_snap::models::notification::{Importance, NotificationChannel};

pub const MAIN_VIEW: &str = "mealsnap://main";

/// Minimal bytes carrying a JPEG signature.
pub const JPEG_BYTES: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

pub fn captured_at() -> DateTime<Utc> {
    DateTime::from_timestamp(1_760_000_000, 0).unwrap()
}

pub fn payload(handle: &str) -> JobPayload {
    JobPayload::new(handle, captured_at())
}

pub fn channel() -> NotificationChannel {
    NotificationChannel {
        id: "meal_analysis".to_string(),
        name: "Meal analysis".to_string(),
        importance: Importance::Low,
        main_view_target: MAIN_VIEW.to_string(),
    }
}
