use chrono::{DateTime, Utc};
use garde::Validate;
use serde::Serialize;
use uuid::Uuid;

/// Lowest calorie count the vision service may report for a real meal.
pub const MIN_CALORIES: u32 = 1;

/// Highest calorie count accepted for a single photographed meal.
pub const MAX_CALORIES: u32 = 5000;

/// Longest description kept on a nutrition entry.
pub const MAX_DESCRIPTION_LEN: usize = 200;

/// Namespace for deterministic nutrition entry keys.
const ENTRY_KEY_NAMESPACE: Uuid = Uuid::from_u128(0x6d65_616c_2d73_6e61_702d_656e_7472_7921);

/// Nutrition estimate for one meal photo.
///
/// Only obtainable through [`NutritionEstimate::new`], so every value in
/// circulation is within range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Validate)]
pub struct NutritionEstimate {
    #[garde(range(min = 1, max = 5000))]
    calories: u32,

    #[garde(length(min = 1, max = 200))]
    description: String,
}

impl NutritionEstimate {
    /// Build a validated estimate. The description is trimmed first, so a
    /// blank description is rejected.
    pub fn new(calories: u32, description: impl Into<String>) -> Result<Self, EstimateError> {
        let estimate = Self {
            calories,
            description: description.into().trim().to_string(),
        };
        estimate.validate().map_err(EstimateError)?;
        Ok(estimate)
    }

    pub fn calories(&self) -> u32 {
        self.calories
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid nutrition estimate: {0}")]
pub struct EstimateError(pub garde::Report);

/// Row written to the health data store for a successful analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewNutritionEntry {
    /// Idempotency key: identical for every attempt of the same capture.
    pub client_key: Uuid,
    pub calories: i32,
    pub description: String,
    /// Capture time of the photo, not the time of analysis.
    pub recorded_at: DateTime<Utc>,
}

/// Idempotency key of the entry recorded for a capture.
pub fn entry_key(image_handle: &str, captured_at: DateTime<Utc>) -> Uuid {
    let key_material = format!("{}@{}", image_handle, captured_at.timestamp());
    Uuid::new_v5(&ENTRY_KEY_NAMESPACE, key_material.as_bytes())
}

impl NewNutritionEntry {
    pub fn new(estimate: &NutritionEstimate, image_handle: &str, captured_at: DateTime<Utc>) -> Self {
        Self {
            client_key: entry_key(image_handle, captured_at),
            // MAX_CALORIES fits comfortably in i32
            calories: estimate.calories() as i32,
            description: estimate.description().to_string(),
            recorded_at: captured_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_within_range() {
        let estimate = NutritionEstimate::new(480, "  Veggie bowl ").unwrap();
        assert_eq!(estimate.calories(), 480);
        assert_eq!(estimate.description(), "Veggie bowl");
    }

    #[test]
    fn test_estimate_bounds_inclusive() {
        assert!(NutritionEstimate::new(MIN_CALORIES, "Mint").is_ok());
        assert!(NutritionEstimate::new(MAX_CALORIES, "Feast").is_ok());
    }

    #[test]
    fn test_estimate_rejects_out_of_range_calories() {
        assert!(NutritionEstimate::new(0, "Water").is_err());
        assert!(NutritionEstimate::new(MAX_CALORIES + 1, "Buffet").is_err());
    }

    #[test]
    fn test_estimate_rejects_blank_description() {
        assert!(NutritionEstimate::new(300, "").is_err());
        assert!(NutritionEstimate::new(300, "   \n").is_err());
    }

    #[test]
    fn test_estimate_rejects_long_description() {
        let long = "a".repeat(MAX_DESCRIPTION_LEN + 1);
        assert!(NutritionEstimate::new(300, long).is_err());
    }

    #[test]
    fn test_entry_key_stable_across_attempts() {
        let estimate = NutritionEstimate::new(480, "Veggie bowl").unwrap();
        let captured_at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let first = NewNutritionEntry::new(&estimate, "img-1.jpg", captured_at);
        let second = NewNutritionEntry::new(&estimate, "img-1.jpg", captured_at);
        let other = NewNutritionEntry::new(&estimate, "img-2.jpg", captured_at);

        assert_eq!(first.client_key, second.client_key);
        assert_ne!(first.client_key, other.client_key);
        assert_eq!(first.recorded_at, captured_at);
        assert_eq!(first.calories, 480);
        assert_eq!(first.client_key, entry_key("img-1.jpg", captured_at));
    }
}
