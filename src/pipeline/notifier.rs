use crate::models::notification::{
    NotificationAction, NotificationChannel, NotificationContent, ProgressIndicator,
};
use crate::models::nutrition::NutritionEstimate;
use crate::models::outcome::AnalysisOutcome;

pub const NO_FOOD_MESSAGE: &str = "No food detected. Please take a photo of your meal.";
pub const PERMISSION_DENIED_MESSAGE: &str =
    "Couldn't save your meal because health data access was revoked. Grant access again and the kept photo will be analyzed.";
pub const GENERIC_FAILURE_MESSAGE: &str = "We couldn't analyze your meal. Please try again later.";

const RUNNING_TITLE: &str = "Analyzing meal";
const SUCCESS_TITLE: &str = "Meal logged";
const FAILURE_TITLE: &str = "Meal analysis failed";
const OPEN_ACTION_LABEL: &str = "Open";

/// Builds the notices shown while a meal is analyzed and once it finishes.
#[derive(Debug, Clone)]
pub struct ProgressNotifier {
    channel: NotificationChannel,
}

impl ProgressNotifier {
    pub fn new(channel: NotificationChannel) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &NotificationChannel {
        &self.channel
    }

    /// Persistent notice while an attempt runs. Without a percentage the
    /// progress bar is indeterminate.
    pub fn running(&self, status_text: &str, progress_percent: Option<u8>) -> NotificationContent {
        let progress = match progress_percent {
            Some(p) => ProgressIndicator::Percent(p.min(100)),
            None => ProgressIndicator::Indeterminate,
        };
        NotificationContent {
            channel_id: self.channel.id.clone(),
            title: RUNNING_TITLE.to_string(),
            body: status_text.to_string(),
            ongoing: true,
            auto_cancel: false,
            progress: Some(progress),
            action: None,
        }
    }

    pub fn succeeded(&self, estimate: &NutritionEstimate) -> NotificationContent {
        NotificationContent {
            channel_id: self.channel.id.clone(),
            title: SUCCESS_TITLE.to_string(),
            body: format!("{} kcal - {}", estimate.calories(), estimate.description()),
            ongoing: false,
            auto_cancel: true,
            progress: None,
            action: Some(self.open_main_view()),
        }
    }

    pub fn failed(&self, reason_text: &str) -> NotificationContent {
        NotificationContent {
            channel_id: self.channel.id.clone(),
            title: FAILURE_TITLE.to_string(),
            body: reason_text.to_string(),
            ongoing: false,
            auto_cancel: true,
            progress: None,
            action: Some(self.open_main_view()),
        }
    }

    fn open_main_view(&self) -> NotificationAction {
        NotificationAction {
            label: OPEN_ACTION_LABEL.to_string(),
            target: self.channel.main_view_target.clone(),
        }
    }
}

/// Status line for the running notice of a given attempt.
pub fn running_status(attempt_number: u32, max_attempts: u32) -> String {
    if attempt_number <= 1 {
        "Analyzing your meal".to_string()
    } else {
        format!("Retrying analysis (attempt {} of {})", attempt_number, max_attempts)
    }
}

/// User-facing reason for a terminal failure.
pub fn failure_reason(outcome: &AnalysisOutcome) -> &'static str {
    match outcome {
        AnalysisOutcome::NoFoodDetected { .. } => NO_FOOD_MESSAGE,
        AnalysisOutcome::PermissionDenied { .. } => PERMISSION_DENIED_MESSAGE,
        _ => GENERIC_FAILURE_MESSAGE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::notification::Importance;

    fn notifier() -> ProgressNotifier {
        ProgressNotifier::new(NotificationChannel {
            id: "meal_analysis".to_string(),
            name: "Meal analysis".to_string(),
            importance: Importance::Low,
            main_view_target: "mealsnap://main".to_string(),
        })
    }

    #[test]
    fn test_running_is_ongoing_and_indeterminate_without_percent() {
        let content = notifier().running("Analyzing your meal", None);
        assert!(content.ongoing);
        assert!(!content.auto_cancel);
        assert_eq!(content.progress, Some(ProgressIndicator::Indeterminate));
        assert!(content.action.is_none());
        assert_eq!(content.channel_id, "meal_analysis");
    }

    #[test]
    fn test_running_percent_is_clamped() {
        let content = notifier().running("Uploading", Some(140));
        assert_eq!(content.progress, Some(ProgressIndicator::Percent(100)));
        let content = notifier().running("Uploading", Some(40));
        assert_eq!(content.progress, Some(ProgressIndicator::Percent(40)));
    }

    #[test]
    fn test_succeeded_summarizes_estimate() {
        let estimate = NutritionEstimate::new(480, "Veggie bowl").unwrap();
        let content = notifier().succeeded(&estimate);
        assert_eq!(content.body, "480 kcal - Veggie bowl");
        assert!(!content.ongoing);
        assert!(content.auto_cancel);
        assert_eq!(
            content.action.map(|a| a.target),
            Some("mealsnap://main".to_string())
        );
    }

    #[test]
    fn test_failed_opens_main_view() {
        let content = notifier().failed(NO_FOOD_MESSAGE);
        assert_eq!(content.title, FAILURE_TITLE);
        assert_eq!(content.body, NO_FOOD_MESSAGE);
        assert!(!content.ongoing);
        assert!(content.progress.is_none());
        assert!(content.action.is_some());
    }

    #[test]
    fn test_failure_reasons_differ_by_outcome() {
        let no_food = AnalysisOutcome::NoFoodDetected {
            reason: "keyboard".into(),
        };
        let exhausted = AnalysisOutcome::RetryableFailure {
            cause: "timeout".into(),
        };
        let denied = AnalysisOutcome::PermissionDenied {
            cause: "revoked".into(),
        };
        assert_eq!(failure_reason(&no_food), NO_FOOD_MESSAGE);
        assert_eq!(failure_reason(&exhausted), GENERIC_FAILURE_MESSAGE);
        assert_eq!(failure_reason(&denied), PERMISSION_DENIED_MESSAGE);
        assert_ne!(failure_reason(&no_food), failure_reason(&exhausted));
    }

    #[test]
    fn test_running_status_mentions_retry() {
        assert_eq!(running_status(1, 4), "Analyzing your meal");
        assert_eq!(running_status(3, 4), "Retrying analysis (attempt 3 of 4)");
    }
}
