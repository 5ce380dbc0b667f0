use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Presentation priority of the notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Importance {
    Low,
    Default,
    High,
}

/// Channel the analysis notices are posted on. Built once from configuration
/// and handed to the notifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationChannel {
    pub id: String,
    pub name: String,
    pub importance: Importance,
    /// Deep link that opens the main view of the app.
    pub main_view_target: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum ProgressIndicator {
    Indeterminate,
    Percent(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
    pub label: String,
    pub target: String,
}

/// One user-visible notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationContent {
    pub channel_id: String,
    pub title: String,
    pub body: String,
    /// Persistent notice that the user cannot swipe away.
    pub ongoing: bool,
    /// Dismissed when tapped.
    pub auto_cancel: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressIndicator>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<NotificationAction>,
}
