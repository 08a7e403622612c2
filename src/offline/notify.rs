//! Push payload decoding and notification display.

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const DEFAULT_TITLE: &str = "Rabbit Farm";
pub const DEFAULT_ICON: &str = "/icons/icon-192x192.png";
pub const DEFAULT_BADGE: &str = "/icons/badge-72x72.png";

pub const ACTION_VIEW: &str = "view";
pub const ACTION_DISMISS: &str = "dismiss";

/// Payload delivered by the push service.
#[derive(Debug, Clone, Deserialize)]
pub struct PushPayload {
  pub body: String,
  #[serde(default)]
  pub id: Option<serde_json::Value>,
  #[serde(default)]
  pub url: Option<String>,
  #[serde(default)]
  pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

/// Everything needed to show a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  /// Groups notifications for the same record
  pub tag: Option<String>,
  /// Where a click should take the user
  pub url: Option<String>,
  pub actions: Vec<NotificationAction>,
}

impl Notification {
  pub fn from_payload(payload: PushPayload) -> Self {
    // Ids arrive as either numbers or strings
    let tag = payload.id.map(|id| match id {
      serde_json::Value::String(s) => s,
      other => other.to_string(),
    });

    Self {
      title: payload.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
      body: payload.body,
      icon: DEFAULT_ICON.to_string(),
      badge: DEFAULT_BADGE.to_string(),
      tag,
      url: payload.url,
      actions: vec![
        NotificationAction {
          action: ACTION_VIEW.to_string(),
          title: "View".to_string(),
        },
        NotificationAction {
          action: ACTION_DISMISS.to_string(),
          title: "Dismiss".to_string(),
        },
      ],
    }
  }
}

/// A user interaction with a shown notification.
#[derive(Debug, Clone)]
pub struct NotificationClick {
  /// Button pressed, or None when the body was clicked
  pub action: Option<String>,
  pub notification: Notification,
}

/// What the controller did in response to a click.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
  Dismissed,
  Focused { client: u64, url: String },
  Opened { client: u64, url: String },
}

/// Surface that displays notifications to the user.
pub trait Notifier: Send + Sync {
  fn show(&self, notification: &Notification) -> Result<()>;
}

/// Notifier that records notifications in the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
  fn show(&self, notification: &Notification) -> Result<()> {
    info!(
      title = %notification.title,
      body = %notification.body,
      url = notification.url.as_deref().unwrap_or("/"),
      "notification"
    );
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_payload_with_numeric_id() {
    let payload: PushPayload =
      serde_json::from_str(r#"{"body":"Doe 12 is due tomorrow","id":12,"url":"/breeding"}"#)
        .unwrap();
    let n = Notification::from_payload(payload);

    assert_eq!(n.title, DEFAULT_TITLE);
    assert_eq!(n.body, "Doe 12 is due tomorrow");
    assert_eq!(n.tag.as_deref(), Some("12"));
    assert_eq!(n.url.as_deref(), Some("/breeding"));
    let actions: Vec<&str> = n.actions.iter().map(|a| a.action.as_str()).collect();
    assert_eq!(actions, vec![ACTION_VIEW, ACTION_DISMISS]);
  }

  #[test]
  fn test_payload_with_title_and_string_id() {
    let payload: PushPayload =
      serde_json::from_str(r#"{"body":"b","id":"r-7","title":"Kindling"}"#).unwrap();
    let n = Notification::from_payload(payload);
    assert_eq!(n.title, "Kindling");
    assert_eq!(n.tag.as_deref(), Some("r-7"));
    assert_eq!(n.url, None);
  }

  #[test]
  fn test_payload_requires_body() {
    assert!(serde_json::from_str::<PushPayload>(r#"{"id":1}"#).is_err());
  }
}
