//! Domain types exchanged with the backend and held in the caches.
//!
//! Field names follow the backend's JSON (camelCase, Mongo-style `_id`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role of the signed-in user; schedules are keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  Student,
  Teacher,
  Admin,
}

impl Role {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Student => "student",
      Self::Teacher => "teacher",
      Self::Admin => "admin",
    }
  }
}

impl fmt::Display for Role {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Role {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "student" => Ok(Self::Student),
      "teacher" => Ok(Self::Teacher),
      "admin" => Ok(Self::Admin),
      other => Err(format!("unknown role: {}", other)),
    }
  }
}

/// Which news list a cache entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NewsTab {
  Feed,
  Favorites,
}

impl NewsTab {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Feed => "feed",
      Self::Favorites => "favorites",
    }
  }
}

impl fmt::Display for NewsTab {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for NewsTab {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "feed" | "all" => Ok(Self::Feed),
      "favorites" | "favourites" | "favorite" => Ok(Self::Favorites),
      other => Err(format!("unknown news tab: {}", other)),
    }
  }
}

/// Conversation summary shown in the chat list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
  #[serde(rename = "_id", alias = "id")]
  pub id: String,
  pub participant_id: String,
  #[serde(default)]
  pub participant_name: String,
  pub last_message: Option<String>,
  pub last_message_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub unread_count: u32,
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
  #[serde(rename = "_id", alias = "id")]
  pub id: String,
  pub sender_id: String,
  pub receiver_id: String,
  pub content: String,
  pub created_at: DateTime<Utc>,
  #[serde(default)]
  pub read_by: Vec<String>,
}

/// News article
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsArticle {
  #[serde(rename = "_id", alias = "id")]
  pub id: String,
  pub title: String,
  #[serde(default)]
  pub content: String,
  pub subject: Option<String>,
  pub author_id: Option<String>,
  pub created_at: Option<DateTime<Utc>>,
  /// User ids that favorited the article
  #[serde(default)]
  pub favorites: Vec<String>,
}

impl NewsArticle {
  pub fn is_favorite_of(&self, user_id: &str) -> bool {
    self.favorites.iter().any(|u| u == user_id)
  }
}

/// One lesson slot in a weekly timetable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
  #[serde(rename = "_id", alias = "id")]
  pub id: String,
  pub subject: String,
  pub teacher: Option<String>,
  pub class_name: Option<String>,
  pub room: Option<String>,
  /// 1 = Monday
  pub day_of_week: u8,
  pub period: u8,
  pub week_number: u32,
  pub academic_year: String,
}

/// Server-pushed notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
  #[serde(default, rename = "_id", alias = "id")]
  pub id: Option<String>,
  #[serde(default = "default_category", alias = "type")]
  pub category: String,
  pub title: String,
  #[serde(default)]
  pub body: String,
  #[serde(default)]
  pub recipients: Vec<String>,
  #[serde(default)]
  pub read_by: Vec<String>,
  pub created_at: Option<DateTime<Utc>>,
}

fn default_category() -> String {
  "general".to_string()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_message_accepts_underscore_id() {
    let message: Message = serde_json::from_value(json!({
      "_id": "m1",
      "senderId": "u2",
      "receiverId": "u1",
      "content": "Chào em",
      "createdAt": "2024-09-05T08:00:00Z"
    }))
    .unwrap();

    assert_eq!(message.id, "m1");
    assert!(message.read_by.is_empty());
    assert_eq!(serde_json::to_value(&message).unwrap()["_id"], "m1");
  }

  #[test]
  fn test_notification_defaults() {
    let notification: Notification =
      serde_json::from_value(json!({ "title": "Lịch thi", "recipients": ["u1"] })).unwrap();

    assert_eq!(notification.id, None);
    assert_eq!(notification.category, "general");
  }

  #[test]
  fn test_parse_tab_and_role() {
    assert_eq!("Favorites".parse::<NewsTab>(), Ok(NewsTab::Favorites));
    assert_eq!("teacher".parse::<Role>(), Ok(Role::Teacher));
    assert!("janitor".parse::<Role>().is_err());
  }

  #[test]
  fn test_favorites_are_per_user() {
    let article: NewsArticle = serde_json::from_value(json!({
      "_id": "n1",
      "title": "Khai giảng",
      "favorites": ["u1"]
    }))
    .unwrap();

    assert!(article.is_favorite_of("u1"));
    assert!(!article.is_favorite_of("u2"));
  }
}
