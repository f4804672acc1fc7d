//! Translate domain events into cache clears.
//!
//! Screens and the real-time layer call these instead of reaching into store
//! internals. When an event does not carry enough detail to narrow the clear,
//! the whole store for that kind is dropped: a refetch is cheaper than stale
//! data.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use super::keys::{NewsKey, NewsScope, ScheduleScope};
use super::store::ClearScope;
use super::CacheStores;
use crate::models::{NewsTab, Role};

/// A named application event that makes cached data stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationEvent {
  News {
    tab: Option<NewsTab>,
    subject: Option<String>,
  },
  Schedule(ScheduleScope),
  Chat {
    user_id: Option<String>,
    peer_id: Option<String>,
  },
  All,
}

impl InvalidationEvent {
  /// Build an event from its application name (`"news"`, `"schedule"`,
  /// `"chat"`) and free-form details.
  ///
  /// Unknown names map to [`InvalidationEvent::All`].
  pub fn from_named(name: &str, details: &Value) -> Self {
    let text = |field: &str| {
      details
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
    };
    let number = |field: &str| {
      details.get(field).and_then(|v| match v {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
      })
    };

    match name.trim().to_lowercase().as_str() {
      "news" => Self::News {
        tab: text("tab").and_then(|t| t.parse().ok()),
        subject: text("subject"),
      },
      "schedule" => Self::Schedule(ScheduleScope {
        role: text("role").and_then(|r| r.parse::<Role>().ok()),
        user_key: text("userKey"),
        academic_year: text("academicYear").or_else(|| text("year")),
        week: number("weekNumber").or_else(|| number("week")),
      }),
      "chat" => Self::Chat {
        user_id: text("userId"),
        peer_id: text("peerId"),
      },
      "all" => Self::All,
      other => {
        warn!(event = other, "unknown invalidation event; clearing everything");
        Self::All
      }
    }
  }
}

/// Clears cache stores in response to domain events.
#[derive(Clone)]
pub struct Invalidator {
  stores: Arc<CacheStores>,
}

impl Invalidator {
  pub fn new(stores: Arc<CacheStores>) -> Self {
    Self { stores }
  }

  /// Clear news entries. No arguments clears every tab and subject.
  pub fn news(&self, tab: Option<NewsTab>, subject: Option<&str>) {
    let scope = match (tab, subject) {
      (None, None) => ClearScope::All,
      (Some(tab), Some(subject)) => ClearScope::Exact(NewsKey::new(tab, Some(subject))),
      (tab, subject) => ClearScope::Matching(NewsScope::new(tab, subject)),
    };
    debug!(?scope, "invalidating news");
    self.stores.news.clear(scope);
  }

  /// Clear schedule entries inside `scope`. An empty scope clears them all.
  pub fn schedule(&self, scope: ScheduleScope) {
    let scope = if scope.is_empty() {
      ClearScope::All
    } else if let Some(key) = scope.exact() {
      ClearScope::Exact(key)
    } else {
      ClearScope::Matching(scope)
    };
    debug!(?scope, "invalidating schedule");
    self.stores.schedule.clear(scope);
  }

  /// Clear chat entries.
  ///
  /// `user_id` narrows the conversation lists, `peer_id` the message
  /// threads. A new message with a peer also changes the conversation
  /// summaries, so those are cleared too (all of them without a user id).
  pub fn chat(&self, user_id: Option<&str>, peer_id: Option<&str>) {
    debug!(?user_id, ?peer_id, "invalidating chat");
    match user_id {
      Some(user_id) => self
        .stores
        .conversations
        .clear(ClearScope::Matching(user_id.to_string())),
      None => self.stores.conversations.clear(ClearScope::All),
    }

    match (user_id, peer_id) {
      (_, Some(peer_id)) => self
        .stores
        .messages
        .clear(ClearScope::Matching(peer_id.to_string())),
      (None, None) => self.stores.messages.clear(ClearScope::All),
      (Some(_), None) => {}
    }
  }

  /// Clear every store, e.g. on logout or account switch.
  pub fn all(&self) {
    debug!("invalidating all caches");
    self.stores.conversations.clear(ClearScope::All);
    self.stores.messages.clear(ClearScope::All);
    self.stores.news.clear(ClearScope::All);
    self.stores.schedule.clear(ClearScope::All);
  }

  /// Apply the narrowest clear the event's details allow.
  pub fn dispatch(&self, event: InvalidationEvent) {
    match event {
      InvalidationEvent::News { tab, subject } => self.news(tab, subject.as_deref()),
      InvalidationEvent::Schedule(scope) => {
        let owner_known =
          scope.role.is_some() && scope.user_key.is_some() && scope.academic_year.is_some();
        if scope.week.is_some() || owner_known {
          self.schedule(scope);
        } else {
          debug!(?scope, "schedule event too vague; clearing all schedules");
          self.schedule(ScheduleScope::default());
        }
      }
      InvalidationEvent::Chat { user_id, peer_id } => {
        self.chat(user_id.as_deref(), peer_id.as_deref())
      }
      InvalidationEvent::All => self.all(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::keys::{ConversationsKey, MessagesKey, ScheduleKey};
  use crate::cache::traits::Namespace;
  use crate::db::MemoryKvStore;
  use serde_json::json;

  fn setup() -> (Arc<CacheStores>, Invalidator) {
    let stores = Arc::new(CacheStores::new(Arc::new(MemoryKvStore::new())));
    (stores.clone(), Invalidator::new(stores))
  }

  fn seed_schedule(stores: &CacheStores) -> (ScheduleKey, ScheduleKey, ScheduleKey) {
    let week1 = ScheduleKey::new(Role::Student, "SV001", "2024-2025", 1);
    let week2 = ScheduleKey::new(Role::Student, "SV001", "2024-2025", 2);
    let other = ScheduleKey::new(Role::Teacher, "GV07", "2024-2025", 1);
    for key in [&week1, &week2, &other] {
      stores.schedule.set(key.clone(), Vec::new());
    }
    (week1, week2, other)
  }

  #[test]
  fn test_parse_named_events() {
    assert_eq!(
      InvalidationEvent::from_named("news", &json!({ "tab": "favorites" })),
      InvalidationEvent::News {
        tab: Some(NewsTab::Favorites),
        subject: None,
      }
    );
    assert_eq!(
      InvalidationEvent::from_named("schedule", &json!({ "weekNumber": "3" })),
      InvalidationEvent::Schedule(ScheduleScope {
        week: Some(3),
        ..Default::default()
      })
    );
    assert_eq!(
      InvalidationEvent::from_named("chat", &json!({ "peerId": "u2" })),
      InvalidationEvent::Chat {
        user_id: None,
        peer_id: Some("u2".to_string()),
      }
    );
    assert_eq!(
      InvalidationEvent::from_named("grades", &Value::Null),
      InvalidationEvent::All
    );
  }

  #[tokio::test]
  async fn test_schedule_week_event_is_narrow() {
    let (stores, invalidator) = setup();
    let (week1, week2, other) = seed_schedule(&stores);

    invalidator.dispatch(InvalidationEvent::from_named(
      "schedule",
      &json!({ "role": "student", "userKey": "SV001", "academicYear": "2024-2025", "weekNumber": 2 }),
    ));

    assert!(stores.schedule.get(&week1).is_some());
    assert!(stores.schedule.get(&week2).is_none());
    assert!(stores.schedule.get(&other).is_some());
  }

  #[tokio::test]
  async fn test_vague_schedule_event_clears_everything() {
    let (stores, invalidator) = setup();
    let (week1, week2, other) = seed_schedule(&stores);

    invalidator.dispatch(InvalidationEvent::from_named("schedule", &json!({ "role": "student" })));

    assert!(stores.schedule.get(&week1).is_none());
    assert!(stores.schedule.get(&week2).is_none());
    assert!(stores.schedule.get(&other).is_none());
  }

  #[tokio::test]
  async fn test_news_by_tab() {
    let (stores, invalidator) = setup();
    let feed = NewsKey::new(NewsTab::Feed, Some("Toán"));
    let favorites = NewsKey::new(NewsTab::Favorites, None);
    stores.news.set(feed.clone(), Vec::new());
    stores.news.set(favorites.clone(), Vec::new());

    invalidator.news(Some(NewsTab::Favorites), None);

    assert!(stores.news.get(&feed).is_some());
    assert!(stores.news.get(&favorites).is_none());
  }

  #[tokio::test]
  async fn test_news_by_padded_subject() {
    let (stores, invalidator) = setup();
    let math = NewsKey::new(NewsTab::Feed, Some("Toán"));
    let physics = NewsKey::new(NewsTab::Feed, Some("Vật lý"));
    stores.news.set(math.clone(), Vec::new());
    stores.news.set(physics.clone(), Vec::new());

    invalidator.news(None, Some(" Toán"));

    assert!(stores.news.get(&math).is_none());
    assert!(stores.news.get(&physics).is_some());
  }

  #[tokio::test]
  async fn test_chat_with_peer() {
    let (stores, invalidator) = setup();
    let mine = ConversationsKey::new("u1");
    let thread = MessagesKey::new("u2");
    let other_thread = MessagesKey::new("u3");
    stores.conversations.set(mine.clone(), Vec::new());
    stores.messages.set(thread.clone(), Vec::new());
    stores.messages.set(other_thread.clone(), Vec::new());

    invalidator.chat(Some("u1"), Some("u2"));

    assert!(stores.conversations.get(&mine).is_none());
    assert!(stores.messages.get(&thread).is_none());
    assert!(stores.messages.get(&other_thread).is_some());
  }

  #[tokio::test]
  async fn test_all_leaves_no_persisted_entries() {
    let (stores, invalidator) = setup();
    stores.conversations.set(ConversationsKey::new("u1"), Vec::new());
    stores.messages.set(MessagesKey::new("u2"), Vec::new());
    stores.news.set(NewsKey::new(NewsTab::Feed, None), Vec::new());
    seed_schedule(&stores);
    stores.flush().await;
    assert_eq!(stores.usage_summary().await[&Namespace::Schedule], 3);

    invalidator.all();

    let summary = stores.usage_summary().await;
    assert!(summary.values().all(|count| *count == 0), "{:?}", summary);
  }
}
