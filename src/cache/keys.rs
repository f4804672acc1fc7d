//! Structured cache keys.
//!
//! Keys are plain structs rather than concatenated strings. Their persisted
//! form is the JSON encoding of the struct, so a component containing `_` or
//! any other delimiter cannot collide with another key, and clearing by scope
//! is a typed filter over the decoded fields.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt::Debug;
use std::hash::Hash;

use crate::models::{NewsTab, Role};

/// Subject filter used when none is selected.
pub const ALL_SUBJECTS: &str = "all";

/// A key identifying one cache entry within a store.
pub trait CacheKey:
  Clone + Eq + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
  /// Partial selection used by scoped clears.
  type Scope: Debug + Send + Sync + 'static;

  /// Whether this key falls inside `scope`.
  fn matches(&self, scope: &Self::Scope) -> bool;

  /// Deterministic persisted form of the key.
  fn encode(&self) -> String {
    serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self))
  }

  fn decode(raw: &str) -> Option<Self> {
    serde_json::from_str(raw).ok()
  }
}

/// Conversation list of the local user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationsKey {
  pub user_id: String,
}

impl ConversationsKey {
  pub fn new(user_id: impl Into<String>) -> Self {
    Self {
      user_id: user_id.into(),
    }
  }
}

impl CacheKey for ConversationsKey {
  /// User id
  type Scope = String;

  fn matches(&self, scope: &String) -> bool {
    &self.user_id == scope
  }
}

/// Message thread with one remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessagesKey {
  pub peer_id: String,
}

impl MessagesKey {
  pub fn new(peer_id: impl Into<String>) -> Self {
    Self {
      peer_id: peer_id.into(),
    }
  }
}

impl CacheKey for MessagesKey {
  /// Peer id
  type Scope = String;

  fn matches(&self, scope: &String) -> bool {
    &self.peer_id == scope
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NewsKey {
  pub tab: NewsTab,
  pub subject: String,
}

impl NewsKey {
  /// Build a news key; a missing or blank subject means every subject.
  pub fn new(tab: NewsTab, subject: Option<&str>) -> Self {
    let subject = subject
      .map(str::trim)
      .filter(|s| !s.is_empty())
      .unwrap_or(ALL_SUBJECTS);

    Self {
      tab,
      subject: subject.to_string(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewsScope {
  pub tab: Option<NewsTab>,
  pub subject: Option<String>,
}

impl NewsScope {
  /// Build a scope; the subject is trimmed like [`NewsKey::new`] and a blank
  /// one narrows nothing.
  pub fn new(tab: Option<NewsTab>, subject: Option<&str>) -> Self {
    Self {
      tab,
      subject: subject
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from),
    }
  }
}

impl CacheKey for NewsKey {
  type Scope = NewsScope;

  fn matches(&self, scope: &NewsScope) -> bool {
    scope.tab.map_or(true, |tab| tab == self.tab)
      && scope
        .subject
        .as_deref()
        .map_or(true, |subject| subject.trim() == self.subject)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduleKey {
  pub role: Role,
  /// Student id or teacher code, depending on the role
  pub user_key: String,
  pub academic_year: String,
  pub week: u32,
}

impl ScheduleKey {
  pub fn new(
    role: Role,
    user_key: impl Into<String>,
    academic_year: impl Into<String>,
    week: u32,
  ) -> Self {
    Self {
      role,
      user_key: user_key.into(),
      academic_year: academic_year.into(),
      week,
    }
  }
}

/// Partial schedule selection; unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleScope {
  pub role: Option<Role>,
  pub user_key: Option<String>,
  pub academic_year: Option<String>,
  pub week: Option<u32>,
}

impl ScheduleScope {
  pub fn is_empty(&self) -> bool {
    self.role.is_none()
      && self.user_key.is_none()
      && self.academic_year.is_none()
      && self.week.is_none()
  }

  /// The exact key when every field is set.
  pub fn exact(&self) -> Option<ScheduleKey> {
    Some(ScheduleKey::new(
      self.role?,
      self.user_key.clone()?,
      self.academic_year.clone()?,
      self.week?,
    ))
  }
}

impl CacheKey for ScheduleKey {
  type Scope = ScheduleScope;

  fn matches(&self, scope: &ScheduleScope) -> bool {
    scope.role.map_or(true, |role| role == self.role)
      && scope
        .user_key
        .as_deref()
        .map_or(true, |user_key| user_key == self.user_key)
      && scope
        .academic_year
        .as_deref()
        .map_or(true, |year| year == self.academic_year)
      && scope.week.map_or(true, |week| week == self.week)
  }
}
