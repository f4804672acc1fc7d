//! Cacheable implementations for domain types.

use super::traits::{Cacheable, Namespace};
use crate::models::{Conversation, Message, NewsArticle, ScheduleEntry};

impl Cacheable for Conversation {
  fn entity_id(&self) -> &str {
    &self.id
  }

  fn namespace() -> Namespace {
    Namespace::Conversations
  }
}

impl Cacheable for Message {
  fn entity_id(&self) -> &str {
    &self.id
  }

  fn namespace() -> Namespace {
    Namespace::Messages
  }
}

impl Cacheable for NewsArticle {
  fn entity_id(&self) -> &str {
    &self.id
  }

  fn namespace() -> Namespace {
    Namespace::News
  }
}

impl Cacheable for ScheduleEntry {
  fn entity_id(&self) -> &str {
    &self.id
  }

  fn namespace() -> Namespace {
    Namespace::Schedule
  }
}
