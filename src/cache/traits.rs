//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

/// Entity kind under which persisted keys are grouped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
  Conversations,
  Messages,
  News,
  Schedule,
}

impl Namespace {
  pub const ALL: [Namespace; 4] = [
    Namespace::Conversations,
    Namespace::Messages,
    Namespace::News,
    Namespace::Schedule,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Conversations => "conversations",
      Self::Messages => "messages",
      Self::News => "news",
      Self::Schedule => "schedule",
    }
  }

  /// Prefix of every persisted key in this namespace.
  pub fn prefix(&self) -> String {
    format!("{}_", self.as_str())
  }
}

impl fmt::Display for Namespace {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Trait for entities that can be cached.
///
/// Implementors provide the identity used by targeted updates and the
/// namespace their lists are persisted under.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Identity field of the entity (`_id` on the wire)
  fn entity_id(&self) -> &str;

  fn namespace() -> Namespace;
}

/// Last known list of entities for one cache key.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
  pub items: Vec<T>,
  /// Refreshed on every write, never moves backwards
  pub updated_at: DateTime<Utc>,
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Offline mode - network unavailable, serving cached data
  Offline,
}

impl fmt::Display for CacheSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let label = match self {
      Self::Network => "network",
      Self::CacheFresh => "cache",
      Self::Offline => "offline cache",
    };
    f.write_str(label)
  }
}
