//! Client-side caching layer for data persistence and offline support.
//!
//! This module provides:
//! - Typed in-memory stores keyed by structured cache keys
//! - Write-behind persistence into the device key-value store
//! - Scoped invalidation driven by domain events
//! - Cache-first fetching with offline fallback

mod entities;
mod invalidate;
mod keys;
mod layer;
mod queue;
mod storage;
mod store;
mod traits;

pub use invalidate::{InvalidationEvent, Invalidator};
pub use keys::{
  CacheKey, ConversationsKey, MessagesKey, NewsKey, NewsScope, ScheduleKey, ScheduleScope,
  ALL_SUBJECTS,
};
pub use layer::CacheLayer;
pub use queue::{PersistEvent, PersistKind, PersistQueue};
pub use storage::PersistentCache;
pub use store::{ClearScope, TypedStore};
pub use traits::{CacheEntry, CacheResult, CacheSource, Cacheable, Namespace};

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::db::KeyValueStore;
use crate::models::{Conversation, Message, NewsArticle, ScheduleEntry};

/// The process-wide set of cache stores, sharing one persistence queue.
///
/// Constructed explicitly and passed around (usually behind an `Arc`), so
/// tests build isolated instances.
pub struct CacheStores {
  pub conversations: TypedStore<ConversationsKey, Conversation>,
  pub messages: TypedStore<MessagesKey, Message>,
  pub news: TypedStore<NewsKey, NewsArticle>,
  pub schedule: TypedStore<ScheduleKey, ScheduleEntry>,
  queue: PersistQueue,
}

impl CacheStores {
  /// Create the stores on top of `kv`. Must be called inside a Tokio runtime.
  pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
    let queue = PersistQueue::spawn(PersistentCache::new(kv));

    Self {
      conversations: TypedStore::new(queue.clone()),
      messages: TypedStore::new(queue.clone()),
      news: TypedStore::new(queue.clone()),
      schedule: TypedStore::new(queue.clone()),
      queue,
    }
  }

  /// Outcomes of persisted writes, in the order they were applied.
  pub fn persist_events(&self) -> broadcast::Receiver<PersistEvent> {
    self.queue.subscribe()
  }

  /// Wait for every queued write to reach storage.
  pub async fn flush(&self) {
    self.queue.flush().await;
  }

  /// Persisted entries per namespace, after pending writes.
  pub async fn usage_summary(&self) -> BTreeMap<Namespace, usize> {
    self.queue.usage_summary().await
  }
}
