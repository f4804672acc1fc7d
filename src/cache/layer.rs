//! Cache layer that orchestrates caching logic with network fetching.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use std::future::Future;
use tracing::{debug, warn};

use super::keys::CacheKey;
use super::store::TypedStore;
use super::traits::{CacheResult, Cacheable};

/// Cache-first fetching on top of a [`TypedStore`].
#[derive(Debug, Clone, Copy)]
pub struct CacheLayer {
  /// How long before cached data is considered stale
  stale_time: Duration,
}

impl Default for CacheLayer {
  fn default() -> Self {
    Self {
      stale_time: Duration::minutes(5),
    }
  }
}

impl CacheLayer {
  pub fn new() -> Self {
    Self::default()
  }

  /// Set the stale time for cached data.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  fn is_stale(&self, cached_at: DateTime<Utc>) -> bool {
    Utc::now() - cached_at > self.stale_time
  }

  /// Fetch a list with cache-first strategy.
  ///
  /// 1. Check memory, then persisted storage - if fresh, return immediately
  /// 2. If stale/missing, fetch from network
  /// 3. On network failure, return stale cache (offline mode)
  /// 4. Update cache with new data
  pub async fn fetch_list<K, T, F, Fut>(
    &self,
    store: &TypedStore<K, T>,
    key: K,
    fetcher: F,
  ) -> Result<CacheResult<Vec<T>>>
  where
    K: CacheKey,
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
  {
    if store.get(&key).is_none() {
      store.load_from_storage(&key).await;
    }

    if let Some(cached) = store.get(&key) {
      if !self.is_stale(cached.updated_at) {
        return Ok(CacheResult::from_cache(cached.items, cached.updated_at));
      }

      match fetcher().await {
        Ok(data) => {
          store.set(key, data.clone());
          Ok(CacheResult::from_network(data))
        }
        Err(e) => {
          warn!(?key, error = %e, "refresh failed; serving cached data");
          Ok(CacheResult::offline(cached.items, cached.updated_at))
        }
      }
    } else {
      debug!(?key, "cache miss");
      let data = fetcher().await?;
      store.set(key, data.clone());
      Ok(CacheResult::from_network(data))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::keys::ConversationsKey;
  use crate::cache::queue::PersistQueue;
  use crate::cache::storage::PersistentCache;
  use crate::cache::traits::CacheSource;
  use crate::db::MemoryKvStore;
  use crate::models::Conversation;
  use color_eyre::eyre::eyre;
  use std::sync::Arc;

  fn conversation(id: &str) -> Conversation {
    Conversation {
      id: id.to_string(),
      participant_id: format!("peer-{}", id),
      participant_name: "Cô Lan".to_string(),
      last_message: None,
      last_message_at: None,
      unread_count: 0,
    }
  }

  fn store() -> TypedStore<ConversationsKey, Conversation> {
    TypedStore::new(PersistQueue::spawn(PersistentCache::new(Arc::new(
      MemoryKvStore::new(),
    ))))
  }

  #[tokio::test]
  async fn test_miss_fetches_and_caches() {
    let store = store();
    let layer = CacheLayer::new();
    let key = ConversationsKey::new("u1");

    let result = layer
      .fetch_list(&store, key.clone(), || async { Ok(vec![conversation("c1")]) })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(store.get(&key).unwrap().items, vec![conversation("c1")]);
  }

  #[tokio::test]
  async fn test_fresh_cache_skips_network() {
    let store = store();
    let layer = CacheLayer::new();
    let key = ConversationsKey::new("u1");
    store.set(key.clone(), vec![conversation("c1")]);

    let result = layer
      .fetch_list(&store, key, || async { Err(eyre!("should not be called")) })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::CacheFresh);
    assert_eq!(result.data, vec![conversation("c1")]);
  }

  #[tokio::test]
  async fn test_stale_cache_served_offline_on_failure() {
    let store = store();
    let layer = CacheLayer::new().with_stale_time(Duration::zero());
    let key = ConversationsKey::new("u1");
    store.set(key.clone(), vec![conversation("c1")]);
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let result = layer
      .fetch_list(&store, key, || async { Err(eyre!("network down")) })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data, vec![conversation("c1")]);
  }

  #[tokio::test]
  async fn test_miss_with_network_failure_is_an_error() {
    let store = store();
    let result = CacheLayer::new()
      .fetch_list(&store, ConversationsKey::new("u1"), || async {
        Err::<Vec<Conversation>, _>(eyre!("network down"))
      })
      .await;

    assert!(result.is_err());
  }
}
