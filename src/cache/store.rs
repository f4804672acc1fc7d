//! In-memory typed cache store with write-behind persistence.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use super::keys::CacheKey;
use super::queue::PersistQueue;
use super::storage::persisted_at;
use super::traits::{CacheEntry, Cacheable};

/// Granularity of [`TypedStore::clear`].
#[derive(Debug)]
pub enum ClearScope<K: CacheKey> {
  /// Every entry of the store, including persisted keys never loaded
  All,
  /// Entries whose key falls inside the scope
  Matching(K::Scope),
  /// A single entry
  Exact(K),
}

/// Cache of entity lists of one kind, keyed by `K`.
///
/// Reads never touch storage. Writes replace the in-memory entry first and
/// queue the persisted write; memory is authoritative for the session.
pub struct TypedStore<K: CacheKey, T: Cacheable> {
  entries: Mutex<HashMap<K, CacheEntry<T>>>,
  /// Bumped by every `clear`, under the entries lock
  clears: AtomicU64,
  queue: PersistQueue,
}

impl<K: CacheKey, T: Cacheable> TypedStore<K, T> {
  pub fn new(queue: PersistQueue) -> Self {
    Self {
      entries: Mutex::new(HashMap::new()),
      clears: AtomicU64::new(0),
      queue,
    }
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<K, CacheEntry<T>>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Current in-memory entry for `key`.
  pub fn get(&self, key: &K) -> Option<CacheEntry<T>> {
    self.entries().get(key).cloned()
  }

  /// Keys currently held in memory.
  pub fn keys(&self) -> Vec<K> {
    self.entries().keys().cloned().collect()
  }

  /// Replace the list for `key`.
  pub fn set(&self, key: K, items: Vec<T>) -> CacheEntry<T> {
    let mut entries = self.entries();
    self.replace(&mut entries, key, items)
  }

  /// Populate `key` from persistence on a cache miss.
  ///
  /// Returns the in-memory items when present. Otherwise the persisted list
  /// is read after every pending write and, if found, becomes the in-memory
  /// entry. A `clear` issued while the read is pending discards its result.
  pub async fn load_from_storage(&self, key: &K) -> Option<Vec<T>> {
    let clears = {
      let entries = self.entries();
      if let Some(entry) = entries.get(key) {
        return Some(entry.items.clone());
      }
      self.clears.load(Ordering::SeqCst)
    };

    let values = self.queue.load(T::namespace(), key.encode()).await?;
    let stored_at = persisted_at(&values).unwrap_or_else(Utc::now);
    let items = match values
      .into_iter()
      .map(serde_json::from_value::<T>)
      .collect::<Result<Vec<T>, _>>()
    {
      Ok(items) => items,
      Err(e) => {
        warn!(namespace = %T::namespace(), ?key, error = %e, "discarding unreadable cache entry");
        return None;
      }
    };

    let mut entries = self.entries();
    // A write that landed while we were loading wins
    if let Some(entry) = entries.get(key) {
      return Some(entry.items.clone());
    }
    if self.clears.load(Ordering::SeqCst) != clears {
      debug!(namespace = %T::namespace(), ?key, "store cleared during load; dropping stored copy");
      return None;
    }
    let entry = entries.entry(key.clone()).or_insert_with(|| CacheEntry {
      items,
      updated_at: stored_at,
    });
    debug!(namespace = %T::namespace(), ?key, "cache entry restored from storage");
    Some(entry.items.clone())
  }

  /// Patch the entity with `id` in place of a copy of the list.
  ///
  /// Without an entry for `key` nothing happens and `None` is returned. When
  /// the entity is absent the list is kept as is (no insertion), but the entry
  /// is still rewritten with a fresh timestamp.
  pub fn update_one(&self, key: &K, id: &str, patch: impl FnOnce(&mut T)) -> Option<CacheEntry<T>> {
    let mut entries = self.entries();
    let mut items = entries.get(key)?.items.clone();

    match items.iter_mut().find(|item| item.entity_id() == id) {
      Some(item) => patch(item),
      None => debug!(namespace = %T::namespace(), ?key, id, "update target not cached"),
    }

    Some(self.replace(&mut entries, key.clone(), items))
  }

  /// Prepend `entity`, creating the entry if needed.
  pub fn add_one(&self, key: K, entity: T) -> CacheEntry<T> {
    let mut entries = self.entries();
    let mut items = Vec::with_capacity(1);
    items.push(entity);
    if let Some(existing) = entries.get(&key) {
      items.extend(existing.items.iter().cloned());
    }
    self.replace(&mut entries, key, items)
  }

  /// Append `entity` to an existing entry.
  ///
  /// Does nothing when `key` is not cached: a list holding only the new
  /// entity would pass for the complete one.
  pub fn push_one(&self, key: &K, entity: T) -> Option<CacheEntry<T>> {
    let mut entries = self.entries();
    let mut items = entries.get(key)?.items.clone();
    items.push(entity);
    Some(self.replace(&mut entries, key.clone(), items))
  }

  pub fn remove_one(&self, key: &K, id: &str) -> Option<CacheEntry<T>> {
    let mut entries = self.entries();
    let items: Vec<T> = entries
      .get(key)?
      .items
      .iter()
      .filter(|item| item.entity_id() != id)
      .cloned()
      .collect();
    Some(self.replace(&mut entries, key.clone(), items))
  }

  /// Drop entries so the next read has to refetch.
  ///
  /// Entries are removed outright, never emptied.
  pub fn clear(&self, scope: ClearScope<K>) {
    let namespace = T::namespace();
    let mut entries = self.entries();
    self.clears.fetch_add(1, Ordering::SeqCst);

    match scope {
      ClearScope::All => {
        entries.clear();
        self.queue.remove_namespace(namespace);
      }
      ClearScope::Matching(scope) => {
        entries.retain(|key, _| !key.matches(&scope));
        self.queue.remove_where(namespace, move |raw| {
          K::decode(raw).is_some_and(|key| key.matches(&scope))
        });
      }
      ClearScope::Exact(key) => {
        entries.remove(&key);
        self.queue.remove(namespace, key.encode());
      }
    }
  }

  /// Wait for queued persistence of this store (and every other store on the queue).
  pub async fn flush(&self) {
    self.queue.flush().await;
  }

  /// Swap in a new entry and queue its persistence while still holding the
  /// lock, so persisted order matches memory order.
  fn replace(
    &self,
    entries: &mut HashMap<K, CacheEntry<T>>,
    key: K,
    items: Vec<T>,
  ) -> CacheEntry<T> {
    let previous = entries.get(&key).map(|entry| entry.updated_at);
    let entry = CacheEntry {
      items,
      updated_at: next_stamp(previous),
    };

    match entry
      .items
      .iter()
      .map(serde_json::to_value)
      .collect::<Result<Vec<Value>, _>>()
    {
      Ok(values) => self.queue.save(T::namespace(), key.encode(), values),
      Err(e) => warn!(namespace = %T::namespace(), ?key, error = %e, "failed to serialize cache entry"),
    }

    entries.insert(key, entry.clone());
    entry
  }
}

fn next_stamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
  let now = Utc::now();
  previous.map_or(now, |prev| now.max(prev))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::keys::{MessagesKey, NewsKey, NewsScope};
  use crate::cache::storage::PersistentCache;
  use crate::db::{KeyValueStore, MemoryKvStore};
  use crate::models::{Message, NewsArticle, NewsTab};
  use chrono::TimeZone;
  use std::sync::Arc;

  fn article(id: &str, favorites: &[&str]) -> NewsArticle {
    NewsArticle {
      id: id.to_string(),
      title: format!("Tin {}", id),
      content: String::new(),
      subject: None,
      author_id: None,
      created_at: None,
      favorites: favorites.iter().map(|s| s.to_string()).collect(),
    }
  }

  fn message(id: &str) -> Message {
    Message {
      id: id.to_string(),
      sender_id: "u2".to_string(),
      receiver_id: "u1".to_string(),
      content: "xin chào".to_string(),
      created_at: Utc.with_ymd_and_hms(2024, 9, 5, 8, 0, 0).unwrap(),
      read_by: Vec::new(),
    }
  }

  fn news_store() -> (Arc<MemoryKvStore>, TypedStore<NewsKey, NewsArticle>) {
    let kv = Arc::new(MemoryKvStore::new());
    let queue = PersistQueue::spawn(PersistentCache::new(kv.clone()));
    (kv, TypedStore::new(queue))
  }

  #[tokio::test]
  async fn test_set_then_get() {
    let (_kv, store) = news_store();
    let key = NewsKey::new(NewsTab::Feed, None);
    let before = Utc::now();

    store.set(key.clone(), vec![article("n1", &[]), article("n2", &[])]);
    let entry = store.get(&key).unwrap();

    assert_eq!(entry.items, vec![article("n1", &[]), article("n2", &[])]);
    assert!(entry.updated_at >= before);
  }

  #[tokio::test]
  async fn test_clear_exact_removes_entry() {
    let (kv, store) = news_store();
    let key = NewsKey::new(NewsTab::Feed, None);
    store.set(key.clone(), vec![article("n1", &[])]);

    store.clear(ClearScope::Exact(key.clone()));
    assert!(store.get(&key).is_none());

    store.flush().await;
    assert!(kv.all_keys().unwrap().is_empty());
    assert!(store.load_from_storage(&key).await.is_none());
  }

  #[tokio::test]
  async fn test_update_one_miss_keeps_items() {
    let (_kv, store) = news_store();
    let key = NewsKey::new(NewsTab::Feed, None);
    let first = store.set(key.clone(), vec![article("n1", &["u1"])]);

    let updated = store
      .update_one(&key, "nonexistent-id", |a| a.title = "changed".into())
      .unwrap();

    assert_eq!(updated.items, first.items);
    assert!(updated.updated_at >= first.updated_at);
  }

  #[tokio::test]
  async fn test_update_one_without_entry_is_noop() {
    let (_kv, store) = news_store();
    let key = NewsKey::new(NewsTab::Feed, None);

    assert!(store.update_one(&key, "n1", |_| {}).is_none());
    assert!(store.get(&key).is_none());
  }

  #[tokio::test]
  async fn test_favorite_toggle_reaches_memory_and_storage() {
    let (kv, store) = news_store();
    let key = NewsKey::new(NewsTab::Feed, None);
    store.set(key.clone(), vec![article("n1", &["u1"])]);

    store.update_one(&key, "n1", |a| {
      a.favorites.retain(|u| u != "u1");
      a.favorites.push("u2".to_string());
    });
    assert_eq!(store.get(&key).unwrap().items[0].favorites, vec!["u2"]);

    store.flush().await;
    let restored: TypedStore<NewsKey, NewsArticle> =
      TypedStore::new(PersistQueue::spawn(PersistentCache::new(kv)));
    let items = restored.load_from_storage(&key).await.unwrap();
    assert_eq!(items[0].favorites, vec!["u2"]);
  }

  #[tokio::test]
  async fn test_add_remove_one() {
    let (_kv, store) = news_store();
    let key = NewsKey::new(NewsTab::Feed, Some("Toán"));

    store.add_one(key.clone(), article("n1", &[]));
    store.add_one(key.clone(), article("n2", &[]));
    let ids: Vec<String> = store.get(&key).unwrap().items.into_iter().map(|a| a.id).collect();
    assert_eq!(ids, vec!["n2", "n1"]);

    store.remove_one(&key, "n2");
    assert_eq!(store.get(&key).unwrap().items, vec![article("n1", &[])]);
  }

  #[tokio::test]
  async fn test_push_one_requires_entry() {
    let kv = Arc::new(MemoryKvStore::new());
    let store: TypedStore<MessagesKey, Message> =
      TypedStore::new(PersistQueue::spawn(PersistentCache::new(kv)));
    let key = MessagesKey::new("u2");

    assert!(store.push_one(&key, message("m1")).is_none());

    store.set(key.clone(), vec![message("m1")]);
    store.push_one(&key, message("m2"));
    let ids: Vec<String> = store.get(&key).unwrap().items.into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec!["m1", "m2"]);
  }

  #[tokio::test]
  async fn test_scoped_clear_reaches_unloaded_keys() {
    let (kv, store) = news_store();
    let feed_math = NewsKey::new(NewsTab::Feed, Some("Toán"));
    let feed_all = NewsKey::new(NewsTab::Feed, None);
    let favorites = NewsKey::new(NewsTab::Favorites, None);
    store.set(feed_math.clone(), vec![article("n1", &[])]);
    store.set(feed_all.clone(), vec![article("n2", &[])]);
    store.set(favorites.clone(), vec![article("n3", &[])]);
    store.flush().await;

    // A fresh session that never loaded anything
    let fresh: TypedStore<NewsKey, NewsArticle> =
      TypedStore::new(PersistQueue::spawn(PersistentCache::new(kv.clone())));
    fresh.clear(ClearScope::Matching(NewsScope {
      tab: Some(NewsTab::Feed),
      subject: None,
    }));
    fresh.flush().await;

    assert!(fresh.load_from_storage(&feed_math).await.is_none());
    assert!(fresh.load_from_storage(&feed_all).await.is_none());
    assert!(fresh.load_from_storage(&favorites).await.is_some());
  }

  #[tokio::test]
  async fn test_clear_all() {
    let (kv, store) = news_store();
    store.set(NewsKey::new(NewsTab::Feed, None), vec![article("n1", &[])]);
    store.set(NewsKey::new(NewsTab::Favorites, None), vec![]);

    store.clear(ClearScope::All);
    store.flush().await;

    assert!(store.keys().is_empty());
    assert!(kv.all_keys().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_clear_during_cold_load_wins() {
    let (kv, store) = news_store();
    let key = NewsKey::new(NewsTab::Feed, None);
    store.set(key.clone(), vec![article("n1", &[])]);
    store.flush().await;

    let cold: TypedStore<NewsKey, NewsArticle> =
      TypedStore::new(PersistQueue::spawn(PersistentCache::new(kv.clone())));
    let (loaded, _) = tokio::join!(cold.load_from_storage(&key), async {
      cold.clear(ClearScope::Exact(key.clone()))
    });

    assert!(loaded.is_none());
    assert!(cold.get(&key).is_none());
    cold.flush().await;
    assert!(kv.all_keys().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_load_from_storage_prefers_memory() {
    let (_kv, store) = news_store();
    let key = NewsKey::new(NewsTab::Feed, None);
    store.set(key.clone(), vec![article("n1", &[])]);

    let items = store.load_from_storage(&key).await.unwrap();
    assert_eq!(items, vec![article("n1", &[])]);
  }
}
