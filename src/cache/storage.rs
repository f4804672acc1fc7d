//! Namespaced persistence of cache entries on top of the key-value store.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::traits::Namespace;
use crate::db::KeyValueStore;

/// Field injected into every persisted item.
pub const STAMP_FIELD: &str = "updatedAt";

/// Entity lists persisted under `"<namespace>_<key>"`.
#[derive(Clone)]
pub struct PersistentCache {
  kv: Arc<dyn KeyValueStore>,
}

impl PersistentCache {
  pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
    Self { kv }
  }

  /// Compose the storage key for an encoded cache key.
  pub fn storage_key(namespace: Namespace, key: &str) -> String {
    format!("{}{}", namespace.prefix(), key)
  }

  /// Stamp `items` with the write time and store them, replacing any previous list.
  pub fn save(&self, namespace: Namespace, key: &str, items: Vec<Value>) -> Result<()> {
    let stamp = Value::String(Utc::now().to_rfc3339());
    let stamped: Vec<Value> = items
      .into_iter()
      .map(|mut item| {
        if let Value::Object(fields) = &mut item {
          fields.insert(STAMP_FIELD.to_string(), stamp.clone());
        }
        item
      })
      .collect();

    let payload =
      serde_json::to_string(&stamped).map_err(|e| eyre!("Failed to serialize entry: {}", e))?;
    self
      .kv
      .set(&Self::storage_key(namespace, key), &payload)
  }

  /// Load a persisted list. Missing and unreadable entries both yield `None`.
  pub fn load(&self, namespace: Namespace, key: &str) -> Option<Vec<Value>> {
    let raw = match self.kv.get(&Self::storage_key(namespace, key)) {
      Ok(Some(raw)) => raw,
      Ok(None) => return None,
      Err(e) => {
        warn!(%namespace, key, error = %e, "failed to read cache entry");
        return None;
      }
    };

    match serde_json::from_str::<Vec<Value>>(&raw) {
      Ok(items) => Some(items),
      Err(e) => {
        warn!(%namespace, key, error = %e, "discarding corrupt cache entry");
        None
      }
    }
  }

  pub fn remove(&self, namespace: Namespace, key: &str) -> Result<()> {
    self.kv.remove(&Self::storage_key(namespace, key))
  }

  /// Encoded cache keys currently persisted in `namespace`.
  pub fn keys(&self, namespace: Namespace) -> Result<Vec<String>> {
    let prefix = namespace.prefix();
    Ok(
      self
        .kv
        .all_keys()?
        .into_iter()
        .filter_map(|k| k.strip_prefix(&prefix).map(String::from))
        .collect(),
    )
  }

  /// Remove every entry of `namespace` whose encoded key satisfies `predicate`.
  ///
  /// Returns the number of removed entries.
  pub fn remove_where(
    &self,
    namespace: Namespace,
    predicate: impl Fn(&str) -> bool,
  ) -> Result<usize> {
    let doomed: Vec<String> = self
      .keys(namespace)?
      .into_iter()
      .filter(|k| predicate(k))
      .map(|k| Self::storage_key(namespace, &k))
      .collect();

    if !doomed.is_empty() {
      self.kv.multi_remove(&doomed)?;
    }
    debug!(%namespace, removed = doomed.len(), "removed persisted cache entries");
    Ok(doomed.len())
  }

  /// Remove every entry of `namespace`.
  pub fn remove_namespace(&self, namespace: Namespace) -> Result<usize> {
    self.remove_where(namespace, |_| true)
  }

  /// Number of persisted entries per namespace. Every namespace is listed.
  pub fn usage_summary(&self) -> BTreeMap<Namespace, usize> {
    let mut summary: BTreeMap<Namespace, usize> =
      Namespace::ALL.iter().map(|ns| (*ns, 0)).collect();

    match self.kv.all_keys() {
      Ok(keys) => {
        for key in keys {
          if let Some(ns) = Namespace::ALL
            .iter()
            .find(|ns| key.starts_with(&ns.prefix()))
          {
            *summary.entry(*ns).or_default() += 1;
          }
        }
      }
      Err(e) => warn!(error = %e, "failed to list persisted keys"),
    }

    summary
  }
}

/// Write time recorded on a persisted list (the first stamped item).
pub fn persisted_at(items: &[Value]) -> Option<DateTime<Utc>> {
  items
    .iter()
    .filter_map(|item| item.get(STAMP_FIELD)?.as_str())
    .find_map(|s| DateTime::parse_from_rfc3339(s).ok())
    .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::{MemoryKvStore, SqliteKvStore};
  use serde_json::json;

  fn cache() -> (Arc<MemoryKvStore>, PersistentCache) {
    let kv = Arc::new(MemoryKvStore::new());
    (kv.clone(), PersistentCache::new(kv))
  }

  #[test]
  fn test_save_load_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("storage.db");
    let items = vec![json!({"_id": "n1", "title": "Khai giảng"}), json!({"_id": "n2", "title": "Thi"})];

    {
      let kv = Arc::new(SqliteKvStore::open(Some(&path)).unwrap());
      PersistentCache::new(kv).save(Namespace::News, "k", items.clone()).unwrap();
    }

    let kv = Arc::new(SqliteKvStore::open(Some(&path)).unwrap());
    let loaded = PersistentCache::new(kv).load(Namespace::News, "k").unwrap();

    assert_eq!(loaded.len(), 2);
    for (original, restored) in items.iter().zip(&loaded) {
      let mut restored = restored.clone();
      let stamp = restored.as_object_mut().unwrap().remove(STAMP_FIELD);
      assert!(stamp.is_some());
      assert_eq!(&restored, original);
    }
    assert!(persisted_at(&loaded).is_some());
  }

  #[test]
  fn test_uses_composite_storage_key() {
    let (kv, cache) = cache();
    cache.save(Namespace::Messages, "peer", vec![json!({"_id": "m1"})]).unwrap();
    assert!(kv.get("messages_peer").unwrap().is_some());
  }

  #[test]
  fn test_corrupt_entry_reads_as_missing() {
    let (kv, cache) = cache();
    kv.set("news_broken", "{not json").unwrap();

    assert!(cache.load(Namespace::News, "broken").is_none());
    assert!(cache.load(Namespace::News, "absent").is_none());
  }

  #[test]
  fn test_remove_where_and_usage() {
    let (kv, cache) = cache();
    kv.set("userId", "u1").unwrap();
    cache.save(Namespace::News, "a", vec![]).unwrap();
    cache.save(Namespace::News, "b", vec![]).unwrap();
    cache.save(Namespace::Schedule, "w1", vec![]).unwrap();

    let summary = cache.usage_summary();
    assert_eq!(summary[&Namespace::News], 2);
    assert_eq!(summary[&Namespace::Schedule], 1);
    assert_eq!(summary[&Namespace::Messages], 0);

    assert_eq!(cache.remove_where(Namespace::News, |k| k == "a").unwrap(), 1);
    assert_eq!(cache.keys(Namespace::News).unwrap(), vec!["b"]);

    assert_eq!(cache.remove_namespace(Namespace::Schedule).unwrap(), 1);
    assert_eq!(cache.usage_summary()[&Namespace::Schedule], 0);
    // Keys outside every namespace are left alone
    assert_eq!(kv.get("userId").unwrap().as_deref(), Some("u1"));
  }
}
