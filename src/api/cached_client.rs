//! REST client with transparent caching.

use color_eyre::Result;
use std::sync::Arc;
use tracing::debug;

use super::client::ApiClient;
use crate::cache::{
  CacheLayer, CacheResult, CacheStores, ClearScope, ConversationsKey, MessagesKey, NewsKey,
  NewsScope, ScheduleKey,
};
use crate::models::{Conversation, Message, NewsArticle, NewsTab, ScheduleEntry};

/// API client with transparent caching support.
///
/// Reads go through the cache stores and fall back to cached data when the
/// backend is unreachable. Writes are applied to the cache once the server
/// confirms them.
#[derive(Clone)]
pub struct CachedClient {
  inner: ApiClient,
  cache: CacheLayer,
  stores: Arc<CacheStores>,
  user_id: String,
}

impl CachedClient {
  pub fn new(
    inner: ApiClient,
    cache: CacheLayer,
    stores: Arc<CacheStores>,
    user_id: impl Into<String>,
  ) -> Self {
    Self {
      inner,
      cache,
      stores,
      user_id: user_id.into(),
    }
  }

  pub async fn conversations(&self) -> Result<CacheResult<Vec<Conversation>>> {
    let key = ConversationsKey::new(self.user_id.clone());
    self
      .cache
      .fetch_list(&self.stores.conversations, key, || self.inner.conversations())
      .await
  }

  pub async fn messages(&self, peer_id: &str) -> Result<CacheResult<Vec<Message>>> {
    self
      .cache
      .fetch_list(&self.stores.messages, MessagesKey::new(peer_id), || {
        self.inner.messages(peer_id)
      })
      .await
  }

  pub async fn news(&self, tab: NewsTab, subject: Option<&str>) -> Result<CacheResult<Vec<NewsArticle>>> {
    let key = NewsKey::new(tab, subject);
    let request = key.clone();
    self
      .cache
      .fetch_list(&self.stores.news, key, || async move {
        self.inner.news(&request).await
      })
      .await
  }

  pub async fn schedule(&self, key: ScheduleKey) -> Result<CacheResult<Vec<ScheduleEntry>>> {
    let request = key.clone();
    self
      .cache
      .fetch_list(&self.stores.schedule, key, || async move {
        self.inner.schedule(&request).await
      })
      .await
  }

  /// Send a message; the confirmed message is appended to the cached thread.
  pub async fn send_message(&self, peer_id: &str, content: &str) -> Result<Message> {
    let message = self.inner.send_message(peer_id, content).await?;

    let appended = self
      .stores
      .messages
      .push_one(&MessagesKey::new(peer_id), message.clone());
    if appended.is_none() {
      debug!(peer_id, "thread not cached; skipping append");
    }
    self
      .stores
      .conversations
      .clear(ClearScope::Matching(self.user_id.clone()));

    Ok(message)
  }

  /// Toggle a favorite; cached feed copies are patched and the favorites
  /// tab is dropped so it is refetched.
  pub async fn toggle_favorite(&self, news_id: &str) -> Result<NewsArticle> {
    let article = self.inner.toggle_favorite(news_id).await?;
    debug!(
      news_id,
      favorite = article.is_favorite_of(&self.user_id),
      "favorite toggled"
    );

    for key in self.stores.news.keys() {
      if key.tab == NewsTab::Feed {
        self.stores.news.update_one(&key, news_id, |cached| {
          cached.favorites = article.favorites.clone();
        });
      }
    }
    self.stores.news.clear(ClearScope::Matching(NewsScope::new(
      Some(NewsTab::Favorites),
      None,
    )));

    Ok(article)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheSource;
  use crate::config::ApiConfig;
  use crate::db::MemoryKvStore;
  use crate::models::Role;

  fn offline_client() -> (Arc<CacheStores>, CachedClient) {
    let config = ApiConfig {
      base_url: "http://127.0.0.1:9/api/".to_string(),
      socket_url: None,
      request_timeout_secs: 2,
    };
    let stores = Arc::new(CacheStores::new(Arc::new(MemoryKvStore::new())));
    let api = ApiClient::new(&config, "t1").unwrap();
    // Everything cached is already stale
    let cache = CacheLayer::new().with_stale_time(chrono::Duration::zero());
    (stores.clone(), CachedClient::new(api, cache, stores, "u1"))
  }

  fn entry(id: &str) -> ScheduleEntry {
    ScheduleEntry {
      id: id.to_string(),
      subject: "Toán".to_string(),
      teacher: None,
      class_name: Some("10A1".to_string()),
      room: None,
      day_of_week: 2,
      period: 1,
      week_number: 1,
      academic_year: "2024-2025".to_string(),
    }
  }

  #[tokio::test]
  async fn test_serves_cached_schedule_when_offline() {
    let (stores, client) = offline_client();
    let key = ScheduleKey::new(Role::Student, "SV001", "2024-2025", 1);
    stores.schedule.set(key.clone(), vec![entry("s1")]);
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let result = client.schedule(key).await.unwrap();

    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data[0].id, "s1");
  }

  #[tokio::test]
  async fn test_cache_miss_offline_is_error() {
    let (_stores, client) = offline_client();
    assert!(client.conversations().await.is_err());
  }

  #[tokio::test]
  async fn test_failed_send_leaves_cache_untouched() {
    let (stores, client) = offline_client();
    let conversations = ConversationsKey::new("u1");
    stores.conversations.set(conversations.clone(), Vec::new());

    assert!(client.send_message("u2", "Chào cô").await.is_err());
    assert!(stores.conversations.get(&conversations).is_some());
  }
}
