use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;
use url::Url;

use super::api_types::{ApiResponse, SendMessageRequest};
use crate::cache::{NewsKey, ScheduleKey, ALL_SUBJECTS};
use crate::config::ApiConfig;
use crate::models::{Conversation, Message, NewsArticle, NewsTab, ScheduleEntry};

/// REST backend client
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base: Url,
  token: String,
}

impl ApiClient {
  pub fn new(config: &ApiConfig, token: impl Into<String>) -> Result<Self> {
    let mut base = Url::parse(&config.base_url)
      .map_err(|e| eyre!("Invalid API base URL {}: {}", config.base_url, e))?;
    if !base.path().ends_with('/') {
      let path = format!("{}/", base.path());
      base.set_path(&path);
    }

    let http = reqwest::Client::builder()
      .timeout(config.request_timeout())
      .gzip(true)
      .deflate(true)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base,
      token: token.into(),
    })
  }

  /// Conversation list of the signed-in user
  pub async fn conversations(&self) -> Result<Vec<Conversation>> {
    let url = self.endpoint(&["messages", "conversations"])?;
    self.send(Method::GET, url, None::<&()>).await
  }

  /// Message thread with `peer_id`
  pub async fn messages(&self, peer_id: &str) -> Result<Vec<Message>> {
    let url = self.endpoint(&["messages", peer_id])?;
    self.send(Method::GET, url, None::<&()>).await
  }

  pub async fn send_message(&self, peer_id: &str, content: &str) -> Result<Message> {
    let url = self.endpoint(&["messages"])?;
    let body = SendMessageRequest {
      receiver_id: peer_id,
      content,
    };
    self.send(Method::POST, url, Some(&body)).await
  }

  /// News for one tab, optionally restricted to a subject
  pub async fn news(&self, key: &NewsKey) -> Result<Vec<NewsArticle>> {
    let mut url = match key.tab {
      NewsTab::Feed => self.endpoint(&["news"])?,
      NewsTab::Favorites => self.endpoint(&["news", "favorites"])?,
    };
    if key.subject != ALL_SUBJECTS {
      url.query_pairs_mut().append_pair("subject", &key.subject);
    }
    self.send(Method::GET, url, None::<&()>).await
  }

  /// Flip the favorite flag of an article for the signed-in user
  pub async fn toggle_favorite(&self, news_id: &str) -> Result<NewsArticle> {
    let url = self.endpoint(&["news", news_id, "favorite"])?;
    self.send(Method::POST, url, None::<&()>).await
  }

  pub async fn schedule(&self, key: &ScheduleKey) -> Result<Vec<ScheduleEntry>> {
    let mut url = self.endpoint(&["schedules"])?;
    url
      .query_pairs_mut()
      .append_pair("role", key.role.as_str())
      .append_pair("userKey", &key.user_key)
      .append_pair("academicYear", &key.academic_year)
      .append_pair("week", &key.week.to_string());
    self.send(Method::GET, url, None::<&()>).await
  }

  /// Resolve path segments against the base URL, percent-encoding each one.
  fn endpoint(&self, segments: &[&str]) -> Result<Url> {
    let mut url = self.base.clone();
    url
      .path_segments_mut()
      .map_err(|_| eyre!("API base URL cannot carry a path: {}", self.base))?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }

  async fn send<T, B>(&self, method: Method, url: Url, body: Option<&B>) -> Result<T>
  where
    T: DeserializeOwned,
    B: Serialize + ?Sized,
  {
    debug!(%method, %url, "api request");
    let mut request = self
      .http
      .request(method.clone(), url.clone())
      .bearer_auth(&self.token);
    if let Some(body) = body {
      request = request.json(body);
    }

    let response = request
      .send()
      .await
      .map_err(|e| eyre!("{} {} failed: {}", method, url.path(), e))?;
    let status = response.status();
    let text = response
      .text()
      .await
      .map_err(|e| eyre!("Failed to read response from {}: {}", url.path(), e))?;

    ApiResponse::<T>::from_http(status, &text)
      .into_result()
      .map_err(|e| eyre!("{} {}: {}", method, url.path(), e))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::Role;

  fn client(base_url: &str) -> ApiClient {
    let config = ApiConfig {
      base_url: base_url.to_string(),
      socket_url: None,
      request_timeout_secs: 5,
    };
    ApiClient::new(&config, "t1").unwrap()
  }

  #[test]
  fn test_endpoint_keeps_base_path() {
    let api = client("https://school.example.edu/api");
    let url = api.endpoint(&["messages", "conversations"]).unwrap();
    assert_eq!(url.as_str(), "https://school.example.edu/api/messages/conversations");
  }

  #[test]
  fn test_endpoint_encodes_segments() {
    let api = client("https://school.example.edu/api/");
    let url = api.endpoint(&["messages", "a/b c"]).unwrap();
    assert_eq!(url.as_str(), "https://school.example.edu/api/messages/a%2Fb%20c");
  }

  #[test]
  fn test_invalid_base_url() {
    let config = ApiConfig {
      base_url: "not a url".to_string(),
      socket_url: None,
      request_timeout_secs: 5,
    };
    assert!(ApiClient::new(&config, "t1").is_err());
  }

  #[tokio::test]
  async fn test_unreachable_backend_is_error() {
    let api = client("http://127.0.0.1:9/api/");
    let key = ScheduleKey::new(Role::Student, "SV001", "2024-2025", 1);
    assert!(api.schedule(&key).await.is_err());
  }
}
