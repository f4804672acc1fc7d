//! Wire types of the REST backend.
//!
//! The backend answers either with a bare JSON document or with a
//! `{success, message, data}` envelope; both are folded into [`ApiResponse`]
//! at the call site.

use color_eyre::{eyre::eyre, Result};
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// Uniform result of one REST call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse<T> {
  pub success: bool,
  pub message: Option<String>,
  pub data: Option<T>,
}

impl<T: DeserializeOwned> ApiResponse<T> {
  /// Fold an HTTP status and raw body into the uniform shape.
  pub fn from_http(status: StatusCode, body: &str) -> Self {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let envelope = parsed
      .as_ref()
      .and_then(|v| serde_json::from_value::<Envelope>(v.clone()).ok());

    if !status.is_success() {
      let message = envelope
        .and_then(|e| e.message)
        .or_else(|| (!body.trim().is_empty()).then(|| body.trim().to_string()))
        .unwrap_or_else(|| status.to_string());
      return Self::failure(format!("{}: {}", status.as_u16(), message));
    }

    let envelope = envelope.filter(|e| e.success.is_some() || e.data.is_some());
    let (success, message, payload) = match (envelope, parsed) {
      (Some(envelope), _) => (
        envelope.success.unwrap_or(true),
        envelope.message,
        envelope.data,
      ),
      (None, Some(value)) => (true, None, Some(value)),
      (None, None) => return Self::failure("Response body is not JSON".to_string()),
    };

    match payload.map(serde_json::from_value::<T>).transpose() {
      Ok(data) => Self {
        success,
        message,
        data,
      },
      Err(e) => Self::failure(format!("Unexpected response shape: {}", e)),
    }
  }
}

impl<T> ApiResponse<T> {
  fn failure(message: String) -> Self {
    Self {
      success: false,
      message: Some(message),
      data: None,
    }
  }

  /// The payload of a successful call.
  pub fn into_result(self) -> Result<T> {
    match (self.success, self.data) {
      (true, Some(data)) => Ok(data),
      (true, None) => Err(eyre!(
        "Response carried no data{}",
        self.message.map(|m| format!(": {}", m)).unwrap_or_default()
      )),
      (false, _) => Err(eyre!(
        "{}",
        self.message.unwrap_or_else(|| "Request failed".to_string())
      )),
    }
  }
}

#[derive(Debug, Deserialize)]
struct Envelope {
  success: Option<bool>,
  message: Option<String>,
  data: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest<'a> {
  pub receiver_id: &'a str,
  pub content: &'a str,
}
