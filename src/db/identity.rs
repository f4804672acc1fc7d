use color_eyre::Result;
use std::fmt;
use tracing::warn;

use super::KeyValueStore;

const USER_ID_KEY: &str = "userId";
const TOKEN_KEY: &str = "token";

/// The signed-in user: scopes "my data" caches and the live socket.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
  pub user_id: String,
  pub token: String,
}

impl Identity {
  pub fn new(user_id: impl Into<String>, token: impl Into<String>) -> Self {
    Self {
      user_id: user_id.into(),
      token: token.into(),
    }
  }

  /// Read the identity from storage.
  ///
  /// Returns `None` unless both the user id and the token are present and
  /// non-empty. Storage errors count as "signed out".
  pub fn load(kv: &dyn KeyValueStore) -> Option<Self> {
    let read = |key: &str| match kv.get(key) {
      Ok(value) => value.filter(|v| !v.is_empty()),
      Err(e) => {
        warn!(key, error = %e, "failed to read identity");
        None
      }
    };

    let user_id = read(USER_ID_KEY)?;
    let token = read(TOKEN_KEY)?;
    Some(Self { user_id, token })
  }

  pub fn store(&self, kv: &dyn KeyValueStore) -> Result<()> {
    kv.set(USER_ID_KEY, &self.user_id)?;
    kv.set(TOKEN_KEY, &self.token)
  }

  pub fn clear(kv: &dyn KeyValueStore) -> Result<()> {
    kv.multi_remove(&[USER_ID_KEY.to_string(), TOKEN_KEY.to_string()])
  }
}

impl fmt::Debug for Identity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Identity")
      .field("user_id", &self.user_id)
      .field("token", &"<redacted>")
      .finish()
  }
}
