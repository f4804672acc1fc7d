//! Contract of the real-time socket client.
//!
//! The concrete client lives outside this crate; the manager only needs to
//! open an authenticated socket, emit events and receive pushed ones.

use color_eyre::Result;
use futures::future::BoxFuture;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

/// Options passed to the transport on every connect.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectOptions {
  /// Bearer token sent in the handshake
  pub auth_token: String,
  pub transports: Vec<String>,
  pub timeout: Duration,
  /// Retry budget the manager applies around `connect`
  pub reconnection_attempts: u32,
  pub reconnection_delay: Duration,
}

impl std::fmt::Debug for ConnectOptions {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ConnectOptions")
      .field("auth_token", &"<redacted>")
      .field("transports", &self.transports)
      .field("timeout", &self.timeout)
      .field("reconnection_attempts", &self.reconnection_attempts)
      .field("reconnection_delay", &self.reconnection_delay)
      .finish()
  }
}

/// An event pushed by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct SocketEvent {
  pub name: String,
  pub payload: Value,
}

impl SocketEvent {
  pub fn new(name: impl Into<String>, payload: Value) -> Self {
    Self {
      name: name.into(),
      payload,
    }
  }
}

/// An open socket.
pub trait Socket: Send + Sync {
  fn emit(&self, event: &str, payload: Value) -> Result<()>;

  fn is_connected(&self) -> bool;

  fn disconnect(&self);
}

/// A freshly opened socket together with its inbound event stream.
///
/// The receiver exists before the socket is handed out, so no pushed event
/// can be missed between connecting and subscribing.
pub struct Connection {
  pub socket: Box<dyn Socket>,
  pub events: mpsc::UnboundedReceiver<SocketEvent>,
}

/// Opens sockets.
pub trait SocketTransport: Send + Sync + 'static {
  fn connect<'a>(
    &'a self,
    url: &'a str,
    options: &'a ConnectOptions,
  ) -> BoxFuture<'a, Result<Connection>>;
}
