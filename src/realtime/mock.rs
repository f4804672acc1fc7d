//! In-process transport for exercising the connection manager.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use super::transport::{ConnectOptions, Connection, Socket, SocketEvent, SocketTransport};

#[derive(Clone, Default)]
pub struct MockTransport {
  log: Arc<Mutex<Vec<String>>>,
  sockets: Arc<Mutex<Vec<MockSocket>>>,
  failures: Arc<AtomicU32>,
  delay: Duration,
}

impl MockTransport {
  pub fn new() -> Self {
    Self::default()
  }

  /// Fail the next `count` connect calls.
  pub fn failing(self, count: u32) -> Self {
    self.failures.store(count, Ordering::SeqCst);
    self
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  /// `connect:<token>` and `disconnect:<token>` entries, in call order.
  pub fn log(&self) -> Vec<String> {
    self.log.lock().unwrap().clone()
  }

  pub fn connect_count(&self) -> usize {
    self.log().iter().filter(|line| line.starts_with("connect:")).count()
  }

  /// The `index`-th socket handed out.
  pub fn socket(&self, index: usize) -> Option<MockSocket> {
    self.sockets.lock().unwrap().get(index).cloned()
  }
}

impl SocketTransport for MockTransport {
  fn connect<'a>(
    &'a self,
    _url: &'a str,
    options: &'a ConnectOptions,
  ) -> BoxFuture<'a, Result<Connection>> {
    Box::pin(async move {
      self.log.lock().unwrap().push(format!("connect:{}", options.auth_token));
      if !self.delay.is_zero() {
        tokio::time::sleep(self.delay).await;
      }

      let failed = self
        .failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
      if failed {
        return Err(eyre!("connection refused"));
      }

      let (tx, rx) = mpsc::unbounded_channel();
      let socket = MockSocket {
        token: options.auth_token.clone(),
        connected: Arc::new(AtomicBool::new(true)),
        emitted: Arc::new(Mutex::new(Vec::new())),
        events: Arc::new(Mutex::new(Some(tx))),
        log: self.log.clone(),
      };
      self.sockets.lock().unwrap().push(socket.clone());

      Ok(Connection {
        socket: Box::new(socket),
        events: rx,
      })
    })
  }
}

#[derive(Clone)]
pub struct MockSocket {
  token: String,
  connected: Arc<AtomicBool>,
  emitted: Arc<Mutex<Vec<(String, Value)>>>,
  /// Shared by every clone so a server close reaches the event stream
  events: Arc<Mutex<Option<mpsc::UnboundedSender<SocketEvent>>>>,
  log: Arc<Mutex<Vec<String>>>,
}

impl MockSocket {
  pub fn token(&self) -> &str {
    &self.token
  }

  pub fn emitted(&self) -> Vec<(String, Value)> {
    self.emitted.lock().unwrap().clone()
  }

  /// Deliver a server-pushed event.
  pub fn push(&self, name: &str, payload: Value) {
    if let Some(events) = self.events.lock().unwrap().as_ref() {
      events.send(SocketEvent::new(name, payload)).unwrap();
    }
  }

  /// The server hangs up: the event stream ends and the socket reports closed.
  pub fn close_from_server(&self) {
    self.connected.store(false, Ordering::SeqCst);
    self.events.lock().unwrap().take();
  }

  /// Lose the connection without the client asking.
  pub fn drop_connection(&self) {
    self.connected.store(false, Ordering::SeqCst);
  }
}

impl Socket for MockSocket {
  fn emit(&self, event: &str, payload: Value) -> Result<()> {
    if !self.is_connected() {
      return Err(eyre!("socket is closed"));
    }
    self.emitted.lock().unwrap().push((event.to_string(), payload));
    Ok(())
  }

  fn is_connected(&self) -> bool {
    self.connected.load(Ordering::SeqCst)
  }

  fn disconnect(&self) {
    self.connected.store(false, Ordering::SeqCst);
    self.log.lock().unwrap().push(format!("disconnect:{}", self.token));
  }
}
