//! Lifecycle of the live socket for the signed-in identity.
//!
//! At most one socket exists per manager. Connect requests go through a
//! guarded state machine: while a connect sequence is running (`Connecting`
//! or `Reconnecting`) further requests are dropped, and a socket opened for a
//! different identity is closed before a new one is opened.

use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::events::{Channel, Inbox, InboundEvent, ReadReceipt, Toast, JOIN};
use super::transport::{ConnectOptions, Connection, Socket, SocketEvent, SocketTransport};
use crate::cache::{CacheStores, ClearScope, MessagesKey};
use crate::config::RealtimeConfig;
use crate::db::{Identity, KeyValueStore};
use crate::models::{Message, Notification};

const TOAST_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
  Disconnected,
  Connecting,
  Connected,
  /// Tearing down and reopening after a focus or health-check trigger
  Reconnecting,
}

impl ConnectionState {
  fn in_progress(self) -> bool {
    matches!(self, Self::Connecting | Self::Reconnecting)
  }
}

struct LiveSocket {
  identity: Identity,
  socket: Arc<dyn Socket>,
  pump: JoinHandle<()>,
  generation: u64,
}

impl LiveSocket {
  fn close(self) {
    self.pump.abort();
    self.socket.disconnect();
  }
}

struct Session {
  state: ConnectionState,
  live: Option<LiveSocket>,
  /// Id of the socket pump last spawned
  generation: u64,
  /// Bumped by every connect sequence and every disconnect; a sequence may
  /// only bind its socket while the epoch it started with is current
  epoch: u64,
}

struct Shared<T: SocketTransport> {
  transport: T,
  url: String,
  config: RealtimeConfig,
  kv: Arc<dyn KeyValueStore>,
  stores: Arc<CacheStores>,
  session: Mutex<Session>,
  inbox: Mutex<Inbox>,
  toasts: broadcast::Sender<Toast>,
}

/// Owns the socket of the signed-in user and fans pushed events out into
/// the caches and the inbox.
pub struct ConnectionManager<T: SocketTransport> {
  shared: Arc<Shared<T>>,
}

impl<T: SocketTransport> Clone for ConnectionManager<T> {
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<T: SocketTransport> ConnectionManager<T> {
  pub fn new(
    transport: T,
    url: impl Into<String>,
    config: RealtimeConfig,
    kv: Arc<dyn KeyValueStore>,
    stores: Arc<CacheStores>,
  ) -> Self {
    let (toasts, _) = broadcast::channel(TOAST_CAPACITY);
    let inbox = Inbox::new(config.dedupe_window);

    Self {
      shared: Arc::new(Shared {
        transport,
        url: url.into(),
        config,
        kv,
        stores,
        session: Mutex::new(Session {
          state: ConnectionState::Disconnected,
          live: None,
          generation: 0,
          epoch: 0,
        }),
        inbox: Mutex::new(inbox),
        toasts,
      }),
    }
  }

  pub fn state(&self) -> ConnectionState {
    self.shared.session().state
  }

  /// Whether a connected socket exists for the identity currently stored.
  pub fn is_live(&self) -> bool {
    let Some(identity) = Identity::load(self.shared.kv.as_ref()) else {
      return false;
    };
    let session = self.shared.session();
    session
      .live
      .as_ref()
      .is_some_and(|live| live.identity == identity && live.socket.is_connected())
  }

  /// Make sure a socket is open for the stored identity.
  ///
  /// Reuses the live socket when it belongs to the same identity and is
  /// still connected.
  pub async fn connect(&self) -> ConnectionState {
    self.start(ConnectionState::Connecting, Duration::ZERO).await
  }

  /// Tear down whatever is open, pause briefly, and connect from scratch.
  pub async fn reconnect(&self) -> ConnectionState {
    let delay = self.shared.config.reconnect_delay();
    self.start(ConnectionState::Reconnecting, delay).await
  }

  /// The app or screen regained focus.
  pub async fn on_focus(&self) -> ConnectionState {
    self.reconnect_if_needed("focus").await
  }

  /// Periodic liveness check.
  pub async fn health_check(&self) -> ConnectionState {
    self.reconnect_if_needed("health check").await
  }

  /// Run [`health_check`](Self::health_check) on the configured interval.
  ///
  /// The task runs until the returned handle is aborted.
  pub fn spawn_health_check(&self) -> JoinHandle<()> {
    let manager = self.clone();
    let period = self
      .shared
      .config
      .health_check_interval()
      .max(Duration::from_secs(1));

    tokio::spawn(async move {
      let mut interval = tokio::time::interval(period);
      interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
      // The first tick completes immediately
      interval.tick().await;
      loop {
        interval.tick().await;
        manager.health_check().await;
      }
    })
  }

  /// Close the socket, if any. A connect sequence still running will not
  /// bind the socket it opens.
  pub fn disconnect(&self) {
    let live = {
      let mut session = self.shared.session();
      session.epoch += 1;
      session.state = ConnectionState::Disconnected;
      session.live.take()
    };
    if let Some(live) = live {
      info!(user_id = %live.identity.user_id, "socket disconnected");
      live.close();
    }
  }

  pub fn unread(&self) -> bool {
    self.shared.inbox().unread()
  }

  pub fn notifications(&self) -> BTreeMap<String, Vec<Notification>> {
    self.shared.inbox().notifications().clone()
  }

  pub fn messages(&self) -> Vec<Message> {
    self.shared.inbox().messages().to_vec()
  }

  pub fn mark_all_read(&self) {
    self.shared.inbox().mark_all_read();
  }

  /// Transient notices for newly delivered events.
  pub fn subscribe_toasts(&self) -> broadcast::Receiver<Toast> {
    self.shared.toasts.subscribe()
  }

  async fn reconnect_if_needed(&self, trigger: &'static str) -> ConnectionState {
    if self.is_live() {
      return ConnectionState::Connected;
    }
    debug!(trigger, "no live socket for the current identity");
    self.reconnect().await
  }

  async fn start(&self, transition: ConnectionState, delay: Duration) -> ConnectionState {
    let Some(identity) = Identity::load(self.shared.kv.as_ref()) else {
      debug!("no signed-in identity; staying disconnected");
      self.disconnect();
      return ConnectionState::Disconnected;
    };

    let (epoch, previous) = {
      let mut session = self.shared.session();
      if session.state.in_progress() {
        debug!(state = ?session.state, "connect already in progress");
        return session.state;
      }

      if transition == ConnectionState::Connecting {
        let reusable = session
          .live
          .as_ref()
          .is_some_and(|live| live.identity == identity && live.socket.is_connected());
        if reusable {
          return ConnectionState::Connected;
        }
      }

      session.state = transition;
      session.epoch += 1;
      (session.epoch, session.live.take())
    };
    let mut attempt = InFlight::new(&self.shared, epoch);

    if let Some(previous) = previous {
      if previous.identity != identity {
        info!(
          from = %previous.identity.user_id,
          to = %identity.user_id,
          "identity changed; closing previous socket"
        );
      }
      previous.close();
    }

    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }

    let state = self.open(identity, epoch).await;
    attempt.finish();
    state
  }

  /// Connect with a bounded number of attempts and linear backoff.
  async fn open(&self, identity: Identity, epoch: u64) -> ConnectionState {
    let config = &self.shared.config;
    let options = ConnectOptions {
      auth_token: identity.token.clone(),
      transports: vec!["websocket".to_string()],
      timeout: config.connect_timeout(),
      reconnection_attempts: config.reconnection_attempts,
      reconnection_delay: config.reconnection_delay(),
    };
    let attempts = config.reconnection_attempts.max(1);

    for attempt in 1..=attempts {
      if attempt > 1 {
        tokio::time::sleep(options.reconnection_delay * (attempt - 1)).await;
      }
      if self.shared.session().epoch != epoch {
        debug!(attempt, "connect sequence superseded; stopping");
        return ConnectionState::Disconnected;
      }

      let connecting = self.shared.transport.connect(&self.shared.url, &options);
      match tokio::time::timeout(options.timeout, connecting).await {
        Ok(Ok(connection)) => return self.bind(identity, epoch, connection),
        Ok(Err(e)) => warn!(attempt, attempts, error = %e, "socket connect failed"),
        Err(_) => warn!(attempt, attempts, "socket connect timed out"),
      }
    }

    warn!(attempts, "giving up until the next reconnect trigger");
    let mut session = self.shared.session();
    if session.epoch == epoch {
      session.state = ConnectionState::Disconnected;
    }
    ConnectionState::Disconnected
  }

  /// Install a freshly opened socket if its connect sequence is still the
  /// current one and the stored identity has not changed meanwhile.
  fn bind(&self, identity: Identity, epoch: u64, connection: Connection) -> ConnectionState {
    let socket: Arc<dyn Socket> = Arc::from(connection.socket);
    let mut session = self.shared.session();

    if session.epoch != epoch {
      drop(session);
      debug!(user_id = %identity.user_id, "connect sequence superseded; closing its socket");
      socket.disconnect();
      return ConnectionState::Disconnected;
    }
    if Identity::load(self.shared.kv.as_ref()).as_ref() != Some(&identity) {
      session.state = ConnectionState::Disconnected;
      drop(session);
      info!(user_id = %identity.user_id, "identity changed while connecting; closing socket");
      socket.disconnect();
      return ConnectionState::Disconnected;
    }

    self.shared.inbox().bind(&identity.user_id);
    session.generation += 1;
    let generation = session.generation;
    let pump = tokio::spawn(pump_events(
      Arc::downgrade(&self.shared),
      identity.user_id.clone(),
      generation,
      connection.events,
    ));

    if let Err(e) = socket.emit(JOIN, json!({ "userId": identity.user_id })) {
      session.state = ConnectionState::Disconnected;
      drop(session);
      warn!(error = %e, "failed to join; closing socket");
      pump.abort();
      socket.disconnect();
      return ConnectionState::Disconnected;
    }

    let user_id = identity.user_id.clone();
    let replaced = session.live.replace(LiveSocket {
      identity,
      socket,
      pump,
      generation,
    });
    session.state = ConnectionState::Connected;
    drop(session);

    if let Some(replaced) = replaced {
      warn!(user_id = %replaced.identity.user_id, "closing socket left from an earlier sequence");
      replaced.close();
    }
    info!(user_id = %user_id, "socket connected");
    ConnectionState::Connected
  }
}

/// Resets the state machine if a connect sequence is abandoned midway.
struct InFlight<'a, T: SocketTransport> {
  shared: &'a Shared<T>,
  epoch: u64,
  done: bool,
}

impl<'a, T: SocketTransport> InFlight<'a, T> {
  fn new(shared: &'a Shared<T>, epoch: u64) -> Self {
    Self {
      shared,
      epoch,
      done: false,
    }
  }

  fn finish(&mut self) {
    self.done = true;
  }
}

impl<T: SocketTransport> Drop for InFlight<'_, T> {
  fn drop(&mut self) {
    if self.done {
      return;
    }
    let mut session = self.shared.session();
    if session.epoch == self.epoch && session.state.in_progress() {
      session.state = ConnectionState::Disconnected;
    }
  }
}

async fn pump_events<T: SocketTransport>(
  shared: Weak<Shared<T>>,
  user_id: String,
  generation: u64,
  mut events: mpsc::UnboundedReceiver<SocketEvent>,
) {
  while let Some(event) = events.recv().await {
    let Some(shared) = shared.upgrade() else {
      return;
    };
    shared.handle_event(&user_id, event);
  }

  if let Some(shared) = shared.upgrade() {
    shared.socket_closed(generation);
  }
}

impl<T: SocketTransport> Shared<T> {
  fn session(&self) -> MutexGuard<'_, Session> {
    self.session.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn inbox(&self) -> MutexGuard<'_, Inbox> {
    self.inbox.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn socket_closed(&self, generation: u64) {
    let closed = {
      let mut session = self.session();
      let current = session
        .live
        .as_ref()
        .is_some_and(|live| live.generation == generation);
      if current {
        session.state = ConnectionState::Disconnected;
        session.live.take()
      } else {
        None
      }
    };

    if let Some(live) = closed {
      info!(user_id = %live.identity.user_id, "socket closed by server");
      live.socket.disconnect();
    }
  }

  fn handle_event(&self, user_id: &str, event: SocketEvent) {
    let inbound = match InboundEvent::parse(&event) {
      Ok(Some(inbound)) => inbound,
      Ok(None) => {
        debug!(event = %event.name, "ignoring unhandled socket event");
        return;
      }
      Err(e) => {
        warn!(event = %event.name, error = %e, "dropping malformed socket event");
        return;
      }
    };

    match inbound {
      InboundEvent::Joined => debug!(user_id, "join acknowledged"),
      InboundEvent::NewMessage(message) => self.on_message(user_id, message),
      InboundEvent::MessageRead(receipt) => self.on_read_receipt(user_id, receipt),
      InboundEvent::NewNotification(notification, id) => {
        self.on_notification(user_id, notification, &id)
      }
    }
  }

  fn on_message(&self, user_id: &str, message: Message) {
    if message.receiver_id != user_id {
      debug!(id = %message.id, "message addressed to someone else");
      return;
    }

    {
      let mut inbox = self.inbox();
      if !inbox.first_delivery(Channel::Message, &message.id) {
        debug!(id = %message.id, "duplicate message dropped");
        return;
      }
      inbox.push_message(message.clone());
    }

    let toast = Toast {
      title: "Tin nhắn mới".to_string(),
      body: message.content.clone(),
    };
    self
      .stores
      .messages
      .push_one(&MessagesKey::new(message.sender_id.clone()), message);
    // Conversation summaries (last message, unread count) are now stale
    self
      .stores
      .conversations
      .clear(ClearScope::Matching(user_id.to_string()));
    let _ = self.toasts.send(toast);
  }

  fn on_read_receipt(&self, user_id: &str, receipt: ReadReceipt) {
    if receipt.sender_id != user_id {
      return;
    }

    self.inbox().apply_read_receipt(&receipt);

    let key = MessagesKey::new(receipt.reader_id.clone());
    for id in &receipt.message_ids {
      self.stores.messages.update_one(&key, id, |message| {
        if !message.read_by.contains(&receipt.reader_id) {
          message.read_by.push(receipt.reader_id.clone());
        }
      });
    }
  }

  fn on_notification(&self, user_id: &str, notification: Notification, id: &str) {
    if !notification.recipients.iter().any(|r| r == user_id) {
      debug!(id, "notification addressed to someone else");
      return;
    }

    let toast = Toast {
      title: notification.title.clone(),
      body: notification.body.clone(),
    };
    {
      let mut inbox = self.inbox();
      if !inbox.first_delivery(Channel::Notification, id) {
        debug!(id, "duplicate notification dropped");
        return;
      }
      inbox.push_notification(notification);
    }
    let _ = self.toasts.send(toast);
  }
}
