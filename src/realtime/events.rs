//! Inbound real-time events and the state they feed.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use super::transport::SocketEvent;
use crate::models::{Message, Notification};

pub const JOIN: &str = "join";
pub const JOINED: &str = "joined";
pub const NEW_MESSAGE: &str = "new_message";
pub const MESSAGE_READ: &str = "message_read";
pub const NEW_NOTIFICATION: &str = "new_notification";

/// De-duplication is tracked per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
  Message,
  Notification,
}

/// Read receipt for messages sent by `sender_id`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
  pub reader_id: String,
  pub sender_id: String,
  #[serde(default)]
  pub message_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
  /// Server acknowledged the join
  Joined,
  NewMessage(Message),
  MessageRead(ReadReceipt),
  /// Notification plus the id used for de-duplication
  NewNotification(Notification, String),
}

impl InboundEvent {
  /// Decode a pushed event. Unknown event names yield `Ok(None)`.
  pub fn parse(event: &SocketEvent) -> Result<Option<Self>> {
    let parsed = match event.name.as_str() {
      JOINED => Self::Joined,
      NEW_MESSAGE => Self::NewMessage(decode(event)?),
      MESSAGE_READ => Self::MessageRead(decode(event)?),
      NEW_NOTIFICATION => {
        let notification: Notification = decode(event)?;
        let dedupe_id = notification
          .id
          .clone()
          .unwrap_or_else(|| fingerprint(&event.payload));
        Self::NewNotification(notification, dedupe_id)
      }
      _ => return Ok(None),
    };
    Ok(Some(parsed))
  }
}

fn decode<T: serde::de::DeserializeOwned>(event: &SocketEvent) -> Result<T> {
  serde_json::from_value(event.payload.clone())
    .map_err(|e| eyre!("Malformed {} payload: {}", event.name, e))
}

/// Stable id for payloads that carry none.
pub fn fingerprint(payload: &Value) -> String {
  let mut hasher = Sha256::new();
  hasher.update(payload.to_string().as_bytes());
  hex::encode(hasher.finalize())
}

/// Bounded memory of recently applied event ids.
#[derive(Debug)]
pub struct RecentIds {
  capacity: usize,
  order: VecDeque<String>,
  seen: HashSet<String>,
}

impl RecentIds {
  pub fn new(capacity: usize) -> Self {
    Self {
      capacity: capacity.max(1),
      order: VecDeque::new(),
      seen: HashSet::new(),
    }
  }

  /// Record `id`; returns false if it was already seen.
  pub fn insert(&mut self, id: &str) -> bool {
    if self.seen.contains(id) {
      return false;
    }

    if self.order.len() == self.capacity {
      if let Some(oldest) = self.order.pop_front() {
        self.seen.remove(&oldest);
      }
    }
    self.order.push_back(id.to_string());
    self.seen.insert(id.to_string());
    true
  }
}

/// Transient user-facing notice for a newly delivered event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
  pub title: String,
  pub body: String,
}

/// Real-time state of one signed-in user.
#[derive(Debug)]
pub struct Inbox {
  owner: Option<String>,
  notifications: BTreeMap<String, Vec<Notification>>,
  messages: Vec<Message>,
  recent: HashMap<Channel, RecentIds>,
  dedupe_window: usize,
  unread: bool,
}

impl Inbox {
  pub fn new(dedupe_window: usize) -> Self {
    Self {
      owner: None,
      notifications: BTreeMap::new(),
      messages: Vec::new(),
      recent: HashMap::new(),
      dedupe_window,
      unread: false,
    }
  }

  /// Bind the inbox to `user_id`, dropping another user's state.
  pub fn bind(&mut self, user_id: &str) {
    if self.owner.as_deref() != Some(user_id) {
      *self = Self::new(self.dedupe_window);
      self.owner = Some(user_id.to_string());
    }
  }

  /// Returns false if `id` was already applied on `channel`.
  pub fn first_delivery(&mut self, channel: Channel, id: &str) -> bool {
    let window = self.dedupe_window;
    self
      .recent
      .entry(channel)
      .or_insert_with(|| RecentIds::new(window))
      .insert(id)
  }

  pub fn push_message(&mut self, message: Message) {
    self.messages.push(message);
    self.recompute_unread();
  }

  pub fn push_notification(&mut self, notification: Notification) {
    self
      .notifications
      .entry(notification.category.clone())
      .or_default()
      .push(notification);
    self.recompute_unread();
  }

  /// Record that `reader_id` read the listed messages.
  pub fn apply_read_receipt(&mut self, receipt: &ReadReceipt) {
    for message in &mut self.messages {
      if receipt.message_ids.contains(&message.id) && !message.read_by.contains(&receipt.reader_id) {
        message.read_by.push(receipt.reader_id.clone());
      }
    }
    self.recompute_unread();
  }

  /// Mark every event as read by the owner.
  pub fn mark_all_read(&mut self) {
    let Some(owner) = self.owner.clone() else {
      return;
    };
    let read_by_lists = self
      .notifications
      .values_mut()
      .flatten()
      .map(|n| &mut n.read_by)
      .chain(self.messages.iter_mut().map(|m| &mut m.read_by));
    for read_by in read_by_lists {
      if !read_by.contains(&owner) {
        read_by.push(owner.clone());
      }
    }
    self.recompute_unread();
  }

  pub fn notifications(&self) -> &BTreeMap<String, Vec<Notification>> {
    &self.notifications
  }

  pub fn messages(&self) -> &[Message] {
    &self.messages
  }

  pub fn unread(&self) -> bool {
    self.unread
  }

  /// Unread = any event, in any category, whose read-by set lacks the owner.
  fn recompute_unread(&mut self) {
    self.unread = match self.owner.as_deref() {
      Some(owner) => {
        let lacks_owner = |read_by: &Vec<String>| !read_by.iter().any(|u| u == owner);
        self
          .notifications
          .values()
          .flatten()
          .any(|n| lacks_owner(&n.read_by))
          || self.messages.iter().any(|m| lacks_owner(&m.read_by))
      }
      None => false,
    };
  }
}
