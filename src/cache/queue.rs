//! Write-behind queue between the in-memory stores and persistence.
//!
//! Stores update memory synchronously and hand the persisted write to a
//! single background task, which applies jobs strictly in submission order.
//! Each write reports its outcome on a broadcast channel, and `flush` lets a
//! caller wait until everything submitted so far has been applied.

use color_eyre::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use super::storage::PersistentCache;
use super::traits::Namespace;

const EVENT_CAPACITY: usize = 256;

type KeyFilter = Box<dyn Fn(&str) -> bool + Send>;

enum Job {
  Save {
    namespace: Namespace,
    key: String,
    items: Vec<Value>,
  },
  Remove {
    namespace: Namespace,
    key: String,
  },
  RemoveWhere {
    namespace: Namespace,
    filter: KeyFilter,
  },
  RemoveNamespace {
    namespace: Namespace,
  },
  Load {
    namespace: Namespace,
    key: String,
    reply: oneshot::Sender<Option<Vec<Value>>>,
  },
  Usage {
    reply: oneshot::Sender<BTreeMap<Namespace, usize>>,
  },
  Flush {
    reply: oneshot::Sender<()>,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistKind {
  Save,
  Remove,
}

/// Outcome of one persisted write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistEvent {
  pub namespace: Namespace,
  /// Encoded cache key; `None` for scoped removals
  pub key: Option<String>,
  pub kind: PersistKind,
  /// Entries written or removed
  pub affected: usize,
  pub error: Option<String>,
}

impl PersistEvent {
  pub fn is_ok(&self) -> bool {
    self.error.is_none()
  }
}

/// Handle to the background persistence task. Cheap to clone.
#[derive(Clone)]
pub struct PersistQueue {
  tx: mpsc::UnboundedSender<Job>,
  events: broadcast::Sender<PersistEvent>,
}

impl PersistQueue {
  /// Spawn the persistence task. Must be called inside a Tokio runtime.
  pub fn spawn(cache: PersistentCache) -> Self {
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    let events_tx = events.clone();

    tokio::spawn(async move {
      while let Some(job) = rx.recv().await {
        run_job(&cache, job, &events_tx);
      }
      debug!("persist queue stopped");
    });

    Self { tx, events }
  }

  pub fn save(&self, namespace: Namespace, key: String, items: Vec<Value>) {
    self.submit(Job::Save {
      namespace,
      key,
      items,
    });
  }

  pub fn remove(&self, namespace: Namespace, key: String) {
    self.submit(Job::Remove { namespace, key });
  }

  pub fn remove_where(
    &self,
    namespace: Namespace,
    filter: impl Fn(&str) -> bool + Send + 'static,
  ) {
    self.submit(Job::RemoveWhere {
      namespace,
      filter: Box::new(filter),
    });
  }

  pub fn remove_namespace(&self, namespace: Namespace) {
    self.submit(Job::RemoveNamespace { namespace });
  }

  /// Read a persisted list after every previously submitted write.
  pub async fn load(&self, namespace: Namespace, key: String) -> Option<Vec<Value>> {
    let (reply, rx) = oneshot::channel();
    self.submit(Job::Load {
      namespace,
      key,
      reply,
    });
    rx.await.ok().flatten()
  }

  pub async fn usage_summary(&self) -> BTreeMap<Namespace, usize> {
    let (reply, rx) = oneshot::channel();
    self.submit(Job::Usage { reply });
    rx.await.unwrap_or_default()
  }

  /// Wait until every job submitted before this call has been applied.
  pub async fn flush(&self) {
    let (reply, rx) = oneshot::channel();
    self.submit(Job::Flush { reply });
    let _ = rx.await;
  }

  /// Subscribe to write outcomes.
  pub fn subscribe(&self) -> broadcast::Receiver<PersistEvent> {
    self.events.subscribe()
  }

  fn submit(&self, job: Job) {
    if self.tx.send(job).is_err() {
      warn!("persist queue closed; dropping job");
    }
  }
}

fn run_job(cache: &PersistentCache, job: Job, events: &broadcast::Sender<PersistEvent>) {
  let event = match job {
    Job::Save {
      namespace,
      key,
      items,
    } => {
      let affected = items.len();
      let result = cache.save(namespace, &key, items);
      if let Err(e) = &result {
        warn!(%namespace, key = %key, error = %e, "failed to persist cache entry");
      }
      PersistEvent {
        namespace,
        key: Some(key),
        kind: PersistKind::Save,
        affected,
        error: result.err().map(|e| e.to_string()),
      }
    }
    Job::Remove { namespace, key } => {
      let result = cache.remove(namespace, &key);
      if let Err(e) = &result {
        warn!(%namespace, key = %key, error = %e, "failed to remove cache entry");
      }
      PersistEvent {
        namespace,
        key: Some(key),
        kind: PersistKind::Remove,
        affected: usize::from(result.is_ok()),
        error: result.err().map(|e| e.to_string()),
      }
    }
    Job::RemoveWhere { namespace, filter } => {
      removed_many(namespace, cache.remove_where(namespace, filter))
    }
    Job::RemoveNamespace { namespace } => {
      removed_many(namespace, cache.remove_namespace(namespace))
    }
    Job::Load {
      namespace,
      key,
      reply,
    } => {
      let _ = reply.send(cache.load(namespace, &key));
      return;
    }
    Job::Usage { reply } => {
      let _ = reply.send(cache.usage_summary());
      return;
    }
    Job::Flush { reply } => {
      let _ = reply.send(());
      return;
    }
  };

  // Nobody listening is fine
  let _ = events.send(event);
}

fn removed_many(namespace: Namespace, result: Result<usize>) -> PersistEvent {
  if let Err(e) = &result {
    warn!(%namespace, error = %e, "failed to clear cache entries");
  }
  PersistEvent {
    namespace,
    key: None,
    kind: PersistKind::Remove,
    affected: *result.as_ref().unwrap_or(&0),
    error: result.err().map(|e| e.to_string()),
  }
}
