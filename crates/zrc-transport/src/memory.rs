// memory.rs — In-process implementation of the Transport trait.
//
// A MemoryBus is the shared "network"; each MemorySession opened on it is one
// participant. Every subscription and queryable gets its own delivery thread
// fed by an mpsc queue, which gives:
//   - FIFO delivery per subscriber,
//   - parallel delivery across subscriptions,
//   - isolation: a slow or panicking callback only stalls its own queue.
//
// Releasing a route flips its `active` flag (so queued items are discarded)
// and drops the queue sender (so the worker thread exits).

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use crate::error::TransportError;
use crate::key_expr;
use crate::transport::{
    Query, QueryCallback, Queryable, Replies, Sample, SampleCallback, Subscription, Transport,
};

/// A declared subscription or queryable as seen by the bus.
struct Route<T> {
    session: u64,
    key_expr: String,
    sender: Sender<T>,
    active: Arc<AtomicBool>,
}

impl<T> Route<T> {
    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, Route<Sample>>>,
    queryables: Mutex<HashMap<u64, Route<Query>>>,
}

impl BusInner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn remove_subscriber(&self, id: u64) {
        let route = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if let Some(route) = route {
            route.deactivate();
            tracing::debug!(key = %route.key_expr, "subscription released");
        }
    }

    fn remove_queryable(&self, id: u64) {
        let route = self
            .queryables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if let Some(route) = route {
            route.deactivate();
            tracing::debug!(key = %route.key_expr, "queryable released");
        }
    }

    fn remove_session(&self, session: u64) {
        let mut subs = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subs.retain(|_, route| {
            let keep = route.session != session;
            if !keep {
                route.deactivate();
            }
            keep
        });
        drop(subs);

        let mut queryables = self.queryables.lock().unwrap_or_else(PoisonError::into_inner);
        queryables.retain(|_, route| {
            let keep = route.session != session;
            if !keep {
                route.deactivate();
            }
            keep
        });
    }
}

/// Shared in-process bus. Cloning yields another handle to the same bus.
#[derive(Clone, Default)]
pub struct MemoryBus {
    inner: Arc<BusInner>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new session (participant) on this bus.
    pub fn open_session(&self) -> MemorySession {
        MemorySession {
            id: self.inner.next_id(),
            bus: Arc::clone(&self.inner),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of live subscriptions across all sessions.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Number of live subscriptions whose expression matches `key`.
    pub fn subscribers_matching(&self, key: &str) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|route| key_expr::matches(&route.key_expr, key))
            .count()
    }

    /// Number of live queryables across all sessions.
    pub fn queryable_count(&self) -> usize {
        self.inner
            .queryables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for MemoryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBus")
            .field("subscribers", &self.subscriber_count())
            .field("queryables", &self.queryable_count())
            .finish()
    }
}

/// One participant on a [`MemoryBus`]. Closed on drop.
pub struct MemorySession {
    id: u64,
    bus: Arc<BusInner>,
    closed: AtomicBool,
}

impl MemorySession {
    pub fn id(&self) -> u64 {
        self.id
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::SessionClosed);
        }
        Ok(())
    }
}

/// Start the worker thread draining one route's queue.
fn spawn_worker<T: Send + 'static>(
    name: String,
    key_expr: &str,
    receiver: mpsc::Receiver<T>,
    active: Arc<AtomicBool>,
    handler: Box<dyn Fn(T) + Send + 'static>,
) -> Result<(), TransportError> {
    let key = key_expr.to_string();
    thread::Builder::new()
        .name(name)
        .spawn(move || {
            for item in receiver {
                if !active.load(Ordering::Acquire) {
                    break;
                }
                if panic::catch_unwind(AssertUnwindSafe(|| handler(item))).is_err() {
                    tracing::error!(key = %key, "delivery callback panicked; continuing");
                }
            }
        })
        .map(|_| ())
        .map_err(|e| TransportError::SpawnFailed {
            key: key_expr.to_string(),
            reason: e.to_string(),
        })
}

impl Transport for MemorySession {
    fn put(&self, key: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.ensure_open()?;
        key_expr::validate(key)?;
        if key_expr::is_wildcard(key) {
            return Err(TransportError::PutFailed {
                key: key.to_string(),
                reason: "put requires a concrete key".to_string(),
            });
        }

        // Snapshot the matching queues so no lock is held while sending.
        let targets: Vec<Sender<Sample>> = self
            .bus
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|route| key_expr::matches(&route.key_expr, key))
            .map(|route| route.sender.clone())
            .collect();

        tracing::trace!(key, subscribers = targets.len(), bytes = payload.len(), "put");
        for target in targets {
            // A closed queue means the subscriber is gone; at-most-once allows dropping.
            let _ = target.send(Sample {
                key: key.to_string(),
                payload: payload.clone(),
            });
        }
        Ok(())
    }

    fn subscribe(
        &self,
        key_expr: &str,
        callback: SampleCallback,
    ) -> Result<Subscription, TransportError> {
        self.ensure_open()?;
        key_expr::validate(key_expr)?;

        let id = self.bus.next_id();
        let (sender, receiver) = mpsc::channel();
        let active = Arc::new(AtomicBool::new(true));
        spawn_worker(
            format!("zrc-sub-{id}"),
            key_expr,
            receiver,
            Arc::clone(&active),
            callback,
        )?;

        self.bus
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                Route {
                    session: self.id,
                    key_expr: key_expr.to_string(),
                    sender,
                    active,
                },
            );
        tracing::debug!(key = key_expr, id, "subscription declared");

        let bus = Arc::clone(&self.bus);
        Ok(Subscription::new(key_expr, move || bus.remove_subscriber(id)))
    }

    fn declare_queryable(
        &self,
        key_expr: &str,
        callback: QueryCallback,
    ) -> Result<Queryable, TransportError> {
        self.ensure_open()?;
        key_expr::validate(key_expr)?;

        let id = self.bus.next_id();
        let (sender, receiver) = mpsc::channel();
        let active = Arc::new(AtomicBool::new(true));
        spawn_worker(
            format!("zrc-qbl-{id}"),
            key_expr,
            receiver,
            Arc::clone(&active),
            callback,
        )?;

        self.bus
            .queryables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                Route {
                    session: self.id,
                    key_expr: key_expr.to_string(),
                    sender,
                    active,
                },
            );
        tracing::debug!(key = key_expr, id, "queryable declared");

        let bus = Arc::clone(&self.bus);
        Ok(Queryable::new(key_expr, move || bus.remove_queryable(id)))
    }

    fn get(
        &self,
        key: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Replies, TransportError> {
        self.ensure_open()?;
        key_expr::validate(key)?;
        if key_expr::is_wildcard(key) {
            return Err(TransportError::InvalidKey {
                key: key.to_string(),
                reason: "query target must be a concrete key".to_string(),
            });
        }

        let targets: Vec<Sender<Query>> = self
            .bus
            .queryables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|route| key_expr::matches(&route.key_expr, key))
            .map(|route| route.sender.clone())
            .collect();

        let (reply_tx, reply_rx) = mpsc::channel();
        let replies = Replies::new(key, reply_rx, timeout);
        tracing::trace!(key, queryables = targets.len(), "get");

        if targets.is_empty() {
            // Nobody can answer: the query stays open until it times out.
            return Ok(replies.held_open(reply_tx));
        }
        for target in targets {
            let _ = target.send(Query::new(key, payload.clone(), reply_tx.clone()));
        }
        Ok(replies)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.bus.remove_session(self.id);
        tracing::debug!(session = self.id, "session closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.close();
    }
}
