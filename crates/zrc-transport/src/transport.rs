// transport.rs — The Transport trait and the values that flow through it.
//
// A Transport is one session on a key-expression bus. It offers the three
// primitives everything else in ZRC is built from:
//   put        — fire-and-forget publication on a concrete key
//   subscribe  — callback delivery for every put matching an expression
//   get        — a query answered by zero or more queryables, with a deadline
//
// Delivery callbacks run on threads owned by the transport. Implementations
// must keep a panicking callback from taking its delivery thread down.

use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::error::TransportError;

/// One message delivered to a subscriber or returned as a query reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// The concrete key the payload was published on.
    pub key: String,
    /// Encoded payload bytes.
    pub payload: Vec<u8>,
}

/// Outcome of a single reply to a query.
pub type Reply = Result<Sample, TransportError>;

/// Callback invoked for every sample matching a subscription.
pub type SampleCallback = Box<dyn Fn(Sample) + Send + 'static>;

/// Callback invoked for every query matching a queryable.
pub type QueryCallback = Box<dyn Fn(Query) + Send + 'static>;

/// A query delivered to a queryable.
///
/// The queryable answers with [`reply`](Query::reply) or
/// [`reply_err`](Query::reply_err). Dropping the query without replying
/// simply contributes no reply.
#[derive(Debug)]
pub struct Query {
    key: String,
    payload: Vec<u8>,
    replies: Sender<Reply>,
}

impl Query {
    pub fn new(key: impl Into<String>, payload: Vec<u8>, replies: Sender<Reply>) -> Self {
        Self {
            key: key.into(),
            payload,
            replies,
        }
    }

    /// The key the query was addressed to.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Answer with a payload.
    pub fn reply(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.send(Ok(Sample {
            key: self.key.clone(),
            payload,
        }))
    }

    /// Answer with a substrate-level error.
    pub fn reply_err(&self, message: impl Into<String>) -> Result<(), TransportError> {
        self.send(Err(TransportError::ReplyFailed {
            key: self.key.clone(),
            reason: message.into(),
        }))
    }

    fn send(&self, reply: Reply) -> Result<(), TransportError> {
        self.replies
            .send(reply)
            .map_err(|_| TransportError::ReplyFailed {
                key: self.key.clone(),
                reason: "querier is no longer waiting".to_string(),
            })
    }
}

/// The reply stream of a query.
///
/// Iterating yields replies as they arrive and ends when every queryable has
/// answered or the deadline passes, whichever comes first.
#[derive(Debug)]
pub struct Replies {
    key: String,
    receiver: Receiver<Reply>,
    deadline: Instant,
    // Keeps the stream open until the deadline when nobody can answer.
    _hold_open: Option<Sender<Reply>>,
}

impl Replies {
    pub fn new(key: impl Into<String>, receiver: Receiver<Reply>, timeout: Duration) -> Self {
        Self {
            key: key.into(),
            receiver,
            deadline: Instant::now() + timeout,
            _hold_open: None,
        }
    }

    /// Keep the stream open until its deadline even if no replier exists.
    pub fn held_open(mut self, sender: Sender<Reply>) -> Self {
        self._hold_open = Some(sender);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl Iterator for Replies {
    type Item = Reply;

    fn next(&mut self) -> Option<Reply> {
        let remaining = self.deadline.checked_duration_since(Instant::now())?;
        self.receiver.recv_timeout(remaining).ok()
    }
}

/// Runs an undeclare action at most once.
struct UndeclareOnce(Mutex<Option<Box<dyn FnOnce() + Send>>>);

impl UndeclareOnce {
    fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self(Mutex::new(Some(Box::new(action))))
    }

    fn run(&self) {
        let action = self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(action) = action {
            action();
        }
    }

    fn is_pending(&self) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Handle to an active subscription.
///
/// Released by [`undeclare`](Subscription::undeclare) (idempotent) or on drop.
pub struct Subscription {
    key_expr: String,
    undeclare: UndeclareOnce,
}

impl Subscription {
    pub fn new(key_expr: impl Into<String>, undeclare: impl FnOnce() + Send + 'static) -> Self {
        Self {
            key_expr: key_expr.into(),
            undeclare: UndeclareOnce::new(undeclare),
        }
    }

    pub fn key_expr(&self) -> &str {
        &self.key_expr
    }

    /// Stop delivery. Safe to call any number of times.
    pub fn undeclare(&self) {
        self.undeclare.run();
    }

    pub fn is_declared(&self) -> bool {
        self.undeclare.is_pending()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.undeclare();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key_expr", &self.key_expr)
            .field("declared", &self.is_declared())
            .finish()
    }
}

/// Handle to an active queryable. Same release rules as [`Subscription`].
pub struct Queryable {
    key_expr: String,
    undeclare: UndeclareOnce,
}

impl Queryable {
    pub fn new(key_expr: impl Into<String>, undeclare: impl FnOnce() + Send + 'static) -> Self {
        Self {
            key_expr: key_expr.into(),
            undeclare: UndeclareOnce::new(undeclare),
        }
    }

    pub fn key_expr(&self) -> &str {
        &self.key_expr
    }

    pub fn undeclare(&self) {
        self.undeclare.run();
    }

    pub fn is_declared(&self) -> bool {
        self.undeclare.is_pending()
    }
}

impl Drop for Queryable {
    fn drop(&mut self) {
        self.undeclare();
    }
}

impl std::fmt::Debug for Queryable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queryable")
            .field("key_expr", &self.key_expr)
            .field("declared", &self.is_declared())
            .finish()
    }
}

/// One session on a key-expression messaging substrate.
///
/// Guarantees expected by the layers above:
/// - delivery is at-most-once per subscriber, in publish order per subscriber,
///   unordered across independent keys;
/// - callbacks run on substrate-owned threads, in parallel across
///   subscriptions;
/// - `get` never blocks past its timeout.
pub trait Transport: Send + Sync {
    /// Publish `payload` on a concrete key.
    fn put(&self, key: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Deliver every sample matching `key_expr` to `callback`.
    fn subscribe(
        &self,
        key_expr: &str,
        callback: SampleCallback,
    ) -> Result<Subscription, TransportError>;

    /// Answer queries addressed to keys matching `key_expr`.
    fn declare_queryable(
        &self,
        key_expr: &str,
        callback: QueryCallback,
    ) -> Result<Queryable, TransportError>;

    /// Send a query to a concrete key and collect replies until `timeout`.
    fn get(&self, key: &str, payload: Vec<u8>, timeout: Duration)
        -> Result<Replies, TransportError>;

    /// Close the session, releasing every subscription and queryable it
    /// declared. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}
