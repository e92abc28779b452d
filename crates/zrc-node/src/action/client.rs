// client.rs — ActionClient: sends goals, tracks their feedback and results.
//
// Every sent goal gets an entry in the client's goal table. The result
// subscription is always installed (it feeds the result cache); the feedback
// subscription only when a callback was given. Both are declared before the
// goal is published. The first result for a goal finalizes it: the result is
// cached, both subscriptions are released, blocked waiters are woken, and the
// result callback runs once. Cached results expire after the configured TTL;
// goals that never finish are dropped after the goal timeout.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;
use zrc_codec::Codec;
use zrc_transport::Transport;

use crate::action::messages::{ActionFeedback, ActionResult, CancelMessage, GoalMessage};
use crate::error::{panic_message, ZrcError};
use crate::keys::KeyLayout;
use crate::pubsub::{Publisher, Subscriber};

pub type FeedbackCallback = Box<dyn Fn(ActionFeedback) + Send + Sync>;
pub type ResultCallback = Box<dyn FnOnce(ActionResult) + Send>;

/// Optional callbacks for one goal.
#[derive(Default)]
pub struct GoalCallbacks {
    on_feedback: Option<FeedbackCallback>,
    on_result: Option<ResultCallback>,
}

impl GoalCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called for every feedback message until the goal finishes or is cancelled.
    pub fn on_feedback(mut self, callback: impl Fn(ActionFeedback) + Send + Sync + 'static) -> Self {
        self.on_feedback = Some(Box::new(callback));
        self
    }

    /// Called exactly once with the terminal result.
    pub fn on_result(mut self, callback: impl FnOnce(ActionResult) + Send + 'static) -> Self {
        self.on_result = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for GoalCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoalCallbacks")
            .field("on_feedback", &self.on_feedback.is_some())
            .field("on_result", &self.on_result.is_some())
            .finish()
    }
}

/// Client side of one named action.
pub struct ActionClient {
    shared: Arc<ClientShared>,
    goal_publisher: Publisher<GoalMessage>,
    cancel_publisher: Publisher<CancelMessage>,
    default_wait: Duration,
}

struct ClientShared {
    name: String,
    keys: KeyLayout,
    codec: Arc<dyn Codec>,
    transport: Arc<dyn Transport>,
    result_ttl: Duration,
    goal_timeout: Option<Duration>,
    next_waiter: AtomicU64,
    goals: Mutex<HashMap<String, GoalEntry>>,
}

struct GoalEntry {
    feedback_sub: Option<Subscriber>,
    result_sub: Option<Subscriber>,
    on_result: Option<ResultCallback>,
    waiters: Vec<(u64, mpsc::Sender<ActionResult>)>,
    result: Option<ActionResult>,
    sent_at: Instant,
    finished_at: Option<Instant>,
}

impl GoalEntry {
    fn expired(&self, ttl: Duration, goal_timeout: Option<Duration>) -> bool {
        match self.finished_at {
            Some(at) => at.elapsed() >= ttl,
            None => goal_timeout.is_some_and(|limit| self.sent_at.elapsed() >= limit),
        }
    }
}

impl ActionClient {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        keys: KeyLayout,
        name: &str,
        codec: Arc<dyn Codec>,
        default_wait: Duration,
        result_ttl: Duration,
        goal_timeout: Option<Duration>,
    ) -> Self {
        let goal_publisher = Publisher::new(
            keys.action_goal(name),
            Arc::clone(&codec),
            Arc::clone(&transport),
        );
        let cancel_publisher = Publisher::new(
            keys.action_cancel(name),
            Arc::clone(&codec),
            Arc::clone(&transport),
        );
        Self {
            shared: Arc::new(ClientShared {
                name: name.to_string(),
                keys,
                codec,
                transport,
                result_ttl,
                goal_timeout,
                next_waiter: AtomicU64::new(0),
                goals: Mutex::new(HashMap::new()),
            }),
            goal_publisher,
            cancel_publisher,
            default_wait,
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Send a goal and return its generated id without waiting for it to run.
    pub fn send_goal<G: Serialize + ?Sized>(
        &self,
        goal: &G,
        callbacks: GoalCallbacks,
    ) -> Result<String, ZrcError> {
        self.shared.evict_expired();
        let data = serde_json::to_value(goal)?;
        let goal_id = Uuid::new_v4().to_string();

        let feedback_sub = match callbacks.on_feedback {
            Some(callback) => Some(self.subscribe_feedback(&goal_id, callback)?),
            None => None,
        };
        let result_sub = self.subscribe_result(&goal_id)?;
        self.shared.goals().insert(
            goal_id.clone(),
            GoalEntry {
                feedback_sub,
                result_sub: Some(result_sub),
                on_result: callbacks.on_result,
                waiters: Vec::new(),
                result: None,
                sent_at: Instant::now(),
                finished_at: None,
            },
        );

        if let Err(e) = self.goal_publisher.publish(&GoalMessage::new(&goal_id, data)) {
            let entry = self.shared.goals().remove(&goal_id);
            drop(entry);
            return Err(e);
        }
        tracing::info!(action = %self.shared.name, %goal_id, "goal sent");
        Ok(goal_id)
    }

    /// Ask the server to cancel a goal and stop listening for its feedback.
    ///
    /// The result subscription stays until the terminal result arrives, so a
    /// result callback still observes the outcome.
    pub fn cancel_goal(&self, goal_id: &str) -> Result<(), ZrcError> {
        self.cancel_publisher.publish(&CancelMessage::new(goal_id))?;
        let feedback_sub = self
            .shared
            .goals()
            .get_mut(goal_id)
            .and_then(|entry| entry.feedback_sub.take());
        drop(feedback_sub);
        tracing::info!(action = %self.shared.name, goal_id, "cancel sent");
        Ok(())
    }

    /// Block until the goal's result arrives or `timeout` elapses.
    ///
    /// Goals sent by this client are answered from the goal table: the
    /// cached result if there is one, otherwise the waiter is registered
    /// under the same lock the result is stored under, so it cannot miss it.
    /// Goals sent elsewhere are waited for on a temporary subscription.
    pub fn wait_for_result(&self, goal_id: &str, timeout: Duration) -> Result<ActionResult, ZrcError> {
        self.shared.evict_expired();
        let waiter = {
            let mut goals = self.shared.goals();
            match goals.get_mut(goal_id) {
                Some(entry) => {
                    if let Some(result) = &entry.result {
                        return Ok(result.clone());
                    }
                    let (tx, rx) = mpsc::channel();
                    let id = self.shared.next_waiter.fetch_add(1, Ordering::Relaxed);
                    entry.waiters.push((id, tx));
                    Some((id, rx))
                }
                None => None,
            }
        };

        let Some((waiter_id, rx)) = waiter else {
            return self.wait_untracked(goal_id, timeout);
        };
        match rx.recv_timeout(timeout) {
            Ok(result) => Ok(result),
            Err(_) => {
                self.shared.remove_waiter(goal_id, waiter_id);
                // A result sent between the timeout and the removal is still ours.
                rx.try_recv()
                    .map_err(|_| self.wait_timeout_error(goal_id, timeout))
            }
        }
    }

    fn wait_untracked(&self, goal_id: &str, timeout: Duration) -> Result<ActionResult, ZrcError> {
        let (tx, rx) = mpsc::channel();
        let waiter = Subscriber::declare(
            self.shared.transport.as_ref(),
            &self.shared.keys.action_result(&self.shared.name, goal_id),
            Arc::clone(&self.shared.codec),
            move |result: ActionResult| {
                let _ = tx.send(result);
            },
        )?;
        let outcome = rx
            .recv_timeout(timeout)
            .map_err(|_| self.wait_timeout_error(goal_id, timeout));
        waiter.undeclare();
        outcome
    }

    fn wait_timeout_error(&self, goal_id: &str, timeout: Duration) -> ZrcError {
        ZrcError::timeout(
            format!("waiting for result of goal {goal_id} on action '{}'", self.shared.name),
            timeout,
        )
    }

    /// Wait with the node's configured default timeout.
    pub fn wait_for_result_default(&self, goal_id: &str) -> Result<ActionResult, ZrcError> {
        self.wait_for_result(goal_id, self.default_wait)
    }

    /// The cached result of a goal, if it has finished and not expired.
    pub fn result(&self, goal_id: &str) -> Option<ActionResult> {
        self.shared.evict_expired();
        self.shared
            .goals()
            .get(goal_id)
            .and_then(|entry| entry.result.clone())
    }

    /// Goals sent by this client that have no result yet, sorted.
    pub fn tracked_goals(&self) -> Vec<String> {
        self.shared.evict_expired();
        let mut ids: Vec<String> = self
            .shared
            .goals()
            .iter()
            .filter(|(_, entry)| entry.result.is_none())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn subscribe_feedback(
        &self,
        goal_id: &str,
        callback: FeedbackCallback,
    ) -> Result<Subscriber, ZrcError> {
        let shared = Arc::downgrade(&self.shared);
        let id = goal_id.to_string();
        Subscriber::declare(
            self.shared.transport.as_ref(),
            &self.shared.keys.action_feedback(&self.shared.name, goal_id),
            Arc::clone(&self.shared.codec),
            move |feedback: ActionFeedback| {
                let live = shared
                    .upgrade()
                    .is_some_and(|shared| shared.awaiting_result(&id));
                if live {
                    callback(feedback);
                }
            },
        )
    }

    fn subscribe_result(&self, goal_id: &str) -> Result<Subscriber, ZrcError> {
        let shared: Weak<ClientShared> = Arc::downgrade(&self.shared);
        Subscriber::declare(
            self.shared.transport.as_ref(),
            &self.shared.keys.action_result(&self.shared.name, goal_id),
            Arc::clone(&self.shared.codec),
            move |result: ActionResult| {
                if let Some(shared) = shared.upgrade() {
                    shared.finish(result);
                }
            },
        )
    }
}

impl fmt::Debug for ActionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionClient")
            .field("name", &self.shared.name)
            .field("tracked_goals", &self.tracked_goals())
            .finish()
    }
}

impl ClientShared {
    fn goals(&self) -> MutexGuard<'_, HashMap<String, GoalEntry>> {
        self.goals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn awaiting_result(&self, goal_id: &str) -> bool {
        self.goals()
            .get(goal_id)
            .is_some_and(|entry| entry.result.is_none())
    }

    fn remove_waiter(&self, goal_id: &str, waiter_id: u64) {
        if let Some(entry) = self.goals().get_mut(goal_id) {
            entry.waiters.retain(|(id, _)| *id != waiter_id);
        }
    }

    // First result wins; everything after it is ignored.
    fn finish(&self, result: ActionResult) {
        let (subscriptions, waiters, callback) = {
            let mut goals = self.goals();
            let Some(entry) = goals.get_mut(&result.goal_id) else {
                return;
            };
            if entry.result.is_some() {
                return;
            }
            entry.result = Some(result.clone());
            entry.finished_at = Some(Instant::now());
            (
                (entry.feedback_sub.take(), entry.result_sub.take()),
                std::mem::take(&mut entry.waiters),
                entry.on_result.take(),
            )
        };
        // Released outside the lock; one of these is the subscription
        // currently delivering this result.
        drop(subscriptions);
        for (_, waiter) in waiters {
            let _ = waiter.send(result.clone());
        }

        tracing::info!(
            action = %self.name,
            goal_id = %result.goal_id,
            status = %result.status,
            "goal result received"
        );
        if let Some(callback) = callback {
            let goal_id = result.goal_id.clone();
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(result))) {
                tracing::error!(
                    action = %self.name,
                    %goal_id,
                    error = %panic_message(payload.as_ref()),
                    "result callback panicked"
                );
            }
        }
    }

    // Entries are dropped after the lock is released; dropping one
    // undeclares whatever subscriptions it still holds.
    fn evict_expired(&self) {
        let expired: Vec<(String, GoalEntry)> = {
            let mut goals = self.goals();
            let ids: Vec<String> = goals
                .iter()
                .filter(|(_, entry)| entry.expired(self.result_ttl, self.goal_timeout))
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| goals.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        let mut cached = 0usize;
        for (goal_id, entry) in &expired {
            if entry.result.is_some() {
                cached += 1;
            } else {
                tracing::warn!(
                    action = %self.name,
                    %goal_id,
                    "no result within the goal timeout, no longer tracking goal"
                );
            }
        }
        if cached > 0 {
            tracing::debug!(action = %self.name, count = cached, "evicted cached results");
        }
    }
}
