// server.rs — ActionServer: accepts goals, runs one thread per goal.
//
// Goals arrive on `<ns>/action/goal/<name>`, cancels on
// `<ns>/action/cancel/<name>`. Both come through one subscription on
// `<ns>/action/*/<name>`, so a cancel put right after its goal is never
// handled before that goal. Each accepted goal gets an ActionHandle in the
// active-goal table and a named thread running the execution routine. A guard
// on the goal thread removes the table entry on every exit path and publishes
// ABORTED when the routine ends without having published a result.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use serde_json::{json, Value};
use zrc_codec::Codec;
use zrc_transport::Transport;

use crate::action::handle::ActionHandle;
use crate::action::messages::{CancelMessage, GoalMessage};
use crate::action::status::ActionStatus;
use crate::error::{panic_message, ZrcError};
use crate::keys::KeyLayout;
use crate::pubsub::{Publisher, Subscriber};

/// The execution routine: goal id, goal payload, and the goal's handle.
pub type ExecuteFn = dyn Fn(&str, Value, ActionHandle) -> anyhow::Result<()> + Send + Sync;

/// Serves one named action.
pub struct ActionServer {
    shared: Arc<ServerShared>,
    requests: Subscriber,
}

struct ServerShared {
    name: String,
    keys: KeyLayout,
    goal_key: String,
    cancel_key: String,
    codec: Arc<dyn Codec>,
    transport: Arc<dyn Transport>,
    goals: Mutex<HashMap<String, ActionHandle>>,
    execute: Box<ExecuteFn>,
}

impl ActionServer {
    pub(crate) fn declare<F>(
        transport: Arc<dyn Transport>,
        keys: KeyLayout,
        name: &str,
        codec: Arc<dyn Codec>,
        execute: F,
    ) -> Result<Self, ZrcError>
    where
        F: Fn(&str, Value, ActionHandle) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let requests_key = keys.action_requests(name);
        let shared = Arc::new(ServerShared {
            name: name.to_string(),
            goal_key: keys.action_goal(name),
            cancel_key: keys.action_cancel(name),
            keys,
            codec: Arc::clone(&codec),
            transport: Arc::clone(&transport),
            goals: Mutex::new(HashMap::new()),
            execute: Box::new(execute),
        });

        let dispatch = Arc::clone(&shared);
        let requests = Subscriber::declare_keyed(
            transport.as_ref(),
            &requests_key,
            codec,
            move |key: &str, message: Value| dispatch.dispatch(key, &message),
        )?;

        tracing::info!(action = name, goal_key = %shared.goal_key, "action server ready");
        Ok(Self { shared, requests })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Ids of goals whose routine has not finished yet, sorted.
    pub fn active_goals(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.shared.goals().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn goal_status(&self, goal_id: &str) -> Option<ActionStatus> {
        self.shared.goals().get(goal_id).map(ActionHandle::status)
    }

    /// Request cancellation locally, as if a cancel message had arrived.
    /// Returns false if the goal is unknown.
    pub fn cancel_goal(&self, goal_id: &str) -> bool {
        self.shared.cancel(goal_id)
    }

    /// Stop accepting goals and cancels. Running goals finish normally.
    pub fn undeclare(&self) {
        self.requests.undeclare();
    }
}

impl fmt::Debug for ActionServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionServer")
            .field("name", &self.shared.name)
            .field("active_goals", &self.active_goals())
            .finish()
    }
}

impl ServerShared {
    fn goals(&self) -> MutexGuard<'_, HashMap<String, ActionHandle>> {
        self.goals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn new_handle(&self, goal_id: &str) -> ActionHandle {
        ActionHandle::new(
            goal_id,
            &self.name,
            Publisher::new(
                self.keys.action_feedback(&self.name, goal_id),
                Arc::clone(&self.codec),
                Arc::clone(&self.transport),
            ),
            Publisher::new(
                self.keys.action_result(&self.name, goal_id),
                Arc::clone(&self.codec),
                Arc::clone(&self.transport),
            ),
        )
    }

    fn dispatch(self: &Arc<Self>, key: &str, message: &Value) {
        if key == self.goal_key {
            self.accept_goal(message);
        } else if key == self.cancel_key {
            self.accept_cancel(message);
        } else {
            tracing::trace!(action = %self.name, key, "ignoring request on unrelated key");
        }
    }

    fn accept_goal(self: &Arc<Self>, message: &Value) {
        let goal = match GoalMessage::parse(message) {
            Ok(goal) => goal,
            Err(reason) => {
                tracing::warn!(action = %self.name, %reason, "dropping invalid goal message");
                return;
            }
        };

        let handle = {
            let mut goals = self.goals();
            if goals.contains_key(&goal.goal_id) {
                tracing::warn!(
                    action = %self.name,
                    goal_id = %goal.goal_id,
                    "dropping goal with an id that is already active"
                );
                return;
            }
            let handle = self.new_handle(&goal.goal_id);
            goals.insert(goal.goal_id.clone(), handle.clone());
            handle
        };
        tracing::info!(action = %self.name, goal_id = %goal.goal_id, "goal accepted");

        let shared = Arc::clone(self);
        let goal_id = goal.goal_id.clone();
        let thread_handle = handle.clone();
        let spawned = thread::Builder::new()
            .name(format!("zrc-goal-{}", short_id(&goal.goal_id)))
            .spawn(move || shared.run_goal(goal_id, goal.data, thread_handle));

        if let Err(e) = spawned {
            self.goals().remove(handle.goal_id());
            tracing::error!(
                action = %self.name,
                goal_id = %handle.goal_id(),
                error = %e,
                "failed to start goal thread"
            );
            let payload = json!({ "error": format!("failed to start goal: {e}") });
            if let Err(e) = handle.publish_result(&payload, ActionStatus::Rejected) {
                tracing::error!(goal_id = %handle.goal_id(), error = %e, "failed to publish rejection");
            }
        }
    }

    fn run_goal(self: Arc<Self>, goal_id: String, data: Value, handle: ActionHandle) {
        let mut guard = GoalGuard {
            shared: Arc::clone(&self),
            handle: handle.clone(),
            failure: None,
        };
        handle.mark_active();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            (self.execute)(&goal_id, data, handle)
        }));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let message = format!("{e:#}");
                tracing::warn!(action = %self.name, %goal_id, error = %message, "execution routine failed");
                guard.failure = Some(message);
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(action = %self.name, %goal_id, error = %message, "execution routine panicked");
                guard.failure = Some(message);
            }
        }
    }

    fn accept_cancel(&self, message: &Value) {
        match CancelMessage::parse(message) {
            Ok(cancel) => {
                self.cancel(&cancel.goal_id);
            }
            Err(reason) => {
                tracing::warn!(action = %self.name, %reason, "dropping invalid cancel message");
            }
        }
    }

    fn cancel(&self, goal_id: &str) -> bool {
        let handle = self.goals().get(goal_id).cloned();
        match handle {
            Some(handle) => {
                if handle.request_cancel() {
                    tracing::info!(action = %self.name, goal_id, "cancel requested");
                }
                true
            }
            None => {
                tracing::debug!(action = %self.name, goal_id, "ignoring cancel for unknown goal");
                false
            }
        }
    }
}

// Runs when the goal thread leaves run_goal, however it leaves.
struct GoalGuard {
    shared: Arc<ServerShared>,
    handle: ActionHandle,
    failure: Option<String>,
}

impl Drop for GoalGuard {
    fn drop(&mut self) {
        let goal_id = self.handle.goal_id().to_string();
        self.shared.goals().remove(&goal_id);

        if self.handle.is_finalized() {
            return;
        }
        let message = self
            .failure
            .take()
            .unwrap_or_else(|| "execution routine finished without publishing a result".to_string());
        match self
            .handle
            .publish_result(&json!({ "error": message }), ActionStatus::Aborted)
        {
            Ok(()) => {}
            // A racing publish from a clone of the handle got there first.
            Err(ZrcError::GoalFinalized { .. }) => {}
            Err(e) => {
                tracing::error!(
                    action = %self.shared.name,
                    %goal_id,
                    error = %e,
                    "failed to publish ABORTED result"
                );
            }
        }
    }
}

fn short_id(goal_id: &str) -> &str {
    goal_id.get(..8).unwrap_or(goal_id)
}
