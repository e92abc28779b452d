// handle.rs — ActionHandle: what an execution routine sees of its goal.
//
// One handle per accepted goal, shared between the server's goal table, the
// goal thread and the routine. The cancel flag is set at most once; the
// terminal result is published at most once.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::action::messages::{now_timestamp, ActionFeedback, ActionResult};
use crate::action::status::ActionStatus;
use crate::error::ZrcError;
use crate::pubsub::Publisher;

/// Per-goal control surface handed to the execution routine.
#[derive(Clone)]
pub struct ActionHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    goal_id: String,
    action_name: String,
    cancel_requested: AtomicBool,
    state: Mutex<HandleState>,
    feedback: Publisher<ActionFeedback>,
    result: Publisher<ActionResult>,
}

struct HandleState {
    status: ActionStatus,
    finalized: bool,
}

impl ActionHandle {
    pub(crate) fn new(
        goal_id: impl Into<String>,
        action_name: impl Into<String>,
        feedback: Publisher<ActionFeedback>,
        result: Publisher<ActionResult>,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                goal_id: goal_id.into(),
                action_name: action_name.into(),
                cancel_requested: AtomicBool::new(false),
                state: Mutex::new(HandleState {
                    status: ActionStatus::Pending,
                    finalized: false,
                }),
                feedback,
                result,
            }),
        }
    }

    pub fn goal_id(&self) -> &str {
        &self.inner.goal_id
    }

    pub fn action_name(&self) -> &str {
        &self.inner.action_name
    }

    /// True once a cancel was requested for this goal. Routines poll this.
    pub fn is_cancel_requested(&self) -> bool {
        self.inner.cancel_requested.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> ActionStatus {
        self.state().status
    }

    /// True once a terminal result has been published.
    pub fn is_finalized(&self) -> bool {
        self.state().finalized
    }

    /// Publish one progress update on the goal's feedback key.
    pub fn publish_feedback<T: Serialize + ?Sized>(&self, feedback: &T) -> Result<(), ZrcError> {
        let message = ActionFeedback {
            goal_id: self.inner.goal_id.clone(),
            feedback: serde_json::to_value(feedback)?,
            timestamp: now_timestamp(),
        };
        self.inner.feedback.publish(&message)
    }

    /// Publish the terminal result.
    ///
    /// `status` must be terminal and reachable from the current status.
    /// Succeeds at most once per goal; later calls fail with
    /// [`ZrcError::GoalFinalized`] and emit nothing.
    pub fn publish_result<T: Serialize + ?Sized>(
        &self,
        result: &T,
        status: ActionStatus,
    ) -> Result<(), ZrcError> {
        let data = serde_json::to_value(result)?;

        // Held across the put so two racing callers cannot both publish.
        let mut state = self.state();
        if state.finalized {
            return Err(ZrcError::GoalFinalized {
                goal_id: self.inner.goal_id.clone(),
            });
        }
        if !status.is_terminal() || !state.status.can_transition_to(status) {
            return Err(ZrcError::InvalidStatus {
                goal_id: self.inner.goal_id.clone(),
                from: state.status,
                to: status,
            });
        }

        let message = ActionResult {
            goal_id: self.inner.goal_id.clone(),
            status,
            result: data,
            timestamp: now_timestamp(),
        };
        self.inner.result.publish(&message)?;
        state.status = status;
        state.finalized = true;
        drop(state);

        tracing::info!(
            action = %self.inner.action_name,
            goal_id = %self.inner.goal_id,
            %status,
            "goal finished"
        );
        Ok(())
    }

    /// Set the cancel flag and move PENDING/ACTIVE to PREEMPTING.
    /// Returns false if a cancel had already been requested.
    pub(crate) fn request_cancel(&self) -> bool {
        if self.inner.cancel_requested.swap(true, Ordering::SeqCst) {
            return false;
        }
        let mut state = self.state();
        if !state.finalized && state.status.can_transition_to(ActionStatus::Preempting) {
            state.status = ActionStatus::Preempting;
        }
        true
    }

    /// PENDING → ACTIVE when the routine starts. A goal already preempting stays so.
    pub(crate) fn mark_active(&self) {
        let mut state = self.state();
        if state.status == ActionStatus::Pending {
            state.status = ActionStatus::Active;
        }
    }

    fn state(&self) -> MutexGuard<'_, HandleState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for ActionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionHandle")
            .field("goal_id", &self.inner.goal_id)
            .field("action_name", &self.inner.action_name)
            .field("status", &self.status())
            .field("cancel_requested", &self.is_cancel_requested())
            .finish()
    }
}
