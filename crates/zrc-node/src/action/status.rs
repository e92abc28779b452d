// status.rs — ActionStatus: the per-goal lifecycle state machine.
//
//   PENDING → ACTIVE → SUCCEEDED | ABORTED | REJECTED | PREEMPTED | LOST
//   PENDING → REJECTED | ABORTED
//   PENDING | ACTIVE → PREEMPTING → PREEMPTED | SUCCEEDED | ABORTED | REJECTED | LOST
//
// PREEMPTING marks "cancel requested, routine has not acknowledged yet".
// Terminal statuses have no outgoing transitions. The numeric values are part
// of the wire format and must never be renumbered.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a goal. Serialized as its wire ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum ActionStatus {
    /// Goal received and validated, routine not started yet.
    Pending = 0,
    /// Execution routine is running.
    Active = 1,
    /// Cancel requested; waiting for the routine to acknowledge.
    Preempting = 2,
    Succeeded = 3,
    Aborted = 4,
    Rejected = 5,
    Preempted = 6,
    Lost = 7,
}

impl ActionStatus {
    pub const ALL: [ActionStatus; 8] = [
        ActionStatus::Pending,
        ActionStatus::Active,
        ActionStatus::Preempting,
        ActionStatus::Succeeded,
        ActionStatus::Aborted,
        ActionStatus::Rejected,
        ActionStatus::Preempted,
        ActionStatus::Lost,
    ];

    /// Terminal statuses end the goal; exactly one is reported per goal.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ActionStatus::Succeeded
                | ActionStatus::Aborted
                | ActionStatus::Rejected
                | ActionStatus::Preempted
                | ActionStatus::Lost
        )
    }

    /// Check whether moving from this status to `next` is valid.
    pub fn can_transition_to(self, next: ActionStatus) -> bool {
        use ActionStatus::*;
        matches!(
            (self, next),
            (Pending, Active | Preempting | Rejected | Aborted)
                | (Active, Preempting | Succeeded | Aborted | Rejected | Preempted | Lost)
                | (Preempting, Preempted | Succeeded | Aborted | Rejected | Lost)
        )
    }
}

impl From<ActionStatus> for u8 {
    fn from(status: ActionStatus) -> u8 {
        status as u8
    }
}

impl TryFrom<u8> for ActionStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        ActionStatus::ALL
            .get(usize::from(value))
            .copied()
            .ok_or_else(|| format!("unknown action status {value}"))
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionStatus::Pending => "PENDING",
            ActionStatus::Active => "ACTIVE",
            ActionStatus::Preempting => "PREEMPTING",
            ActionStatus::Succeeded => "SUCCEEDED",
            ActionStatus::Aborted => "ABORTED",
            ActionStatus::Rejected => "REJECTED",
            ActionStatus::Preempted => "PREEMPTED",
            ActionStatus::Lost => "LOST",
        };
        f.write_str(name)
    }
}
