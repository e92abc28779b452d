// messages.rs — Wire envelopes of the action protocol.
//
//   goal      {goal_id, data, timestamp}
//   cancel    {goal_id, timestamp}
//   feedback  {goal_id, data, timestamp}
//   result    {goal_id, data, status, timestamp}
//
// Timestamps are float seconds since the Unix epoch. Inbound goal and cancel
// messages are validated by hand from a dynamic value so malformed traffic
// can be logged precisely and dropped.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::status::ActionStatus;

/// Current wall-clock time as float seconds since the Unix epoch.
pub fn now_timestamp() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// A goal submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalMessage {
    pub goal_id: String,
    pub data: Value,
    pub timestamp: f64,
}

impl GoalMessage {
    pub fn new(goal_id: impl Into<String>, data: Value) -> Self {
        Self {
            goal_id: goal_id.into(),
            data,
            timestamp: now_timestamp(),
        }
    }

    /// Validate an inbound goal: non-empty string `goal_id` and a `data` key.
    pub fn parse(value: &Value) -> Result<Self, String> {
        let object = value
            .as_object()
            .ok_or_else(|| "goal message is not an object".to_string())?;
        let goal_id = required_goal_id(object.get("goal_id"))?;
        let data = object
            .get("data")
            .cloned()
            .ok_or_else(|| "missing data".to_string())?;
        let timestamp = object
            .get("timestamp")
            .and_then(Value::as_f64)
            .unwrap_or_else(now_timestamp);
        Ok(Self {
            goal_id,
            data,
            timestamp,
        })
    }
}

/// A cancel request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelMessage {
    pub goal_id: String,
    pub timestamp: f64,
}

impl CancelMessage {
    pub fn new(goal_id: impl Into<String>) -> Self {
        Self {
            goal_id: goal_id.into(),
            timestamp: now_timestamp(),
        }
    }

    pub fn parse(value: &Value) -> Result<Self, String> {
        let object = value
            .as_object()
            .ok_or_else(|| "cancel message is not an object".to_string())?;
        let goal_id = required_goal_id(object.get("goal_id"))?;
        let timestamp = object
            .get("timestamp")
            .and_then(Value::as_f64)
            .unwrap_or_else(now_timestamp);
        Ok(Self { goal_id, timestamp })
    }
}

fn required_goal_id(value: Option<&Value>) -> Result<String, String> {
    match value.and_then(Value::as_str) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        Some(_) => Err("empty goal_id".to_string()),
        None => Err("missing goal_id".to_string()),
    }
}

/// One progress update for a goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionFeedback {
    pub goal_id: String,
    #[serde(rename = "data")]
    pub feedback: Value,
    pub timestamp: f64,
}

/// The terminal outcome of a goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub goal_id: String,
    pub status: ActionStatus,
    #[serde(rename = "data")]
    pub result: Value,
    pub timestamp: f64,
}

impl ActionResult {
    pub fn succeeded(&self) -> bool {
        self.status == ActionStatus::Succeeded
    }
}
