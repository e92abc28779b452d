// keys.rs — Key-expression layout for topics, services and actions.
//
// Every concern gets its own hierarchical path under a configurable base
// namespace, so one bus can host several independent deployments:
//
//   <ns>/topic/<topic>
//   <ns>/service/req/<service>
//   <ns>/action/goal/<action>
//   <ns>/action/cancel/<action>
//   <ns>/action/*/<action>                 (server side: goal + cancel)
//   <ns>/action/feedback/<action>/<goal-id>
//   <ns>/action/result/<action>/<goal-id>

use serde::{Deserialize, Serialize};

pub const DEFAULT_NAMESPACE: &str = "zrc";

/// Resolves logical names to key expressions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyLayout {
    namespace: String,
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

impl KeyLayout {
    /// Layout rooted at `namespace`. Surrounding slashes are ignored.
    pub fn new(namespace: impl AsRef<str>) -> Self {
        Self {
            namespace: namespace.as_ref().trim_matches('/').to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn topic(&self, topic: &str) -> String {
        format!("{}/topic/{}", self.namespace, clean(topic))
    }

    pub fn service_request(&self, service: &str) -> String {
        format!("{}/service/req/{}", self.namespace, clean(service))
    }

    pub fn action_goal(&self, action: &str) -> String {
        format!("{}/action/goal/{}", self.namespace, clean(action))
    }

    pub fn action_cancel(&self, action: &str) -> String {
        format!("{}/action/cancel/{}", self.namespace, clean(action))
    }

    /// One expression covering both the goal and the cancel key of `action`,
    /// so a server sees requests in the order they were put.
    pub fn action_requests(&self, action: &str) -> String {
        format!("{}/action/*/{}", self.namespace, clean(action))
    }

    pub fn action_feedback(&self, action: &str, goal_id: &str) -> String {
        format!(
            "{}/action/feedback/{}/{}",
            self.namespace,
            clean(action),
            goal_id
        )
    }

    pub fn action_result(&self, action: &str, goal_id: &str) -> String {
        format!(
            "{}/action/result/{}/{}",
            self.namespace,
            clean(action),
            goal_id
        )
    }
}

// ROS-style names like "/navigate" map onto the same key as "navigate".
fn clean(name: &str) -> &str {
    name.trim_matches('/')
}
